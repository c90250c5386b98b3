//! Stateless service over `plan.md`.
//!
//! `PlanManager` holds no state of its own; it computes everything from the
//! live filesystem through a non-owning reference to a [`Workspace`].

use regex::Regex;

use crate::workspace::{Workspace, WorkspaceResult};

const PLAN_PATH: &str = "plan.md";

const COMPLETE_MARKERS: &[&str] = &[
    "# complete",
    "## complete",
    "status: complete",
    "status: done",
    "goal achieved",
    "all phases complete",
    "job complete",
];

const INCOMPLETE_ITEM_MARKERS: &[&str] = &[
    "- [ ]",
    "status: pending",
    "status: in progress",
    "status: todo",
    "(pending)",
    "(in progress)",
];

const COMPLETE_ITEM_MARKERS: &[&str] = &["- [x]", "status: complete", "status: done", "(complete)", "(done)"];

pub struct PlanManager<'a> {
    workspace: &'a Workspace,
}

impl<'a> PlanManager<'a> {
    pub fn new(workspace: &'a Workspace) -> Self {
        Self { workspace }
    }

    pub fn exists(&self) -> WorkspaceResult<bool> {
        self.workspace.exists(PLAN_PATH)
    }

    pub fn read(&self) -> WorkspaceResult<String> {
        if !self.exists()? {
            return Ok(String::new());
        }
        self.workspace.read_file(PLAN_PATH)
    }

    pub fn write(&self, content: &str) -> WorkspaceResult<()> {
        self.workspace.write_file(PLAN_PATH, content)
    }

    /// Completion heuristic, checked in order, first match decides.
    pub fn is_complete(&self, content: Option<&str>) -> WorkspaceResult<bool> {
        let owned;
        let text = match content {
            Some(c) => c,
            None => {
                owned = self.read()?;
                &owned
            }
        };
        let lower = text.to_lowercase();

        if COMPLETE_MARKERS.iter().any(|m| lower.contains(m)) {
            return Ok(true);
        }

        let has_phase_header = Regex::new(r"(?im)^#+\s*(phase|step)\b")
            .unwrap()
            .is_match(text);

        if has_phase_header && INCOMPLETE_ITEM_MARKERS.iter().any(|m| lower.contains(m)) {
            return Ok(false);
        }

        if COMPLETE_ITEM_MARKERS.iter().any(|m| lower.contains(m)) {
            return Ok(true);
        }

        Ok(false)
    }

    /// First phase header whose surrounding 5 lines contain no completion
    /// marker.
    pub fn get_current_phase(&self) -> WorkspaceResult<Option<String>> {
        let text = self.read()?;
        let lines: Vec<&str> = text.lines().collect();
        let header_re = Regex::new(r"(?i)^#+\s*(phase|step)\b").unwrap();

        for (i, line) in lines.iter().enumerate() {
            if header_re.is_match(line) {
                let window_start = i.saturating_sub(2);
                let window_end = (i + 3).min(lines.len());
                let window = lines[window_start..window_end].join("\n").to_lowercase();
                let done = window.contains("(complete)")
                    || window.contains("(done)")
                    || window.contains("status: complete")
                    || window.contains("status: done");
                if !done {
                    return Ok(Some(line.trim().to_string()));
                }
            }
        }
        Ok(None)
    }

    /// Best-effort: append a completion marker next to the named phase
    /// header. Returns false if the phase id cannot be located.
    pub fn mark_phase_complete(&self, id: &str) -> WorkspaceResult<bool> {
        let text = self.read()?;
        let mut found = false;
        let updated: Vec<String> = text
            .lines()
            .map(|line| {
                if line.to_lowercase().contains(&id.to_lowercase()) && !found {
                    found = true;
                    format!("{line} (complete)")
                } else {
                    line.to_string()
                }
            })
            .collect();
        if found {
            self.write(&updated.join("\n"))?;
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn workspace(dir: &std::path::Path) -> Workspace {
        let mut config = crate::workspace::WorkspaceConfig::default();
        config.git_versioning = false;
        let ws = Workspace::new(dir, "test-job", config);
        ws.initialize().unwrap();
        ws
    }

    #[test]
    fn empty_plan_is_not_complete() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let pm = PlanManager::new(&ws);
        assert!(!pm.is_complete(None).unwrap());
    }

    #[test]
    fn explicit_completion_marker_wins() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let pm = PlanManager::new(&ws);
        pm.write("# Plan\n\nstatus: complete\n").unwrap();
        assert!(pm.is_complete(None).unwrap());
    }

    #[test]
    fn pending_item_blocks_completion() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let pm = PlanManager::new(&ws);
        pm.write("## Phase 1\n- [ ] do the thing\n").unwrap();
        assert!(!pm.is_complete(None).unwrap());
    }

    #[test]
    fn all_checked_items_complete() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let pm = PlanManager::new(&ws);
        pm.write("## Phase 1\n- [x] done already\n").unwrap();
        assert!(pm.is_complete(None).unwrap());
    }

    #[test]
    fn current_phase_skips_completed_headers() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let pm = PlanManager::new(&ws);
        pm.write("## Phase 1 (complete)\n\n## Phase 2\nin progress\n")
            .unwrap();
        let phase = pm.get_current_phase().unwrap().unwrap();
        assert!(phase.contains("Phase 2"));
    }
}
