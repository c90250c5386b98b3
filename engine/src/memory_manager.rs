//! Stateless service over `workspace.md`, the agent's long-term memory.
//!
//! `workspace.md` is always injected into the system prompt and survives
//! every compaction pass; this manager just mediates reads/writes and
//! section-scoped edits against the live file.

use std::collections::BTreeMap;

use crate::workspace::{Workspace, WorkspaceResult};

const MEMORY_PATH: &str = "workspace.md";

pub struct MemoryManager<'a> {
    workspace: &'a Workspace,
}

impl<'a> MemoryManager<'a> {
    pub fn new(workspace: &'a Workspace) -> Self {
        Self { workspace }
    }

    pub fn exists(&self) -> WorkspaceResult<bool> {
        self.workspace.exists(MEMORY_PATH)
    }

    pub fn read(&self) -> WorkspaceResult<String> {
        if !self.exists()? {
            return Ok(String::new());
        }
        self.workspace.read_file(MEMORY_PATH)
    }

    pub fn write(&self, content: &str) -> WorkspaceResult<()> {
        self.workspace.write_file(MEMORY_PATH, content)
    }

    /// Find a `##`/`###` header matching `name` case-insensitively and
    /// return its body (everything up to the next header of same-or-higher
    /// level).
    pub fn get_section(&self, name: &str) -> WorkspaceResult<Option<String>> {
        let text = self.read()?;
        let lines: Vec<&str> = text.lines().collect();
        let needle = name.to_lowercase();

        let mut start = None;
        let mut start_level = 0usize;
        for (i, line) in lines.iter().enumerate() {
            if let Some(level) = header_level(line) {
                let title = line.trim_start_matches('#').trim().to_lowercase();
                if title == needle {
                    start = Some(i);
                    start_level = level;
                    break;
                }
            }
        }

        let Some(start) = start else {
            return Ok(None);
        };

        let mut end = lines.len();
        for (i, line) in lines.iter().enumerate().skip(start + 1) {
            if let Some(level) = header_level(line) {
                if level <= start_level {
                    end = i;
                    break;
                }
            }
        }

        Ok(Some(lines[start + 1..end].join("\n").trim().to_string()))
    }

    /// Replace an existing section's body, or append a new `##` section if
    /// absent.
    pub fn update_section(&self, name: &str, content: &str) -> WorkspaceResult<bool> {
        let text = self.read()?;
        let lines: Vec<&str> = text.lines().collect();
        let needle = name.to_lowercase();

        let mut header_idx = None;
        let mut header_level_found = 0usize;
        for (i, line) in lines.iter().enumerate() {
            if let Some(level) = header_level(line) {
                let title = line.trim_start_matches('#').trim().to_lowercase();
                if title == needle {
                    header_idx = Some(i);
                    header_level_found = level;
                    break;
                }
            }
        }

        let new_text = if let Some(idx) = header_idx {
            let mut end = lines.len();
            for (i, line) in lines.iter().enumerate().skip(idx + 1) {
                if let Some(level) = header_level(line) {
                    if level <= header_level_found {
                        end = i;
                        break;
                    }
                }
            }
            let mut rebuilt: Vec<String> = lines[..=idx].iter().map(|s| s.to_string()).collect();
            rebuilt.push(content.to_string());
            rebuilt.extend(lines[end..].iter().map(|s| s.to_string()));
            rebuilt.join("\n")
        } else {
            let mut rebuilt = text.trim_end().to_string();
            if !rebuilt.is_empty() {
                rebuilt.push_str("\n\n");
            }
            rebuilt.push_str(&format!("## {name}\n{content}\n"));
            rebuilt
        };

        self.write(&new_text)?;
        Ok(true)
    }

    pub fn append_to_section(&self, name: &str, item: &str) -> WorkspaceResult<bool> {
        let existing = self.get_section(name)?.unwrap_or_default();
        let updated = if existing.trim().is_empty() {
            format!("- {item}")
        } else {
            format!("{existing}\n- {item}")
        };
        self.update_section(name, &updated)
    }

    /// Parse a `Current State` section of `key: value` lines.
    pub fn get_state(&self) -> WorkspaceResult<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        if let Some(section) = self.get_section("Current State")? {
            for line in section.lines() {
                let line = line.trim().trim_start_matches('-').trim();
                if let Some((k, v)) = line.split_once(':') {
                    map.insert(k.trim().to_string(), v.trim().to_string());
                }
            }
        }
        Ok(map)
    }

    pub fn set_state(&self, key: &str, value: &str) -> WorkspaceResult<bool> {
        let mut state = self.get_state()?;
        state.insert(key.to_string(), value.to_string());
        let body = state
            .iter()
            .map(|(k, v)| format!("- {k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.update_section("Current State", &body)
    }
}

fn header_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('#') {
        return None;
    }
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level < 2 || level > 3 {
        return None;
    }
    Some(level)
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
    fn get_section_returns_body_between_headers() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let mm = MemoryManager::new(&ws);
        mm.write("## Learnings\nsome text\n\n## Other\nmore\n").unwrap();
        let section = mm.get_section("learnings").unwrap().unwrap();
        assert_eq!(section, "some text");
    }

    #[test]
    fn update_section_appends_new_section_when_absent() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let mm = MemoryManager::new(&ws);
        mm.update_section("Learnings", "first note").unwrap();
        let section = mm.get_section("Learnings").unwrap().unwrap();
        assert_eq!(section, "first note");
    }

    #[test]
    fn append_to_section_adds_bullet() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let mm = MemoryManager::new(&ws);
        mm.append_to_section("Learnings", "one").unwrap();
        mm.append_to_section("Learnings", "two").unwrap();
        let section = mm.get_section("Learnings").unwrap().unwrap();
        assert_eq!(section, "- one\n- two");
    }

    #[test]
    fn state_round_trips() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let mm = MemoryManager::new(&ws);
        mm.set_state("phase", "3").unwrap();
        mm.set_state("status", "active").unwrap();
        let state = mm.get_state().unwrap();
        assert_eq!(state.get("phase").unwrap(), "3");
        assert_eq!(state.get("status").unwrap(), "active");
    }
}
