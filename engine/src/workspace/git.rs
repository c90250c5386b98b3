//! Optional git collaborator for a workspace.
//!
//! Git is treated as an opaque commit/tag sink: every method returns a
//! success/failure boolean (or an empty result) rather than propagating an
//! error, matching the "git failure never propagates" rule. Transient
//! failures (lock contention) are retried with exponential backoff.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;

pub struct GitSink {
    working_dir: PathBuf,
    output_truncate_lines: usize,
}

impl GitSink {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            output_truncate_lines: 200,
        }
    }

    fn run(&self, args: &[&str]) -> Option<String> {
        let mut last_err: Option<String> = None;
        for attempt in 0..=MAX_RETRIES {
            let output = Command::new("git")
                .args(args)
                .current_dir(&self.working_dir)
                .output();

            match output {
                Ok(out) if out.status.success() => {
                    return Some(String::from_utf8_lossy(&out.stdout).trim().to_string());
                }
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
                    let retryable = stderr.to_lowercase().contains("lock")
                        || stderr.to_lowercase().contains("another git process");
                    if retryable && attempt < MAX_RETRIES {
                        std::thread::sleep(Duration::from_millis(
                            RETRY_BASE_DELAY_MS * (1 << attempt),
                        ));
                        last_err = Some(stderr);
                        continue;
                    }
                    tracing::warn!(git_args = ?args, error = %stderr, "git command failed");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(git_args = ?args, error = %e, "git not available");
                    return None;
                }
            }
        }
        tracing::warn!(git_args = ?args, error = ?last_err, "git command exhausted retries");
        None
    }

    fn truncate(&self, text: String) -> String {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() <= self.output_truncate_lines {
            return text;
        }
        let mut out: String = lines[..self.output_truncate_lines].join("\n");
        out.push_str(&format!(
            "\n[truncated {} more lines]",
            lines.len() - self.output_truncate_lines
        ));
        out
    }

    pub fn is_initialized(&self) -> bool {
        self.working_dir.join(".git").is_dir()
    }

    pub fn init(&self) -> bool {
        self.run(&["init"]).is_some()
    }

    pub fn write_gitignore(&self, patterns: &[String]) -> bool {
        let path = self.working_dir.join(".gitignore");
        std::fs::write(&path, patterns.join("\n")).is_ok()
    }

    pub fn commit(&self, message: &str, allow_empty: bool) -> bool {
        if self.run(&["add", "-A"]).is_none() {
            return false;
        }
        let mut args = vec!["commit", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.run(&args).is_some()
    }

    pub fn tag(&self, name: &str, message: Option<&str>) -> bool {
        match message {
            Some(msg) => self.run(&["tag", "-a", name, "-m", msg]).is_some(),
            None => self.run(&["tag", name]).is_some(),
        }
    }

    pub fn log(&self, count: usize) -> String {
        let n = count.to_string();
        self.run(&["log", "--oneline", "-n", &n])
            .map(|s| self.truncate(s))
            .unwrap_or_default()
    }

    pub fn show(&self, rev: &str) -> String {
        self.run(&["show", rev])
            .map(|s| self.truncate(s))
            .unwrap_or_default()
    }

    pub fn diff(&self) -> String {
        self.run(&["diff"])
            .map(|s| self.truncate(s))
            .unwrap_or_default()
    }

    pub fn status(&self) -> String {
        self.run(&["status", "--porcelain"]).unwrap_or_default()
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        !self.status().is_empty()
    }

    pub fn list_tags(&self, pattern: Option<&str>) -> Vec<String> {
        let mut args = vec!["tag", "-l"];
        if let Some(p) = pattern {
            args.push(p);
        }
        self.run(&args)
            .map(|s| s.lines().map(|l| l.to_string()).collect())
            .unwrap_or_default()
    }
}
