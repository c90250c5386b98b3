//! Per-job sandboxed filesystem workspace.
//!
//! Every relative path operation is resolved against the workspace root and
//! checked with [`sandbox_check`]; any path that would resolve outside the
//! root fails with [`WorkspaceError::PathEscape`]. This is a hard security
//! invariant, not a best-effort check.

mod git;

pub use git::GitSink;

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("path escapes workspace root: {path}")]
    PathEscape { path: PathBuf },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not found: {path}")]
    NotFound { path: PathBuf },
}

impl WorkspaceError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Standard subdirectories created for every job on `initialize()`.
pub const DEFAULT_STRUCTURE: &[&str] = &["archive", "documents", "output"];

/// File extensions `search_files` treats as binary and skips.
const BINARY_EXTENSIONS: &[&str] = &[
    "db", "png", "jpg", "jpeg", "gif", "pdf", "zip", "so", "bin", "exe", "ico",
];

#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub structure: Vec<String>,
    pub git_versioning: bool,
    pub git_ignore_patterns: Vec<String>,
    pub search_truncate_lines: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            structure: DEFAULT_STRUCTURE.iter().map(|s| s.to_string()).collect(),
            git_versioning: true,
            git_ignore_patterns: vec![
                "*.db".to_string(),
                "*.log".to_string(),
                "documents/".to_string(),
            ],
            search_truncate_lines: 200,
        }
    }
}

/// Resolve the base directory under which per-job workspaces live.
///
/// Priority: (1) explicit override, (2) `WORKSPACE_PATH` env var, (3) a
/// conventional container path (`/workspace`) if it exists, (4) a
/// project-relative `./workspace` default.
pub fn resolve_base_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(env_path) = std::env::var("WORKSPACE_PATH") {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }
    let container_path = PathBuf::from("/workspace");
    if container_path.is_dir() {
        return container_path;
    }
    PathBuf::from("workspace")
}

/// Resolve `rel` against `root`, failing if the result would escape `root`.
///
/// `root` itself need not exist yet; the check is purely lexical/component
/// based so it also rejects escapes via a path that doesn't exist on disk.
pub fn sandbox_check(root: &Path, rel: &Path) -> WorkspaceResult<PathBuf> {
    if rel.is_absolute() {
        return Err(WorkspaceError::PathEscape {
            path: rel.to_path_buf(),
        });
    }

    let mut resolved = root.to_path_buf();
    for component in rel.components() {
        use std::path::Component;
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() || !resolved.starts_with(root) {
                    return Err(WorkspaceError::PathEscape {
                        path: rel.to_path_buf(),
                    });
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(WorkspaceError::PathEscape {
                    path: rel.to_path_buf(),
                });
            }
        }
    }

    if !resolved.starts_with(root) {
        return Err(WorkspaceError::PathEscape {
            path: rel.to_path_buf(),
        });
    }

    Ok(resolved)
}

/// A per-job sandbox rooted at `<base>/job_<id>/`.
pub struct Workspace {
    root: PathBuf,
    config: WorkspaceConfig,
    git: Option<GitSink>,
}

impl Workspace {
    pub fn new(base: &Path, job_id: &str, config: WorkspaceConfig) -> Self {
        let root = base.join(format!("job_{job_id}"));
        let git = if config.git_versioning {
            Some(GitSink::new(root.clone()))
        } else {
            None
        };
        Self { root, config, git }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git(&self) -> Option<&GitSink> {
        self.git.as_ref()
    }

    fn resolve(&self, rel: &str) -> WorkspaceResult<PathBuf> {
        sandbox_check(&self.root, Path::new(rel))
    }

    /// Create the workspace root and standard subdirectories. Idempotent:
    /// calling this twice is equivalent to calling it once, and never
    /// overwrites existing files.
    pub fn initialize(&self) -> WorkspaceResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| WorkspaceError::io(&self.root, e))?;
        for sub in &self.config.structure {
            let dir = self.resolve(sub)?;
            fs::create_dir_all(&dir).map_err(|e| WorkspaceError::io(&dir, e))?;
        }

        if let Some(git) = &self.git {
            if !git.is_initialized() {
                git.init();
                git.write_gitignore(&self.config.git_ignore_patterns);
                git.commit("Initial workspace snapshot", true);
            }
        }

        Ok(())
    }

    pub fn exists(&self, rel: &str) -> WorkspaceResult<bool> {
        Ok(self.resolve(rel)?.exists())
    }

    pub fn read_file(&self, rel: &str) -> WorkspaceResult<String> {
        let path = self.resolve(rel)?;
        fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WorkspaceError::NotFound { path: path.clone() }
            } else {
                WorkspaceError::io(path, e)
            }
        })
    }

    pub fn write_file(&self, rel: &str, content: &str) -> WorkspaceResult<()> {
        let path = self.resolve(rel)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| WorkspaceError::io(parent, e))?;
        }
        fs::write(&path, content).map_err(|e| WorkspaceError::io(path, e))
    }

    pub fn append_file(&self, rel: &str, content: &str) -> WorkspaceResult<()> {
        use std::io::Write;
        let path = self.resolve(rel)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| WorkspaceError::io(parent, e))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| WorkspaceError::io(&path, e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| WorkspaceError::io(&path, e))
    }

    pub fn create_directory(&self, rel: &str) -> WorkspaceResult<()> {
        let path = self.resolve(rel)?;
        fs::create_dir_all(&path).map_err(|e| WorkspaceError::io(path, e))
    }

    pub fn delete_directory(&self, rel: &str) -> WorkspaceResult<()> {
        let path = self.resolve(rel)?;
        if path.exists() {
            fs::remove_dir_all(&path).map_err(|e| WorkspaceError::io(path, e))?;
        }
        Ok(())
    }

    pub fn delete_file(&self, rel: &str) -> WorkspaceResult<()> {
        let path = self.resolve(rel)?;
        if path.exists() {
            fs::remove_file(&path).map_err(|e| WorkspaceError::io(path, e))?;
        }
        Ok(())
    }

    pub fn move_file(&self, src: &str, dst: &str) -> WorkspaceResult<()> {
        let src_path = self.resolve(src)?;
        let dst_path = self.resolve(dst)?;
        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent).map_err(|e| WorkspaceError::io(parent, e))?;
        }
        fs::rename(&src_path, &dst_path).map_err(|e| WorkspaceError::io(src_path, e))
    }

    pub fn copy_file(&self, src: &str, dst: &str) -> WorkspaceResult<()> {
        let src_path = self.resolve(src)?;
        let dst_path = self.resolve(dst)?;
        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent).map_err(|e| WorkspaceError::io(parent, e))?;
        }
        fs::copy(&src_path, &dst_path).map_err(|e| WorkspaceError::io(src_path, e))?;
        Ok(())
    }

    pub fn list_files(&self, rel: &str, pattern: Option<&str>) -> WorkspaceResult<Vec<String>> {
        let dir = self.resolve(rel)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| WorkspaceError::io(&dir, e))? {
            let entry = entry.map_err(|e| WorkspaceError::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(p) = pattern {
                if !name.contains(p) {
                    continue;
                }
            }
            out.push(name);
        }
        out.sort();
        Ok(out)
    }

    pub fn search_files(
        &self,
        query: &str,
        rel: &str,
        case_sensitive: bool,
    ) -> WorkspaceResult<Vec<String>> {
        let dir = self.resolve(rel)?;
        let mut matches = Vec::new();
        if !dir.exists() {
            return Ok(matches);
        }
        let needle = if case_sensitive {
            query.to_string()
        } else {
            query.to_lowercase()
        };

        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let entries = match fs::read_dir(&current) {
                Ok(e) => e,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                    if BINARY_EXTENSIONS.contains(&ext) {
                        continue;
                    }
                }
                let Ok(content) = fs::read_to_string(&path) else {
                    continue;
                };
                let haystack = if case_sensitive {
                    content
                } else {
                    content.to_lowercase()
                };
                if haystack.contains(&needle) {
                    matches.push(path.strip_prefix(&self.root).unwrap_or(&path).display().to_string());
                }
            }
        }
        matches.sort();
        Ok(matches)
    }

    pub fn get_size(&self, rel: &str) -> WorkspaceResult<u64> {
        let path = self.resolve(rel)?;
        let meta = fs::metadata(&path).map_err(|e| WorkspaceError::io(path, e))?;
        Ok(meta.len())
    }

    pub fn cleanup(&self) -> WorkspaceResult<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|e| WorkspaceError::io(&self.root, e))?;
        }
        Ok(())
    }
}
