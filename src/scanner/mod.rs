//! Repository file listing and confined file reads.
//!
//! Every path handed out or accepted by this module is relative to the
//! repository root and uses `/` separators.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Configuration for file scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Directory or file names to skip (e.g., ["node_modules", "target"])
    pub excludes: Vec<String>,
    /// Maximum size of a file that may be read, in bytes
    pub max_file_size: u64,
    /// Maximum number of files to list
    pub max_files: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            excludes: vec![
                ".git",
                "target",
                "node_modules",
                "vendor",
                "dist",
                "build",
                "__pycache__",
                ".venv",
                "venv",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_file_size: 1024 * 1024,
            max_files: None,
        }
    }
}

impl From<&crate::config::RepoConfig> for ScanConfig {
    fn from(config: &crate::config::RepoConfig) -> Self {
        Self {
            excludes: config.excludes.clone(),
            max_file_size: config.max_file_size,
            max_files: config.max_files,
        }
    }
}

/// Errors raised while listing or reading repository files.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("path escapes the repository root: {0}")]
    OutsideRoot(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("not a file: {0}")]
    NotAFile(String),
    #[error("file is not valid UTF-8 text: {0}")]
    NotUtf8(String),
    #[error("file too large ({size} bytes): {path}")]
    TooLarge { path: String, size: u64 },
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ScanError {
    /// Short error class name, used when the error is reported back to a model.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::OutsideRoot(_) => "PermissionDenied",
            ScanError::NotFound(_) => "NotFound",
            ScanError::NotAFile(_) => "IsADirectory",
            ScanError::NotUtf8(_) => "UnicodeDecodeError",
            ScanError::TooLarge { .. } => "FileTooLarge",
            ScanError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => "NotFound",
            ScanError::Io { .. } => "IOError",
        }
    }

    fn io(path: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            ScanError::NotFound(path.to_string())
        } else {
            ScanError::Io {
                path: path.to_string(),
                source,
            }
        }
    }
}

/// The files of a repository, as returned by [`FileScanner::list_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileListing {
    /// Name of the repository root directory.
    pub repo_name: String,
    /// Relative paths, sorted.
    pub files: Vec<String>,
}

impl FileListing {
    /// Newline-separated relative paths.
    pub fn joined(&self) -> String {
        self.files.join("\n")
    }

    /// The listing as a sentence followed by the paths.
    pub fn render(&self) -> String {
        format!(
            "Here is the complete list of files that can be found in `{}` repo:\n{}",
            self.repo_name,
            self.joined()
        )
    }

    /// Same as [`render`](Self::render) with the paths inside a code fence.
    pub fn render_fenced(&self) -> String {
        format!(
            "Here is the complete list of files that can be found in `{}` repo:\n```\n{}\n```",
            self.repo_name,
            self.joined()
        )
    }

    /// Accept `candidate` only if it is literally one of the listed paths.
    pub fn resolve(&self, candidate: &str) -> Option<&str> {
        if candidate.is_empty() {
            return None;
        }
        self.files
            .iter()
            .find(|f| f.as_str() == candidate)
            .map(String::as_str)
    }
}

/// Lists and reads files below a fixed repository root.
#[derive(Debug, Clone)]
pub struct FileScanner {
    config: ScanConfig,
    repo_root: PathBuf,
}

impl FileScanner {
    /// Create a new file scanner.
    pub fn new(repo_root: PathBuf, config: ScanConfig) -> Self {
        Self { config, repo_root }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Name of the root directory, used in listings.
    pub fn repo_name(&self) -> String {
        let canonical = fs::canonicalize(&self.repo_root).unwrap_or_else(|_| self.repo_root.clone());
        canonical
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| canonical.display().to_string())
    }

    /// List every file in the repository, skipping hidden and excluded entries.
    pub fn list_files(&self) -> Result<FileListing, ScanError> {
        let root_str = self.repo_root.display().to_string();
        if !self.repo_root.is_dir() {
            return Err(ScanError::NotFound(root_str));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.repo_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_excluded(entry));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            if let Ok(rel) = entry.path().strip_prefix(&self.repo_root) {
                files.push(to_posix(rel));
            }

            if let Some(max) = self.config.max_files {
                if files.len() >= max {
                    warn!("File listing truncated at {} files", max);
                    break;
                }
            }
        }

        debug!("Listed {} files under {}", files.len(), root_str);

        Ok(FileListing {
            repo_name: self.repo_name(),
            files,
        })
    }

    /// Read a file given its path relative to the root.
    pub fn read_file(&self, relative: &str) -> Result<String, ScanError> {
        let full_path = self.resolve(relative)?;

        let metadata = fs::metadata(&full_path).map_err(|e| ScanError::io(relative, e))?;
        if !metadata.is_file() {
            return Err(ScanError::NotAFile(relative.to_string()));
        }
        if metadata.len() > self.config.max_file_size {
            return Err(ScanError::TooLarge {
                path: relative.to_string(),
                size: metadata.len(),
            });
        }

        let bytes = fs::read(&full_path).map_err(|e| ScanError::io(relative, e))?;
        String::from_utf8(bytes).map_err(|_| ScanError::NotUtf8(relative.to_string()))
    }

    /// Map a relative path to an absolute one inside the root.
    ///
    /// Absolute paths and `..` segments are rejected before touching the
    /// disk; symlinks are caught by comparing canonical paths.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ScanError> {
        let rel = Path::new(relative);
        let lexically_safe = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || !lexically_safe {
            return Err(ScanError::OutsideRoot(relative.to_string()));
        }

        let canonical_root =
            fs::canonicalize(&self.repo_root).map_err(|e| ScanError::io(relative, e))?;
        let canonical_path =
            fs::canonicalize(self.repo_root.join(rel)).map_err(|e| ScanError::io(relative, e))?;

        if !canonical_path.starts_with(&canonical_root) {
            return Err(ScanError::OutsideRoot(relative.to_string()));
        }

        Ok(canonical_path)
    }

    /// Check if an entry matches exclusion patterns.
    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();

        // Hidden files
        if name.starts_with('.') {
            return true;
        }

        self.config.excludes.iter().any(|pattern| name == pattern.as_str())
    }
}

fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
