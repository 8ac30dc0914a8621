//! Archive entry model, codec seam and directory materialization.
//!
//! # Responsibility
//! - Describe an archive as an ordered list of `(path, bytes)` entries.
//! - Keep the binary container format behind [`ArchiveCodec`].
//! - Write/read the same layout as a plain directory tree.
//!
//! # Invariants
//! - Entry paths are relative, `/`-separated and never escape the root.
//!
//! Layout of one document folder:
//! `{doc_id}/{doc_id}.json`, `{doc_id}/images/{key}`,
//! `{doc_id}/downloadExecutables/{key}`.

use log::{debug, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// One file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }

    /// Path segments, with empty segments dropped.
    pub fn segments(&self) -> Vec<&str> {
        self.path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect()
    }
}

#[derive(Debug)]
pub enum ArchiveError {
    /// Container could not be encoded or decoded.
    Codec(String),
    Io(std::io::Error),
    /// Entry path is absolute or contains parent traversal.
    UnsafePath(String),
}

impl Display for ArchiveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(message) => write!(f, "archive codec failure: {message}"),
            Self::Io(err) => write!(f, "archive io failure: {err}"),
            Self::UnsafePath(path) => write!(f, "unsafe archive entry path `{path}`"),
        }
    }
}

impl Error for ArchiveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Binary container format (zip in the desktop shell).
pub trait ArchiveCodec {
    fn encode(&self, entries: &[ArchiveEntry]) -> ArchiveResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> ArchiveResult<Vec<ArchiveEntry>>;
}

/// Validates and converts an entry path into a relative filesystem path.
pub fn safe_relative_path(path: &str) -> ArchiveResult<PathBuf> {
    let candidate = Path::new(path);
    let mut relative = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return Err(ArchiveError::UnsafePath(path.to_string())),
        }
    }
    if relative.as_os_str().is_empty() || path.contains('\\') {
        return Err(ArchiveError::UnsafePath(path.to_string()));
    }
    Ok(relative)
}

/// Writes every entry below `root`, creating folders as needed.
pub fn write_tree(root: impl AsRef<Path>, entries: &[ArchiveEntry]) -> ArchiveResult<()> {
    let root = root.as_ref();
    fs::create_dir_all(root)?;
    for entry in entries {
        let target = root.join(safe_relative_path(&entry.path)?);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &entry.data)?;
        debug!(
            "event=archive_write module=archive status=ok path={} bytes={}",
            entry.path,
            entry.data.len()
        );
    }
    info!(
        "event=archive_write module=archive status=ok entries={}",
        entries.len()
    );
    Ok(())
}

/// Reads every regular file below `root` as an entry, sorted by path.
pub fn read_tree(root: impl AsRef<Path>) -> ArchiveResult<Vec<ArchiveEntry>> {
    let root = root.as_ref();
    let mut entries = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for item in fs::read_dir(&dir)? {
            let item = item?;
            let file_type = item.file_type()?;
            let path = item.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                let segments: Vec<String> = relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy().into_owned())
                    .collect();
                entries.push(ArchiveEntry::new(segments.join("/"), fs::read(&path)?));
            }
        }
    }
    entries.sort_by(|left, right| left.path.cmp(&right.path));
    info!(
        "event=archive_read module=archive status=ok entries={}",
        entries.len()
    );
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_paths_are_rejected() {
        assert!(safe_relative_path("doc/images/a.png").is_ok());
        assert!(matches!(
            safe_relative_path("../escape"),
            Err(ArchiveError::UnsafePath(_))
        ));
        assert!(matches!(
            safe_relative_path("/etc/passwd"),
            Err(ArchiveError::UnsafePath(_))
        ));
        assert!(safe_relative_path("").is_err());
    }

    #[test]
    fn tree_round_trip_keeps_nested_paths() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            ArchiveEntry::new("nightly/nightly.json", b"{}".to_vec()),
            ArchiveEntry::new("nightly/images/general-image", vec![1, 2, 3]),
        ];

        write_tree(dir.path(), &entries).unwrap();
        let read = read_tree(dir.path()).unwrap();

        assert_eq!(read.len(), 2);
        assert_eq!(read[0].path, "nightly/images/general-image");
        assert_eq!(read[0].data, vec![1, 2, 3]);
        assert_eq!(read[1].path, "nightly/nightly.json");
    }
}
