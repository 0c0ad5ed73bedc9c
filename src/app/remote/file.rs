//! Remote path handles with lazily loaded attributes

use std::fmt;
use std::sync::{Arc, OnceLock};

/// Entry type of a remote path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Directory
    Directory,
    /// Regular file
    File,
    /// Anything else (device, socket, fifo)
    Other,
}

/// Attributes of an existing remote path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttrs {
    /// Entry type
    pub kind: FileKind,
    /// Size in bytes
    pub size: u64,
    /// Modification time in epoch milliseconds
    pub modified_millis: i64,
}

/// Handle for one remote path
///
/// Attributes and children are filled in at most once by the
/// [`RemoteFileManager`](super::RemoteFileManager) and never refreshed:
/// the dump tree only grows, and fully written buckets do not change.
pub struct RemoteFile {
    path: String,
    attrs: OnceLock<Option<FileAttrs>>,
    children: OnceLock<Vec<Arc<RemoteFile>>>,
}

impl RemoteFile {
    pub(crate) fn new(path: String) -> Self {
        Self {
            path,
            attrs: OnceLock::new(),
            children: OnceLock::new(),
        }
    }

    /// Absolute remote path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) if idx + 1 < self.path.len() => &self.path[idx + 1..],
            _ => &self.path,
        }
    }

    /// Path of the parent directory, `None` for the root
    pub fn parent_path(&self) -> Option<&str> {
        match self.path.rfind('/') {
            Some(0) if self.path.len() > 1 => Some("/"),
            Some(0) | None => None,
            Some(idx) => Some(&self.path[..idx]),
        }
    }

    /// Attributes if they are loaded and the path exists
    pub fn attrs(&self) -> Option<&FileAttrs> {
        self.attrs.get().and_then(Option::as_ref)
    }

    /// Whether attributes have been loaded (including "does not exist")
    pub fn is_loaded(&self) -> bool {
        self.attrs.get().is_some()
    }

    /// Loaded attributes say this is a directory
    pub fn is_dir(&self) -> bool {
        self.attrs()
            .is_some_and(|attrs| attrs.kind == FileKind::Directory)
    }

    /// Loaded attributes say this is a regular file
    pub fn is_file(&self) -> bool {
        self.attrs().is_some_and(|attrs| attrs.kind == FileKind::File)
    }

    /// Loaded size, zero when unknown
    pub fn size(&self) -> u64 {
        self.attrs().map_or(0, |attrs| attrs.size)
    }

    /// Loaded modification time in epoch milliseconds, zero when unknown
    pub fn modified_millis(&self) -> i64 {
        self.attrs().map_or(0, |attrs| attrs.modified_millis)
    }

    /// Children if the directory has been listed
    pub fn cached_children(&self) -> Option<&[Arc<RemoteFile>]> {
        self.children.get().map(Vec::as_slice)
    }

    pub(crate) fn load_attrs(&self, attrs: Option<FileAttrs>) -> Option<FileAttrs> {
        *self.attrs.get_or_init(|| attrs)
    }

    pub(crate) fn load_children(&self, children: Vec<Arc<RemoteFile>>) -> &[Arc<RemoteFile>] {
        self.children.get_or_init(|| children)
    }
}

impl fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFile")
            .field("path", &self.path)
            .field("attrs", &self.attrs.get())
            .field("children", &self.children.get().map(Vec::len))
            .finish()
    }
}

impl fmt::Display for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
