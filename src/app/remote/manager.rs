//! Cached view of the remote filesystem over a shell session
//!
//! All remote queries go through one [`RemoteShell`] guarded by a single
//! manager-wide lock. Network round trips dominate, so holding the lock
//! for the duration of a command costs nothing measurable and keeps the
//! handle cache and the session strictly serial.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use super::file::{FileAttrs, FileKind, RemoteFile};
use super::listing::{
    join_path, normalize_path, parse_listing, parse_recursive_listing, shell_quote, ListingEntry,
};
use crate::app::shell::RemoteShell;
use crate::constants::{listing, shell};
use crate::errors::{RemoteError, RemoteResult, ShellError};

struct ManagerState<S> {
    shell: S,
    files: HashMap<String, Arc<RemoteFile>>,
    commands: usize,
}

impl<S: RemoteShell> ManagerState<S> {
    fn handle(&mut self, path: &str) -> Arc<RemoteFile> {
        let path = normalize_path(path);
        Arc::clone(
            self.files
                .entry(path.clone())
                .or_insert_with(|| Arc::new(RemoteFile::new(path))),
        )
    }

    /// Run a checked command; `Ok(None)` when the target path is missing
    fn run_listing(&mut self, command: String) -> RemoteResult<Option<String>> {
        self.commands += 1;
        match self.shell.execute(&command, true) {
            Ok(output) => Ok(Some(output)),
            Err(ShellError::Command { message }) if message.contains(shell::NO_SUCH_FILE) => {
                debug!("Listing target missing: {}", message);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn attach_children(&mut self, dir: &RemoteFile, entries: &[ListingEntry]) -> Vec<Arc<RemoteFile>> {
        let children: Vec<Arc<RemoteFile>> = entries
            .iter()
            .map(|entry| {
                let child = self.handle(&join_path(dir.path(), &entry.name));
                child.load_attrs(Some(entry.attrs()));
                child
            })
            .collect();
        dir.load_children(children).to_vec()
    }
}

/// Lazily populated, memoized remote file tree
pub struct RemoteFileManager<S: RemoteShell> {
    state: Mutex<ManagerState<S>>,
}

impl<S: RemoteShell> RemoteFileManager<S> {
    /// Wrap a connected shell
    pub fn new(shell: S) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                shell,
                files: HashMap::new(),
                commands: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Memoized handle for `path`, created on first request
    pub fn get(&self, path: &str) -> Arc<RemoteFile> {
        self.lock().handle(path)
    }

    /// Handle for `path` only if one already exists
    pub fn cached(&self, path: &str) -> Option<Arc<RemoteFile>> {
        self.lock().files.get(&normalize_path(path)).cloned()
    }

    /// Children of `dir` accepted by `filter`
    ///
    /// The first call lists the directory and caches every child; later
    /// calls filter the cached list without touching the network. A
    /// missing directory yields no children.
    pub fn list_files<F>(&self, dir: &RemoteFile, filter: F) -> RemoteResult<Vec<Arc<RemoteFile>>>
    where
        F: Fn(&RemoteFile) -> bool,
    {
        if let Some(children) = dir.cached_children() {
            return Ok(children.iter().filter(|c| filter(c)).cloned().collect());
        }

        let mut state = self.lock();
        let children = match dir.cached_children() {
            Some(children) => children.to_vec(),
            None => {
                let command = format!("{} {}", listing::LIST_DIR, shell_quote(dir.path()));
                match state.run_listing(command)? {
                    Some(output) => {
                        let entries = parse_listing(&output)?;
                        state.attach_children(dir, &entries)
                    }
                    None => {
                        dir.load_attrs(None);
                        dir.load_children(Vec::new()).to_vec()
                    }
                }
            }
        };
        drop(state);

        Ok(children.into_iter().filter(|c| filter(c)).collect())
    }

    /// All children of `dir`
    pub fn children(&self, dir: &RemoteFile) -> RemoteResult<Vec<Arc<RemoteFile>>> {
        self.list_files(dir, |_| true)
    }

    /// Child of `dir` named `name`, from the directory listing
    pub fn child(&self, dir: &RemoteFile, name: &str) -> RemoteResult<Option<Arc<RemoteFile>>> {
        Ok(self
            .list_files(dir, |c| c.name() == name)?
            .into_iter()
            .next())
    }

    /// Load a whole subtree with one recursive listing
    ///
    /// Directories already listed keep their cached children. Returns the
    /// number of entries parsed.
    pub fn preload_recursive(&self, dir: &RemoteFile, exclude: Option<&str>) -> RemoteResult<usize> {
        let mut command = listing::LIST_RECURSIVE.to_string();
        if let Some(name) = exclude {
            command.push_str(" -I ");
            command.push_str(&shell_quote(name));
        }
        command.push(' ');
        command.push_str(&shell_quote(dir.path()));

        let mut state = self.lock();
        let output = state
            .run_listing(command)?
            .ok_or_else(|| RemoteError::NotFound {
                path: dir.path().to_string(),
            })?;

        let sections = parse_recursive_listing(&output, dir.path())?;
        let mut entries = 0;
        for section in &sections {
            let section_dir = state.handle(&section.dir);
            section_dir.load_attrs(Some(FileAttrs {
                kind: FileKind::Directory,
                size: 0,
                modified_millis: 0,
            }));
            state.attach_children(&section_dir, &section.entries);
            entries += section.entries.len();
        }

        info!(
            "Preloaded {} entries in {} directories under {}",
            entries,
            sections.len(),
            dir.path()
        );
        Ok(entries)
    }

    /// Attributes of `file`, `None` if it does not exist
    pub fn read_attrs(&self, file: &RemoteFile) -> RemoteResult<Option<FileAttrs>> {
        if file.is_loaded() {
            return Ok(file.attrs().copied());
        }

        let mut state = self.lock();
        if file.is_loaded() {
            return Ok(file.attrs().copied());
        }

        let command = format!("{} {}", listing::LIST_PATH, shell_quote(file.path()));
        let attrs = match state.run_listing(command)? {
            Some(output) => {
                let entries = parse_listing(&output)?;
                let entry = entries
                    .first()
                    .ok_or_else(|| RemoteError::UnexpectedOutput {
                        query: format!("attributes of {}", file.path()),
                        output: output.clone(),
                    })?;
                Some(entry.attrs())
            }
            None => None,
        };
        Ok(file.load_attrs(attrs))
    }

    /// Whether the path exists
    pub fn exists(&self, file: &RemoteFile) -> RemoteResult<bool> {
        Ok(self.read_attrs(file)?.is_some())
    }

    /// Whether the path is a directory
    pub fn is_dir(&self, file: &RemoteFile) -> RemoteResult<bool> {
        Ok(self
            .read_attrs(file)?
            .is_some_and(|attrs| attrs.kind == FileKind::Directory))
    }

    /// Whether the path is a regular file
    pub fn is_file(&self, file: &RemoteFile) -> RemoteResult<bool> {
        Ok(self
            .read_attrs(file)?
            .is_some_and(|attrs| attrs.kind == FileKind::File))
    }

    /// Size in bytes, zero for missing paths
    pub fn size(&self, file: &RemoteFile) -> RemoteResult<u64> {
        Ok(self.read_attrs(file)?.map_or(0, |attrs| attrs.size))
    }

    /// Modification time in epoch milliseconds, zero for missing paths
    pub fn modified(&self, file: &RemoteFile) -> RemoteResult<i64> {
        Ok(self
            .read_attrs(file)?
            .map_or(0, |attrs| attrs.modified_millis))
    }

    /// Run an arbitrary command on the managed shell
    pub fn execute(&self, command: &str, check_errors: bool) -> RemoteResult<String> {
        let mut state = self.lock();
        state.commands += 1;
        Ok(state.shell.execute(command, check_errors)?)
    }

    /// Verify that the remote `ls` honours the pinned listing flags
    pub fn probe_listing(&self) -> RemoteResult<()> {
        let command = format!(
            "{} {}",
            listing::LIST_PATH,
            shell_quote(listing::PROBE_PATH)
        );

        let output = match self.execute(&command, true) {
            Ok(output) => output,
            Err(RemoteError::Shell(ShellError::Command { message })) => {
                return Err(RemoteError::UnsupportedListing { reason: message });
            }
            Err(e) => return Err(e),
        };

        let entries = parse_listing(&output).map_err(|e| RemoteError::UnsupportedListing {
            reason: e.to_string(),
        })?;
        match entries.as_slice() {
            [entry] if entry.kind == FileKind::Directory => {
                debug!("Remote listing probe passed");
                Ok(())
            }
            _ => Err(RemoteError::UnsupportedListing {
                reason: format!("unexpected probe output {:?}", output.trim()),
            }),
        }
    }

    /// Number of remote commands issued so far
    pub fn commands_issued(&self) -> usize {
        self.lock().commands
    }

    /// Close the underlying shell
    pub fn close(&self) -> RemoteResult<()> {
        Ok(self.lock().shell.close()?)
    }
}
