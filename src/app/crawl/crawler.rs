//! Pruning crawl of the date partitioned dump tree
//!
//! The tree below each server directory is `<YYYY>/<MM>/<DD>/<bucket>`,
//! where a bucket is named by the epoch milliseconds at which collection
//! into it started. Buckets only ever grow in name, so the first bucket
//! after a subtree is an upper bound for every timestamp inside it. The
//! crawl uses that bound to skip whole years, months, days and buckets
//! without listing them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::window::TimeWindow;
use crate::app::remote::{RemoteFile, RemoteFileManager};
use crate::app::shell::RemoteShell;
use crate::app::transfer::TransferTask;
use crate::constants::{layout, listing};
use crate::errors::{RemoteError, RemoteResult};

/// Parameters of one collection run
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    /// Requested window
    pub window: TimeWindow,
    /// Remote dump root holding one directory per server
    pub dump_root: String,
    /// Only crawl these servers when set
    pub servers: Option<Vec<String>>,
    /// Local output root
    pub output: PathBuf,
    /// Leave out trace, xml and sql folders
    pub skip_details: bool,
    /// Load the dump root with one recursive listing first
    pub preload: bool,
}

impl CrawlRequest {
    pub fn new(window: TimeWindow, dump_root: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            window,
            dump_root: dump_root.into(),
            servers: None,
            output: output.into(),
            skip_details: false,
            preload: false,
        }
    }

    fn wants_server(&self, name: &str) -> bool {
        self.servers
            .as_ref()
            .map_or(true, |servers| servers.iter().any(|s| s == name))
    }
}

/// Counters describing a finished crawl
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub servers: usize,
    pub buckets_visited: usize,
    pub subtrees_pruned: usize,
    pub buckets_without_calls: usize,
    pub files_selected: usize,
    pub files_up_to_date: usize,
    pub bytes_selected: u64,
}

/// Walks one dump root and produces the transfer list
pub struct Crawler<'a, S: RemoteShell> {
    manager: &'a RemoteFileManager<S>,
    request: &'a CrawlRequest,
    end_path: Option<String>,
    tasks: Vec<TransferTask>,
    stats: CrawlStats,
}

impl<'a, S: RemoteShell> Crawler<'a, S> {
    pub fn new(manager: &'a RemoteFileManager<S>, request: &'a CrawlRequest) -> Self {
        Self {
            manager,
            request,
            end_path: request.window.end_path(),
            tasks: Vec::new(),
            stats: CrawlStats::default(),
        }
    }

    /// Crawl the dump root and return every file that needs copying
    ///
    /// Any remote error aborts the crawl; no partial list is returned.
    pub fn collect(mut self) -> RemoteResult<(Vec<TransferTask>, CrawlStats)> {
        let root = self.manager.get(&self.request.dump_root);
        if !self.manager.is_dir(&root)? {
            return Err(RemoteError::NotFound {
                path: root.path().to_string(),
            });
        }
        if self.request.preload {
            self.manager
                .preload_recursive(&root, Some(listing::PRELOAD_EXCLUDE))?;
        }

        let servers = self.manager.list_files(&root, RemoteFile::is_dir)?;
        if servers.is_empty() {
            warn!("No data found in dump root {}", root.path());
        }

        for server in servers {
            if !self.request.wants_server(server.name()) {
                debug!("Skipping server {}", server.name());
                continue;
            }
            info!("Collecting files of server {}", server.name());
            self.stats.servers += 1;
            self.visit(&server, server.name(), "", 0)?;
        }

        info!(
            "Crawl finished: {} buckets visited, {} subtrees pruned, {} files selected ({} bytes), {} up to date",
            self.stats.buckets_visited,
            self.stats.subtrees_pruned,
            self.stats.files_selected,
            self.stats.bytes_selected,
            self.stats.files_up_to_date
        );
        Ok((self.tasks, self.stats))
    }

    /// Visit the children of `dir`, which sit at `level` (0 = year, 3 = bucket)
    fn visit(&mut self, dir: &RemoteFile, server: &str, relative: &str, level: usize) -> RemoteResult<()> {
        let children = self.dated_children(dir, level)?;
        let start = self.request.window.start_millis();

        for (i, child) in children.iter().enumerate() {
            let path = format!("{}/{}", relative, child.name());
            if self.beyond_end(&path) {
                continue;
            }

            let bound = match children.get(i + 1) {
                Some(next) if level == layout::BUCKET_DEPTH - 1 => bucket_millis(next)?,
                _ => upper_bound(self.manager, child, level)?,
            };
            if bound.is_some_and(|bound| bound < start) {
                self.stats.subtrees_pruned += 1;
                continue;
            }

            if level == layout::BUCKET_DEPTH - 1 {
                self.visit_bucket(child, server, &path)?;
            } else {
                self.visit(child, server, &path, level + 1)?;
            }
        }
        Ok(())
    }

    fn visit_bucket(&mut self, bucket: &RemoteFile, server: &str, relative: &str) -> RemoteResult<()> {
        self.stats.buckets_visited += 1;
        let target = self.target_dir(server, relative);

        let calls = self.manager.list_files(bucket, |f| f.is_dir() && is_calls_folder(f.name()))?;
        let mut added = false;
        for folder in &calls {
            added |= self.copy_by_time(folder, &target.join(folder.name()))?;
        }
        if !added {
            debug!("Bucket {} recorded no calls in the window", bucket.path());
            self.stats.buckets_without_calls += 1;
            return Ok(());
        }

        for name in layout::DICTIONARY_FOLDERS {
            if let Some(folder) = self.subfolder(bucket, name)? {
                self.copy_all(&folder, &target.join(name))?;
            }
        }
        if !self.request.skip_details {
            for name in layout::DETAIL_FOLDERS {
                if let Some(folder) = self.subfolder(bucket, name)? {
                    self.copy_by_time(&folder, &target.join(name))?;
                }
            }
        }
        Ok(())
    }

    fn subfolder(&self, bucket: &RemoteFile, name: &str) -> RemoteResult<Option<Arc<RemoteFile>>> {
        Ok(self.manager.child(bucket, name)?.filter(|f| f.is_dir()))
    }

    /// Copy the files of `folder` that fall in the window; true if any did
    fn copy_by_time(&mut self, folder: &RemoteFile, target: &Path) -> RemoteResult<bool> {
        let files = self.manager.list_files(folder, RemoteFile::is_file)?;
        let window = &self.request.window;
        let selected = select_by_time(
            &files,
            window.start_millis(),
            window.end_millis(),
            |f| f.modified_millis(),
        );
        let added = !selected.is_empty();
        for file in selected {
            self.append(file, target);
        }
        Ok(added)
    }

    fn copy_all(&mut self, folder: &RemoteFile, target: &Path) -> RemoteResult<()> {
        for file in self.manager.list_files(folder, RemoteFile::is_file)? {
            self.append(&file, target);
        }
        Ok(())
    }

    fn append(&mut self, file: &Arc<RemoteFile>, target: &Path) {
        let local = target.join(file.name());
        if is_up_to_date(&local, file.size()) {
            self.stats.files_up_to_date += 1;
            return;
        }
        self.stats.files_selected += 1;
        self.stats.bytes_selected += file.size();
        self.tasks.push(TransferTask::new(Arc::clone(file), local));
    }

    fn dated_children(&self, dir: &RemoteFile, level: usize) -> RemoteResult<Vec<Arc<RemoteFile>>> {
        dated_children(self.manager, dir, level)
    }

    fn beyond_end(&self, path: &str) -> bool {
        self.end_path
            .as_deref()
            .is_some_and(|end| path > end)
    }

    fn target_dir(&self, server: &str, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.request.output.join(server), |dir, segment| dir.join(segment))
    }
}

/// Upper time bound for everything below `node`, which sits at `level`
///
/// The bound is the first bucket of the nearest following subtree: the
/// smallest greater sibling that holds any bucket, or failing that the
/// same search one level up. `None` means nothing follows and the subtree
/// is unbounded.
pub fn upper_bound<S: RemoteShell>(
    manager: &RemoteFileManager<S>,
    node: &RemoteFile,
    level: usize,
) -> RemoteResult<Option<i64>> {
    let mut current = manager.get(node.path());
    let mut level = level;
    loop {
        let Some(parent_path) = current.parent_path() else {
            return Ok(None);
        };
        let parent = manager.get(parent_path);
        let key = dated_key(&current);
        for sibling in dated_children(manager, &parent, level)? {
            if dated_key(&sibling) <= key {
                continue;
            }
            if let Some(bound) = first_bucket(manager, &sibling, level)? {
                return Ok(Some(bound));
            }
        }
        if level == 0 {
            return Ok(None);
        }
        current = parent;
        level -= 1;
    }
}

/// Smallest bucket at or below `dir`, which sits at `level`
fn first_bucket<S: RemoteShell>(
    manager: &RemoteFileManager<S>,
    dir: &RemoteFile,
    level: usize,
) -> RemoteResult<Option<i64>> {
    if level == layout::BUCKET_DEPTH - 1 {
        return bucket_millis(dir);
    }
    for child in dated_children(manager, dir, level + 1)? {
        if let Some(bound) = first_bucket(manager, &child, level + 1)? {
            return Ok(Some(bound));
        }
    }
    Ok(None)
}

/// Date directories of `dir` at `level`, in ascending numeric order
fn dated_children<S: RemoteShell>(
    manager: &RemoteFileManager<S>,
    dir: &RemoteFile,
    level: usize,
) -> RemoteResult<Vec<Arc<RemoteFile>>> {
    let mut children = manager.list_files(dir, |f| f.is_dir() && is_dated_name(f.name(), level))?;
    children.sort_by_key(|f| dated_key(f));
    Ok(children)
}

fn dated_key(file: &RemoteFile) -> (u128, String) {
    (file.name().parse().unwrap_or(u128::MAX), file.name().to_string())
}

fn is_dated_name(name: &str, level: usize) -> bool {
    let digits = !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit());
    digits && (level != 0 || name.len() == layout::YEAR_NAME_LENGTH)
}

fn bucket_millis(bucket: &RemoteFile) -> RemoteResult<Option<i64>> {
    bucket
        .name()
        .parse::<i64>()
        .map(Some)
        .map_err(|_| RemoteError::InvalidBucketName {
            name: bucket.path().to_string(),
        })
}

fn is_calls_folder(name: &str) -> bool {
    name == layout::CALLS_FOLDER || name.starts_with(layout::CALLS_FOLDER_PREFIX)
}

fn is_up_to_date(local: &Path, size: u64) -> bool {
    fs::metadata(local).is_ok_and(|meta| meta.is_file() && meta.len() == size)
}

/// Pick the items of a time-partitioned folder that belong to the window
///
/// Items are taken in ascending modification order: those before `start`
/// are skipped, those up to `end` are kept, and the first one after `end`
/// is kept as well since its records may have started inside the window.
pub fn select_by_time<T, F>(items: &[T], start: i64, end: Option<i64>, modified: F) -> Vec<&T>
where
    F: Fn(&T) -> i64,
{
    let mut sorted: Vec<&T> = items.iter().collect();
    sorted.sort_by_key(|item| modified(item));

    let mut selected = Vec::new();
    for item in sorted.into_iter().skip_while(|item| modified(item) < start) {
        let past_end = end.is_some_and(|end| modified(item) > end);
        selected.push(item);
        if past_end {
            break;
        }
    }
    selected
}
