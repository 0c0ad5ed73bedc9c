//! Parsing of pinned long-format directory listings
//!
//! Every listing is produced with `-L --time-style +%s --color=none`, so a
//! row always carries seven whitespace separated fields with the name last:
//!
//! ```text
//! drwxr-xr-x 2 app app 4096 1704067200 1704067200000
//! -rw-r--r-- 1 app app 5120 1704067260 000001.bin
//! ```
//!
//! Rows that do not fit this shape are reported as errors rather than
//! skipped, so a remote `ls` with different behaviour cannot silently
//! hide files.

use super::file::{FileAttrs, FileKind};
use crate::errors::{RemoteError, RemoteResult};

/// One parsed listing row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// Entry type from the permission flags
    pub kind: FileKind,
    /// Size in bytes
    pub size: u64,
    /// Modification time in epoch seconds
    pub modified_secs: i64,
    /// Entry name, or the full path for single-path listings
    pub name: String,
}

impl ListingEntry {
    /// Attributes carried by this row
    pub fn attrs(&self) -> FileAttrs {
        FileAttrs {
            kind: self.kind,
            size: self.size,
            modified_millis: self.modified_secs.saturating_mul(1000),
        }
    }
}

/// Rows of one directory inside a recursive listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingSection {
    /// Directory the rows belong to
    pub dir: String,
    /// Parsed rows
    pub entries: Vec<ListingEntry>,
}

/// Parse one long-format row
pub fn parse_row(line: &str) -> RemoteResult<ListingEntry> {
    let invalid = || RemoteError::ListingParse {
        line: line.to_string(),
    };

    let line = line.trim_end_matches(['\r', '\n']);
    let (fields, name) = split_fields(line, 6).ok_or_else(invalid)?;
    if name.is_empty() {
        return Err(invalid());
    }

    let kind = match fields[0].chars().next() {
        Some('d') => FileKind::Directory,
        Some('-') => FileKind::File,
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => FileKind::Other,
        _ => return Err(invalid()),
    };
    if fields[0].len() < 2 {
        return Err(invalid());
    }
    fields[1].parse::<u64>().map_err(|_| invalid())?;
    let size = fields[4].parse::<u64>().map_err(|_| invalid())?;
    let modified_secs = fields[5].parse::<i64>().map_err(|_| invalid())?;

    Ok(ListingEntry {
        kind,
        size,
        modified_secs,
        name: name.to_string(),
    })
}

/// Parse the rows of a single-directory or single-path listing
pub fn parse_listing(output: &str) -> RemoteResult<Vec<ListingEntry>> {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty() && !is_total_line(line))
        .map(parse_row)
        .collect()
}

/// Parse a recursive listing rooted at `root`
///
/// Sections are separated by blank lines and open with a `<dir>:` header.
/// Rows seen before any header belong to `root`.
pub fn parse_recursive_listing(output: &str, root: &str) -> RemoteResult<Vec<ListingSection>> {
    let mut sections = Vec::new();
    let mut current: Option<ListingSection> = None;
    let mut expect_header = true;

    for line in output.lines().map(|line| line.trim_end_matches('\r')) {
        if line.trim().is_empty() {
            expect_header = true;
            continue;
        }
        if expect_header && line.ends_with(':') {
            if let Some(section) = current.take() {
                sections.push(section);
            }
            current = Some(ListingSection {
                dir: normalize_path(&line[..line.len() - 1]),
                entries: Vec::new(),
            });
            expect_header = false;
            continue;
        }
        expect_header = false;
        if is_total_line(line) {
            continue;
        }

        let entry = parse_row(line)?;
        current
            .get_or_insert_with(|| ListingSection {
                dir: normalize_path(root),
                entries: Vec::new(),
            })
            .entries
            .push(entry);
    }
    if let Some(section) = current {
        sections.push(section);
    }
    Ok(sections)
}

/// Quote a path for a POSIX shell
pub fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', "'\\''"))
}

/// Join a directory path and an entry name
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Collapse repeated separators and drop a trailing one
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        normalized.push(c);
    }
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

fn is_total_line(line: &str) -> bool {
    line.starts_with("total ")
}

fn split_fields(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = line.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    Some((fields, rest))
}
