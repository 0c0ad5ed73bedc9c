//! Remote filesystem access over a single shell session
//!
//! Directory contents and attributes come from pinned `ls` listings parsed
//! into [`RemoteFile`] handles. The [`RemoteFileManager`] memoizes handles
//! by path so a crawl never asks the same question twice.

pub mod file;
pub mod listing;
pub mod manager;

#[cfg(test)]
pub(crate) mod testing;

pub use file::{FileAttrs, FileKind, RemoteFile};
pub use listing::{
    join_path, normalize_path, parse_listing, parse_recursive_listing, parse_row, shell_quote,
    ListingEntry, ListingSection,
};
pub use manager::RemoteFileManager;
