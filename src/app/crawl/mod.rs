//! Time-windowed selection of dump files
//!
//! Turns a requested window into the list of remote files to copy, listing
//! only the parts of the remote tree that can hold data from the window.

pub mod crawler;
pub mod window;

#[cfg(test)]
mod tests;

pub use crawler::{select_by_time, upper_bound, CrawlRequest, CrawlStats, Crawler};
pub use window::{now_millis, parse_instant, parse_offset, TimeWindow};
