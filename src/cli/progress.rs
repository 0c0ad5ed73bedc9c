//! Progress display for transfer runs
//!
//! Polls the shared [`Progress`] handle with a bounded wait. On a terminal
//! an indicatif bar tracks bytes; otherwise a text line is printed after
//! every poll. Every `speed_report_every` polls the average throughput and
//! remaining time of the last interval are reported.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dump_fetcher::app::Progress;
//! use dump_fetcher::cli::{ProgressConfig, ProgressDisplay};
//!
//! # fn example(progress: &Progress) {
//! let mut display = ProgressDisplay::new(ProgressConfig::default());
//! display.watch(progress);
//! # }
//! ```

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::app::transfer::{Progress, ProgressSnapshot};
use crate::constants::progress;

/// Configuration for progress display
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Draw a bar when stderr is a terminal
    pub enable_progress_bar: bool,
    /// Bounded wait between two updates
    pub poll_interval: Duration,
    /// Polls between two throughput reports
    pub speed_report_every: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enable_progress_bar: true,
            poll_interval: progress::POLL_INTERVAL,
            speed_report_every: progress::SPEED_REPORT_EVERY,
        }
    }
}

/// Throughput over one reporting interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedReport {
    /// Average megabytes per second
    pub mb_per_sec: f64,
    /// Minutes left at that speed, `None` when nothing moved
    pub remaining_minutes: Option<f64>,
}

impl SpeedReport {
    /// Speed from `bytes` moved during `interval` with `remaining` bytes left
    pub fn measure(bytes: u64, interval: Duration, remaining: u64) -> Self {
        let secs = interval.as_secs_f64();
        let mb_per_sec = if secs > 0.0 {
            bytes as f64 / progress::BYTES_PER_MB / secs
        } else {
            0.0
        };
        let remaining_minutes = if bytes > 0 && secs > 0.0 {
            Some(remaining as f64 / bytes as f64 * secs / 60.0)
        } else {
            None
        };
        Self {
            mb_per_sec,
            remaining_minutes,
        }
    }
}

/// Terminal or text progress for one transfer run
pub struct ProgressDisplay {
    config: ProgressConfig,
    bar: Option<ProgressBar>,
    is_terminal: bool,
}

impl ProgressDisplay {
    /// Create a new progress display with the given configuration
    pub fn new(config: ProgressConfig) -> Self {
        let is_terminal = atty::is(atty::Stream::Stderr);
        Self {
            config,
            bar: None,
            is_terminal,
        }
    }

    /// Block until `progress` completes, updating the display as it moves
    pub fn watch(&mut self, progress: &Progress) -> ProgressSnapshot {
        self.start(progress.bytes_total());

        let mut polls = 0u32;
        let mut window_start_bytes = progress.bytes_done();
        let mut window_start = progress.elapsed();
        loop {
            let completed = progress.wait_timeout(self.config.poll_interval);
            let snapshot = progress.snapshot();
            self.update(&snapshot);

            polls += 1;
            if polls >= self.config.speed_report_every {
                let elapsed = progress.elapsed();
                let report = SpeedReport::measure(
                    snapshot.bytes_done.saturating_sub(window_start_bytes),
                    elapsed.saturating_sub(window_start),
                    snapshot.bytes_total.saturating_sub(snapshot.bytes_done),
                );
                self.report_speed(&report);
                window_start_bytes = snapshot.bytes_done;
                window_start = elapsed;
                polls = 0;
            }

            if completed {
                self.finish(&snapshot);
                return snapshot;
            }
        }
    }

    fn start(&mut self, bytes_total: u64) {
        if !self.config.enable_progress_bar || !self.is_terminal {
            debug!("Using text progress output");
            return;
        }
        let bar = ProgressBar::new(bytes_total);
        match ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {bytes_per_sec} {msg}",
        ) {
            Ok(style) => bar.set_style(style.progress_chars("#>-")),
            Err(e) => debug!("Progress template error: {}", e),
        }
        self.bar = Some(bar);
    }

    fn update(&self, snapshot: &ProgressSnapshot) {
        match &self.bar {
            Some(bar) => {
                bar.set_position(snapshot.bytes_done);
                bar.set_message(format!(
                    "{}/{} files",
                    snapshot.files_finished(),
                    snapshot.files_total
                ));
            }
            None => eprintln!(
                "Progress: {}/{} files, {} / {} Mb downloaded",
                snapshot.files_done,
                snapshot.files_total,
                format_mb(snapshot.bytes_done),
                format_mb(snapshot.bytes_total)
            ),
        }
    }

    fn report_speed(&self, report: &SpeedReport) {
        let remaining = report
            .remaining_minutes
            .map_or_else(|| "unknown".to_string(), |m| format!("{:.1} minutes", m));
        info!(
            "Avg speed: {:.1} Mb/s, remaining time: {}",
            report.mb_per_sec, remaining
        );
        if self.bar.is_none() {
            eprintln!(
                "Avg speed: {:.1} Mb/s, remaining time: {}",
                report.mb_per_sec, remaining
            );
        }
    }

    fn finish(&mut self, snapshot: &ProgressSnapshot) {
        if let Some(bar) = self.bar.take() {
            bar.set_position(snapshot.bytes_done);
            bar.finish_with_message("Download completed");
        }
    }
}

/// Bytes as megabytes with one decimal
pub fn format_mb(bytes: u64) -> String {
    format!("{:.1}", bytes as f64 / progress::BYTES_PER_MB)
}
