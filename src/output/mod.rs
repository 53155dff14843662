//! Reporting on a crawl database
//!
//! The scheduler writes results through its sink; this module reads them
//! back for the `--stats` report.

pub mod stats;

pub use stats::{load_statistics, print_statistics, render_statistics, CrawlStatistics};
