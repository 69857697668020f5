//! Output module for crawl reporting
//!
//! This module handles:
//! - Collecting statistics while a crawl runs
//! - Rebuilding a summary from a crawl database

pub mod stats;

pub use stats::{
    load_statistics, print_statistics, print_stored_statistics, CrawlStatistics,
    StoredStatistics,
};
