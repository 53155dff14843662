//! Robots.txt handling module
//!
//! Fetches, parses and caches robots.txt per host. The scheduler asks
//! [`RobotsCache::allowed`] before each fetch and folds
//! [`RobotsCache::crawl_delay`] into the host's politeness delay.

mod cache;
mod parser;

pub use cache::{RobotsCache, RobotsRuleSet};
pub use parser::ParsedRobots;
