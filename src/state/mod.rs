//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `UrlTask` / `TaskState`: a frontier entry and its lifecycle
//! - `HostState`: per-host politeness bookkeeping, with `HostRecord` as its stored form
//! - `FailureKind`: classification of unsuccessful fetches

mod failure;
mod host_state;
mod task;

pub use failure::FailureKind;
pub use host_state::{HostRecord, HostState};
pub use task::{TaskState, UrlTask};
