//! Share engine - discovery and download orchestration
//!
//! One run at a time:
//! - every configured endpoint is polled for a manifest concurrently
//! - the first positive manifest wins and cancels the other endpoints
//! - each file index is fetched with bounded immediate retry
//! - an idle-abort timer ends runs that never find a manifest

mod controller;
mod fetcher;
mod poller;
mod registry;
mod timers;

pub use controller::{CompletionHook, RunConfig, RunController};
pub use fetcher::{filename_from_disposition, sanitize_filename};
pub use poller::parse_manifest;
pub use registry::{RequestId, RequestRegistry, Selector};
pub use timers::TimerService;
