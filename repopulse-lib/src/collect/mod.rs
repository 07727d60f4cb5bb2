//! The collection pipeline.
//!
//! Each tracked repository is observed through eight independent sources
//! (hosting activity, registry downloads, CDN traffic, security scorecard).
//! Collection is resumable and partial-failure tolerant: every source records
//! its own status, failed sources are retried with exponential backoff, and
//! successful results merge idempotently into the durable activity snapshot.

mod context;
mod repo_key;

pub mod orchestrator;
pub mod pool;
pub mod scheduler;
pub mod snapshot;
pub mod sources;
pub mod state;
pub mod throttler;
pub mod webhook;

pub use context::{PipelineConfig, PipelineContext};
pub use repo_key::RepoKey;
