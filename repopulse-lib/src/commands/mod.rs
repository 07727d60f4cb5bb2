//! Command-line interface and dispatch for repopulse
//!
//! The CLI drives the collection pipeline against a file-backed state store:
//!
//! - **collect**: run a collection pass for one repository (resumable by
//!   default, `--force` for a full re-fetch)
//! - **status** / **reset** / **failed**: inspect and repair collection state
//! - **approve** / **unapprove** / **approved** / **refresh**: manage the set
//!   of repositories covered by the fleet refresh
//! - **retries** / **watch** / **stats**: drive and observe the retry
//!   scheduler
//! - **webhook**: enqueue and apply pushed events
//! - **metrics**: show the derived metrics for a repository
//!
//! `run` parses arguments with clap and routes to the handler; every handler
//! talks to the outside world through the [`Host`] trait so tests can capture
//! output.

mod common;
mod host;
mod pipeline;
mod run;
mod webhook;

pub use common::CommonArgs;
pub use host::Host;
pub use run::run;
