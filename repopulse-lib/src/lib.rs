#![doc(hidden)]

//! Core library for repopulse
//!
//! This library maintains one durable, append-style historical activity record per
//! tracked repository, fed by several independent rate-limited upstream APIs.
//!
//! # Module Organization
//!
//! - [`commands`]: Command-line interface and dispatch
//! - [`collect`]: The collection pipeline (collectors, state machine, orchestration)
//! - [`metrics`]: Derived metrics computed from activity snapshots
//! - [`store`]: Persistent state store abstraction

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

pub mod collect;
pub mod commands;
pub mod metrics;
pub mod store;

pub use crate::commands::{Host, run};
