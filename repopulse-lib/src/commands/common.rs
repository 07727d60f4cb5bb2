//! Shared CLI plumbing: common arguments, logging setup, pipeline assembly.

use crate::collect::{PipelineConfig, PipelineContext, RepoKey};
use crate::store::FileStore;
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    None,

    /// Only error messages
    Error,

    /// Warning and error messages
    Warn,

    /// Info, warning, and error messages
    Info,

    /// Debug, info, warning, and error messages
    Debug,

    /// Trace, debug, info, warning, and error messages
    Trace,
}

/// Arguments shared by every subcommand
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Path of the state store file
    #[arg(long, value_name = "PATH", env = "REPOPULSE_STORE", default_value = ".repopulse.json", global = true)]
    pub store: PathBuf,

    /// Hosting API token for the rotation pool (repeat or comma-separate for multiple)
    #[arg(long = "token", value_name = "TOKEN", env = "REPOPULSE_TOKENS", value_delimiter = ',', global = true)]
    pub tokens: Vec<String>,

    /// Hosting API base URL
    #[arg(long, value_name = "URL", default_value = "https://api.github.com", global = true)]
    pub hosting_url: String,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    pub log_level: LogLevel,
}

impl CommonArgs {
    pub fn init_logging(&self) {
        let level = match self.log_level {
            LogLevel::None => return,
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };

        let env = env_logger::Env::default().filter_or("RUST_LOG", level);

        env_logger::Builder::from_env(env)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(matches!(self.log_level, LogLevel::Debug | LogLevel::Trace))
            .init();
    }

    /// Assemble the pipeline against the file-backed store and the live
    /// upstream APIs.
    pub fn open_pipeline(&self) -> crate::Result<PipelineContext> {
        let store = Arc::new(FileStore::open(&self.store)?);
        let config = PipelineConfig {
            hosting_base_url: self.hosting_url.clone(),
            ..PipelineConfig::default()
        };

        PipelineContext::with_live_sources(store, &self.tokens, &config)
    }
}

/// Parse a repository argument, accepting only `owner/name`.
pub fn parse_repo(s: &str) -> crate::Result<RepoKey> {
    RepoKey::parse(s)
}
