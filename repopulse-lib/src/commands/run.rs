//! Command dispatch logic for repopulse

use super::common::CommonArgs;
use super::pipeline::{self, CollectArgs};
use super::webhook::{self, WebhookCommand};
use crate::{Host, Result};
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "repopulse", author, version, long_about = None)]
#[command(about = "Collect and track repository activity from multiple upstream sources")]
#[command(styles = CLAP_STYLES)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a collection pass for one repository
    Collect(CollectArgs),

    /// Show per-source collection status for a repository
    Status {
        /// Repository, as owner/name
        #[arg(value_name = "REPO")]
        repo: String,
    },

    /// Reset a repository's failed sources to pending
    Reset {
        /// Repository, as owner/name
        #[arg(value_name = "REPO")]
        repo: String,
    },

    /// List repositories with failed sources
    Failed {
        /// Maximum number of repositories to list
        #[arg(long, value_name = "COUNT", default_value_t = 50)]
        limit: usize,
    },

    /// Add a repository to the scheduled refresh set
    Approve {
        /// Repository, as owner/name
        #[arg(value_name = "REPO")]
        repo: String,
    },

    /// Remove a repository from the scheduled refresh set
    Unapprove {
        /// Repository, as owner/name
        #[arg(value_name = "REPO")]
        repo: String,
    },

    /// List the repositories in the scheduled refresh set
    Approved,

    /// Run collection passes for repositories whose retry backoff has expired
    Retries {
        /// Maximum number of repositories to process
        #[arg(long, value_name = "COUNT", default_value_t = 20)]
        limit: usize,
    },

    /// Run an incremental collection pass over every approved repository
    Refresh,

    /// Process due retries continuously, with a periodic fleet refresh
    Watch {
        /// Seconds between retry sweeps
        #[arg(long, value_name = "SECONDS", default_value_t = 60)]
        interval: u64,

        /// Maximum repositories per sweep
        #[arg(long, value_name = "COUNT", default_value_t = 20)]
        limit: usize,

        /// Seconds between refreshes of the approved set
        #[arg(long, value_name = "SECONDS", default_value_t = 7 * 24 * 3600)]
        refresh_interval: u64,
    },

    /// Show queue depths and failure counts
    Stats,

    /// Show the derived metrics for a repository
    Metrics {
        /// Repository, as owner/name
        #[arg(value_name = "REPO")]
        repo: String,

        /// Recompute over this many days instead of the stored window
        #[arg(long, value_name = "DAYS")]
        window: Option<i64>,
    },

    /// Enqueue and apply pushed events
    #[command(subcommand)]
    Webhook(WebhookCommand),
}

/// Dispatch command-line arguments to the appropriate handler
///
/// # Errors
///
/// Returns an error if command parsing fails or if the executed command fails
pub async fn run<I, T, H>(host: &mut H, args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    H: Host,
{
    let args = Args::parse_from(args);
    args.common.init_logging();

    let context = args.common.open_pipeline()?;

    match &args.command {
        Command::Collect(collect_args) => pipeline::collect(host, &context, collect_args).await,
        Command::Status { repo } => pipeline::status(host, &context, repo),
        Command::Reset { repo } => pipeline::reset(host, &context, repo),
        Command::Failed { limit } => pipeline::failed(host, &context, *limit),
        Command::Approve { repo } => pipeline::approve(host, &context, repo),
        Command::Unapprove { repo } => pipeline::unapprove(host, &context, repo),
        Command::Approved => pipeline::approved(host, &context),
        Command::Retries { limit } => pipeline::retries(host, &context, *limit).await,
        Command::Refresh => pipeline::refresh(host, &context).await,
        Command::Watch {
            interval,
            limit,
            refresh_interval,
        } => pipeline::watch(&context, *interval, *limit, *refresh_interval).await,
        Command::Stats => pipeline::stats(host, &context),
        Command::Metrics { repo, window } => pipeline::metrics(host, &context, repo, *window),
        Command::Webhook(webhook_command) => webhook::dispatch(host, &context, webhook_command),
    }
}
