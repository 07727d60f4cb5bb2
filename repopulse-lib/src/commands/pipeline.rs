//! Handlers for the collection and scheduling subcommands.

use super::Host;
use super::common::parse_repo;
use crate::collect::PipelineContext;
use crate::collect::orchestrator::CollectOptions;
use clap::Args;
use std::io::Write;

/// Arguments for the collect command
#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Repository to collect, as owner/name
    #[arg(value_name = "REPO")]
    pub repo: String,

    /// Re-fetch every source over the full lookback window
    #[arg(long)]
    pub force: bool,
}

pub async fn collect<H: Host>(host: &mut H, context: &PipelineContext, args: &CollectArgs) -> crate::Result<()> {
    let repo = parse_repo(&args.repo)?;
    let outcome = context.orchestrator.run(&repo, CollectOptions { force: args.force }).await?;

    let mut out = host.output();
    if outcome.attempted.is_empty() {
        let _ = writeln!(out, "{repo}: nothing due; sources are complete or still backing off");
        return Ok(());
    }

    for kind in &outcome.succeeded {
        let _ = writeln!(out, "{repo}/{kind}: ok");
    }
    for (kind, error) in &outcome.failed {
        let _ = writeln!(out, "{repo}/{kind}: FAILED ({error})");
    }

    let verdict = if outcome.is_complete {
        "complete"
    } else if outcome.is_partial {
        "partial, failed sources will be retried"
    } else {
        "failed"
    };
    let _ = writeln!(out, "{repo}: {verdict}");

    Ok(())
}

pub fn status<H: Host>(host: &mut H, context: &PipelineContext, repo: &str) -> crate::Result<()> {
    let repo = parse_repo(repo)?;

    match context.describe(&repo)? {
        Some(description) => {
            let _ = writeln!(host.output(), "{description}");
        }
        None => {
            let _ = writeln!(host.output(), "{repo}: never collected");
        }
    }

    Ok(())
}

pub fn reset<H: Host>(host: &mut H, context: &PipelineContext, repo: &str) -> crate::Result<()> {
    let repo = parse_repo(repo)?;
    let count = context.tracker.reset_failed(&repo)?;
    let _ = writeln!(host.output(), "{repo}: {count} source(s) reset to pending");
    Ok(())
}

pub fn failed<H: Host>(host: &mut H, context: &PipelineContext, limit: usize) -> crate::Result<()> {
    let repos = context.tracker.failed_collections(limit)?;

    let mut out = host.output();
    if repos.is_empty() {
        let _ = writeln!(out, "No repositories with failed sources");
        return Ok(());
    }

    for repo in repos {
        let state = context.tracker.get(&repo)?;
        let sources = state.map(|s| {
            s.failed_sources().iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        });
        let _ = writeln!(out, "{repo}: {}", sources.unwrap_or_default());
    }

    Ok(())
}

pub fn approve<H: Host>(host: &mut H, context: &PipelineContext, repo: &str) -> crate::Result<()> {
    let repo = parse_repo(repo)?;
    context.scheduler.approve(&repo)?;
    let _ = writeln!(host.output(), "{repo}: approved for scheduled refresh");
    Ok(())
}

pub fn unapprove<H: Host>(host: &mut H, context: &PipelineContext, repo: &str) -> crate::Result<()> {
    let repo = parse_repo(repo)?;
    context.scheduler.unapprove(&repo)?;
    let _ = writeln!(host.output(), "{repo}: removed from scheduled refresh");
    Ok(())
}

pub fn approved<H: Host>(host: &mut H, context: &PipelineContext) -> crate::Result<()> {
    let repos = context.scheduler.approved()?;

    let mut out = host.output();
    if repos.is_empty() {
        let _ = writeln!(out, "No approved repositories");
    }
    for repo in repos {
        let _ = writeln!(out, "{repo}");
    }

    Ok(())
}

pub async fn retries<H: Host>(host: &mut H, context: &PipelineContext, limit: usize) -> crate::Result<()> {
    let outcomes = context.scheduler.process_retries(limit).await?;

    let mut out = host.output();
    if outcomes.is_empty() {
        let _ = writeln!(out, "No retries due");
        return Ok(());
    }

    for outcome in &outcomes {
        let verdict = if outcome.is_complete { "complete" } else { "still partial" };
        let _ = writeln!(out, "{}: {verdict} ({} ok, {} failed)", outcome.repo, outcome.succeeded.len(), outcome.failed.len());
    }

    Ok(())
}

pub async fn refresh<H: Host>(host: &mut H, context: &PipelineContext) -> crate::Result<()> {
    let outcomes = context.scheduler.refresh_all().await?;

    let mut out = host.output();
    let _ = writeln!(out, "Refreshed {} repository(ies)", outcomes.len());
    for outcome in outcomes.iter().filter(|o| !o.failed.is_empty()) {
        let _ = writeln!(out, "{}: {} source(s) failed", outcome.repo, outcome.failed.len());
    }

    Ok(())
}

pub async fn watch(context: &PipelineContext, interval_secs: u64, limit: usize, refresh_interval_secs: u64) -> crate::Result<()> {
    context
        .scheduler
        .run_loop(
            core::time::Duration::from_secs(interval_secs),
            limit,
            core::time::Duration::from_secs(refresh_interval_secs),
        )
        .await;
    Ok(())
}

pub fn stats<H: Host>(host: &mut H, context: &PipelineContext) -> crate::Result<()> {
    let scheduler_stats = context.scheduler.stats()?;
    let webhook_queue = context.webhooks.queue_len()?;

    let mut out = host.output();
    let _ = writeln!(out, "retry queue:    {} ({} due now)", scheduler_stats.retry_queue_len, scheduler_stats.due_now);
    let _ = writeln!(out, "failed repos:   {}", scheduler_stats.failed_repos);
    let _ = writeln!(out, "approved repos: {}", scheduler_stats.approved_repos);
    let _ = writeln!(out, "webhook queue:  {webhook_queue}");

    Ok(())
}

pub fn metrics<H: Host>(host: &mut H, context: &PipelineContext, repo: &str, window: Option<i64>) -> crate::Result<()> {
    let repo = parse_repo(repo)?;
    let metrics = context.derived_metrics(&repo, window)?;

    let mut out = host.output();
    let Some(m) = metrics else {
        let _ = writeln!(out, "{repo}: no snapshot collected yet");
        return Ok(());
    };

    let _ = writeln!(out, "{repo} (last {} days, computed {})", m.window_days, m.computed_at);
    let _ = writeln!(out, "  activity score:       {:.1}", m.activity_score);
    let _ = writeln!(out, "  commits:              {} ({:.1}/week, {} contributors)", m.commit_count, m.commits_per_week, m.contributor_count);
    let _ = writeln!(out, "  pull requests:        {} opened, {} merged (median merge {:.1}d)", m.prs_opened, m.prs_merged, m.median_pr_merge_days);
    let _ = writeln!(out, "  issues:               {} opened, {} closed (median close {:.1}d, rate {:.2})", m.issues_opened, m.issues_closed, m.median_issue_close_days, m.issue_resolution_rate);
    let _ = writeln!(out, "  releases:             {}", m.release_count);
    let _ = writeln!(out, "  downloads last month: {}", m.downloads_last_month);

    Ok(())
}
