//! Handlers for the webhook subcommands.

use super::Host;
use crate::collect::PipelineContext;
use clap::Subcommand;
use ohno::IntoAppError;
use std::io::{Read, Write};

#[derive(Subcommand, Debug)]
pub enum WebhookCommand {
    /// Add an event to the processing queue
    Enqueue {
        /// Event JSON, @path to read from a file, or - to read from stdin
        #[arg(value_name = "EVENT")]
        event: String,
    },

    /// Apply queued events to the snapshots they belong to
    Drain {
        /// Maximum number of events to apply
        #[arg(long, value_name = "COUNT", default_value_t = 100)]
        limit: usize,
    },

    /// Show recorded event processing errors
    Errors,
}

pub fn dispatch<H: Host>(host: &mut H, context: &PipelineContext, command: &WebhookCommand) -> crate::Result<()> {
    match command {
        WebhookCommand::Enqueue { event } => enqueue(host, context, event),
        WebhookCommand::Drain { limit } => drain(host, context, *limit),
        WebhookCommand::Errors => errors(host, context),
    }
}

fn enqueue<H: Host>(host: &mut H, context: &PipelineContext, event: &str) -> crate::Result<()> {
    let raw = read_event_argument(event)?;
    let accepted = context.webhooks.enqueue(&raw)?;

    let _ = if accepted {
        writeln!(host.output(), "Event queued ({} pending)", context.webhooks.queue_len()?)
    } else {
        writeln!(host.output(), "Event already processed, ignored")
    };

    Ok(())
}

fn drain<H: Host>(host: &mut H, context: &PipelineContext, limit: usize) -> crate::Result<()> {
    let stats = context.webhooks.drain(limit)?;

    let _ = writeln!(
        host.output(),
        "Applied {}, duplicates {}, dropped {}, failed {}",
        stats.applied,
        stats.duplicates,
        stats.dropped,
        stats.failed
    );

    Ok(())
}

fn errors<H: Host>(host: &mut H, context: &PipelineContext) -> crate::Result<()> {
    let errors = context.webhooks.errors()?;

    let mut out = host.output();
    if errors.is_empty() {
        let _ = writeln!(out, "No event errors recorded");
        return Ok(());
    }

    for (id, error) in errors {
        let _ = writeln!(out, "{id}: {error}");
    }

    Ok(())
}

/// Resolve the event argument: inline JSON, `@path`, or `-` for stdin.
fn read_event_argument(event: &str) -> crate::Result<String> {
    if event == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .into_app_err_with(|| "reading event from stdin")?;
        return Ok(raw);
    }

    if let Some(path) = event.strip_prefix('@') {
        return std::fs::read_to_string(path).into_app_err_with(|| format!("reading event file '{path}'"));
    }

    Ok(event.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::{PipelineConfig, RepoKey};
    use crate::collect::snapshot::ActivitySnapshot;
    use crate::commands::host::TestHost;
    use crate::store::{self, MemoryStore, keys};
    use chrono::Utc;
    use std::sync::Arc;

    fn context_with_baseline() -> PipelineContext {
        let store = Arc::new(MemoryStore::new());
        let repo = RepoKey::parse("acme/widgets").unwrap();
        let snapshot = ActivitySnapshot::new(repo.clone(), Utc::now());
        store::set_json(store.as_ref(), &keys::snapshot(&repo), &snapshot).unwrap();

        PipelineContext::new(store, Vec::new(), &PipelineConfig::default())
    }

    fn push_event(id: &str) -> String {
        serde_json::json!({
            "id": id,
            "repo": "acme/widgets",
            "received_at": Utc::now(),
            "kind": "push",
            "commits": [{
                "sha": format!("sha-{id}"),
                "message": "change",
                "author": "alice",
                "committed_at": Utc::now()
            }]
        })
        .to_string()
    }

    #[test]
    fn enqueue_then_drain() {
        let context = context_with_baseline();
        let mut host = TestHost::new();

        dispatch(&mut host, &context, &WebhookCommand::Enqueue { event: push_event("e1") }).unwrap();
        assert!(host.output_as_string().contains("Event queued (1 pending)"));

        let mut host = TestHost::new();
        dispatch(&mut host, &context, &WebhookCommand::Drain { limit: 100 }).unwrap();
        assert!(host.output_as_string().contains("Applied 1"));
    }

    #[test]
    fn enqueue_from_file() {
        let context = context_with_baseline();
        let path = std::env::temp_dir().join(format!("repopulse-event-{}.json", std::process::id()));
        std::fs::write(&path, push_event("e2")).unwrap();

        let mut host = TestHost::new();
        let argument = format!("@{}", path.display());
        dispatch(&mut host, &context, &WebhookCommand::Enqueue { event: argument }).unwrap();
        assert!(host.output_as_string().contains("Event queued"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn duplicate_enqueue_is_reported() {
        let context = context_with_baseline();
        let mut host = TestHost::new();

        dispatch(&mut host, &context, &WebhookCommand::Enqueue { event: push_event("e3") }).unwrap();
        dispatch(&mut host, &context, &WebhookCommand::Drain { limit: 100 }).unwrap();

        let mut host = TestHost::new();
        dispatch(&mut host, &context, &WebhookCommand::Enqueue { event: push_event("e3") }).unwrap();
        assert!(host.output_as_string().contains("already processed"));
    }

    #[test]
    fn errors_lists_failed_events() {
        let context = context_with_baseline();
        let bad = serde_json::json!({"id": "e9", "repo": "acme/widgets", "kind": "mystery"}).to_string();

        let mut host = TestHost::new();
        dispatch(&mut host, &context, &WebhookCommand::Enqueue { event: bad }).unwrap();
        dispatch(&mut host, &context, &WebhookCommand::Drain { limit: 100 }).unwrap();

        let mut host = TestHost::new();
        dispatch(&mut host, &context, &WebhookCommand::Errors).unwrap();
        assert!(host.output_as_string().contains("e9"));
    }

    #[test]
    fn missing_event_file_is_an_error() {
        let context = context_with_baseline();
        let mut host = TestHost::new();
        let result = dispatch(&mut host, &context, &WebhookCommand::Enqueue { event: "@/no/such/file.json".to_string() });
        assert!(result.is_err());
    }
}
