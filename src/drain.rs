use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument, warn, Span};
use uuid::Uuid;

use crate::backend::{FollowService, QueueService};
use crate::model::{BatchReport, FollowEvent, MessageOutcome, QueueMessage, TriggerKind};

pub const DEFAULT_BATCH_SIZE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainSettings {
    pub queue_name: String,
    pub batch_size: u32,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            queue_name: "profile_events".into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[instrument(skip_all, fields(queue = %settings.queue_name, n = settings.batch_size))]
pub async fn read_batch(
    queue: &dyn QueueService,
    settings: &DrainSettings,
) -> Result<Vec<QueueMessage>> {
    queue.pop(&settings.queue_name, settings.batch_size).await
}

/// Validate one message and apply it. Archives only after the transition
/// succeeded; archive failures are logged and the message still counts.
#[instrument(skip_all, fields(msg_id = message.id))]
pub async fn process_message(
    queue: &dyn QueueService,
    follow: &dyn FollowService,
    settings: &DrainSettings,
    message: &QueueMessage,
) -> MessageOutcome {
    let id = message.id;
    let event = match FollowEvent::from_payload(&message.message) {
        Ok(event) => event,
        Err(reason) => {
            warn!(id, %reason, "skipping malformed profile event");
            return MessageOutcome::Skipped { id, reason };
        }
    };

    if let Err(err) = follow.apply_follow_event(&event).await {
        warn!(
            ?err,
            id,
            action = %event.action,
            follower_id = %event.follower_id,
            following_id = %event.following_id,
            "follow transition failed; leaving message for redelivery"
        );
        return MessageOutcome::Failed {
            id,
            error: format!("{err:#}"),
        };
    }

    let archived = acknowledge(queue, &settings.queue_name, id).await;
    info!(id, action = %event.action, archived, "profile event applied");
    MessageOutcome::Processed { id, archived }
}

/// Archive a processed message. Never fails the caller.
pub async fn acknowledge(queue: &dyn QueueService, queue_name: &str, id: i64) -> bool {
    match queue.archive(queue_name, id).await {
        Ok(true) => true,
        Ok(false) => {
            warn!(id, queue_name, "archive found no such message");
            false
        }
        Err(err) => {
            warn!(
                ?err,
                id,
                queue_name,
                "failed to archive message; it may be redelivered"
            );
            false
        }
    }
}

/// Pop one batch and process it message by message.
#[instrument(skip_all, fields(run_id = tracing::field::Empty, trigger = trigger.as_str()))]
pub async fn drain_batch(
    queue: &dyn QueueService,
    follow: &dyn FollowService,
    settings: &DrainSettings,
    trigger: TriggerKind,
) -> BatchReport {
    let run_id = Uuid::new_v4();
    Span::current().record("run_id", tracing::field::display(run_id));
    let started_at = Utc::now();

    let (messages, read_error) = match read_batch(queue, settings).await {
        Ok(messages) => (messages, None),
        Err(err) => {
            warn!(?err, "failed to read from queue; nothing to do this cycle");
            (Vec::new(), Some(format!("{err:#}")))
        }
    };

    let mut outcomes = Vec::with_capacity(messages.len());
    for message in &messages {
        outcomes.push(process_message(queue, follow, settings, message).await);
    }

    let report = BatchReport {
        run_id,
        trigger,
        started_at,
        finished_at: Utc::now(),
        outcomes,
        read_error,
    };
    let unapplied: Vec<i64> = report
        .outcomes
        .iter()
        .filter(|o| !o.is_processed())
        .map(MessageOutcome::id)
        .collect();
    info!(
        received = report.received(),
        processed = report.processed_count(),
        skipped = report.skipped_count(),
        failed = report.failed_count(),
        ?unapplied,
        "batch complete"
    );
    report
}

/// Keep draining until a pop comes back empty (or fails), up to `max_batches`.
/// Failed and skipped messages do not end the run.
pub async fn drain_until_empty(
    queue: &dyn QueueService,
    follow: &dyn FollowService,
    settings: &DrainSettings,
    trigger: TriggerKind,
    max_batches: usize,
) -> Vec<BatchReport> {
    let mut reports = Vec::new();
    while reports.len() < max_batches {
        let report = drain_batch(queue, follow, settings, trigger).await;
        let exhausted = report.received() == 0;
        reports.push(report);
        if exhausted {
            break;
        }
    }
    reports
}

/// True when a multi-batch run hit `max_batches` while the queue was still
/// handing out messages.
pub fn stopped_at_limit(reports: &[BatchReport], max_batches: usize) -> bool {
    reports.len() >= max_batches && reports.last().is_some_and(|r| r.received() > 0)
}
