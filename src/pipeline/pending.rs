//! Background pending-message processor.
//!
//! Messages are stored before they are triaged. If the process dies (or an
//! LLM outage outlasts a request) between the two, the row stays `pending`.
//! This loop picks those rows up and runs them through the pipeline again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::pipeline::processor::MessageProcessor;
use crate::pipeline::types::InboundMessage;
use crate::store::Database;

/// Spawn a background task that re-processes pending messages.
///
/// The first tick fires immediately, so messages left over from a previous
/// run are handled at startup. Returns a `JoinHandle` and shutdown flag.
pub fn spawn_pending_processor(
    db: Arc<dyn Database>,
    processor: Arc<MessageProcessor>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "Pending processor started"
        );

        let mut tick = tokio::time::interval(interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Pending processor shutting down");
                return;
            }

            process_pending(&db, &processor).await;
        }
    });

    (handle, shutdown_flag)
}

/// Run every pending message through the pipeline once.
///
/// Returns how many were processed.
pub async fn process_pending(db: &Arc<dyn Database>, processor: &MessageProcessor) -> usize {
    let pending = match db.get_pending_messages().await {
        Ok(msgs) => msgs,
        Err(e) => {
            error!(error = %e, "Failed to fetch pending messages");
            return 0;
        }
    };

    if pending.is_empty() {
        return 0;
    }

    info!(count = pending.len(), "Processing pending message(s)");

    let mut processed = 0;
    for stored in &pending {
        let inbound = match InboundMessage::try_from(stored) {
            Ok(m) => m,
            Err(e) => {
                warn!(id = %stored.id, error = %e, "Skipping unconvertible pending message");
                continue;
            }
        };

        match processor.process(inbound).await {
            Ok(result) => {
                processed += 1;
                debug!(
                    id = %stored.id,
                    disposition = result.disposition.label(),
                    "Pending message processed"
                );
            }
            Err(PipelineError::Duplicate(_)) => {
                debug!(id = %stored.id, "Pending message already in flight");
            }
            Err(e) => {
                // Left as pending; retried on the next tick.
                error!(id = %stored.id, error = %e, "Failed to process pending message");
            }
        }
    }

    processed
}
