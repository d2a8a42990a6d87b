//! Message processor: triages inbound messages and disposes of them.
//!
//! Flow:
//! 1. Persist (dedup by channel-native ID)
//! 2. Rules engine (fast, no LLM) → may ignore or force escalation
//! 3. Triage (four LLM calls with fallbacks)
//! 4. Auto-reply through the channel's `ReplySender`, or escalate
//! 5. Persist triage record and status, broadcast events
//!
//! A message is only auto-replied when triage produced a reply, no rule
//! forced escalation, auto-reply is enabled and delivery succeeded.
//! Everything else lands in the escalation queue. The triage outcome itself
//! is never rewritten by the disposition: a rule-escalated message keeps its
//! drafted reply in the triage record for the agent.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::channels::ReplyRouter;
use crate::error::{DatabaseError, PipelineError};
use crate::pipeline::events::EventHub;
use crate::pipeline::rules::{RuleVerdict, RulesEngine};
use crate::pipeline::types::{Disposition, InboundMessage, PipelineEvent, ProcessedMessage};
use crate::store::{Database, LlmUsageRecord, MessageStatus, NewMessage, TriageRecord};
use crate::triage::{TriageEngine, TriageOutcome, TriageUsage};

/// Message processor: the core of the pipeline.
pub struct MessageProcessor {
    db: Arc<dyn Database>,
    triage: Arc<TriageEngine>,
    rules: RulesEngine,
    replies: ReplyRouter,
    events: Arc<EventHub>,
    auto_reply: bool,
    /// Channel-native IDs currently being processed.
    in_flight: Mutex<HashSet<String>>,
}

impl MessageProcessor {
    pub fn new(
        db: Arc<dyn Database>,
        triage: Arc<TriageEngine>,
        rules: RulesEngine,
        replies: ReplyRouter,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            db,
            triage,
            rules,
            replies,
            events,
            auto_reply: true,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Enable or disable automatic replies. Disabled means every triaged
    /// message is escalated.
    pub fn with_auto_reply(mut self, enabled: bool) -> Self {
        self.auto_reply = enabled;
        self
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    /// Process a single inbound message through the full pipeline.
    ///
    /// Returns `PipelineError::Duplicate` when the message was already
    /// dispositioned or is being processed right now. A stored message that
    /// is still pending (crash recovery, or a caller that gave up midway) is
    /// processed again.
    pub async fn process(&self, message: InboundMessage) -> Result<ProcessedMessage, PipelineError> {
        let Some(_claim) = self.claim(&message.id) else {
            return Err(PipelineError::Duplicate(message.id));
        };
        self.process_inner(message).await
    }

    /// Mark `external_id` as in flight until the returned claim is dropped.
    fn claim(&self, external_id: &str) -> Option<InFlight<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(external_id.to_string()) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            id: external_id.to_string(),
        })
    }

    async fn process_inner(
        &self,
        message: InboundMessage,
    ) -> Result<ProcessedMessage, PipelineError> {
        info!(
            id = %message.id,
            channel = %message.channel,
            sender = %message.sender,
            "Processing inbound message"
        );

        // Step 1: persist
        let message_id = self.persist(&message).await?;
        self.events.publish(PipelineEvent::MessageReceived {
            message_id: message_id.clone(),
            channel: message.channel,
            sender: message.sender.clone(),
            subject: message.subject.clone(),
        });

        // Step 2: rules engine
        let verdict = self.rules.evaluate(&message);
        if let Some(RuleVerdict::Ignore { reason }) = verdict {
            debug!(id = %message_id, reason = %reason, "Rules engine ignored message");
            self.db
                .update_message_status(&message_id, MessageStatus::Ignored)
                .await?;
            self.events.publish(PipelineEvent::Ignored {
                message_id: message_id.clone(),
                reason: reason.clone(),
            });
            return Ok(ProcessedMessage {
                message_id,
                original: message,
                outcome: None,
                disposition: Disposition::Ignored { reason },
                processed_at: Utc::now(),
            });
        }

        // Step 3: triage
        let request = message.triage_request();
        let (outcome, usage) = self.triage.triage_with_usage(&request).await;
        self.record_usage(&message_id, &usage).await;
        self.events.publish(PipelineEvent::MessageTriaged {
            message_id: message_id.clone(),
            outcome: outcome.clone(),
        });

        // Step 4: dispose
        let disposition = match (&verdict, &outcome.response) {
            (Some(RuleVerdict::Escalate { reason }), _) => Disposition::Escalated {
                reason: format!("rule: {reason}"),
            },
            (_, None) => Disposition::Escalated {
                reason: format!("complexity {}", outcome.complexity),
            },
            (_, Some(_)) if !self.auto_reply => Disposition::Escalated {
                reason: "auto-reply disabled".to_string(),
            },
            (_, Some(reply)) => match self.replies.send_reply(&message, reply).await {
                Ok(()) => Disposition::AutoReplied {
                    reply: reply.clone(),
                },
                Err(e) => {
                    warn!(id = %message_id, error = %e, "Auto-reply delivery failed, escalating");
                    Disposition::Escalated {
                        reason: format!("delivery failed: {e}"),
                    }
                }
            },
        };

        // Step 5: persist and broadcast
        self.finish(&message_id, &message, &outcome, &disposition)
            .await?;

        info!(
            id = %message_id,
            category = %outcome.category,
            complexity = outcome.complexity.value(),
            disposition = disposition.label(),
            "Message processed"
        );

        Ok(ProcessedMessage {
            message_id,
            original: message,
            outcome: Some(outcome),
            disposition,
            processed_at: Utc::now(),
        })
    }

    /// Process a batch of messages.
    ///
    /// Processes each message independently. Failures on individual messages
    /// are logged but don't fail the entire batch.
    pub async fn process_batch(&self, messages: Vec<InboundMessage>) -> Vec<ProcessedMessage> {
        let count = messages.len();
        info!(count, "Processing message batch");

        let mut results = Vec::with_capacity(count);
        for message in messages {
            let id = message.id.clone();
            match self.process(message).await {
                Ok(processed) => results.push(processed),
                Err(PipelineError::Duplicate(_)) => {
                    debug!(id = %id, "Skipping duplicate message in batch");
                }
                Err(e) => {
                    error!(id = %id, error = %e, "Failed to process message in batch");
                }
            }
        }

        info!(
            processed = results.len(),
            total = count,
            "Batch processing complete"
        );
        results
    }

    /// Store the message, or pick up a pending copy left by an earlier run.
    async fn persist(&self, message: &InboundMessage) -> Result<String, PipelineError> {
        if let Some(existing) = self.db.get_message_by_external_id(&message.id).await? {
            if existing.status != MessageStatus::Pending {
                return Err(PipelineError::Duplicate(message.id.clone()));
            }
            debug!(id = %existing.id, "Resuming pending message");
            return Ok(existing.id);
        }

        let reply_metadata = (!message.reply_metadata.is_null())
            .then(|| message.reply_metadata.to_string());

        let new = NewMessage {
            external_id: &message.id,
            channel: message.channel.as_str(),
            sender: &message.sender,
            sender_name: message.sender_name.as_deref(),
            subject: &message.subject,
            content: &message.content,
            received_at: message.received_at,
            reply_metadata: reply_metadata.as_deref(),
        };

        match self.db.insert_message(&new).await {
            Ok(id) => Ok(id),
            Err(DatabaseError::Constraint(_)) => Err(PipelineError::Duplicate(message.id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn record_usage(&self, message_id: &str, usage: &TriageUsage) {
        if usage.calls == 0 {
            return;
        }
        let record = LlmUsageRecord {
            message_id: Some(message_id),
            model: self.triage.model_name(),
            calls: usage.calls,
            failed_calls: usage.failed_calls,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost: usage.cost,
        };
        if let Err(e) = self.db.record_llm_usage(&record).await {
            warn!(id = %message_id, error = %e, "Failed to record LLM usage");
        }
    }

    async fn finish(
        &self,
        message_id: &str,
        message: &InboundMessage,
        outcome: &TriageOutcome,
        disposition: &Disposition,
    ) -> Result<(), PipelineError> {
        let escalation_reason = match disposition {
            Disposition::Escalated { reason } => Some(reason.clone()),
            _ => None,
        };

        self.db
            .insert_triage_record(&TriageRecord {
                message_id: message_id.to_string(),
                category: outcome.category.clone(),
                complexity: outcome.complexity.value(),
                keywords: outcome.keywords.clone(),
                response: outcome.response.clone(),
                needs_human: outcome.needs_human,
                escalation_reason: escalation_reason.clone(),
                created_at: Utc::now(),
            })
            .await?;

        match disposition {
            Disposition::AutoReplied { reply } => {
                self.db
                    .update_message_status(message_id, MessageStatus::AutoReplied)
                    .await?;
                self.events.publish(PipelineEvent::AutoReplied {
                    message_id: message_id.to_string(),
                    reply: reply.clone(),
                });
            }
            Disposition::Escalated { reason } => {
                self.db
                    .update_message_status(message_id, MessageStatus::Escalated)
                    .await?;
                if let Err(e) = self.replies.notify_escalated(message).await {
                    debug!(id = %message_id, error = %e, "Escalation notice not delivered");
                }
                self.events.publish(PipelineEvent::Escalated {
                    message_id: message_id.to_string(),
                    reason: reason.clone(),
                });
            }
            Disposition::Ignored { .. } => {}
        }

        Ok(())
    }
}

/// Releases an in-flight claim on drop, including when the processing
/// future is cancelled.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
