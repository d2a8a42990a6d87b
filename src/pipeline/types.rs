//! Shared types for the message processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::store::StoredMessage;
use crate::triage::{TriageOutcome, TriageRequest};

// ── Channel ─────────────────────────────────────────────────────────

/// Where a message came in and where its reply goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Chat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Chat => "chat",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "chat" => Ok(Self::Chat),
            other => Err(PipelineError::UnknownChannel(other.to_string())),
        }
    }
}

// ── Inbound message ─────────────────────────────────────────────────

/// Unified inbound message from any channel.
///
/// Channel adapters convert their native format into this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel-native ID (email Message-ID, chat frame UUID). Used for dedup.
    pub id: String,
    pub channel: Channel,
    /// Email address or chat session ID.
    pub sender: String,
    /// Human-readable sender name (if available).
    pub sender_name: Option<String>,
    /// Subject line; empty for chat.
    pub subject: String,
    /// Message body content.
    pub content: String,
    /// Channel-specific metadata for replying (threading headers, session ID).
    pub reply_metadata: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// The triage view of this message.
    pub fn triage_request(&self) -> TriageRequest {
        TriageRequest {
            subject: self.subject.clone(),
            body: self.content.clone(),
            sender_name: self.sender_name.clone(),
        }
    }
}

impl TryFrom<&StoredMessage> for InboundMessage {
    type Error = PipelineError;

    fn try_from(stored: &StoredMessage) -> Result<Self, Self::Error> {
        let reply_metadata = stored
            .reply_metadata
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or(serde_json::Value::Null);

        Ok(Self {
            id: stored.external_id.clone(),
            channel: stored.channel.parse()?,
            sender: stored.sender.clone(),
            sender_name: stored.sender_name.clone(),
            subject: stored.subject.clone(),
            content: stored.content.clone(),
            reply_metadata,
            received_at: stored.received_at,
        })
    }
}

// ── Disposition ─────────────────────────────────────────────────────

/// What happened to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disposition {
    /// Dropped by a rule before triage.
    Ignored { reason: String },
    /// Reply delivered on the message's channel.
    AutoReplied { reply: String },
    /// Left for a human.
    Escalated { reason: String },
}

impl Disposition {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ignored { .. } => "ignored",
            Self::AutoReplied { .. } => "auto_replied",
            Self::Escalated { .. } => "escalated",
        }
    }
}

// ── Processed message ───────────────────────────────────────────────

/// Result of processing a message through the pipeline.
#[derive(Debug, Clone)]
pub struct ProcessedMessage {
    /// Internal store ID.
    pub message_id: String,
    /// The original inbound message.
    pub original: InboundMessage,
    /// Triage result; `None` when a rule ignored the message.
    pub outcome: Option<TriageOutcome>,
    pub disposition: Disposition,
    pub processed_at: DateTime<Utc>,
}

// ── Events ──────────────────────────────────────────────────────────

/// Pipeline activity pushed to dashboard subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    MessageReceived {
        message_id: String,
        channel: Channel,
        sender: String,
        subject: String,
    },
    MessageTriaged {
        message_id: String,
        outcome: TriageOutcome,
    },
    AutoReplied {
        message_id: String,
        reply: String,
    },
    Escalated {
        message_id: String,
        reason: String,
    },
    Ignored {
        message_id: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::MessageStatus;

    fn stored(channel: &str) -> StoredMessage {
        StoredMessage {
            id: "msg-001".to_string(),
            external_id: "<ext-001@example.com>".to_string(),
            channel: channel.to_string(),
            sender: "ana@example.com".to_string(),
            sender_name: Some("Ana".to_string()),
            subject: "Fatura".to_string(),
            content: "Cobrança duplicada".to_string(),
            received_at: Utc::now(),
            status: MessageStatus::Pending,
            reply_metadata: Some(r#"{"message_id":"<ext-001@example.com>"}"#.to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn stored_converts_to_inbound() {
        let inbound = InboundMessage::try_from(&stored("email")).unwrap();
        assert_eq!(inbound.id, "<ext-001@example.com>");
        assert_eq!(inbound.channel, Channel::Email);
        assert_eq!(inbound.sender_name.as_deref(), Some("Ana"));
        assert_eq!(
            inbound.reply_metadata["message_id"].as_str(),
            Some("<ext-001@example.com>")
        );
    }

    #[test]
    fn stored_without_metadata_has_null_reply_metadata() {
        let mut msg = stored("chat");
        msg.reply_metadata = None;
        let inbound = InboundMessage::try_from(&msg).unwrap();
        assert_eq!(inbound.channel, Channel::Chat);
        assert!(inbound.reply_metadata.is_null());
    }

    #[test]
    fn unknown_channel_is_rejected() {
        assert!(InboundMessage::try_from(&stored("telegram")).is_err());
    }

    #[test]
    fn triage_request_maps_fields() {
        let inbound = InboundMessage::try_from(&stored("email")).unwrap();
        let req = inbound.triage_request();
        assert_eq!(req.subject, "Fatura");
        assert_eq!(req.body, "Cobrança duplicada");
        assert_eq!(req.sender_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn disposition_serializes_with_kind_tag() {
        let json = serde_json::to_value(Disposition::Escalated {
            reason: "complexity 5".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "escalated");
        assert_eq!(json["reason"], "complexity 5");
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let json = serde_json::to_value(PipelineEvent::Ignored {
            message_id: "m1".into(),
            reason: "noreply sender".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "ignored");
        assert_eq!(json["message_id"], "m1");
    }
}
