//! Unified message processing pipeline.
//!
//! All inbound messages from any channel flow through:
//! 1. channel intake (webhook, chat WebSocket) → `InboundMessage`
//! 2. `RulesEngine::evaluate()`: fast pattern matching (no LLM)
//! 3. `TriageEngine`: category, keywords, complexity, reply
//! 4. auto-reply via the channel's `ReplySender`, or escalation

pub mod events;
pub mod pending;
pub mod processor;
pub mod rules;
pub mod types;

pub use events::EventHub;
pub use pending::spawn_pending_processor;
pub use processor::MessageProcessor;
pub use rules::{RuleVerdict, RulesEngine};
pub use types::{Channel, Disposition, InboundMessage, PipelineEvent, ProcessedMessage};
