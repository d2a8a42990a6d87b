//! Channel I/O: inbound parsing and outbound reply delivery.
//!
//! Channels are pure I/O. Triage and disposition logic live in
//! `pipeline::MessageProcessor`, which hands replies to the `ReplySender`
//! registered for the message's channel.

pub mod chat;
pub mod email;

pub use chat::{ChatHub, ChatReplySender};
pub use email::{EmailConfig, SmtpReplySender, parse_raw_email};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::pipeline::types::{Channel, InboundMessage};

/// Outbound side of a channel.
#[async_trait]
pub trait ReplySender: Send + Sync {
    /// Channel this sender delivers on.
    fn channel(&self) -> Channel;

    /// Deliver an auto-reply to the sender of `message`.
    async fn send_reply(&self, message: &InboundMessage, reply: &str) -> Result<(), ChannelError>;

    /// Tell the sender a human will follow up. Channels without a live
    /// connection have nothing to do.
    async fn notify_escalated(&self, _message: &InboundMessage) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Reply senders keyed by channel.
#[derive(Default, Clone)]
pub struct ReplyRouter {
    senders: HashMap<Channel, Arc<dyn ReplySender>>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender, replacing any previous one for the same channel.
    pub fn register(&mut self, sender: Arc<dyn ReplySender>) {
        self.senders.insert(sender.channel(), sender);
    }

    pub fn with(mut self, sender: Arc<dyn ReplySender>) -> Self {
        self.register(sender);
        self
    }

    pub fn has_sender(&self, channel: Channel) -> bool {
        self.senders.contains_key(&channel)
    }

    pub async fn send_reply(
        &self,
        message: &InboundMessage,
        reply: &str,
    ) -> Result<(), ChannelError> {
        self.sender_for(message.channel)?
            .send_reply(message, reply)
            .await
    }

    pub async fn notify_escalated(&self, message: &InboundMessage) -> Result<(), ChannelError> {
        match self.senders.get(&message.channel) {
            Some(sender) => sender.notify_escalated(message).await,
            None => Ok(()),
        }
    }

    fn sender_for(&self, channel: Channel) -> Result<&Arc<dyn ReplySender>, ChannelError> {
        self.senders
            .get(&channel)
            .ok_or_else(|| ChannelError::NoSender(channel.to_string()))
    }
}
