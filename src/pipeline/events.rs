//! Event hub: broadcast of pipeline activity to dashboard WebSocket clients.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use crate::pipeline::types::PipelineEvent;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Fan-out of `PipelineEvent`s to any number of subscribers.
pub struct EventHub {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(capacity);
        Arc::new(Self { tx })
    }

    /// Subscribe to events. Each WS client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event. Ok if nobody is listening.
    pub fn publish(&self, event: PipelineEvent) {
        let receivers = self.tx.send(event).unwrap_or(0);
        trace!(receivers, "Pipeline event published");
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish(PipelineEvent::Escalated {
            message_id: "m1".into(),
            reason: "complexity 4".into(),
        });

        match rx.recv().await.unwrap() {
            PipelineEvent::Escalated { message_id, .. } => assert_eq!(message_id, "m1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let hub = EventHub::new();
        hub.publish(PipelineEvent::Ignored {
            message_id: "m1".into(),
            reason: "noreply sender".into(),
        });
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let hub = EventHub::with_capacity(2);
        let mut rx = hub.subscribe();
        for i in 0..5 {
            hub.publish(PipelineEvent::Ignored {
                message_id: format!("m{i}"),
                reason: "x".into(),
            });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
