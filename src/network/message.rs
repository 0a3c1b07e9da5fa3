//! Protocol identifiers and the inbound event channel
//!
//! Every protocol handler hands its results to the front-end through a single
//! bounded queue. Producers wait when the queue is full, so events are never
//! dropped and arrive in the order they were pushed.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Protocol identifier for text messages
pub const CHAT_PROTOCOL: &str = "/anonbox/1.0.0";

/// Protocol identifier for file transfers
pub const FILE_PROTOCOL: &str = "/anonbox/file/1.0.0";

/// Default capacity of the inbound event channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// An event delivered to the front-end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Sender's peer ID (base58)
    pub sender: String,
    /// Message text, or a summary of the received file
    pub content: String,
    pub is_file: bool,
}

impl InboundEvent {
    pub fn text(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            is_file: false,
        }
    }

    pub fn file(sender: impl Into<String>, filename: &str) -> Self {
        Self {
            sender: sender.into(),
            content: format!("Received file: {}", filename),
            is_file: true,
        }
    }
}

/// Create a bounded event channel
pub fn channel(capacity: usize) -> (MessageSender, MessageReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MessageSender { tx }, MessageReceiver { rx })
}

/// Producer side, cloned into every protocol handler task
#[derive(Clone, Debug)]
pub struct MessageSender {
    tx: mpsc::Sender<InboundEvent>,
}

impl MessageSender {
    /// Push an event, waiting for space if the queue is full.
    ///
    /// Returns `false` if the consumer has gone away.
    pub async fn send(&self, event: InboundEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Consumer side, owned by the front-end's event loop
#[derive(Debug)]
pub struct MessageReceiver {
    rx: mpsc::Receiver<InboundEvent>,
}

impl MessageReceiver {
    /// Next event, or `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<InboundEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_protocol_ids_are_distinct() {
        assert_ne!(CHAT_PROTOCOL, FILE_PROTOCOL);
        assert!(CHAT_PROTOCOL.starts_with("/anonbox/"));
        assert!(FILE_PROTOCOL.starts_with("/anonbox/"));
    }

    #[test]
    fn test_event_constructors() {
        let text = InboundEvent::text("alice", "hi");
        assert!(!text.is_file);
        assert_eq!(text.content, "hi");

        let file = InboundEvent::file("bob", "notes.txt");
        assert!(file.is_file);
        assert_eq!(file.content, "Received file: notes.txt");
    }

    #[tokio::test]
    async fn test_channel_preserves_order() {
        let (tx, mut rx) = channel(8);
        for i in 0..5 {
            assert!(tx.send(InboundEvent::text("p", i.to_string())).await);
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().content, i.to_string());
        }
    }

    #[tokio::test]
    async fn test_full_channel_applies_backpressure() {
        let (tx, mut rx) = channel(1);
        assert!(tx.send(InboundEvent::text("p", "first")).await);

        let blocked = tokio::spawn({
            let tx = tx.clone();
            async move { tx.send(InboundEvent::text("p", "second")).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.recv().await.unwrap().content, "first");
        assert!(blocked.await.unwrap());
        assert_eq!(rx.recv().await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn test_channel_closes_when_producers_drop() {
        let (tx, mut rx) = channel(4);
        let tx2 = tx.clone();
        tx.send(InboundEvent::text("p", "last")).await;
        drop(tx);
        drop(tx2);

        assert_eq!(rx.recv().await.unwrap().content, "last");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_consumer_dropped() {
        let (tx, rx) = channel(4);
        drop(rx);
        assert!(!tx.send(InboundEvent::text("p", "lost")).await);
    }
}
