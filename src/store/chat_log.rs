//! Chat history
//!
//! Keeps every message sent and received during a session so the front-end
//! can redisplay it. Lives in process memory only and is gone on exit.

use crate::network::message::InboundEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One line of conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLogEntry {
    /// Remote peer ID (the recipient for our own messages)
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_mine: bool,
    #[serde(default)]
    pub is_file: bool,
}

impl ChatLogEntry {
    /// A message we sent to `peer`
    pub fn mine(peer: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: peer.into(),
            content: content.into(),
            timestamp: Utc::now(),
            is_mine: true,
            is_file: false,
        }
    }

    /// A message or file notification delivered by the node
    pub fn received(event: &InboundEvent) -> Self {
        Self {
            sender: event.sender.clone(),
            content: event.content.clone(),
            timestamp: Utc::now(),
            is_mine: false,
            is_file: event.is_file,
        }
    }
}

/// Append-only session history
#[derive(Debug, Default)]
pub struct ChatLog {
    entries: RwLock<Vec<ChatLogEntry>>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, entry: ChatLogEntry) {
        let mut entries = self.entries.write().await;
        entries.push(entry);
    }

    /// Snapshot copy of the history, oldest first
    pub async fn messages(&self) -> Vec<ChatLogEntry> {
        let entries = self.entries.read().await;
        entries.clone()
    }

    /// Entries exchanged with a single peer
    pub async fn with_peer(&self, peer: &str) -> Vec<ChatLogEntry> {
        let entries = self.entries.read().await;
        entries.iter().filter(|e| e.sender == peer).cloned().collect()
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }

    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
