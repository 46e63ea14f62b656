//! Per-agent mailboxes and the message types that flow through them.
//!
//! Each mailbox is an unbounded FIFO with many producers and exactly one
//! consumer, the owning agent. Send never blocks and never fails while the
//! owner is alive; receive is a non-blocking destructive pop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::models::{AnalysisReport, QualityMetrics, Record};

/// Closed set of payloads agents exchange. Receivers match exhaustively
/// and explicitly reject tags they do not expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    NewData {
        source: String,
        records: Vec<Record>,
        quality: QualityMetrics,
    },
    ProcessedData {
        source: String,
        records: Vec<Record>,
        patterns: Vec<String>,
    },
    AnalysisResult {
        source: String,
        report: AnalysisReport,
        insights: Vec<String>,
    },
}

impl MessagePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewData { .. } => "new_data",
            Self::ProcessedData { .. } => "processed_data",
            Self::AnalysisResult { .. } => "analysis_result",
        }
    }
}

/// Immutable once enqueued; ownership transfers to the receiving mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub payload: MessagePayload,
}

impl Message {
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            timestamp: Utc::now(),
            from: from.into(),
            to: to.into(),
            payload,
        }
    }
}

/// Producer half of a mailbox. Cheap to clone; held by the router.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl MailboxSender {
    pub fn send(&self, msg: Message) {
        // Only fails when the owning agent is gone; nothing to deliver to.
        if self.tx.send(msg).is_err() {
            warn!("Dropped message to a closed mailbox");
        }
    }
}

/// Consumer half, owned by exactly one agent.
#[derive(Debug)]
pub struct Mailbox {
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> MailboxSender {
        MailboxSender {
            tx: self.tx.clone(),
        }
    }

    /// Pop the oldest message, or None when empty. Never waits.
    pub fn receive(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Pop everything currently queued, oldest first.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(msg) = self.receive() {
            messages.push(msg);
        }
        messages
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps agent ids to their mailbox senders so agents address each other
/// by id without holding references to one another.
#[derive(Debug, Clone, Default)]
pub struct MailboxRouter {
    routes: Arc<DashMap<String, MailboxSender>>,
}

impl MailboxRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent_id: impl Into<String>, sender: MailboxSender) {
        self.routes.insert(agent_id.into(), sender);
    }

    pub fn deregister(&self, agent_id: &str) {
        self.routes.remove(agent_id);
    }

    /// Deliver to the destination mailbox. Unknown destinations are logged
    /// and dropped; delivery is never an error for the sender.
    pub fn route(&self, msg: Message) {
        match self.routes.get(&msg.to) {
            Some(sender) => sender.send(msg),
            None => warn!(to = %msg.to, from = %msg.from, "No mailbox registered for destination"),
        }
    }
}
