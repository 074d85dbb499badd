use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of write observed on a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    FieldSet,
    FieldDel,
    KeyDel,
}

/// Per-key change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub key: String,
    pub kind: ChangeKind,
}

/// Live subscription; dropping it ends delivery.
#[derive(Debug)]
pub struct Subscription {
    patterns: Vec<String>,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(patterns: Vec<String>, receiver: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self { patterns, receiver }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Next event, or `None` once the store side has gone away.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Already-queued event, if any.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }
}
