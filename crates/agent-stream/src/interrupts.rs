use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::upstream::PendingInterrupt;

/// Keyed holder of at most one pending interrupt per conversation.
///
/// Each conversation has a single writer at a time (a new turn is not started
/// while the previous stream is open), so implementations only need atomic
/// per-key operations.
pub trait InterruptStore: Send + Sync {
    /// Replaces whatever was pending for `conversation_id`.
    fn set(&self, conversation_id: &str, interrupt: PendingInterrupt);

    /// Non-destructive read; clients poll this after the stream completes.
    fn get(&self, conversation_id: &str) -> Option<PendingInterrupt>;

    /// Removes and returns the pending interrupt, if any.
    fn clear(&self, conversation_id: &str) -> Option<PendingInterrupt>;
}

/// Process-local store. Contents are lost on restart; layer a durable store
/// behind [`InterruptStore`] when that matters.
#[derive(Debug, Default)]
pub struct InMemoryInterruptStore {
    entries: DashMap<String, PendingInterrupt>,
}

impl InMemoryInterruptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn InterruptStore> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl InterruptStore for InMemoryInterruptStore {
    fn set(&self, conversation_id: &str, interrupt: PendingInterrupt) {
        debug!(conversation_id, tool_call_id = %interrupt.tool_call_id, "storing pending interrupt");
        self.entries.insert(conversation_id.to_string(), interrupt);
    }

    fn get(&self, conversation_id: &str) -> Option<PendingInterrupt> {
        self.entries
            .get(conversation_id)
            .map(|entry| entry.value().clone())
    }

    fn clear(&self, conversation_id: &str) -> Option<PendingInterrupt> {
        self.entries
            .remove(conversation_id)
            .map(|(_, interrupt)| interrupt)
    }
}
