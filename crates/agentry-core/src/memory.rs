//! Conversation Memory
//!
//! Bounded, order-preserving log of role-tagged messages persisted across
//! runs of the same agent, plus a key/value side channel for task-level
//! flags. The log evicts oldest-first once it reaches capacity; the side
//! channel never evicts.
//!
//! Mutations are serialized under a lock so one agent instance can be shared
//! by concurrently executing runs; reads hand out an owned snapshot.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use crate::message::{Message, MessageMetadata, Role};

/// Default maximum number of retained messages
pub const DEFAULT_MAX_MESSAGES: usize = 50;

struct MemoryLog {
    messages: VecDeque<Message>,
    max_messages: usize,
}

/// Bounded conversation memory with FIFO eviction
pub struct AgentMemory {
    log: RwLock<MemoryLog>,
    metadata: RwLock<HashMap<String, serde_json::Value>>,
}

impl Default for AgentMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl AgentMemory {
    /// Create a memory log retaining at most `max_messages` entries.
    /// A zero capacity is clamped up to one so the most recent message
    /// always survives.
    pub fn new(max_messages: usize) -> Self {
        Self {
            log: RwLock::new(MemoryLog {
                messages: VecDeque::new(),
                max_messages: max_messages.max(1),
            }),
            metadata: RwLock::new(HashMap::new()),
        }
    }

    /// Append a message, then evict oldest entries past capacity
    pub fn append(&self, role: Role, content: impl Into<String>, metadata: Option<MessageMetadata>) {
        let mut message = Message::new(role, content);
        message.metadata = metadata;
        self.append_message(message);
    }

    /// Append an already-built message
    pub fn append_message(&self, message: Message) {
        let mut log = self.log.write().expect("memory lock poisoned");
        log.messages.push_back(message);
        while log.messages.len() > log.max_messages {
            log.messages.pop_front();
        }
    }

    /// Snapshot of the log in insertion order; `last_n` limits the view to
    /// the most recent entries. A pure read with no side effect.
    pub fn replay(&self, last_n: Option<usize>) -> Vec<Message> {
        let log = self.log.read().expect("memory lock poisoned");
        let skip = last_n.map_or(0, |n| log.messages.len().saturating_sub(n));
        log.messages.iter().skip(skip).cloned().collect()
    }

    /// Reset the log to empty. The metadata side channel is untouched.
    pub fn clear(&self) {
        let mut log = self.log.write().expect("memory lock poisoned");
        log.messages.clear();
    }

    /// Set a metadata value
    pub fn set_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut metadata = self.metadata.write().expect("memory lock poisoned");
        metadata.insert(key.into(), value);
    }

    /// Get a metadata value
    pub fn get_metadata(&self, key: &str) -> Option<serde_json::Value> {
        let metadata = self.metadata.read().expect("memory lock poisoned");
        metadata.get(key).cloned()
    }

    /// Number of retained messages
    pub fn len(&self) -> usize {
        self.log.read().expect("memory lock poisoned").messages.len()
    }

    /// Check if the log is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured maximum entry count
    pub fn capacity(&self) -> usize {
        self.log.read().expect("memory lock poisoned").max_messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_replay_order() {
        let memory = AgentMemory::new(10);
        memory.append(Role::User, "first", None);
        memory.append(Role::Assistant, "second", None);

        let messages = memory.replay(None);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
    }

    #[test]
    fn test_fifo_eviction() {
        let memory = AgentMemory::new(3);
        for i in 0..5 {
            memory.append(Role::User, format!("msg {}", i), None);
        }

        assert_eq!(memory.len(), 3);
        let messages = memory.replay(None);
        assert_eq!(messages[0].content, "msg 2");
        assert_eq!(messages[2].content, "msg 4");
    }

    #[test]
    fn test_bound_holds_after_every_append() {
        let memory = AgentMemory::new(4);
        for i in 0..20 {
            memory.append(Role::User, format!("{}", i), None);
            assert!(memory.len() <= 4);
        }
    }

    #[test]
    fn test_replay_last_n() {
        let memory = AgentMemory::new(10);
        for i in 0..6 {
            memory.append(Role::User, format!("msg {}", i), None);
        }

        let recent = memory.replay(Some(2));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "msg 4");
        assert_eq!(recent[1].content, "msg 5");

        // Asking for more than exists returns everything
        assert_eq!(memory.replay(Some(100)).len(), 6);
    }

    #[test]
    fn test_clear_keeps_metadata() {
        let memory = AgentMemory::new(10);
        memory.append(Role::User, "hello", None);
        memory.set_metadata("task_id", serde_json::json!("abc"));

        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.get_metadata("task_id"), Some(serde_json::json!("abc")));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let memory = AgentMemory::new(0);
        memory.append(Role::User, "kept", None);
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.capacity(), 1);
    }
}
