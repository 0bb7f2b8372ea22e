//! Log adapter: the narrow interface the coordinator needs from its
//! broadcast substrate.
//!
//! The log is a multi-writer append-only stream; writers get back assigned
//! offsets and total order is the log's responsibility. The in-memory
//! implementation backs tests and single-machine demos; a production
//! deployment plugs a broker-backed implementation into the same trait.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use coldsign_types::Message;

/// Log adapter error types.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("log unavailable: {0}")]
    Unavailable(String),
}

/// The append-only, broadcast-ordered message log.
pub trait LogStorage: Send + Sync {
    /// All messages with `offset >= from_offset`, in offset order.
    fn get_messages(&self, from_offset: u64) -> Result<Vec<Message>, StorageError>;

    /// Append one message; returns the assigned offset.
    fn send(&self, message: Message) -> Result<u64, StorageError>;

    /// Append a batch atomically; returns the assigned offsets.
    fn send_batch(&self, messages: Vec<Message>) -> Result<Vec<u64>, StorageError>;
}

/// Shared in-memory log.
#[derive(Clone, Default)]
pub struct InMemoryLog {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current length of the log.
    pub fn len(&self) -> u64 {
        self.messages.lock().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl LogStorage for InMemoryLog {
    fn get_messages(&self, from_offset: u64) -> Result<Vec<Message>, StorageError> {
        let messages = self.messages.lock();
        Ok(messages
            .iter()
            .skip(from_offset as usize)
            .cloned()
            .collect())
    }

    fn send(&self, mut message: Message) -> Result<u64, StorageError> {
        let mut messages = self.messages.lock();
        let offset = messages.len() as u64;
        message.offset = offset;
        messages.push(message);
        Ok(offset)
    }

    fn send_batch(&self, batch: Vec<Message>) -> Result<Vec<u64>, StorageError> {
        let mut messages = self.messages.lock();
        let mut offsets = Vec::with_capacity(batch.len());
        for mut message in batch {
            let offset = messages.len() as u64;
            message.offset = offset;
            messages.push(message);
            offsets.push(offset);
        }
        Ok(offsets)
    }
}
