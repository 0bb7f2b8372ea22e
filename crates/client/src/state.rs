//! Local state adapter for the online node.
//!
//! The client persists four things: the last processed log offset, per-round
//! machine snapshots, the pending operation pool, and reconstructed
//! signatures. The in-memory implementation backs tests and demos; an
//! on-disk key-value implementation plugs into the same trait.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use coldsign_types::{Operation, ReconstructedSignature};

use crate::error::ClientError;

/// Local persistence for the client loop.
pub trait State: Send {
    fn load_offset(&self) -> Result<u64, ClientError>;
    fn save_offset(&self, offset: u64) -> Result<(), ClientError>;

    fn load_fsm(&self, dkg_round_id: &str) -> Result<Option<Vec<u8>>, ClientError>;
    fn save_fsm(&self, dkg_round_id: &str, dump: &[u8]) -> Result<(), ClientError>;

    fn put_operation(&self, operation: &Operation) -> Result<(), ClientError>;
    fn get_operation(&self, operation_id: &str) -> Result<Option<Operation>, ClientError>;
    fn delete_operation(&self, operation_id: &str) -> Result<(), ClientError>;
    fn operations(&self) -> Result<BTreeMap<String, Operation>, ClientError>;

    fn save_signature(&self, signature: ReconstructedSignature) -> Result<(), ClientError>;
    fn signatures(
        &self,
        dkg_round_id: &str,
    ) -> Result<BTreeMap<String, Vec<ReconstructedSignature>>, ClientError>;
}

impl<S: State + Sync> State for std::sync::Arc<S> {
    fn load_offset(&self) -> Result<u64, ClientError> {
        (**self).load_offset()
    }

    fn save_offset(&self, offset: u64) -> Result<(), ClientError> {
        (**self).save_offset(offset)
    }

    fn load_fsm(&self, dkg_round_id: &str) -> Result<Option<Vec<u8>>, ClientError> {
        (**self).load_fsm(dkg_round_id)
    }

    fn save_fsm(&self, dkg_round_id: &str, dump: &[u8]) -> Result<(), ClientError> {
        (**self).save_fsm(dkg_round_id, dump)
    }

    fn put_operation(&self, operation: &Operation) -> Result<(), ClientError> {
        (**self).put_operation(operation)
    }

    fn get_operation(&self, operation_id: &str) -> Result<Option<Operation>, ClientError> {
        (**self).get_operation(operation_id)
    }

    fn delete_operation(&self, operation_id: &str) -> Result<(), ClientError> {
        (**self).delete_operation(operation_id)
    }

    fn operations(&self) -> Result<BTreeMap<String, Operation>, ClientError> {
        (**self).operations()
    }

    fn save_signature(&self, signature: ReconstructedSignature) -> Result<(), ClientError> {
        (**self).save_signature(signature)
    }

    fn signatures(
        &self,
        dkg_round_id: &str,
    ) -> Result<BTreeMap<String, Vec<ReconstructedSignature>>, ClientError> {
        (**self).signatures(dkg_round_id)
    }
}

#[derive(Default)]
struct InMemoryStateInner {
    offset: u64,
    fsms: HashMap<String, Vec<u8>>,
    operations: BTreeMap<String, Operation>,
    signatures: HashMap<String, BTreeMap<String, Vec<ReconstructedSignature>>>,
}

/// In-memory state store.
#[derive(Default)]
pub struct InMemoryState {
    inner: Mutex<InMemoryStateInner>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State for InMemoryState {
    fn load_offset(&self) -> Result<u64, ClientError> {
        Ok(self.inner.lock().offset)
    }

    fn save_offset(&self, offset: u64) -> Result<(), ClientError> {
        self.inner.lock().offset = offset;
        Ok(())
    }

    fn load_fsm(&self, dkg_round_id: &str) -> Result<Option<Vec<u8>>, ClientError> {
        Ok(self.inner.lock().fsms.get(dkg_round_id).cloned())
    }

    fn save_fsm(&self, dkg_round_id: &str, dump: &[u8]) -> Result<(), ClientError> {
        self.inner
            .lock()
            .fsms
            .insert(dkg_round_id.to_owned(), dump.to_vec());
        Ok(())
    }

    fn put_operation(&self, operation: &Operation) -> Result<(), ClientError> {
        self.inner
            .lock()
            .operations
            .insert(operation.id.clone(), operation.clone());
        Ok(())
    }

    fn get_operation(&self, operation_id: &str) -> Result<Option<Operation>, ClientError> {
        Ok(self.inner.lock().operations.get(operation_id).cloned())
    }

    fn delete_operation(&self, operation_id: &str) -> Result<(), ClientError> {
        self.inner.lock().operations.remove(operation_id);
        Ok(())
    }

    fn operations(&self) -> Result<BTreeMap<String, Operation>, ClientError> {
        Ok(self.inner.lock().operations.clone())
    }

    fn save_signature(&self, signature: ReconstructedSignature) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        let by_id = inner
            .signatures
            .entry(signature.dkg_round_id.clone())
            .or_default()
            .entry(signature.signing_id.clone())
            .or_default();

        // Replays overwrite the same broadcaster's record instead of
        // growing the list.
        match by_id.iter_mut().find(|s| s.username == signature.username) {
            Some(existing) => *existing = signature,
            None => by_id.push(signature),
        }
        Ok(())
    }

    fn signatures(
        &self,
        dkg_round_id: &str,
    ) -> Result<BTreeMap<String, Vec<ReconstructedSignature>>, ClientError> {
        Ok(self
            .inner
            .lock()
            .signatures
            .get(dkg_round_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_offset_roundtrip() {
        let state = InMemoryState::new();
        assert_eq!(state.load_offset().unwrap(), 0);

        state.save_offset(17).unwrap();
        assert_eq!(state.load_offset().unwrap(), 17);
    }

    #[test]
    fn test_operation_pool() {
        let state = InMemoryState::new();
        let operation = Operation::new("state_x", vec![1], "round-1", Utc::now());

        state.put_operation(&operation).unwrap();
        assert_eq!(
            state.get_operation(&operation.id).unwrap().unwrap().id,
            operation.id
        );
        assert_eq!(state.operations().unwrap().len(), 1);

        state.delete_operation(&operation.id).unwrap();
        assert!(state.get_operation(&operation.id).unwrap().is_none());
    }

    #[test]
    fn test_signatures_are_keyed_and_deduplicated_by_broadcaster() {
        let state = InMemoryState::new();
        let signature = |username: &str, sig: u8| ReconstructedSignature {
            signing_id: "signing-1".into(),
            src_payload: vec![1],
            signature: vec![sig],
            username: username.into(),
            dkg_round_id: "round-1".into(),
        };

        state.save_signature(signature("alice", 1)).unwrap();
        state.save_signature(signature("bob", 2)).unwrap();
        // Replay of alice's broadcast replaces her record.
        state.save_signature(signature("alice", 3)).unwrap();

        let by_id = state.signatures("round-1").unwrap();
        let list = &by_id["signing-1"];
        assert_eq!(list.len(), 2);
        assert_eq!(
            list.iter().find(|s| s.username == "alice").unwrap().signature,
            vec![3]
        );
    }
}
