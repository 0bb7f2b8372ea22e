//! The air-gapped half of the coordinator.
//!
//! Holds the DKG secrets and performs every cryptographic step of a round:
//! participation confirmation, commits, deals, deal verification, master key
//! derivation, partial signing, and signature reconstruction. State lives in
//! a byte-keyed store encrypted at rest under an operator-supplied key; the
//! per-round operation log plus a seed-derived random stream make the whole
//! machine replayable after a crash.

pub mod encryption;
pub mod error;
pub mod machine;
pub mod store;

pub use error::MachineError;
pub use machine::Machine;
pub use store::{KeyValueStore, MemoryKeyValueStore, SledKeyValueStore, StoreError, StoreTransaction};
