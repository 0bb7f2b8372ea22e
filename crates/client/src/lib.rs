//! The online half of the coordinator.
//!
//! A client polls the broadcast log, applies each message to the round's
//! state machines, materializes operations for the air-gapped machine, and
//! re-broadcasts signed results. Local state is limited to the last
//! processed offset, per-round snapshots, the operation pool, and
//! reconstructed signatures; everything else replays from the log.

pub mod client;
pub mod error;
pub mod http;
pub mod keystore;
pub mod state;

pub use client::{run_poll_loop, Client, POLLING_PERIOD};
pub use error::ClientError;
pub use keystore::{verify_signature, FileKeyStore, InMemoryKeyStore, KeyPair, KeyStore};
pub use state::{InMemoryState, State};
