//! Pedersen-style distributed key generation and BLS threshold signing.
//!
//! Implements the cryptographic steps of a DKG round on BLS12-381:
//!
//! 1. Each participant commits to a random polynomial of degree t-1.
//! 2. Shares are dealt encrypted to each recipient's suite key, with the
//!    commitment vector embedded for verification.
//! 3. Verifiers check deals against the broadcast commits and respond.
//! 4. Each participant sums the received shares into its key share; the
//!    master public key is the summed constant-term commitment.
//!
//! Signing is plain threshold BLS: partial signatures over the shares,
//! Lagrange recovery, pairing verification against the master key.

pub mod bls;
pub mod deal;
pub mod error;
pub mod feldman;
pub mod session;

pub use bls::{hash_to_g1, partial_sign, recover_signature, verify_signature};
pub use deal::Deal;
pub use error::DkgError;
pub use session::{DealResponse, DistKeyShare, DkgSession};
