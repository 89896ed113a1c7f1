//! Challenge issuance and verification.
//!
//! The pieces compose in one direction: `CodeGenerator` produces a code,
//! `SecretHasher` digests it for the store, and `ChallengeVerifier` drives
//! the lifecycle through the store's atomic primitives.

mod code;
mod digest;
mod verifier;

pub use code::CodeGenerator;
pub use digest::SecretHasher;
pub use verifier::{ChallengeVerifier, IssuedChallenge, VerifierStatsSnapshot};
