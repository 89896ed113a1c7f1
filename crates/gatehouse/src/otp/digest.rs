//! Code digests for storage at rest.

use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// One-way digest of a verification code.
///
/// Unsalted SHA-256: every challenge carries a fresh random code and the
/// digest never leaves the store, so a fixed hash suffices here.
#[derive(Clone, Copy, Default)]
pub struct SecretHasher;

impl SecretHasher {
    /// base64(SHA-256(code))
    pub fn digest(&self, code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        STANDARD.encode(hasher.finalize())
    }

    /// Recompute the candidate's digest and compare in constant time with
    /// respect to its content.
    pub fn verify(&self, candidate: &str, digest: &str) -> bool {
        let computed = self.digest(candidate);
        computed.as_bytes().ct_eq(digest.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let hasher = SecretHasher;
        assert_eq!(hasher.digest("042917"), hasher.digest("042917"));
    }

    #[test]
    fn digest_differs_per_code() {
        let hasher = SecretHasher;
        assert_ne!(hasher.digest("042917"), hasher.digest("042918"));
    }

    #[test]
    fn verify_accepts_the_original_code() {
        let hasher = SecretHasher;
        let digest = hasher.digest("500123");
        assert!(hasher.verify("500123", &digest));
    }

    #[test]
    fn verify_rejects_everything_else() {
        let hasher = SecretHasher;
        let digest = hasher.digest("500123");
        assert!(!hasher.verify("500124", &digest));
        assert!(!hasher.verify("", &digest));
        assert!(!hasher.verify("not-a-code", &digest));
    }
}
