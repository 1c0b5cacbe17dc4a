//! Seed generation, commitment hashing and combined-seed formatting.
//!
//! The combined seed string `server:client:nonce` is the only input the
//! shuffle engine ever sees; commit, draw and verify all go through
//! [`combine`] so the format cannot drift between stages.

use crate::errors::{FairdeckError, FairdeckResult};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of a server seed in bytes (hex-encoded to twice this)
pub const SEED_BYTES: usize = 32;

/// Length of a generated client seed in bytes
pub const CLIENT_SEED_BYTES: usize = 16;

pub const MAX_CLIENT_SEED_LEN: usize = 64;

/// A freshly generated secret seed together with its public commitment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForgedSeed {
    pub seed: String,
    pub seed_hash: String,
}

impl ForgedSeed {
    pub fn new() -> Self {
        let seed = generate();
        let seed_hash = hash(&seed);
        Self { seed, seed_hash }
    }
}

impl Default for ForgedSeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a secret server seed from the OS CSPRNG, hex-encoded
pub fn generate() -> String {
    let mut bytes = [0u8; SEED_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 of the seed's hex string, hex-encoded
pub fn hash(seed: &str) -> String {
    hex::encode(Sha256::digest(seed.as_bytes()))
}

pub fn combine(server_seed: &str, client_seed: &str, nonce: u64) -> String {
    format!("{}:{}:{}", server_seed, client_seed, nonce)
}

/// Generate a default client seed for a player who has not chosen one
pub fn generate_client_seed() -> String {
    let mut bytes = [0u8; CLIENT_SEED_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Client seeds are 1..=64 printable ASCII characters
pub fn validate_client_seed(client_seed: &str) -> FairdeckResult<()> {
    if client_seed.is_empty() {
        return Err(FairdeckError::InvalidClientSeed("client seed is empty".into()));
    }
    if client_seed.len() > MAX_CLIENT_SEED_LEN {
        return Err(FairdeckError::InvalidClientSeed(format!(
            "client seed exceeds {} characters",
            MAX_CLIENT_SEED_LEN
        )));
    }
    if !client_seed.chars().all(|c| c.is_ascii_graphic()) {
        return Err(FairdeckError::InvalidClientSeed(
            "client seed must be printable ASCII without spaces".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_hex_of_fixed_length() {
        let seed = generate();
        assert_eq!(seed.len(), SEED_BYTES * 2);
        assert!(hex::decode(&seed).is_ok());
        assert_ne!(seed, generate());
    }

    #[test]
    fn test_hash_known_answer() {
        assert_eq!(
            hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_forged_seed_commits_to_its_seed() {
        let forged = ForgedSeed::new();
        assert_eq!(forged.seed_hash, hash(&forged.seed));
    }

    #[test]
    fn test_combine_format() {
        assert_eq!(combine("s", "c", 3), "s:c:3");
        assert_eq!(combine("server", "client", 42), "server:client:42");
    }

    #[test]
    fn test_client_seed_validation() {
        assert!(validate_client_seed("lucky-7").is_ok());
        assert!(validate_client_seed(&generate_client_seed()).is_ok());
        assert!(validate_client_seed("").is_err());
        assert!(validate_client_seed("has space").is_err());
        assert!(validate_client_seed(&"x".repeat(MAX_CLIENT_SEED_LEN + 1)).is_err());
    }
}
