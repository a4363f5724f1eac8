//! Shared-secret derivation.

use sha2::{Digest, Sha256, Sha512_256};
use std::fmt;

/// Length of every derived secret, in bytes.
pub const SECRET_LEN: usize = 32;

const FALLBACK_SALT: &str = "deckindex-auth-key";

/// Fixed-length key used to authenticate RPC connections.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; SECRET_LEN]);

impl SharedSecret {
    /// Raw key material.
    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    /// Short, non-reversible identifier safe to log when comparing deployments.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret({})", self.fingerprint())
    }
}

/// Derive the connection secret from the configured seed.
///
/// A non-empty seed is hashed with SHA-256. Without one, the secret falls back to SHA-512/256
/// over the endpoint address plus a fixed salt. Anyone who can read the deployment
/// configuration can recompute that fallback, so a warning is logged whenever it is used.
pub fn derive_secret(seed: Option<&str>, host: &str, port: u16) -> SharedSecret {
    match seed.filter(|value| !value.is_empty()) {
        Some(seed) => SharedSecret(Sha256::digest(seed.as_bytes()).into()),
        None => {
            tracing::warn!(
                host,
                port,
                "INDEX_SERVER_AUTH_KEY not set; using a fallback secret derived from the endpoint address"
            );
            let material = format!("{host}:{port}:{FALLBACK_SALT}");
            SharedSecret(Sha512_256::digest(material.as_bytes()).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_yields_same_secret() {
        let first = derive_secret(Some("correct horse"), "127.0.0.1", 5602);
        let second = derive_secret(Some("correct horse"), "10.1.1.1", 9999);
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_seeds_yield_distinct_secrets() {
        let seeds = ["alpha", "beta", "alpha ", "Alpha", "a", "b"];
        let secrets: Vec<_> = seeds
            .iter()
            .map(|seed| derive_secret(Some(seed), "127.0.0.1", 5602))
            .collect();
        for (i, left) in secrets.iter().enumerate() {
            for right in &secrets[i + 1..] {
                assert_ne!(left, right);
            }
        }
    }

    #[test]
    fn seed_is_hashed_with_sha256() {
        let secret = derive_secret(Some("abc"), "127.0.0.1", 5602);
        assert_eq!(
            hex::encode(secret.as_bytes()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn fallback_depends_on_endpoint() {
        let local = derive_secret(None, "127.0.0.1", 5602);
        assert_eq!(local, derive_secret(None, "127.0.0.1", 5602));
        assert_ne!(local, derive_secret(None, "127.0.0.1", 5603));
        assert_ne!(local, derive_secret(None, "0.0.0.0", 5602));
    }

    #[test]
    fn empty_seed_uses_fallback() {
        assert_eq!(
            derive_secret(Some(""), "127.0.0.1", 5602),
            derive_secret(None, "127.0.0.1", 5602)
        );
    }

    #[test]
    fn debug_output_hides_key_material() {
        let secret = derive_secret(Some("hunter2"), "127.0.0.1", 5602);
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains(&hex::encode(secret.as_bytes())));
        assert_eq!(rendered, format!("SharedSecret({})", secret.fingerprint()));
    }
}
