//! Process-wide signing key management
//!
//! The HMAC secret is generated on first run and persisted in the data
//! directory, so credentials survive restarts. The secret never leaves the
//! process.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hearthlink_core::{Error, Result};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::Rng;
use std::path::Path;
use tracing::{debug, info};

/// Length of a freshly generated secret in bytes
const SECRET_LEN: usize = 32;

/// Signing material shared by all credential operations
#[derive(Clone)]
pub struct SigningKeys {
    secret: Vec<u8>,
}

impl SigningKeys {
    /// Load the persisted secret from the data directory, generating and
    /// saving a new one on first run
    pub fn load_or_generate(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("signing.key");

        if path.exists() {
            let encoded = std::fs::read_to_string(&path)?;
            let secret = BASE64
                .decode(encoded.trim())
                .map_err(|e| Error::internal(format!("corrupt signing key file: {}", e)))?;
            debug!("Loaded signing key from {:?}", path);
            return Ok(Self { secret });
        }

        let mut secret = vec![0u8; SECRET_LEN];
        rand::thread_rng().fill(&mut secret[..]);
        std::fs::write(&path, BASE64.encode(&secret))?;
        info!("Generated new signing key at {:?}", path);

        Ok(Self { secret })
    }

    /// Build keys from raw secret bytes
    pub fn from_secret(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    /// Key used to sign credentials
    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(&self.secret)
    }

    /// Key used to verify credentials
    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(&self.secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generate_then_reload() {
        let dir = tempdir().unwrap();

        let first = SigningKeys::load_or_generate(dir.path()).unwrap();
        let second = SigningKeys::load_or_generate(dir.path()).unwrap();
        assert_eq!(first.secret, second.secret);
        assert_eq!(first.secret.len(), SECRET_LEN);
    }

    #[test]
    fn test_distinct_dirs_get_distinct_secrets() {
        let dir1 = tempdir().unwrap();
        let dir2 = tempdir().unwrap();

        let k1 = SigningKeys::load_or_generate(dir1.path()).unwrap();
        let k2 = SigningKeys::load_or_generate(dir2.path()).unwrap();
        assert_ne!(k1.secret, k2.secret);
    }
}
