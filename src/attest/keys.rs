use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

use crate::error::{RegimeError, Result};

/// Ed25519 signing identity for one agent. The secret half never leaves this
/// type except through [`KeyPair::write_secret_file`].
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Parses a 64-character hex secret.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let decoded = hex::decode(secret_hex.trim())
            .map_err(|_| RegimeError::InvalidKey("secret key is not valid hex".to_string()))?;
        let bytes: [u8; SECRET_KEY_LENGTH] = decoded.as_slice().try_into().map_err(|_| {
            RegimeError::InvalidKey(format!(
                "secret key must be {} bytes, got {}",
                SECRET_KEY_LENGTH,
                decoded.len()
            ))
        })?;
        Ok(Self::from_secret_bytes(&bytes))
    }

    pub fn from_secret_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RegimeError::InvalidKey(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_secret_hex(&contents)
    }

    /// Writes the hex secret with owner-only permissions.
    pub fn write_secret_file(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, hex::encode(self.signing_key.to_bytes()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Lowercase hex, 64 characters.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().to_bytes())
    }

    /// Short SHA-256 fingerprint of the public key, safe to log.
    pub fn fingerprint(&self) -> String {
        public_key_fingerprint(&self.verifying_key().to_bytes())
    }
}

pub fn public_key_fingerprint(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(&digest[..8])
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("fingerprint", &self.fingerprint())
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.key");
        let original = KeyPair::generate();
        original.write_secret_file(&path).unwrap();

        let loaded = KeyPair::from_secret_file(&path).unwrap();
        assert_eq!(loaded.public_key_hex(), original.public_key_hex());
        assert_eq!(loaded.public_key_hex().len(), 64);
        assert_eq!(loaded.public_key_hex(), loaded.public_key_hex().to_lowercase());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_rejects_bad_secret() {
        assert!(KeyPair::from_secret_hex("zz").is_err());
        assert!(KeyPair::from_secret_hex(&"ab".repeat(31)).is_err());
        assert!(KeyPair::from_secret_hex(&"ab".repeat(32)).is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let keys = KeyPair::from_secret_hex(&"11".repeat(32)).unwrap();
        let debug = format!("{:?}", keys);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&"11".repeat(32)));
        assert_eq!(keys.fingerprint().len(), 16);
    }
}
