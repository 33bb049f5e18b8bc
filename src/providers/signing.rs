//! Request signing schemes used by the provider clients

use crate::error::{ProviderError, ProviderResult};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Symmetric HMAC-SHA256 over the canonical request
#[derive(Clone)]
pub struct HmacSigner {
    secret: Vec<u8>,
}

impl HmacSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self, message: &[u8]) -> ProviderResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ProviderError::Unsupported(format!("HMAC init failed: {}", e)))?;
        mac.update(message);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    pub fn sign_hex(&self, message: &[u8]) -> ProviderResult<String> {
        Ok(hex::encode(self.mac(message)?))
    }

    pub fn sign_base64(&self, message: &[u8]) -> ProviderResult<String> {
        Ok(BASE64.encode(self.mac(message)?))
    }
}

/// Asymmetric Ed25519 signature over the request body
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Build from a base64-encoded 32-byte seed
    pub fn from_base64_seed(seed: &str) -> ProviderResult<Self> {
        let bytes = BASE64
            .decode(seed.trim())
            .map_err(|e| ProviderError::Unsupported(format!("invalid signing key encoding: {}", e)))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            ProviderError::Unsupported(format!("signing key must be 32 bytes, got {}", bytes.len()))
        })?;

        Ok(Self {
            key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn sign_base64(&self, message: &[u8]) -> String {
        BASE64.encode(self.key.sign(message).to_bytes())
    }

    #[cfg(test)]
    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.key.verifying_key()
    }
}
