//! Ed25519 key material for the signer.
//!
//! The private half lives in [`SecretKey`], which zeroizes on drop, never
//! implements `Serialize`, and prints as `SecretKey(..)`. The only way out of
//! the process is the storage encoding in [`crate::store`].

use std::fmt;

use alloy_primitives::hex;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Ed25519 key length, for both halves.
pub const KEY_LEN: usize = 32;

/// Ed25519 private key seed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidKeyMaterial(format!(
                "private key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub(crate) fn expose(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub(crate) fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.0)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Ed25519 public key, the `key` the authority is asked to approve.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    /// Parses and curve-checks a public key.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidKeyMaterial(format!(
                "public key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| Error::InvalidKeyMaterial(format!("public key is not on the curve: {e}")))?;
        Ok(Self(bytes))
    }

    /// Parses a `0x`-prefixed or bare hex public key.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| Error::InvalidKeyMaterial(format!("public key is not hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex, the form the authority expects.
    pub fn to_hex(&self) -> String {
        hex::encode_prefixed(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug)]
pub struct Keypair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

/// Pure key operations. No storage, no network.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyVault;

impl KeyVault {
    /// Fresh keypair from the OS random source.
    pub fn generate(&self) -> Keypair {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = PublicKey(signing_key.verifying_key().to_bytes());
        Keypair {
            public,
            secret: SecretKey(signing_key.to_bytes()),
        }
    }

    pub fn derive_public_key(&self, secret: &SecretKey) -> PublicKey {
        PublicKey(secret.signing_key().verifying_key().to_bytes())
    }

    /// Rebuilds a keypair from a persisted private key.
    pub fn restore(&self, secret: SecretKey) -> Keypair {
        Keypair {
            public: self.derive_public_key(&secret),
            secret,
        }
    }
}
