use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, keccak256};
use alloy::signers::k256::ecdsa::SigningKey;
use alloy::signers::k256::elliptic_curve::zeroize::Zeroizing;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signature, SignerSync};
use async_trait::async_trait;

use crate::error::{Error, Result};

const KEY_LEN: usize = 32;

/// Something able to sign transaction payloads for a single address.
///
/// `sign` receives the unhashed signing payload of a transaction.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign(&self, data: &[u8]) -> anyhow::Result<Signature>;
}

/// A secp256k1 private key supplied by the caller.
///
/// The key bytes are zeroed on drop and never printed. Signing goes through a
/// short-lived [`Credential`] obtained with [`PrivateKey::credential`].
pub struct PrivateKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
    address: Address,
}

impl PrivateKey {
    /// Parses a 64 character hex key, with or without a `0x` prefix.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let digits = value.strip_prefix("0x").unwrap_or(value);
        if digits.len() != KEY_LEN * 2 {
            return Err(Error::Key(format!(
                "expected {} hex characters, got {}",
                KEY_LEN * 2,
                digits.len()
            )));
        }

        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        hex::decode_to_slice(digits, &mut bytes[..])
            .map_err(|_| Error::Key("private key is not valid hex".to_string()))?;
        let address = Self::signer_from(&bytes)?.address();
        Ok(Self { bytes, address })
    }

    fn signer_from(bytes: &[u8; KEY_LEN]) -> Result<PrivateKeySigner> {
        let key = SigningKey::from_slice(bytes)
            .map_err(|_| Error::Key("private key is not a valid secp256k1 scalar".to_string()))?;
        Ok(PrivateKeySigner::from_signing_key(key))
    }

    /// Address derived from the key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Unlocks the key for signing. Drop the credential as soon as signing is done.
    pub fn credential(&self) -> Result<Credential> {
        Ok(Credential {
            signer: Self::signer_from(&self.bytes)?,
        })
    }

    /// Hex of the uncompressed public key.
    pub fn public_key_hex(&self) -> Result<String> {
        let signer = Self::signer_from(&self.bytes)?;
        let point = signer.credential().verifying_key().to_encoded_point(false);
        Ok(hex::encode(point.as_bytes()))
    }
}

impl FromStr for PrivateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// An unlocked signing key. Key material is zeroed when the credential is dropped.
pub struct Credential {
    signer: PrivateKeySigner,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("address", &self.signer.address())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransactionSigner for Credential {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign(&self, data: &[u8]) -> anyhow::Result<Signature> {
        let hash = keccak256(data);
        Ok(self.signer.sign_hash_sync(&hash)?)
    }
}
