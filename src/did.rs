use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Method used by the IoTeX DID registry.
pub const DEFAULT_DID_METHOD: &str = "io";

/// JSON-LD context of a DID document.
pub const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";

/// Verification method type of secp256k1 keys.
pub const DID_AUTH_TYPE: &str = "EcdsaSecp256k1VerificationKey2019";

const DID_SCHEME: &str = "did";

/// A decentralized identifier in the form `did:<method>:<identifier>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did {
    method: String,
    identifier: String,
}

impl Did {
    /// Builds a DID from its method and method-specific identifier.
    pub fn new(method: &str, identifier: &str) -> Result<Self> {
        if method.is_empty()
            || !method
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(Error::InvalidArgument(format!(
                "invalid DID method '{method}'"
            )));
        }
        if identifier.is_empty() {
            return Err(Error::InvalidArgument(
                "DID identifier must not be empty".to_string(),
            ));
        }
        if let Some(c) = identifier
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '%')))
        {
            return Err(Error::InvalidArgument(format!(
                "invalid character '{c}' in DID identifier '{identifier}'"
            )));
        }
        Ok(Self {
            method: method.to_string(),
            identifier: identifier.to_string(),
        })
    }

    /// Parses a full `did:<method>:<identifier>` string.
    pub fn parse(value: &str) -> Result<Self> {
        let rest = value
            .strip_prefix(DID_SCHEME)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| Error::InvalidArgument(format!("'{value}' is not a DID")))?;
        let (method, identifier) = rest.split_once(':').ok_or_else(|| {
            Error::InvalidArgument(format!("DID '{value}' has no method-specific identifier"))
        })?;
        Self::new(method, identifier)
    }

    /// The DID the registry assigns to an account that registers without an explicit id.
    pub fn from_address(method: &str, address: Address) -> Result<Self> {
        Self::new(method, &address.to_checksum(None))
    }

    /// Expands user input into a DID.
    ///
    /// Full DIDs are parsed as they are. Anything else is treated as the
    /// method-specific identifier. Empty input resolves to the owner's own DID.
    pub fn resolve(input: &str, method: &str, owner: Address) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            Self::from_address(method, owner)
        } else if input.starts_with("did:") {
            Self::parse(input)
        } else {
            Self::new(method, input)
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DID_SCHEME}:{}:{}", self.method, self.identifier)
    }
}

impl FromStr for Did {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Did {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.to_string()
    }
}

/// A registry entry as returned by the contract's `dids` accessor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DidRecord {
    pub exists: bool,
    pub hash: B256,
    pub uri: String,
}

/// Verification method entry of a DID document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub controller: String,
    pub public_key_hex: String,
}

/// Minimal DID document naming the key that controls the DID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDocument {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    pub authentication: Vec<Authentication>,
}

impl DidDocument {
    /// Builds the document of a DID owned by the given uncompressed secp256k1 public key.
    pub fn new(did: &Did, public_key_hex: String) -> Self {
        let id = did.to_string();
        Self {
            context: DID_CONTEXT.to_string(),
            authentication: vec![Authentication {
                id: format!("{id}#owner"),
                kind: DID_AUTH_TYPE.to_string(),
                controller: id.clone(),
                public_key_hex,
            }],
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    #[test]
    fn test_parse_did() {
        let did = Did::parse("did:io:0xABC").unwrap();
        assert_eq!(did.method(), "io");
        assert_eq!(did.identifier(), "0xABC");
        assert_eq!(did.to_string(), "did:io:0xABC");
    }

    #[test]
    fn test_identifier_may_contain_colons() {
        let did: Did = "did:web:example.com:user:alice".parse().unwrap();
        assert_eq!(did.method(), "web");
        assert_eq!(did.identifier(), "example.com:user:alice");
    }

    #[test]
    fn test_reject_malformed() {
        for input in ["", "did", "did:", "did:io", "did:io:", "did:IO:0x1", "io:0x1", "did:io:a b"] {
            assert!(
                matches!(Did::parse(input), Err(Error::InvalidArgument(_))),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_empty_input_to_owner() {
        let owner = address!("0x0ddfC506136fb7c050Cc2E9511eccD81b15e7426");
        let did = Did::resolve("", DEFAULT_DID_METHOD, owner).unwrap();
        assert_eq!(
            did.to_string(),
            "did:io:0x0ddfC506136fb7c050Cc2E9511eccD81b15e7426"
        );
        let did = Did::resolve("0xABC", DEFAULT_DID_METHOD, owner).unwrap();
        assert_eq!(did.to_string(), "did:io:0xABC");
        let did = Did::resolve("did:example:123", DEFAULT_DID_METHOD, owner).unwrap();
        assert_eq!(did.method(), "example");
    }

    #[test]
    fn test_document_layout() {
        let did = Did::parse("did:io:0xABC").unwrap();
        let doc = DidDocument::new(&did, "04ab".to_string());
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["@context"], DID_CONTEXT);
        assert_eq!(json["id"], "did:io:0xABC");
        assert_eq!(json["authentication"][0]["id"], "did:io:0xABC#owner");
        assert_eq!(json["authentication"][0]["type"], DID_AUTH_TYPE);
        assert_eq!(json["authentication"][0]["controller"], "did:io:0xABC");
        assert_eq!(json["authentication"][0]["publicKeyHex"], "04ab");
    }

    #[test]
    fn test_serde_as_string() {
        let did = Did::parse("did:io:0xABC").unwrap();
        let json = serde_json::to_string(&did).unwrap();
        assert_eq!(json, "\"did:io:0xABC\"");
        let back: Did = serde_json::from_str(&json).unwrap();
        assert_eq!(back, did);
    }
}
