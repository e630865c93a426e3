//! Key material: key ID / key value pairs and their per-track wrappers.
//!
//! Key IDs are written in GUID form (`xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`),
//! key values in plain hex, optionally with a leading `0x`.

use std::fmt;

use uuid::Uuid;

use crate::error::{Error, Result};

/// Length in bytes of key IDs and key values.
pub const KEY_LEN: usize = 16;

const GUID_GROUPS: [usize; 5] = [8, 4, 4, 4, 12];

/// A (key ID, key value) pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyPair {
    id: [u8; KEY_LEN],
    key: [u8; KEY_LEN],
}

impl KeyPair {
    pub fn new(id: [u8; KEY_LEN], key: [u8; KEY_LEN]) -> Self {
        Self { id, key }
    }

    /// Create a pair from raw byte slices, which must both be 16 bytes.
    pub fn from_slices(id: &[u8], key: &[u8]) -> Result<Self> {
        Ok(Self::new(to_key_bytes(id, "key ID")?, to_key_bytes(key, "key")?))
    }

    /// Parse a GUID-form key ID and a hex-form key.
    pub fn from_guid_and_hex(id_text: &str, key_text: &str) -> Result<Self> {
        Ok(Self::new(parse_guid(id_text)?, parse_hex_key(key_text)?))
    }

    /// Pair the given key ID with a freshly generated random key.
    pub fn with_random_key(id: [u8; KEY_LEN]) -> Self {
        Self::new(id, rand::random())
    }

    /// Generate a random key ID and a random key.
    pub fn random() -> Self {
        Self::with_random_key(*Uuid::new_v4().as_bytes())
    }

    pub fn id(&self) -> &[u8; KEY_LEN] {
        &self.id
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// Key ID in lowercase GUID form.
    pub fn id_guid(&self) -> String {
        format_guid(&self.id)
    }

    /// Key ID as lowercase hex without separators.
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }

    /// Key value as lowercase hex.
    pub fn key_hex(&self) -> String {
        hex::encode(self.key)
    }
}

// Keep key values out of debug output.
impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("id", &self.id_guid())
            .finish_non_exhaustive()
    }
}

/// Parse a GUID-form identifier into its 16 bytes (case-insensitive).
pub fn parse_guid(text: &str) -> Result<[u8; KEY_LEN]> {
    let text = text.trim();
    let groups: Vec<&str> = text.split('-').collect();
    let well_formed = groups.len() == GUID_GROUPS.len()
        && groups
            .iter()
            .zip(GUID_GROUPS.iter())
            .all(|(g, len)| g.len() == *len);
    if !well_formed {
        return Err(Error::MalformedKey(format!(
            "Not a GUID (xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx): {}",
            text
        )));
    }

    let bytes = hex::decode(groups.concat())
        .map_err(|e| Error::MalformedKey(format!("Invalid GUID {}: {}", text, e)))?;
    to_key_bytes(&bytes, "GUID")
}

/// Format 16 bytes as a lowercase GUID.
pub fn format_guid(bytes: &[u8; KEY_LEN]) -> String {
    Uuid::from_bytes(*bytes).hyphenated().to_string()
}

/// Parse a 16-byte key written in hex, with or without a `0x` prefix.
pub fn parse_hex_key(text: &str) -> Result<[u8; KEY_LEN]> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let bytes = hex::decode(digits)
        .map_err(|e| Error::MalformedKey(format!("Invalid hex key {}: {}", text, e)))?;
    to_key_bytes(&bytes, "key")
}

fn to_key_bytes(bytes: &[u8], what: &str) -> Result<[u8; KEY_LEN]> {
    bytes.try_into().map_err(|_| {
        Error::MalformedKey(format!(
            "Invalid {} length: expected {}, got {}",
            what,
            KEY_LEN,
            bytes.len()
        ))
    })
}

/// A key as used by one track, with an optional explicit IV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptKey {
    pair: KeyPair,
    iv: Option<Vec<u8>>,
}

impl CryptKey {
    pub fn new(pair: KeyPair) -> Self {
        Self { pair, iv: None }
    }

    /// Create a key that overrides the track IV. The IV must be 8 or 16 bytes.
    pub fn with_iv(pair: KeyPair, iv: Vec<u8>) -> Result<Self> {
        if iv.len() != 8 && iv.len() != 16 {
            return Err(Error::InvalidConfiguration(format!(
                "Invalid IV length: expected 8 or 16, got {}",
                iv.len()
            )));
        }
        Ok(Self { pair, iv: Some(iv) })
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.pair
    }

    pub fn iv(&self) -> Option<&[u8]> {
        self.iv.as_deref()
    }
}

impl From<KeyPair> for CryptKey {
    fn from(pair: KeyPair) -> Self {
        Self::new(pair)
    }
}
