//! PlayReady protection headers.
//!
//! The PSSH data of a PlayReady box is a PlayReady Object (PRO), all fields
//! little-endian:
//!
//! ```text
//! size:u32le | record_count:u16le | { type:u16le (1) | length:u16le | WRM header }*
//! ```
//!
//! where `size = 4 + 2 + 4 * record_count + sum(record lengths)`.
use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use base64::Engine;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::bitstream::Bitstream;
use crate::error::{Error, Result};
use crate::key::{KeyPair, KEY_LEN};
use crate::pssh::{PsshHeader, SystemId};
use crate::xml::Element;

/// PlayReady Object record type: WRM header (UTF-16LE XML).
pub const RECORD_TYPE_WRM_HEADER: u16 = 1;

const MSPR_NAMESPACE: &str = "urn:microsoft:playready";
const MSPR_PRO_ELEMENT: &str = "mspr:pro";
const MSPR_VALUE: &str = "MSPR 2.0";

const WRM_HEADER_NAMESPACE: &str = "http://schemas.microsoft.com/DRM/2007/03/PlayReadyHeader";

/// License acquisition URL of the public PlayReady test server.
pub const DEFAULT_LA_URL: &str =
    "http://playready.directtaps.net/pr/svc/rightsmanager.asmx?PlayRight=1&UseSimpleNonPersistentLicense=1";

/// Key seed of the public PlayReady test server.
pub const TEST_KEY_SEED: [u8; 30] = [
    0x5d, 0x50, 0x68, 0xbe, 0xc9, 0xb3, 0x84, 0xff, 0x60, 0x44, 0x86, 0x71, 0x59, 0xf1, 0x6d,
    0x6b, 0x75, 0x55, 0x44, 0xfc, 0xd5, 0x11, 0x69, 0x89, 0xb1, 0xac, 0xc4, 0x27, 0x8e, 0x88,
];

/// WRM header schema version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WrmVersion {
    /// `KEYLEN`/`ALGID` under `PROTECTINFO`, `KID` and `CHECKSUM` under `DATA`.
    #[default]
    V4_0_0_0,
    /// A `KID` element under `PROTECTINFO` carrying `ALGID`, `VALUE` and `CHECKSUM`.
    V4_1_0_0,
}

impl WrmVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V4_0_0_0 => "4.0.0.0",
            Self::V4_1_0_0 => "4.1.0.0",
        }
    }
}

/// PlayReady PSSH: version 0 box wrapping one PRO with one record per WRM header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayReadyPssh {
    header: PsshHeader,
    wrm_headers: Vec<Vec<u8>>,
}

impl PlayReadyPssh {
    /// Create a PlayReady PSSH from encoded WRM headers (UTF-16LE bytes).
    pub fn new(wrm_headers: Vec<Vec<u8>>) -> Result<Self> {
        if wrm_headers.len() > u16::MAX as usize {
            return Err(Error::InvalidConfiguration(format!(
                "Too many WRM headers: {}",
                wrm_headers.len()
            )));
        }

        if let Some(too_long) = wrm_headers.iter().find(|h| h.len() > u16::MAX as usize) {
            return Err(Error::InvalidConfiguration(format!(
                "WRM header too long for a PlayReady record: {} bytes",
                too_long.len()
            )));
        }

        let total: u64 = 6 + wrm_headers.iter().map(|h| 4 + h.len() as u64).sum::<u64>();
        if total > u32::MAX as u64 {
            return Err(Error::InvalidConfiguration(format!(
                "PlayReady object too large: {} bytes",
                total
            )));
        }

        Ok(Self {
            header: PsshHeader::new(&SystemId::PlayReady.to_bytes(), 0, Vec::new())?,
            wrm_headers,
        })
    }

    /// Create a PlayReady PSSH from structured WRM headers.
    pub fn from_wrm_headers(headers: &[WrmHeader]) -> Result<Self> {
        let encoded = headers
            .iter()
            .map(WrmHeader::to_bytes)
            .collect::<Result<Vec<_>>>()?;
        Self::new(encoded)
    }

    pub(crate) fn header(&self) -> &PsshHeader {
        &self.header
    }

    pub fn wrm_headers(&self) -> &[Vec<u8>] {
        &self.wrm_headers
    }

    /// Declared size of the PlayReady Object.
    pub fn pro_size(&self) -> u32 {
        let records: usize = self.wrm_headers.iter().map(Vec::len).sum();
        (4 + 2 + 4 * self.wrm_headers.len() + records) as u32
    }

    pub(crate) fn data(&self) -> Result<Bitstream> {
        let mut bs = Bitstream::new();
        bs.append_integer_le(self.pro_size() as u64, 32)?
            .append_integer_le(self.wrm_headers.len() as u64, 16)?;

        for wrm in self.wrm_headers.iter() {
            bs.append_integer_le(RECORD_TYPE_WRM_HEADER as u64, 16)?
                .append_integer_le(wrm.len() as u64, 16)?
                .append_data64(wrm);
        }
        Ok(bs)
    }

    /// Raw PlayReady Object bytes.
    pub fn pro_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.data()?.to_bytes())
    }

    pub(crate) fn decorate_content_protection(&self, e: &mut Element) -> Result<()> {
        e.set_attr("value", MSPR_VALUE);
        e.set_attr("xmlns:mspr", MSPR_NAMESPACE);

        let mut pro = Element::new(MSPR_PRO_ELEMENT);
        pro.push_text(base64::engine::general_purpose::STANDARD.encode(self.pro_bytes()?));
        e.push_child(pro);
        Ok(())
    }
}

/// Builder for a WRM header, v4.0.0.0 unless told otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrmHeader {
    version: WrmVersion,
    key_id: [u8; KEY_LEN],
    checksum: Option<[u8; 8]>,
    la_url: Option<String>,
    lui_url: Option<String>,
    ds_id: Option<[u8; KEY_LEN]>,
    custom_attributes: Vec<(String, String)>,
}

impl WrmHeader {
    /// Header for a key ID without a checksum.
    pub fn new(key_id: [u8; KEY_LEN]) -> Self {
        Self {
            version: WrmVersion::default(),
            key_id,
            checksum: None,
            la_url: None,
            lui_url: None,
            ds_id: None,
            custom_attributes: Vec::new(),
        }
    }

    /// Header for a key pair, including the AES-CTR key checksum.
    pub fn for_key(pair: &KeyPair) -> Self {
        let mut header = Self::new(*pair.id());
        header.checksum = Some(key_checksum(pair));
        header
    }

    #[must_use]
    pub fn with_version(mut self, version: WrmVersion) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_la_url(mut self, url: impl Into<String>) -> Self {
        self.la_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_lui_url(mut self, url: impl Into<String>) -> Self {
        self.lui_url = Some(url.into());
        self
    }

    /// Domain service ID, a GUID.
    #[must_use]
    pub fn with_ds_id(mut self, ds_id: [u8; KEY_LEN]) -> Self {
        self.ds_id = Some(ds_id);
        self
    }

    #[must_use]
    pub fn with_custom_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_attributes.push((name.into(), value.into()));
        self
    }

    pub fn key_id(&self) -> &[u8; KEY_LEN] {
        &self.key_id
    }

    pub fn version(&self) -> WrmVersion {
        self.version
    }

    pub fn to_xml(&self) -> Element {
        let checksum = self
            .checksum
            .as_ref()
            .map(|c| base64::engine::general_purpose::STANDARD.encode(c));

        let mut protect_info = Element::new("PROTECTINFO");
        let mut data = Element::new("DATA");
        match self.version {
            WrmVersion::V4_0_0_0 => {
                protect_info.push_child(text_element("KEYLEN", KEY_LEN.to_string()));
                protect_info.push_child(text_element("ALGID", "AESCTR"));
                data.push_child(protect_info);
                data.push_child(text_element("KID", guid_base64(&self.key_id)));
                if let Some(checksum) = checksum {
                    data.push_child(text_element("CHECKSUM", checksum));
                }
            }
            WrmVersion::V4_1_0_0 => {
                let mut kid = Element::new("KID")
                    .with_attr("ALGID", "AESCTR")
                    .with_attr("VALUE", guid_base64(&self.key_id));
                if let Some(checksum) = checksum {
                    kid.set_attr("CHECKSUM", checksum);
                }
                protect_info.push_child(kid);
                data.push_child(protect_info);
            }
        }
        if let Some(url) = self.la_url.as_ref() {
            data.push_child(text_element("LA_URL", url.as_str()));
        }
        if let Some(url) = self.lui_url.as_ref() {
            data.push_child(text_element("LUI_URL", url.as_str()));
        }
        if let Some(ds_id) = self.ds_id.as_ref() {
            data.push_child(text_element("DS_ID", guid_base64(ds_id)));
        }
        if !self.custom_attributes.is_empty() {
            let mut custom = Element::new("CUSTOMATTRIBUTES");
            for (name, value) in self.custom_attributes.iter() {
                custom.push_child(text_element(name.as_str(), value.as_str()));
            }
            data.push_child(custom);
        }

        let mut root = Element::new("WRMHEADER")
            .with_attr("xmlns", WRM_HEADER_NAMESPACE)
            .with_attr("version", self.version.as_str());
        root.push_child(data);
        root
    }

    /// The header XML text.
    pub fn to_xml_string(&self) -> Result<String> {
        self.to_xml().to_fragment_string()
    }

    /// The header XML encoded as UTF-16LE, as stored in a PRO record.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self
            .to_xml_string()?
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect())
    }
}

fn text_element(name: &str, text: impl Into<String>) -> Element {
    let mut e = Element::new(name);
    e.push_text(text);
    e
}

// PlayReady stores GUIDs with the first three groups little-endian.
fn guid_base64(id: &[u8; KEY_LEN]) -> String {
    base64::engine::general_purpose::STANDARD.encode(Uuid::from_bytes(*id).to_bytes_le())
}

/// AES-CTR key checksum: first 8 bytes of AES-128-ECB(key, KID in GUID byte order).
pub fn key_checksum(pair: &KeyPair) -> [u8; 8] {
    let cipher = Aes128::new(GenericArray::from_slice(pair.key()));
    let kid = Uuid::from_bytes(*pair.id()).to_bytes_le();
    let mut block = GenericArray::clone_from_slice(&kid);
    cipher.encrypt_block(&mut block);

    let mut checksum = [0u8; 8];
    checksum.copy_from_slice(&block[..8]);
    checksum
}

/// Content key the PlayReady test server derives for `key_id`.
pub fn derive_key(key_id: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    derive_key_with_seed(&TEST_KEY_SEED, key_id)
}

/// Derive a content key from a 30-byte key seed and a key ID.
///
/// Each output byte folds both halves of three SHA-256 digests over the
/// seed and the KID in GUID byte order.
pub fn derive_key_with_seed(seed: &[u8; 30], key_id: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let kid = Uuid::from_bytes(*key_id).to_bytes_le();

    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(kid);
    let sha_a = hasher.clone().finalize();
    hasher.update(seed);
    let sha_b = hasher.clone().finalize();
    hasher.update(kid);
    let sha_c = hasher.finalize();

    let mut key = [0u8; KEY_LEN];
    for (i, byte) in key.iter_mut().enumerate() {
        let j = i + KEY_LEN;
        *byte = sha_a[i] ^ sha_a[j] ^ sha_b[i] ^ sha_b[j] ^ sha_c[i] ^ sha_c[j];
    }
    key
}

/// Key pair whose key is derived from the test server key seed.
pub fn test_server_key_pair(key_id: [u8; KEY_LEN]) -> KeyPair {
    KeyPair::new(key_id, derive_key(&key_id))
}
