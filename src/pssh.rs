//! Protection System Specific Header (PSSH) generation.
//!
//! Every DRM system is one variant of [`DrmInfoPssh`]. A variant only knows
//! how to lay out its own data fields; the shared framing (system ID, key ID
//! list, data size and, for raw boxes, the box header) is added here, so the
//! raw box bytes and the cryptfile `DRMInfo` element always come from the
//! same field list.
use base64::Engine;
use byteorder::{BigEndian, ByteOrder};
use uuid::Uuid;

use crate::bitstream::Bitstream;
use crate::drmtoday::DrmTodayPssh;
use crate::error::{Error, Result};
use crate::key::{format_guid, KEY_LEN};
use crate::playready::PlayReadyPssh;
use crate::widevine::WidevinePssh;
use crate::xml::Element;

const PSSH_BOX_TYPE: &str = "pssh";
const ACCESS_METADATA_BOX_TYPE: &str = "amet";

const CONTENT_PROTECTION_ELEMENT: &str = "ContentProtection";
const ATTR_SCHEME_ID_URI: &str = "schemeIdUri";
const CENC_PSSH_ELEMENT: &str = "cenc:pssh";
const CENC_NAMESPACE: &str = "urn:mpeg:cenc:2013";

const DRM_INFO_ELEMENT: &str = "DRMInfo";
const ATTR_TYPE: &str = "type";
const ATTR_VERSION: &str = "version";

/// Known DRM system IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemId {
    /// W3C common ClearKey system.
    ClearKey,
    /// DASH-IF ClearKey scheme.
    DashIfClearKey,
    PlayReady,
    Widevine,
    /// Vendor "Access" system.
    Access,
}

impl SystemId {
    pub fn to_uuid(self) -> Uuid {
        match self {
            SystemId::ClearKey => Uuid::from_u128(0x1077efecc0b24d02ace33c1e52e2fb4b),
            SystemId::DashIfClearKey => Uuid::from_u128(0xe2719d58a985b3c9781ab030af78d30e),
            SystemId::PlayReady => Uuid::from_u128(0x9a04f07998404286ab92e65be0885f95),
            SystemId::Widevine => Uuid::from_u128(0xedef8ba979d64acea3c827dcd51d21ed),
            SystemId::Access => Uuid::from_u128(0xf239e769efa348509c16a903c6932efb),
        }
    }

    pub fn to_bytes(self) -> [u8; KEY_LEN] {
        *self.to_uuid().as_bytes()
    }

    /// Look up a known system by its 16-byte ID.
    pub fn from_bytes(id: &[u8]) -> Option<Self> {
        [
            SystemId::ClearKey,
            SystemId::DashIfClearKey,
            SystemId::PlayReady,
            SystemId::Widevine,
            SystemId::Access,
        ]
        .into_iter()
        .find(|s| s.to_uuid().as_bytes()[..] == *id)
    }
}

/// The fields shared by every PSSH: system ID, box version and key IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshHeader {
    system_id: [u8; KEY_LEN],
    version: u8,
    key_ids: Vec<[u8; KEY_LEN]>,
}

impl PsshHeader {
    /// Create a header.
    ///
    /// `system_id` must be 16 bytes. Version 1 and above carry the key ID
    /// list, which must then be non-empty; for version 0 it is ignored.
    pub fn new(system_id: &[u8], version: u8, key_ids: Vec<[u8; KEY_LEN]>) -> Result<Self> {
        let system_id: [u8; KEY_LEN] = system_id.try_into().map_err(|_| {
            Error::InvalidConfiguration(format!(
                "Invalid PSSH system ID: length = {}",
                system_id.len()
            ))
        })?;

        if version >= 1 && key_ids.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "PSSH version {} requires at least one key ID",
                version
            )));
        }

        if key_ids.len() > u32::MAX as usize {
            return Err(Error::InvalidConfiguration(format!(
                "Too many key IDs: {}",
                key_ids.len()
            )));
        }

        let key_ids = if version == 0 { Vec::new() } else { key_ids };

        Ok(Self {
            system_id,
            version,
            key_ids,
        })
    }

    pub fn system_id(&self) -> &[u8; KEY_LEN] {
        &self.system_id
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Key IDs listed in the box (empty for version 0).
    pub fn key_ids(&self) -> &[[u8; KEY_LEN]] {
        &self.key_ids
    }

    /// `urn:uuid:` scheme URI identifying the DRM system in DASH manifests.
    pub fn scheme_id_uri(&self) -> String {
        format!("urn:uuid:{}", format_guid(&self.system_id))
    }
}

/// Wrap variant data in the shared PSSH body framing:
/// `systemId | [keyIdCount | keyIds] | dataSize | data`.
pub fn frame_body(header: &PsshHeader, data: Bitstream) -> Result<Bitstream> {
    let mut body = Bitstream::new();
    body.append_id128(&header.system_id)?;

    if header.version >= 1 {
        body.append_integer(header.key_ids.len() as u64, 32)?;
        for kid in header.key_ids.iter() {
            body.append_id128(kid)?;
        }
    }

    body.append_integer(data.byte_len() as u64, 32)?;
    body.extend(data);
    Ok(body)
}

/// Prepend the box header (`size | 'pssh' | version | flags`) to a framed
/// body and back-patch the size.
pub fn box_bytes(header: &PsshHeader, body: &Bitstream) -> Result<Vec<u8>> {
    let mut prefix = Bitstream::new();
    prefix
        .append_integer(0, 32)?
        .append_fourcc(PSSH_BOX_TYPE)?
        .append_integer(header.version as u64, 8)?
        .append_integer(0, 24)?;

    let mut out = prefix.to_bytes();
    out.extend_from_slice(&body.to_bytes());

    let size = u32::try_from(out.len())
        .map_err(|_| Error::InvalidConfiguration(format!("PSSH box too large: {}", out.len())))?;
    BigEndian::write_u32(&mut out[..4], size);
    Ok(out)
}

/// A protection header for one DRM system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrmInfoPssh {
    ClearKey(ClearKeyPssh),
    Access(AccessPssh),
    PlayReady(PlayReadyPssh),
    Widevine(WidevinePssh),
    DrmToday(DrmTodayPssh),
}

impl DrmInfoPssh {
    pub fn header(&self) -> &PsshHeader {
        match self {
            DrmInfoPssh::ClearKey(p) => &p.header,
            DrmInfoPssh::Access(p) => &p.header,
            DrmInfoPssh::PlayReady(p) => p.header(),
            DrmInfoPssh::Widevine(p) => p.header(),
            DrmInfoPssh::DrmToday(p) => p.header(),
        }
    }

    /// Human-readable system name for logs and CLI output.
    pub fn name(&self) -> &str {
        match self {
            DrmInfoPssh::ClearKey(_) => "ClearKey",
            DrmInfoPssh::Access(_) => "Access",
            DrmInfoPssh::PlayReady(_) => "PlayReady",
            DrmInfoPssh::Widevine(_) => "Widevine",
            DrmInfoPssh::DrmToday(p) => p.system_name().unwrap_or("DRMToday"),
        }
    }

    pub fn system_id(&self) -> &[u8; KEY_LEN] {
        self.header().system_id()
    }

    pub fn version(&self) -> u8 {
        self.header().version()
    }

    /// The variant-specific data fields (what follows the data size).
    pub fn data(&self) -> Result<Bitstream> {
        match self {
            DrmInfoPssh::ClearKey(_) => Ok(Bitstream::new()),
            DrmInfoPssh::Access(p) => p.data(),
            DrmInfoPssh::PlayReady(p) => p.data(),
            DrmInfoPssh::Widevine(p) => Ok(p.data()),
            DrmInfoPssh::DrmToday(p) => Ok(p.data()),
        }
    }

    /// Box body from the system ID onwards.
    pub fn body(&self) -> Result<Bitstream> {
        frame_body(self.header(), self.data()?)
    }

    /// Complete `pssh` box bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        box_bytes(self.header(), &self.body()?)
    }

    /// Complete `pssh` box, base64-encoded.
    pub fn to_base64(&self) -> Result<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_bytes()?))
    }

    /// Cryptfile `DRMInfo` element describing the box body as bit fields.
    pub fn generate_xml(&self) -> Result<Element> {
        let mut e = Element::new(DRM_INFO_ELEMENT)
            .with_attr(ATTR_TYPE, "pssh")
            .with_attr(ATTR_VERSION, self.version().to_string());
        self.body()?.append_xml_to(&mut e);
        Ok(e)
    }

    /// DASH `ContentProtection` element for this system.
    pub fn generate_content_protection(&self) -> Result<Element> {
        let mut e = Element::new(CONTENT_PROTECTION_ELEMENT)
            .with_attr(ATTR_SCHEME_ID_URI, self.header().scheme_id_uri());

        if let DrmInfoPssh::PlayReady(p) = self {
            p.decorate_content_protection(&mut e)?;
        }

        e.set_attr("xmlns:cenc", CENC_NAMESPACE);
        let mut pssh = Element::new(CENC_PSSH_ELEMENT);
        pssh.push_text(self.to_base64()?);
        e.push_child(pssh);
        Ok(e)
    }
}

impl From<ClearKeyPssh> for DrmInfoPssh {
    fn from(p: ClearKeyPssh) -> Self {
        DrmInfoPssh::ClearKey(p)
    }
}

impl From<AccessPssh> for DrmInfoPssh {
    fn from(p: AccessPssh) -> Self {
        DrmInfoPssh::Access(p)
    }
}

impl From<PlayReadyPssh> for DrmInfoPssh {
    fn from(p: PlayReadyPssh) -> Self {
        DrmInfoPssh::PlayReady(p)
    }
}

impl From<WidevinePssh> for DrmInfoPssh {
    fn from(p: WidevinePssh) -> Self {
        DrmInfoPssh::Widevine(p)
    }
}

impl From<DrmTodayPssh> for DrmInfoPssh {
    fn from(p: DrmTodayPssh) -> Self {
        DrmInfoPssh::DrmToday(p)
    }
}

/// ClearKey PSSH: always version 1, key IDs in the box, no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearKeyPssh {
    header: PsshHeader,
}

impl ClearKeyPssh {
    pub fn new(key_ids: Vec<[u8; KEY_LEN]>) -> Result<Self> {
        Self::with_system_id(&SystemId::ClearKey.to_bytes(), key_ids)
    }

    /// ClearKey box under a different system ID (e.g. [`SystemId::DashIfClearKey`]).
    pub fn with_system_id(system_id: &[u8], key_ids: Vec<[u8; KEY_LEN]>) -> Result<Self> {
        Ok(Self {
            header: PsshHeader::new(system_id, 1, key_ids)?,
        })
    }

    pub fn key_ids(&self) -> &[[u8; KEY_LEN]] {
        self.header.key_ids()
    }
}

/// Access PSSH: version 0 carrying an `amet` metadata box with the key IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPssh {
    header: PsshHeader,
    key_ids: Vec<[u8; KEY_LEN]>,
}

impl AccessPssh {
    pub fn new(key_ids: Vec<[u8; KEY_LEN]>) -> Result<Self> {
        // size + type + version/flags + count + ids + extra data size
        let box_len = 16 + KEY_LEN as u64 * key_ids.len() as u64 + 4;
        if box_len > u32::MAX as u64 {
            return Err(Error::InvalidConfiguration(format!(
                "Too many key IDs for access metadata: {}",
                key_ids.len()
            )));
        }
        Ok(Self {
            header: PsshHeader::new(&SystemId::Access.to_bytes(), 0, Vec::new())?,
            key_ids,
        })
    }

    pub fn key_ids(&self) -> &[[u8; KEY_LEN]] {
        &self.key_ids
    }

    /// `size | 'amet' | version+flags | keyCount | keyIds | extraDataSize(0)`
    fn data(&self) -> Result<Bitstream> {
        let mut inner = Bitstream::new();
        inner.append_integer(self.key_ids.len() as u64, 32)?;
        for kid in self.key_ids.iter() {
            inner.append_id128(kid)?;
        }
        inner.append_integer(0, 32)?;

        let mut bs = Bitstream::new();
        bs.append_integer(12 + inner.byte_len() as u64, 32)?
            .append_fourcc(ACCESS_METADATA_BOX_TYPE)?
            .append_integer(0, 32)?;
        bs.extend(inner);
        Ok(bs)
    }
}

/// A parsed `pssh` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshBox {
    pub version: u8,
    pub flags: u32,
    pub system_id: [u8; KEY_LEN],
    pub key_ids: Vec<[u8; KEY_LEN]>,
    pub data: Vec<u8>,
}

impl PsshBox {
    /// Parse a complete `pssh` box.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        parse_pssh_box(data)
    }

    /// Parse a base64-encoded `pssh` box.
    pub fn from_base64(data_b64: &str) -> Result<Self> {
        let data = base64::engine::general_purpose::STANDARD.decode(data_b64.trim())?;
        parse_pssh_box(&data)
    }

    /// The known system this box belongs to, if any.
    pub fn known_system(&self) -> Option<SystemId> {
        SystemId::from_bytes(&self.system_id)
    }
}

fn parse_pssh_box(data: &[u8]) -> Result<PsshBox> {
    if data.len() < 8 {
        return Err(Error::InvalidField("Data too short".to_string()));
    }

    let mut offset = 0;
    let size = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
    offset += 4;
    if &data[offset..offset + 4] != PSSH_BOX_TYPE.as_bytes() {
        return Err(Error::InvalidField("Not a PSSH box".to_string()));
    }
    offset += 4;

    if size != data.len() {
        return Err(Error::InvalidField(format!(
            "PSSH size {} does not match data length {}",
            size,
            data.len()
        )));
    }

    if data.len() < offset + 4 + KEY_LEN {
        return Err(Error::InvalidField("PSSH header incomplete".to_string()));
    }

    let version = data[offset];
    let flags = BigEndian::read_u24(&data[offset + 1..offset + 4]);
    offset += 4;

    let mut system_id = [0u8; KEY_LEN];
    system_id.copy_from_slice(&data[offset..offset + KEY_LEN]);
    offset += KEY_LEN;

    let mut key_ids = Vec::new();
    if version >= 1 {
        if data.len() < offset + 4 {
            return Err(Error::InvalidField("Missing KID count".to_string()));
        }
        let kid_count = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
        offset += 4;

        let required = kid_count
            .checked_mul(KEY_LEN)
            .and_then(|n| n.checked_add(offset))
            .filter(|n| *n <= data.len())
            .ok_or_else(|| Error::InvalidField("Missing KIDs".to_string()))?;
        for chunk in data[offset..required].chunks_exact(KEY_LEN) {
            let mut kid = [0u8; KEY_LEN];
            kid.copy_from_slice(chunk);
            key_ids.push(kid);
        }
        offset = required;
    }

    if data.len() < offset + 4 {
        return Err(Error::InvalidField("Missing data size".to_string()));
    }
    let data_size = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
    offset += 4;
    if data.len() - offset != data_size {
        return Err(Error::InvalidField(format!(
            "PSSH data size {} does not match remaining {} bytes",
            data_size,
            data.len() - offset
        )));
    }

    Ok(PsshBox {
        version,
        flags,
        system_id,
        key_ids,
        data: data[offset..].to_vec(),
    })
}
