//! Protection headers supplied by the DRMToday key-ingest service.
//!
//! The ingest response lists, per DRM system ID, the system name and the
//! PSSH data to embed:
//!
//! ```json
//! {"systemId": {"edef8ba9-79d6-4ace-a3c8-27dcd51d21ed": {"name": "Widevine", "psshBoxContent": "..."}}}
//! ```
use base64::Engine;
use serde_json::Value;

use crate::bitstream::Bitstream;
use crate::error::{Error, Result};
use crate::key::{format_guid, parse_guid, KEY_LEN};
use crate::pssh::PsshHeader;

/// PSSH data for one DRM system, as returned by the ingest service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshData {
    pub system_name: Option<String>,
    pub system_id: [u8; KEY_LEN],
    pub data: Option<Vec<u8>>,
}

/// Parse a key-ingest response, keeping the systems in response order.
pub fn parse_ingest_response(json: &str) -> Result<Vec<PsshData>> {
    let root: Value = serde_json::from_str(json)?;
    let systems = root
        .get("systemId")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::InvalidField("Ingest response has no systemId object".to_string()))?;

    let mut out = Vec::with_capacity(systems.len());
    for (guid, entry) in systems.iter() {
        let system_id = parse_guid(guid)?;
        let entry = entry.as_object().ok_or_else(|| {
            Error::InvalidField(format!("Ingest entry for {} is not an object", guid))
        })?;

        let system_name = entry
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let data = match entry.get("psshBoxContent").and_then(Value::as_str) {
            Some(b64) => Some(base64::engine::general_purpose::STANDARD.decode(b64.trim())?),
            None => None,
        };

        trace!(
            "Ingest entry {} ({}): {} byte(s) of PSSH data",
            guid,
            system_name.as_deref().unwrap_or("unnamed"),
            data.as_ref().map_or(0, Vec::len)
        );
        out.push(PsshData {
            system_name,
            system_id,
            data,
        });
    }
    Ok(out)
}

/// Externally supplied PSSH: version 0, opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmTodayPssh {
    header: PsshHeader,
    system_name: Option<String>,
    data: Vec<u8>,
}

impl DrmTodayPssh {
    /// Create a header for `system_id` carrying `data`.
    ///
    /// The payload is required; `None` or an empty payload means the
    /// provider did not supply one.
    pub fn new(system_id: &[u8], system_name: Option<String>, data: Option<Vec<u8>>) -> Result<Self> {
        let header = PsshHeader::new(system_id, 0, Vec::new())?;
        let data = data.filter(|d| !d.is_empty()).ok_or_else(|| {
            Error::InvalidConfiguration(format!(
                "No PSSH data supplied for system {}",
                format_guid(header.system_id())
            ))
        })?;
        Ok(Self {
            header,
            system_name,
            data,
        })
    }

    pub fn system_name(&self) -> Option<&str> {
        self.system_name.as_deref()
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn header(&self) -> &PsshHeader {
        &self.header
    }

    pub(crate) fn data(&self) -> Bitstream {
        let mut bs = Bitstream::new();
        bs.append_data64(&self.data);
        bs
    }
}

impl TryFrom<PsshData> for DrmTodayPssh {
    type Error = Error;

    fn try_from(value: PsshData) -> Result<Self> {
        Self::new(&value.system_id, value.system_name, value.data)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_ingest_response, DrmTodayPssh};
    use crate::bitstream::Bitstream;
    use crate::error::Error;
    use crate::pssh::{DrmInfoPssh, PsshBox, SystemId};

    const RESPONSE: &str = r#"{
        "assetId": "asset",
        "systemId": {
            "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed": {"name": "Widevine", "psshBoxContent": "CAESEA=="},
            "9a04f079-9840-4286-ab92-e65be0885f95": {"name": "PlayReady", "psshBoxContent": "AQIDBA=="},
            "1077efec-c0b2-4d02-ace3-3c1e52e2fb4b": {"name": "ClearKey"}
        }
    }"#;

    #[test]
    fn ingest_response_keeps_order() {
        let systems = parse_ingest_response(RESPONSE).expect("parse");
        assert_eq!(systems.len(), 3);
        assert_eq!(systems[0].system_id, SystemId::Widevine.to_bytes());
        assert_eq!(systems[0].system_name.as_deref(), Some("Widevine"));
        assert_eq!(systems[0].data, Some(vec![0x08, 0x01, 0x12, 0x10]));
        assert_eq!(systems[1].system_id, SystemId::PlayReady.to_bytes());
        assert_eq!(systems[2].data, None);
    }

    #[test]
    fn missing_payload_is_rejected() {
        let systems = parse_ingest_response(RESPONSE).expect("parse");
        let clearkey = systems[2].clone();
        assert!(matches!(
            DrmTodayPssh::try_from(clearkey),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(
            DrmTodayPssh::new(&[0x42; 16], None, Some(Vec::new())),
            Err(Error::InvalidConfiguration(_))
        ));

        let json = r#"{"systemId": {"edef8ba9-79d6-4ace-a3c8-27dcd51d21ed": {"name": "Widevine", "psshBoxContent": ""}}}"#;
        let systems = parse_ingest_response(json).expect("parse");
        assert_eq!(systems[0].data, Some(Vec::new()));
        assert!(matches!(
            DrmTodayPssh::try_from(systems[0].clone()),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn payload_is_length_prefixed() {
        let systems = parse_ingest_response(RESPONSE).expect("parse");
        let pssh: DrmInfoPssh = DrmTodayPssh::try_from(systems[1].clone())
            .expect("pssh")
            .into();
        assert_eq!(pssh.name(), "PlayReady");
        assert_eq!(pssh.version(), 0);

        let bytes = pssh.to_bytes().expect("bytes");
        assert_eq!(bytes.len(), 8 + 4 + 16 + 4 + 4);
        assert_eq!(&bytes[28..32], &[0, 0, 0, 4]);
        assert_eq!(&bytes[32..], &[1, 2, 3, 4]);

        let parsed = PsshBox::from_bytes(&bytes).expect("parse");
        assert_eq!(parsed.known_system(), Some(SystemId::PlayReady));

        let xml = pssh.generate_xml().expect("xml");
        let reread = Bitstream::from_xml(xml.children()).expect("reread");
        assert_eq!(reread.to_bytes(), bytes[12..].to_vec());
    }

    #[test]
    fn unnamed_system_falls_back() {
        let pssh: DrmInfoPssh = DrmTodayPssh::new(&[0x42; 16], None, Some(vec![9]))
            .expect("pssh")
            .into();
        assert_eq!(pssh.name(), "DRMToday");
    }

    #[test]
    fn malformed_responses() {
        assert!(matches!(
            parse_ingest_response(r#"{"assetId": "x"}"#),
            Err(Error::InvalidField(_))
        ));
        assert!(matches!(
            parse_ingest_response(r#"{"systemId": {"not-a-guid": {}}}"#),
            Err(Error::MalformedKey(_))
        ));
        assert!(matches!(
            parse_ingest_response("{"),
            Err(Error::JsonError(_))
        ));
    }
}
