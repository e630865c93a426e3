//! Widevine protection headers and key-server responses.
//!
//! A Widevine PSSH carries a protobuf-encoded `WidevinePsshData` message.
//! The bytes are usually handed out by the key server and embedded as they
//! are; [`WidevinePssh::from_key_ids`] builds a payload locally instead.
use base64::Engine;
use prost::Message;
use serde::Deserialize;

use crate::bitstream::Bitstream;
use crate::error::{Error, Result};
use crate::key::{KeyPair, KEY_LEN};
use crate::pssh::{PsshHeader, SystemId};

const DRM_TYPE_WIDEVINE: &str = "widevine";
const STATUS_OK: &str = "OK";

/// Widevine PSSH data message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WidevinePsshData {
    #[prost(enumeration = "Algorithm", optional, tag = "1")]
    pub algorithm: Option<i32>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub key_ids: Vec<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub provider: Option<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub content_id: Option<Vec<u8>>,
    #[prost(string, optional, tag = "5")]
    pub track_type: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub policy: Option<String>,
    #[prost(uint32, optional, tag = "7")]
    pub crypto_period_index: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub grouped_license: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "9")]
    pub protection_scheme: Option<u32>,
    #[prost(uint32, optional, tag = "10")]
    pub crypto_period_seconds: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Algorithm {
    Unencrypted = 0,
    Aesctr = 1,
}

/// Widevine PSSH: version 0, protobuf payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidevinePssh {
    header: PsshHeader,
    data: Vec<u8>,
}

impl WidevinePssh {
    /// Wrap an encoded `WidevinePsshData` blob as supplied by a key server.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidConfiguration(
                "Widevine PSSH payload is empty".to_string(),
            ));
        }
        Ok(Self {
            header: PsshHeader::new(&SystemId::Widevine.to_bytes(), 0, Vec::new())?,
            data,
        })
    }

    /// Wrap a base64-encoded payload.
    pub fn from_base64(data_b64: &str) -> Result<Self> {
        Self::new(base64::engine::general_purpose::STANDARD.decode(data_b64.trim())?)
    }

    pub fn from_pssh_data(pssh_data: &WidevinePsshData) -> Result<Self> {
        Self::new(pssh_data.encode_to_vec())
    }

    /// Build an AES-CTR payload listing the given key IDs.
    pub fn from_key_ids(key_ids: &[[u8; KEY_LEN]], content_id: Option<&[u8]>) -> Result<Self> {
        let mut pssh_data = WidevinePsshData {
            key_ids: key_ids.iter().map(|id| id.to_vec()).collect(),
            content_id: content_id.map(<[u8]>::to_vec),
            ..Default::default()
        };
        pssh_data.set_algorithm(Algorithm::Aesctr);
        Self::from_pssh_data(&pssh_data)
    }

    pub(crate) fn header(&self) -> &PsshHeader {
        &self.header
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Decode the payload.
    pub fn pssh_data(&self) -> Result<WidevinePsshData> {
        Ok(WidevinePsshData::decode(self.data.as_slice())?)
    }

    pub(crate) fn data(&self) -> Bitstream {
        let mut bs = Bitstream::new();
        bs.append_data64(&self.data);
        bs
    }
}

/// Key-server response to a content key request.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyResponse {
    pub status: String,
    #[serde(default)]
    pub tracks: Vec<KeyResponseTrack>,
}

/// Keys issued for one track type.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyResponseTrack {
    #[serde(rename = "type")]
    pub track_type: String,
    pub key_id: String,
    pub key: String,
    #[serde(default)]
    pub pssh: Vec<KeyResponsePssh>,
}

/// A protection header issued for a track.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyResponsePssh {
    pub drm_type: String,
    pub data: String,
}

impl KeyResponse {
    /// Parse the JSON body, failing unless the status is `OK`.
    pub fn from_json(json: &str) -> Result<Self> {
        let response: KeyResponse = serde_json::from_str(json)?;
        if response.status != STATUS_OK {
            return Err(Error::InvalidConfiguration(format!(
                "Key server returned status {}",
                response.status
            )));
        }
        debug!("Key response with {} track(s)", response.tracks.len());
        Ok(response)
    }

    /// Widevine headers of every track, in response order.
    pub fn widevine_psshs(&self) -> Result<Vec<WidevinePssh>> {
        let mut out = Vec::new();
        for track in self.tracks.iter() {
            out.extend(track.widevine_psshs()?);
        }
        Ok(out)
    }
}

impl KeyResponseTrack {
    /// The base64 key ID and key as a [`KeyPair`].
    pub fn key_pair(&self) -> Result<KeyPair> {
        let engine = base64::engine::general_purpose::STANDARD;
        let id = engine
            .decode(&self.key_id)
            .map_err(|e| Error::MalformedKey(format!("Invalid key ID {}: {}", self.key_id, e)))?;
        let key = engine
            .decode(&self.key)
            .map_err(|e| Error::MalformedKey(format!("Invalid key for track {}: {}", self.track_type, e)))?;
        KeyPair::from_slices(&id, &key)
    }

    /// Headers of this track whose `drm_type` is Widevine; others are skipped.
    pub fn widevine_psshs(&self) -> Result<Vec<WidevinePssh>> {
        self.pssh
            .iter()
            .filter(|p| p.drm_type.eq_ignore_ascii_case(DRM_TYPE_WIDEVINE))
            .map(|p| -> Result<WidevinePssh> {
                let pssh = WidevinePssh::from_base64(&p.data)?;
                // Reject anything that is not a WidevinePsshData message.
                pssh.pssh_data()?;
                Ok(pssh)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use prost::Message;

    use super::{Algorithm, KeyResponse, WidevinePssh, WidevinePsshData};
    use crate::bitstream::Bitstream;
    use crate::error::Error;
    use crate::pssh::{DrmInfoPssh, PsshBox, SystemId};

    const KID: [u8; 16] = [0x11; 16];

    #[test]
    fn payload_passes_through() {
        let payload = vec![0x12, 0x10, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        let pssh: DrmInfoPssh = WidevinePssh::new(payload.clone()).expect("widevine").into();
        assert_eq!(pssh.version(), 0);

        let bytes = pssh.to_bytes().expect("bytes");
        let parsed = PsshBox::from_bytes(&bytes).expect("parse");
        assert_eq!(parsed.known_system(), Some(SystemId::Widevine));
        assert_eq!(parsed.data, payload);

        let xml = pssh.generate_xml().expect("xml");
        let fields: Vec<_> = xml.children().collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].attr("value"), Some("18"));
        assert!(fields[2].attr("data64").is_some());
        let reread = Bitstream::from_xml(xml.children()).expect("reread");
        assert_eq!(reread.to_bytes(), bytes[12..].to_vec());
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(
            WidevinePssh::new(Vec::new()),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn local_payload_from_key_ids() {
        let pssh = WidevinePssh::from_key_ids(&[KID], Some(&b"content"[..])).expect("widevine");
        let data = pssh.pssh_data().expect("decode");
        assert_eq!(data.key_ids, vec![KID.to_vec()]);
        assert_eq!(data.algorithm(), Algorithm::Aesctr);
        assert_eq!(data.content_id.as_deref(), Some(&b"content"[..]));
    }

    #[test]
    fn key_response_filters_widevine() {
        let engine = base64::engine::general_purpose::STANDARD;
        let wv = WidevinePsshData {
            key_ids: vec![KID.to_vec()],
            ..Default::default()
        }
        .encode_to_vec();
        let json = format!(
            r#"{{
                "status": "OK",
                "tracks": [{{
                    "type": "SD",
                    "key_id": "{kid}",
                    "key": "{key}",
                    "pssh": [
                        {{"drm_type": "WIDEVINE", "data": "{wv}"}},
                        {{"drm_type": "PLAYREADY", "data": "AAAA"}}
                    ]
                }}]
            }}"#,
            kid = engine.encode(KID),
            key = engine.encode([0x22u8; 16]),
            wv = engine.encode(&wv),
        );

        let response = KeyResponse::from_json(&json).expect("response");
        assert_eq!(response.tracks.len(), 1);

        let pair = response.tracks[0].key_pair().expect("pair");
        assert_eq!(pair.id(), &KID);
        assert_eq!(pair.key(), &[0x22; 16]);

        let psshs = response.widevine_psshs().expect("psshs");
        assert_eq!(psshs.len(), 1);
        assert_eq!(psshs[0].payload(), wv.as_slice());
    }

    #[test]
    fn key_response_error_status() {
        let json = r#"{"status": "ACCESS_DENIED", "tracks": []}"#;
        assert!(matches!(
            KeyResponse::from_json(json),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn key_response_bad_key() {
        let json = r#"{"status": "OK", "tracks": [{"type": "HD", "key_id": "AAAA", "key": "AAAA"}]}"#;
        let response = KeyResponse::from_json(json).expect("response");
        assert!(matches!(
            response.tracks[0].key_pair(),
            Err(Error::MalformedKey(_))
        ));
    }
}
