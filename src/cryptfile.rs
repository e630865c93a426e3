//! Cryptfile assembly.
//!
//! A cryptfile tells the encryption tool which tracks to encrypt, with which
//! keys and IVs, and which protection headers to embed:
//!
//! ```xml
//! <GPACDRM type="CENC AES-CTR">
//!   <DRMInfo type="pssh" version="1">...</DRMInfo>
//!   <CrypTrack trackID="1" IsEncrypted="1" IV_size="8" saiSavedBox="senc">
//!     <key KID="0x..." value="0x..."/>
//!   </CrypTrack>
//! </GPACDRM>
//! ```
use std::fmt;
use std::io::Write;

use crate::error::Result;
use crate::key::CryptKey;
use crate::pssh::DrmInfoPssh;
use crate::track::CryptTrack;
use crate::xml::Element;

const ROOT_ELEMENT: &str = "GPACDRM";
const TRACK_ELEMENT: &str = "CrypTrack";
const KEY_ELEMENT: &str = "key";

const SAMPLE_AUX_INFO_BOX: &str = "senc";

/// Sample encryption mode written on the document root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtectionScheme {
    #[default]
    AesCtr,
    AesCbc,
}

impl ProtectionScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtectionScheme::AesCtr => "CENC AES-CTR",
            ProtectionScheme::AesCbc => "CENC AES-CBC",
        }
    }
}

impl fmt::Display for ProtectionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combines tracks and protection headers into one cryptfile.
#[derive(Debug, Clone)]
pub struct CryptfileBuilder {
    scheme: ProtectionScheme,
    tracks: Vec<CryptTrack>,
    pssh_list: Vec<DrmInfoPssh>,
}

impl CryptfileBuilder {
    /// Tracks and headers are emitted in the order given, duplicates included.
    pub fn new(scheme: ProtectionScheme, tracks: Vec<CryptTrack>, pssh_list: Vec<DrmInfoPssh>) -> Self {
        Self {
            scheme,
            tracks,
            pssh_list,
        }
    }

    pub fn scheme(&self) -> ProtectionScheme {
        self.scheme
    }

    pub fn tracks(&self) -> &[CryptTrack] {
        &self.tracks
    }

    pub fn pssh_list(&self) -> &[DrmInfoPssh] {
        &self.pssh_list
    }

    /// Build the cryptfile document.
    ///
    /// Every protection header is rendered before the document is assembled,
    /// so a failing header leaves no partial output.
    pub fn build_cryptfile(&self) -> Result<Document> {
        let drm_info = self
            .pssh_list
            .iter()
            .map(|pssh| {
                debug!(
                    "DRMInfo for {} (system {}, version {})",
                    pssh.name(),
                    pssh.header().scheme_id_uri(),
                    pssh.version()
                );
                pssh.generate_xml()
            })
            .collect::<Result<Vec<_>>>()?;

        let mut root = Element::new(ROOT_ELEMENT).with_attr("type", self.scheme.as_str());
        for e in drm_info {
            root.push_child(e);
        }
        for track in self.tracks.iter() {
            debug!(
                "CrypTrack {}: {} key(s), IV size {}, rotation {:?}",
                track.track_id(),
                track.active_keys().len(),
                track.iv_size(),
                track.rolling_sample_count()
            );
            root.push_child(track_element(track));
        }

        info!(
            "Built {} cryptfile with {} track(s) and {} protection header(s)",
            self.scheme,
            self.tracks.len(),
            self.pssh_list.len()
        );
        Ok(Document { root })
    }

    /// DASH `ContentProtection` fragments, one per protection header.
    pub fn content_protection(&self) -> Result<Vec<Element>> {
        self.pssh_list
            .iter()
            .map(DrmInfoPssh::generate_content_protection)
            .collect()
    }
}

fn track_element(track: &CryptTrack) -> Element {
    let mut e = Element::new(TRACK_ELEMENT)
        .with_attr("trackID", track.track_id().to_string())
        .with_attr("IsEncrypted", "1")
        .with_attr("IV_size", track.iv_size().to_string());
    if let Some(iv) = track.first_iv() {
        e.set_attr("first_IV", hex_attr(iv));
    }
    e.set_attr("saiSavedBox", SAMPLE_AUX_INFO_BOX);
    if let Some(n) = track.rolling_sample_count() {
        e.set_attr("keyRoll", format!("roll={}", n));
    }

    for key in track.active_keys() {
        e.push_child(key_element(key));
    }
    e
}

fn key_element(key: &CryptKey) -> Element {
    let pair = key.key_pair();
    let mut e = Element::new(KEY_ELEMENT)
        .with_attr("KID", hex_attr(pair.id()))
        .with_attr("value", hex_attr(pair.key()));
    if let Some(iv) = key.iv() {
        e.set_attr("IV", hex_attr(iv));
    }
    e
}

fn hex_attr(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// A built cryptfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: Element,
}

impl Document {
    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn into_root(self) -> Element {
        self.root
    }

    pub fn to_xml_string(&self) -> Result<String> {
        self.root.to_xml_string()
    }

    pub fn write_to<W: Write>(&self, out: W) -> Result<()> {
        self.root.write_to(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{CryptfileBuilder, ProtectionScheme};
    use crate::key::{CryptKey, KeyPair};
    use crate::pssh::{AccessPssh, ClearKeyPssh, DrmInfoPssh};
    use crate::track::{CryptTrack, NO_ROTATION};

    fn pair(n: u8) -> KeyPair {
        KeyPair::new([n; 16], [n + 0x80; 16])
    }

    fn clearkey(ids: &[u8]) -> DrmInfoPssh {
        ClearKeyPssh::new(ids.iter().map(|n| [*n; 16]).collect())
            .expect("clearkey")
            .into()
    }

    #[test]
    fn single_key_track() {
        let track = CryptTrack::new(
            2,
            16,
            Some(vec![0xab; 16]),
            vec![CryptKey::new(pair(1)), CryptKey::new(pair(2))],
            NO_ROTATION,
        )
        .expect("track");
        let doc = CryptfileBuilder::new(ProtectionScheme::AesCbc, vec![track], Vec::new())
            .build_cryptfile()
            .expect("build");

        let root = doc.root();
        assert_eq!(root.name(), "GPACDRM");
        assert_eq!(root.attr("type"), Some("CENC AES-CBC"));

        let track = root.children_named("CrypTrack").next().expect("track");
        assert_eq!(track.attr("trackID"), Some("2"));
        assert_eq!(track.attr("IsEncrypted"), Some("1"));
        assert_eq!(track.attr("IV_size"), Some("16"));
        assert_eq!(track.attr("first_IV"), Some(format!("0x{}", "ab".repeat(16)).as_str()));
        assert_eq!(track.attr("saiSavedBox"), Some("senc"));
        assert_eq!(track.attr("keyRoll"), None);

        let keys: Vec<_> = track.children_named("key").collect();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].attr("KID"), Some(format!("0x{}", "01".repeat(16)).as_str()));
        assert_eq!(keys[0].attr("value"), Some(format!("0x{}", "81".repeat(16)).as_str()));
        assert_eq!(keys[0].attr("IV"), None);
    }

    #[test]
    fn rotating_track_lists_keys_in_order() {
        let keys = vec![
            CryptKey::new(pair(3)),
            CryptKey::with_iv(pair(4), vec![0x11; 8]).expect("key"),
            CryptKey::new(pair(5)),
        ];
        let track = CryptTrack::new(1, 8, None, keys, 100).expect("track");
        let doc = CryptfileBuilder::new(ProtectionScheme::AesCtr, vec![track], Vec::new())
            .build_cryptfile()
            .expect("build");

        let track = doc.root().children_named("CrypTrack").next().expect("track");
        assert_eq!(track.attr("keyRoll"), Some("roll=100"));
        let kids: Vec<_> = track
            .children_named("key")
            .map(|k| k.attr("KID").expect("KID").to_string())
            .collect();
        assert_eq!(
            kids,
            vec![
                format!("0x{}", "03".repeat(16)),
                format!("0x{}", "04".repeat(16)),
                format!("0x{}", "05".repeat(16)),
            ]
        );
        let with_iv = track.children_named("key").nth(1).expect("key");
        assert_eq!(with_iv.attr("IV"), Some("0x1111111111111111"));
    }

    #[test]
    fn headers_precede_tracks_in_order_without_dedup() {
        let tracks = vec![
            CryptTrack::new(1, 8, None, vec![pair(1).into()], NO_ROTATION).expect("track"),
            CryptTrack::new(2, 8, None, vec![pair(2).into()], NO_ROTATION).expect("track"),
        ];
        let access: DrmInfoPssh = AccessPssh::new(vec![[1; 16]]).expect("access").into();
        let headers = vec![clearkey(&[1, 2]), access, clearkey(&[1, 2])];

        let doc = CryptfileBuilder::new(ProtectionScheme::AesCtr, tracks, headers)
            .build_cryptfile()
            .expect("build");

        let names: Vec<_> = doc.root().children().map(|e| e.name().to_string()).collect();
        assert_eq!(
            names,
            vec!["DRMInfo", "DRMInfo", "DRMInfo", "CrypTrack", "CrypTrack"]
        );

        let versions: Vec<_> = doc
            .root()
            .children_named("DRMInfo")
            .map(|e| e.attr("version").expect("version").to_string())
            .collect();
        assert_eq!(versions, vec!["1", "0", "1"]);

        let ids: Vec<_> = doc
            .root()
            .children_named("CrypTrack")
            .map(|e| e.attr("trackID").expect("trackID").to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn content_protection_per_header() {
        let builder = CryptfileBuilder::new(
            ProtectionScheme::AesCtr,
            Vec::new(),
            vec![clearkey(&[7]), clearkey(&[8])],
        );
        let fragments = builder.content_protection().expect("cp");
        assert_eq!(fragments.len(), 2);
        assert!(fragments
            .iter()
            .all(|e| e.name() == "ContentProtection" && e.children_named("cenc:pssh").count() == 1));
    }

    #[test]
    fn writes_to_any_sink() {
        let track = CryptTrack::new(1, 8, None, vec![pair(1).into()], NO_ROTATION).expect("track");
        let doc = CryptfileBuilder::new(ProtectionScheme::AesCtr, vec![track], vec![clearkey(&[1])])
            .build_cryptfile()
            .expect("build");

        let mut buf = Vec::new();
        doc.write_to(&mut buf).expect("write");
        assert_eq!(String::from_utf8(buf).expect("utf8"), doc.to_xml_string().expect("string"));
    }
}
