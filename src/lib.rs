//! cryptfile - CENC protection headers and cryptfile generation.
//!
//! This crate provides:
//! - Bit-field descriptions that render to raw bytes or to XML.
//! - PSSH boxes for ClearKey, PlayReady, Widevine, Access and
//!   externally supplied (DRMToday) systems, plus a PSSH box reader.
//! - DASH `ContentProtection` fragments.
//! - Cryptfile documents describing tracks, keys, key rotation and the
//!   protection headers to embed.
//!
//! Feature flags:
//! - `log` (default): log through the `log` facade.
//! - `cli`: build the `cryptfile` binary.
#![allow(clippy::result_large_err)]

#[macro_use]
mod macros;

/// Bit-field descriptions with binary and XML renderings.
pub mod bitstream;
/// Cryptfile document assembly.
pub mod cryptfile;
/// DRMToday key-ingest responses.
pub mod drmtoday;
/// Common error types and Result alias.
pub mod error;
/// Key IDs, keys and per-track keys.
pub mod key;
/// PlayReady objects and WRM headers.
pub mod playready;
/// PSSH framing, generation and parsing.
pub mod pssh;
/// Tracks and key rotation.
pub mod track;
/// Widevine PSSH data and key-server responses.
pub mod widevine;
/// XML element tree.
pub mod xml;

pub use crate::cryptfile::{CryptfileBuilder, Document, ProtectionScheme};
pub use crate::error::{Error, Result};
pub use crate::key::{CryptKey, KeyPair};
pub use crate::pssh::{DrmInfoPssh, PsshBox, SystemId};
pub use crate::track::CryptTrack;
