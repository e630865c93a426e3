//! Tracks to encrypt and their key rotation schedules.

use crate::error::{Error, Result};
use crate::key::CryptKey;

/// Rolling sample count meaning "one key for the whole track".
pub const NO_ROTATION: i64 = -1;

/// Largest IV size accepted, in bytes.
pub const MAX_IV_SIZE: u8 = 16;

/// One track of the media file with its ordered keys.
///
/// Without rotation only the first key is used. With a rolling sample count
/// `n`, key `i % keys.len()` protects samples `[i * n, (i + 1) * n)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptTrack {
    track_id: u32,
    iv_size: u8,
    first_iv: Option<Vec<u8>>,
    keys: Vec<CryptKey>,
    rolling_sample_count: Option<u32>,
}

impl CryptTrack {
    /// Create a track.
    ///
    /// `rolling_sample_count` is either [`NO_ROTATION`] or a positive number of
    /// samples per key. `first_iv`, when given, must be exactly `iv_size` bytes.
    pub fn new(
        track_id: u32,
        iv_size: u8,
        first_iv: Option<Vec<u8>>,
        keys: Vec<CryptKey>,
        rolling_sample_count: i64,
    ) -> Result<Self> {
        if iv_size == 0 || iv_size > MAX_IV_SIZE {
            return Err(Error::InvalidConfiguration(format!(
                "Invalid IV size for track {}: {} (must be 1..={} bytes)",
                track_id, iv_size, MAX_IV_SIZE
            )));
        }

        if let Some(iv) = first_iv.as_ref() {
            if iv.len() != iv_size as usize {
                return Err(Error::InvalidConfiguration(format!(
                    "First IV for track {} is {} bytes, expected {}",
                    track_id,
                    iv.len(),
                    iv_size
                )));
            }
        }

        if keys.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "Track {} has no keys",
                track_id
            )));
        }

        let rolling_sample_count = match rolling_sample_count {
            NO_ROTATION => None,
            n if n > 0 => Some(u32::try_from(n).map_err(|_| {
                Error::InvalidConfiguration(format!("Rolling sample count too large: {}", n))
            })?),
            n => {
                return Err(Error::InvalidConfiguration(format!(
                    "Invalid rolling sample count for track {}: {}",
                    track_id, n
                )))
            }
        };

        Ok(Self {
            track_id,
            iv_size,
            first_iv,
            keys,
            rolling_sample_count,
        })
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn iv_size(&self) -> u8 {
        self.iv_size
    }

    pub fn first_iv(&self) -> Option<&[u8]> {
        self.first_iv.as_deref()
    }

    /// All keys in rotation order.
    pub fn keys(&self) -> &[CryptKey] {
        &self.keys
    }

    /// Samples per key, or `None` when the track uses a single key.
    pub fn rolling_sample_count(&self) -> Option<u32> {
        self.rolling_sample_count
    }

    pub fn is_rotating(&self) -> bool {
        self.rolling_sample_count.is_some()
    }

    /// Keys that actually protect samples: all of them when rotating,
    /// otherwise only the first.
    pub fn active_keys(&self) -> &[CryptKey] {
        if self.is_rotating() {
            &self.keys
        } else {
            &self.keys[..1]
        }
    }

    /// Index into [`CryptTrack::keys`] of the key protecting `sample_index`.
    pub fn key_index_for_sample(&self, sample_index: u64) -> usize {
        match self.rolling_sample_count {
            None => 0,
            Some(n) => ((sample_index / n as u64) % self.keys.len() as u64) as usize,
        }
    }

    /// The key protecting `sample_index` (0-based from the first sample).
    pub fn key_for_sample(&self, sample_index: u64) -> &CryptKey {
        &self.keys[self.key_index_for_sample(sample_index)]
    }
}
