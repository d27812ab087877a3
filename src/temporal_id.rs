//! Temporal halo IDs
//!
//! A temporal ID packs a snapshot number and a snapshot-local index into one
//! integer: `id = snapshot * multiplier + local_index`. The multiplier must be
//! larger than the halo count of every snapshot, otherwise the IDs of one
//! snapshot would run into the next.
//!
//! `-1` is the "no reference" sentinel (e.g. a halo with no descendant). It is
//! classified as [`Reference::None`] before any arithmetic happens and is
//! never decoded.

use crate::error::{Result, SortError};

/// Default multiplier between snapshot number and local index (1e12)
pub const DEFAULT_MULTIPLIER: u64 = 1_000_000_000_000;

/// Raw value stored in identifier fields for "no reference"
pub const NO_REFERENCE: i64 = -1;

/// A classified identifier value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reference {
    /// The sentinel: points at nothing
    None,
    /// A halo in some snapshot
    Halo {
        snapshot: u32,
        local_index: u64,
    },
}

/// Encoder/decoder for temporal IDs under a fixed multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalIdCodec {
    multiplier: u64,
}

impl Default for TemporalIdCodec {
    fn default() -> Self {
        Self { multiplier: DEFAULT_MULTIPLIER }
    }
}

impl TemporalIdCodec {
    /// Create a codec. The multiplier must be positive and fit in an `i64`.
    pub fn new(multiplier: u64) -> Result<Self> {
        if multiplier == 0 || multiplier > i64::MAX as u64 {
            return Err(SortError::InvalidConfig {
                parameter: "multiplier".to_string(),
                reason: format!("must be between 1 and {}, got {}", i64::MAX, multiplier),
            });
        }
        Ok(Self { multiplier })
    }

    pub fn multiplier(&self) -> u64 {
        self.multiplier
    }

    /// Encode `(snapshot, local_index)` into a temporal ID.
    pub fn encode(&self, snapshot: u32, local_index: u64) -> Result<i64> {
        let out_of_range = || SortError::Range {
            snapshot,
            local_index,
            multiplier: self.multiplier,
        };

        if local_index >= self.multiplier {
            return Err(out_of_range());
        }

        (snapshot as u64)
            .checked_mul(self.multiplier)
            .and_then(|base| base.checked_add(local_index))
            .and_then(|id| i64::try_from(id).ok())
            .ok_or_else(out_of_range)
    }

    /// Temporal IDs for positions `0..count` of a snapshot, in order.
    pub fn encode_range(&self, snapshot: u32, count: usize) -> Result<Vec<i64>> {
        if count as u64 > self.multiplier {
            // Fail on the first index that does not fit instead of encoding the rest.
            return Err(SortError::Range {
                snapshot,
                local_index: self.multiplier,
                multiplier: self.multiplier,
            });
        }
        (0..count as u64).map(|idx| self.encode(snapshot, idx)).collect()
    }

    /// Decode a non-negative temporal ID into `(snapshot, local_index)`.
    ///
    /// Returns `None` for negative values and for IDs whose snapshot number
    /// does not fit in a `u32`. The sentinel must be handled by the caller
    /// (see [`TemporalIdCodec::classify`]).
    pub fn decode(&self, id: i64) -> Option<(u32, u64)> {
        let id = u64::try_from(id).ok()?;
        let snapshot = u32::try_from(id / self.multiplier).ok()?;
        Some((snapshot, id % self.multiplier))
    }

    /// Classify a raw identifier value. `None` means the value is malformed.
    pub fn classify(&self, raw: i64) -> Option<Reference> {
        if raw == NO_REFERENCE {
            return Some(Reference::None);
        }
        self.decode(raw)
            .map(|(snapshot, local_index)| Reference::Halo { snapshot, local_index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_default_multiplier() {
        let codec = TemporalIdCodec::default();
        assert_eq!(codec.encode(63, 0).unwrap(), 63_000_000_000_000);
        assert_eq!(codec.encode(63, 1234).unwrap(), 63_000_000_001_234);
        assert_eq!(codec.encode(0, 7).unwrap(), 7);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let codec = TemporalIdCodec::new(1000).unwrap();
        for (snap, idx) in [(0u32, 0u64), (0, 999), (5, 17), (99, 998)] {
            let id = codec.encode(snap, idx).unwrap();
            assert_eq!(codec.decode(id), Some((snap, idx)));
        }
    }

    #[test]
    fn test_encode_rejects_index_at_multiplier() {
        let codec = TemporalIdCodec::new(100).unwrap();
        let err = codec.encode(2, 100).unwrap_err();
        assert_eq!(err, SortError::Range { snapshot: 2, local_index: 100, multiplier: 100 });
        assert!(codec.encode(2, 99).is_ok());
    }

    #[test]
    fn test_encode_rejects_overflow() {
        let codec = TemporalIdCodec::new(i64::MAX as u64).unwrap();
        assert!(matches!(codec.encode(2, 0), Err(SortError::Range { .. })));
    }

    #[test]
    fn test_zero_multiplier_is_invalid() {
        assert!(matches!(TemporalIdCodec::new(0), Err(SortError::InvalidConfig { .. })));
    }

    #[test]
    fn test_encode_range() {
        let codec = TemporalIdCodec::new(10).unwrap();
        assert_eq!(codec.encode_range(3, 4).unwrap(), vec![30, 31, 32, 33]);
        assert!(codec.encode_range(3, 10).is_ok());
        assert!(matches!(codec.encode_range(3, 11), Err(SortError::Range { .. })));
    }

    #[test]
    fn test_sentinel_is_classified_before_decoding() {
        let codec = TemporalIdCodec::default();
        assert_eq!(codec.classify(NO_REFERENCE), Some(Reference::None));
        assert_eq!(codec.decode(NO_REFERENCE), None);
        assert_eq!(codec.classify(-7), None);
        assert_eq!(
            codec.classify(2_000_000_000_005),
            Some(Reference::Halo { snapshot: 2, local_index: 5 })
        );
    }
}
