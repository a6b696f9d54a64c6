//! Coded units as delivered by the network path
//!
//! A unit is one NAL-sized chunk of compressed video. Its kind is read from
//! the NAL header: a sequence parameter set opens every keyframe group, so
//! it is the unit the sync policy treats as the keyframe marker.

use bytes::Bytes;

use crate::PresentationTime;

/// NAL type that marks the start of a self-contained group
pub const KEYFRAME_NAL_TYPE: u8 = 7;

/// Mask selecting the NAL unit type from the first header byte
pub const NAL_TYPE_MASK: u8 = 0x1F;

/// Kind of a coded unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// Decodable without prior state
    Keyframe,
    /// Depends on previously decoded state
    Dependent,
}

impl UnitKind {
    /// Classify a unit from its NAL type byte
    #[inline]
    pub fn from_nal_type(nal_type: u8) -> Self {
        if nal_type == KEYFRAME_NAL_TYPE {
            UnitKind::Keyframe
        } else {
            UnitKind::Dependent
        }
    }

    /// Classify a unit from its payload; empty payloads are dependent
    #[inline]
    pub fn classify(payload: &[u8]) -> Self {
        match payload.first() {
            Some(b) => Self::from_nal_type(b & NAL_TYPE_MASK),
            None => UnitKind::Dependent,
        }
    }

    #[inline]
    pub fn is_keyframe(self) -> bool {
        self == UnitKind::Keyframe
    }
}

/// EncodedUnit - one coded unit straight off the network
#[derive(Clone, Debug)]
pub struct EncodedUnit {
    /// Payload without container framing
    pub data: Bytes,
    /// Keyframe or dependent
    pub kind: UnitKind,
    /// Sender's presentation timestamp
    pub pts: PresentationTime,
    /// Bytes the source had to discard because the receive buffer was short
    pub truncated: u32,
}

impl EncodedUnit {
    /// Create a unit, classifying it from its payload
    pub fn new(data: Bytes, pts: PresentationTime) -> Self {
        let kind = UnitKind::classify(&data);
        Self {
            data,
            kind,
            pts,
            truncated: 0,
        }
    }

    /// Create a unit with an explicit kind
    pub fn with_kind(data: Bytes, kind: UnitKind, pts: PresentationTime) -> Self {
        Self {
            data,
            kind,
            pts,
            truncated: 0,
        }
    }

    /// Record how many bytes were lost to truncation
    pub fn with_truncated(mut self, truncated: u32) -> Self {
        self.truncated = truncated;
        self
    }

    /// NAL type of the first header byte, if any
    pub fn nal_type(&self) -> Option<u8> {
        self.data.first().map(|b| b & NAL_TYPE_MASK)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classify_sps_is_keyframe() {
        assert_eq!(UnitKind::classify(&[0x67, 0x42]), UnitKind::Keyframe);
        // forbidden/nri bits do not matter
        assert_eq!(UnitKind::classify(&[0x07]), UnitKind::Keyframe);
    }

    #[test]
    fn test_classify_slices_are_dependent() {
        assert_eq!(UnitKind::classify(&[0x41]), UnitKind::Dependent);
        assert_eq!(UnitKind::classify(&[0x65]), UnitKind::Dependent);
        assert_eq!(UnitKind::classify(&[0x68]), UnitKind::Dependent);
    }

    #[test]
    fn test_classify_empty() {
        assert_eq!(UnitKind::classify(&[]), UnitKind::Dependent);
    }

    #[test]
    fn test_unit_nal_type() {
        let unit = EncodedUnit::new(Bytes::from_static(&[0x67, 0x00]), PresentationTime::ZERO);
        assert_eq!(unit.nal_type(), Some(7));
        assert!(unit.kind.is_keyframe());
        assert_eq!(unit.truncated, 0);
    }

    proptest! {
        #[test]
        fn prop_classify_only_depends_on_low_bits(b in any::<u8>()) {
            let kind = UnitKind::classify(&[b]);
            prop_assert_eq!(kind.is_keyframe(), b & NAL_TYPE_MASK == KEYFRAME_NAL_TYPE);
        }
    }
}
