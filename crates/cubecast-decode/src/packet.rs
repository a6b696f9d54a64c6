//! Encoded packets - coded units with Annex-B framing
//!
//! Packet buffers live in a slot pool and are refilled in place, so once a
//! buffer has grown to the largest unit of the stream, packaging no longer
//! allocates.

use bytes::BytesMut;

use cubecast_core::{EncodedUnit, PresentationTime, UnitKind};

/// Annex-B start code prefixed to every packaged unit
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// EncodedPacket - one framed unit ready for the decoder
#[derive(Debug)]
pub struct EncodedPacket {
    data: BytesMut,
    kind: UnitKind,
    pts: PresentationTime,
    /// Admission order within the face
    sequence: u64,
}

impl EncodedPacket {
    /// Empty packet with room for `capacity` framed bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            kind: UnitKind::Dependent,
            pts: PresentationTime::ZERO,
            sequence: 0,
        }
    }

    /// Frame `unit` into this packet, replacing previous contents
    pub fn package(&mut self, unit: &EncodedUnit, sequence: u64) {
        self.data.clear();
        self.data.reserve(START_CODE.len() + unit.data.len());
        self.data.extend_from_slice(&START_CODE);
        self.data.extend_from_slice(&unit.data);
        self.kind = unit.kind;
        self.pts = unit.pts;
        self.sequence = sequence;
    }

    /// Framed bytes, start code included
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Unit payload without the start code
    pub fn payload(&self) -> &[u8] {
        self.data.get(START_CODE.len()..).unwrap_or(&[])
    }

    #[inline]
    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    #[inline]
    pub fn pts(&self) -> PresentationTime {
        self.pts
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes reserved by the buffer
    pub fn buffer_capacity(&self) -> usize {
        self.data.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn unit(payload: &'static [u8], millis: i64) -> EncodedUnit {
        EncodedUnit::new(Bytes::from_static(payload), PresentationTime::from_millis(millis))
    }

    #[test]
    fn test_package_prefixes_start_code() {
        let mut packet = EncodedPacket::with_capacity(16);
        assert!(packet.is_empty());

        packet.package(&unit(&[0x67, 0x42, 0x00], 40), 3);
        assert_eq!(packet.data(), &[0, 0, 0, 1, 0x67, 0x42, 0x00]);
        assert_eq!(packet.payload(), &[0x67, 0x42, 0x00]);
        assert_eq!(packet.kind(), UnitKind::Keyframe);
        assert_eq!(packet.pts(), PresentationTime::from_millis(40));
        assert_eq!(packet.sequence(), 3);
    }

    #[test]
    fn test_repackage_replaces_contents() {
        let mut packet = EncodedPacket::with_capacity(16);
        packet.package(&unit(&[0x67, 1, 2, 3, 4, 5], 0), 0);
        packet.package(&unit(&[0x41], 33), 1);
        assert_eq!(packet.data(), &[0, 0, 0, 1, 0x41]);
        assert_eq!(packet.kind(), UnitKind::Dependent);
    }

    #[test]
    fn test_repackage_keeps_allocation() {
        let mut packet = EncodedPacket::with_capacity(64);
        packet.package(&unit(&[0x41; 32], 0), 0);
        let capacity = packet.buffer_capacity();
        for i in 1..10 {
            packet.package(&unit(&[0x41; 16], i), i as u64);
        }
        assert_eq!(packet.buffer_capacity(), capacity);
    }
}
