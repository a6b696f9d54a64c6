//! Identity types for CUBECAST
//!
//! Faces are addressed by their stream order: the first `faces_per_eye`
//! streams belong to eye 0, the next block to eye 1.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Face index - position of a face stream within the whole composite
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FaceIndex(pub u8);

impl FaceIndex {
    pub const ZERO: FaceIndex = FaceIndex(0);

    #[inline]
    pub fn new(index: u8) -> Self {
        FaceIndex(index)
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Build the composite index of `face` within `eye`
    #[inline]
    pub fn from_eye_face(eye: EyeIndex, face: u8, faces_per_eye: u8) -> Self {
        FaceIndex(eye.0 * faces_per_eye + face)
    }

    /// Split into (eye, face within eye)
    #[inline]
    pub fn split(self, faces_per_eye: u8) -> (EyeIndex, u8) {
        let per_eye = faces_per_eye.max(1);
        (EyeIndex(self.0 / per_eye), self.0 % per_eye)
    }
}

impl fmt::Debug for FaceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Face({})", self.0)
    }
}

impl fmt::Display for FaceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Eye index - 0 for left (or mono), 1 for right
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EyeIndex(pub u8);

impl EyeIndex {
    pub const LEFT: EyeIndex = EyeIndex(0);
    pub const RIGHT: EyeIndex = EyeIndex(1);

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for EyeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "Eye(left)"),
            1 => write!(f, "Eye(right)"),
            n => write!(f, "Eye({})", n),
        }
    }
}

/// Stream identity - one negotiated media stream of a session
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub u32);

impl StreamId {
    #[inline]
    pub fn new(id: u32) -> Self {
        StreamId(id)
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stream({})", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session identity - one negotiated streaming session
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId(pub u64);

impl SessionId {
    pub const ZERO: SessionId = SessionId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        SessionId(id)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({:016x})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Slot identity - index of a buffer within its fixed-capacity pool
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u32);

impl SlotId {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_index_eye_split() {
        let face = FaceIndex::from_eye_face(EyeIndex::RIGHT, 2, 6);
        assert_eq!(face, FaceIndex(8));
        assert_eq!(face.split(6), (EyeIndex::RIGHT, 2));
    }

    #[test]
    fn test_face_index_split_mono() {
        for i in 0..6 {
            assert_eq!(FaceIndex(i).split(6), (EyeIndex::LEFT, i));
        }
    }

    #[test]
    fn test_debug_formats() {
        assert_eq!(format!("{:?}", FaceIndex(3)), "Face(3)");
        assert_eq!(format!("{:?}", EyeIndex::LEFT), "Eye(left)");
        assert_eq!(format!("{:?}", SlotId(7)), "Slot(7)");
    }
}
