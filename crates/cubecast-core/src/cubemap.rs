//! Cubemap composites
//!
//! A `StereoCubemap` is allocated once with its full face set and then
//! rewritten in place every assembly cycle; nothing in the steady state
//! adds or removes faces.

use serde::{Deserialize, Serialize};

use crate::{CubecastError, CubecastResult, EyeIndex, FaceIndex, Picture, PictureGeometry, WallTime};

/// Faces per cubemap
pub const MAX_FACES_COUNT: u8 = 6;

/// Eyes per composite
pub const MAX_EYES_COUNT: u8 = 2;

/// Direction a face looks at, in stream order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FaceOrientation {
    PositiveX = 0,
    NegativeX = 1,
    PositiveY = 2,
    PositiveZ = 3,
    NegativeZ = 4,
    NegativeY = 5,
}

impl FaceOrientation {
    pub const ALL: [FaceOrientation; 6] = [
        FaceOrientation::PositiveX,
        FaceOrientation::NegativeX,
        FaceOrientation::PositiveY,
        FaceOrientation::PositiveZ,
        FaceOrientation::NegativeZ,
        FaceOrientation::NegativeY,
    ];

    /// Orientation of the n-th face of an eye
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Tile (column, row) in a 4x3 cross layout
    pub fn cross_tile(self) -> (u32, u32) {
        match self {
            FaceOrientation::NegativeX => (0, 1),
            FaceOrientation::NegativeZ => (1, 1),
            FaceOrientation::PositiveY => (1, 0),
            FaceOrientation::NegativeY => (3, 1),
            FaceOrientation::PositiveZ => (1, 2),
            FaceOrientation::PositiveX => (2, 1),
        }
    }
}

/// Shape of a composite: how many eyes, how many faces each
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubemapLayout {
    pub eyes: u8,
    pub faces_per_eye: u8,
}

impl CubemapLayout {
    pub const MONO: CubemapLayout = CubemapLayout {
        eyes: 1,
        faces_per_eye: MAX_FACES_COUNT,
    };

    pub const STEREO: CubemapLayout = CubemapLayout {
        eyes: 2,
        faces_per_eye: MAX_FACES_COUNT,
    };

    /// Total number of face streams
    #[inline]
    pub fn face_count(&self) -> usize {
        self.eyes as usize * self.faces_per_eye as usize
    }

    pub fn validate(&self) -> CubecastResult<()> {
        if self.eyes == 0 || self.eyes > MAX_EYES_COUNT {
            return Err(CubecastError::InvalidConfig(format!(
                "eyes must be 1..={}, got {}",
                MAX_EYES_COUNT, self.eyes
            )));
        }
        if self.faces_per_eye == 0 || self.faces_per_eye > MAX_FACES_COUNT {
            return Err(CubecastError::InvalidConfig(format!(
                "faces_per_eye must be 1..={}, got {}",
                MAX_FACES_COUNT, self.faces_per_eye
            )));
        }
        Ok(())
    }

    /// All face indices in assembly order (eye-major)
    pub fn faces(&self) -> impl Iterator<Item = FaceIndex> {
        let per_eye = self.faces_per_eye;
        (0..self.eyes).flat_map(move |eye| {
            (0..per_eye).map(move |face| FaceIndex::from_eye_face(EyeIndex(eye), face, per_eye))
        })
    }
}

impl Default for CubemapLayout {
    fn default() -> Self {
        CubemapLayout::MONO
    }
}

/// One face of a cubemap
#[derive(Clone, Debug)]
pub struct CubemapFace {
    /// Composite-wide face index
    pub index: FaceIndex,
    /// Target-resolution pixels
    pub content: Picture,
    /// Wall-clock time at which the face was sampled
    pub sampled_at: WallTime,
}

impl CubemapFace {
    pub fn new(index: FaceIndex, geometry: PictureGeometry) -> Self {
        Self {
            index,
            content: Picture::filled(geometry),
            sampled_at: WallTime::ZERO,
        }
    }
}

/// Cubemap - ordered faces for one eye
#[derive(Clone, Debug)]
pub struct Cubemap {
    faces: Vec<CubemapFace>,
}

impl Cubemap {
    pub fn faces(&self) -> &[CubemapFace] {
        &self.faces
    }

    pub fn faces_mut(&mut self) -> &mut [CubemapFace] {
        &mut self.faces
    }

    pub fn face(&self, i: usize) -> Option<&CubemapFace> {
        self.faces.get(i)
    }

    pub fn faces_count(&self) -> usize {
        self.faces.len()
    }
}

/// StereoCubemap - one (mono) or two (stereo) cubemaps forming a composite
#[derive(Clone, Debug)]
pub struct StereoCubemap {
    /// Buffer identity, stable for the lifetime of the allocation
    id: u64,
    layout: CubemapLayout,
    eyes: Vec<Cubemap>,
}

impl StereoCubemap {
    /// Allocate a composite with every face at `geometry`
    pub fn allocate(id: u64, layout: CubemapLayout, geometry: PictureGeometry) -> Self {
        let eyes = (0..layout.eyes)
            .map(|eye| Cubemap {
                faces: (0..layout.faces_per_eye)
                    .map(|face| {
                        CubemapFace::new(
                            FaceIndex::from_eye_face(EyeIndex(eye), face, layout.faces_per_eye),
                            geometry,
                        )
                    })
                    .collect(),
            })
            .collect();
        Self { id, layout, eyes }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn layout(&self) -> CubemapLayout {
        self.layout
    }

    pub fn eyes_count(&self) -> usize {
        self.eyes.len()
    }

    pub fn eye(&self, eye: EyeIndex) -> Option<&Cubemap> {
        self.eyes.get(eye.as_usize())
    }

    pub fn eyes(&self) -> &[Cubemap] {
        &self.eyes
    }

    /// Face by composite index
    pub fn face(&self, index: FaceIndex) -> Option<&CubemapFace> {
        let (eye, face) = index.split(self.layout.faces_per_eye);
        self.eyes.get(eye.as_usize())?.faces.get(face as usize)
    }

    /// Mutable face by composite index
    pub fn face_mut(&mut self, index: FaceIndex) -> Option<&mut CubemapFace> {
        let (eye, face) = index.split(self.layout.faces_per_eye);
        self.eyes.get_mut(eye.as_usize())?.faces.get_mut(face as usize)
    }

    /// Iterate faces eye-major
    pub fn iter_faces(&self) -> impl Iterator<Item = &CubemapFace> {
        self.eyes.iter().flat_map(|e| e.faces.iter())
    }

    /// Newest sampling time across all faces
    pub fn latest_sample(&self) -> WallTime {
        self.iter_faces()
            .map(|f| f.sampled_at)
            .max()
            .unwrap_or(WallTime::ZERO)
    }
}
