//! Frame sampler
//!
//! Pull side of the decoded-picture queues. `sample_latest` never blocks:
//! it takes a freshly decoded picture if one is queued, rescales it to the
//! target geometry and caches the result; otherwise it hands back the cached
//! result of the previous sample. A face that has never produced a picture
//! yields the format's default fill.

use std::sync::Arc;

use cubecast_core::{CubecastError, CubecastResult, CubemapLayout, FaceIndex, Picture, PictureGeometry};
use cubecast_decode::{FaceChannels, PictureSlot};

use crate::{ImageScaler, ScalerFactory};

/// Per-face sampling counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleStats {
    /// Samples that used a newly decoded picture
    pub fresh: u64,
    /// Samples that reused the previous result
    pub stale: u64,
    pub scaler_builds: u64,
    /// Decoded pictures that could not be rescaled
    pub scale_failures: u64,
}

/// FaceSampler - latest-picture cache for one face
pub struct FaceSampler {
    face: FaceIndex,
    channels: Option<Arc<FaceChannels>>,
    factory: Arc<dyn ScalerFactory>,
    scaler: Option<Box<dyn ImageScaler>>,
    /// Result of the last successful sample
    last: Picture,
    /// Rescale destination, swapped with `last` on success
    scratch: Picture,
    has_sample: bool,
    stats: SampleStats,
}

impl FaceSampler {
    pub fn new(face: FaceIndex, target: PictureGeometry, factory: Arc<dyn ScalerFactory>) -> Self {
        Self {
            face,
            channels: None,
            factory,
            scaler: None,
            last: Picture::filled(target),
            scratch: Picture::filled(target),
            has_sample: false,
            stats: SampleStats::default(),
        }
    }

    /// Start pulling from a face's decode output
    pub fn attach(&mut self, channels: Arc<FaceChannels>) {
        self.channels = Some(channels);
    }

    /// Stop pulling; the cached picture stays
    pub fn detach(&mut self) -> Option<Arc<FaceChannels>> {
        self.channels.take()
    }

    /// Latest picture for this face at the target geometry
    pub fn sample_latest(&mut self) -> &Picture {
        let decoded = self
            .channels
            .as_ref()
            .and_then(|ch| ch.picture_queue.try_pop().ok());

        match decoded {
            Some(picture) => {
                let result = self.rescale(&picture);
                self.recycle(picture);
                match result {
                    Ok(()) => {
                        std::mem::swap(&mut self.last, &mut self.scratch);
                        self.has_sample = true;
                        self.stats.fresh += 1;
                    }
                    Err(e) => {
                        self.stats.scale_failures += 1;
                        self.stats.stale += 1;
                        tracing::warn!(face = %self.face, error = %e, "rescale failed, reusing last picture");
                    }
                }
            }
            None => self.stats.stale += 1,
        }
        &self.last
    }

    fn rescale(&mut self, picture: &Picture) -> CubecastResult<()> {
        let source = picture.geometry();
        let target = self.last.geometry();
        let current = self.scaler.as_ref().map(|s| s.source());

        if current != Some(source) {
            if let Some(previous) = current {
                tracing::info!(face = %self.face, ?previous, ?source, "source geometry changed, rebuilding scaler");
            }
            self.scaler = Some(self.factory.create(source, target)?);
            self.stats.scaler_builds += 1;
        }

        match self.scaler.as_mut() {
            Some(scaler) => scaler.scale(picture, &mut self.scratch),
            None => Err(CubecastError::Allocation("no scaler".into())),
        }
    }

    fn recycle(&self, picture: PictureSlot) {
        if let Some(channels) = &self.channels {
            let _ = channels.picture_pool.release(picture);
        }
    }

    pub fn face(&self) -> FaceIndex {
        self.face
    }

    pub fn is_attached(&self) -> bool {
        self.channels.is_some()
    }

    /// Whether a decoded picture has ever been sampled
    pub fn has_sample(&self) -> bool {
        self.has_sample
    }

    pub fn last(&self) -> &Picture {
        &self.last
    }

    pub fn stats(&self) -> &SampleStats {
        &self.stats
    }
}

impl std::fmt::Debug for FaceSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceSampler")
            .field("face", &self.face)
            .field("attached", &self.is_attached())
            .field("has_sample", &self.has_sample)
            .field("stats", &self.stats)
            .finish()
    }
}

/// FrameSampler - one `FaceSampler` per face of a layout
#[derive(Debug)]
pub struct FrameSampler {
    layout: CubemapLayout,
    target: PictureGeometry,
    faces: Vec<FaceSampler>,
}

impl FrameSampler {
    pub fn new(layout: CubemapLayout, target: PictureGeometry, factory: Arc<dyn ScalerFactory>) -> Self {
        let faces = layout
            .faces()
            .map(|face| FaceSampler::new(face, target, Arc::clone(&factory)))
            .collect();
        Self { layout, target, faces }
    }

    /// Route `face` to the given decode output
    pub fn attach(&mut self, face: FaceIndex, channels: Arc<FaceChannels>) -> CubecastResult<()> {
        self.face_mut(face)?.attach(channels);
        Ok(())
    }

    pub fn detach(&mut self, face: FaceIndex) -> CubecastResult<Option<Arc<FaceChannels>>> {
        Ok(self.face_mut(face)?.detach())
    }

    /// Non-blocking latest picture for `face`
    pub fn sample_latest(&mut self, face: FaceIndex) -> CubecastResult<&Picture> {
        Ok(self.face_mut(face)?.sample_latest())
    }

    pub fn face(&self, face: FaceIndex) -> CubecastResult<&FaceSampler> {
        let faces = self.faces.len();
        self.faces
            .get(face.as_usize())
            .ok_or(CubecastError::FaceOutOfRange { face, faces })
    }

    fn face_mut(&mut self, face: FaceIndex) -> CubecastResult<&mut FaceSampler> {
        let faces = self.faces.len();
        self.faces
            .get_mut(face.as_usize())
            .ok_or(CubecastError::FaceOutOfRange { face, faces })
    }

    pub fn faces(&self) -> &[FaceSampler] {
        &self.faces
    }

    pub fn layout(&self) -> CubemapLayout {
        self.layout
    }

    pub fn target(&self) -> PictureGeometry {
        self.target
    }
}
