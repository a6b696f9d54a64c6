//! Cubemap assembler
//!
//! Driven by the caller's cadence (typically once per render tick). Every
//! call samples each face once and rewrites the faces of the composite in
//! place; it never waits on decoding.

use cubecast_core::{CubecastError, CubecastResult, CubemapLayout, PictureGeometry, StereoCubemap, WallTime};

use crate::FrameSampler;

/// CubemapAssembler - fills composites from a `FrameSampler`
#[derive(Debug)]
pub struct CubemapAssembler {
    layout: CubemapLayout,
    geometry: PictureGeometry,
    /// Completed assembly cycles
    cycles: u64,
}

impl CubemapAssembler {
    pub fn new(layout: CubemapLayout, geometry: PictureGeometry) -> Self {
        Self {
            layout,
            geometry,
            cycles: 0,
        }
    }

    /// Allocate a composite shaped for this assembler
    pub fn allocate(&self, id: u64) -> StereoCubemap {
        StereoCubemap::allocate(id, self.layout, self.geometry)
    }

    /// Sample every face into `composite`, eye-major
    pub fn assemble(&mut self, sampler: &mut FrameSampler, composite: &mut StereoCubemap) -> CubecastResult<()> {
        if composite.layout() != self.layout {
            return Err(CubecastError::InvalidConfig(format!(
                "composite layout {:?} does not match assembler layout {:?}",
                composite.layout(),
                self.layout
            )));
        }

        let faces = self.layout.face_count();
        for index in self.layout.faces() {
            let sampled_at = WallTime::now();
            let picture = sampler.sample_latest(index)?;
            let face = composite
                .face_mut(index)
                .ok_or(CubecastError::FaceOutOfRange { face: index, faces })?;
            face.content.copy_from(picture)?;
            face.sampled_at = sampled_at;
        }

        self.cycles += 1;
        tracing::trace!(composite = composite.id(), cycle = self.cycles, "composite assembled");
        Ok(())
    }

    pub fn layout(&self) -> CubemapLayout {
        self.layout
    }

    pub fn geometry(&self) -> PictureGeometry {
        self.geometry
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NearestScalerFactory;
    use cubecast_core::{FaceIndex, PixelFormat, PoolConfig};
    use cubecast_decode::FaceChannels;
    use std::sync::Arc;

    fn setup(layout: CubemapLayout) -> (FrameSampler, CubemapAssembler, Vec<Arc<FaceChannels>>) {
        let geometry = PictureGeometry::square(2, PixelFormat::Gray8);
        let mut sampler = FrameSampler::new(layout, geometry, Arc::new(NearestScalerFactory));
        let pools = PoolConfig::default();
        let channels: Vec<_> = layout
            .faces()
            .map(|face| Arc::new(FaceChannels::new(face, &pools, 16, PixelFormat::Gray8)))
            .collect();
        for ch in &channels {
            sampler.attach(ch.face, Arc::clone(ch)).unwrap();
        }
        (sampler, CubemapAssembler::new(layout, geometry), channels)
    }

    fn publish(ch: &FaceChannels, value: u8) {
        let mut slot = ch.picture_pool.try_acquire().unwrap();
        slot.reshape(PictureGeometry::square(2, PixelFormat::Gray8));
        slot.data_mut().fill(value);
        ch.picture_queue.push(slot).unwrap();
    }

    #[test]
    fn test_assemble_stereo_faces_in_order() {
        let layout = CubemapLayout::STEREO;
        let (mut sampler, mut assembler, channels) = setup(layout);
        for (i, ch) in channels.iter().enumerate() {
            publish(ch, i as u8 + 1);
        }

        let mut composite = assembler.allocate(7);
        let before = WallTime::now();
        assembler.assemble(&mut sampler, &mut composite).unwrap();

        assert_eq!(composite.eyes_count(), 2);
        for (i, face) in composite.iter_faces().enumerate() {
            assert_eq!(face.index, FaceIndex(i as u8));
            assert_eq!(face.content.data(), &[i as u8 + 1; 4]);
            assert!(face.sampled_at >= before);
        }
        assert_eq!(assembler.cycles(), 1);
    }

    #[test]
    fn test_partial_faces_keep_previous_content() {
        let layout = CubemapLayout { eyes: 1, faces_per_eye: 3 };
        let (mut sampler, mut assembler, channels) = setup(layout);
        for ch in &channels {
            publish(ch, 5);
        }
        let mut composite = assembler.allocate(0);
        assembler.assemble(&mut sampler, &mut composite).unwrap();

        // only face 1 decodes again
        publish(&channels[1], 8);
        assembler.assemble(&mut sampler, &mut composite).unwrap();
        let values: Vec<u8> = composite.iter_faces().map(|f| f.content.data()[0]).collect();
        assert_eq!(values, vec![5, 8, 5]);
    }

    #[test]
    fn test_layout_mismatch_rejected() {
        let (mut sampler, mut assembler, _channels) = setup(CubemapLayout::MONO);
        let mut composite =
            StereoCubemap::allocate(0, CubemapLayout::STEREO, PictureGeometry::square(2, PixelFormat::Gray8));
        assert!(assembler.assemble(&mut sampler, &mut composite).is_err());
        assert_eq!(assembler.cycles(), 0);
    }
}
