//! Video decoder seam
//!
//! Bitstream decoding happens behind `VideoDecoder`. One instance is built
//! per face and lives on that face's decode worker thread.

use cubecast_core::{CubecastResult, FaceIndex, Picture};

use crate::EncodedPacket;

/// Result of submitting one packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// `picture` now holds a complete decoded picture
    Picture,
    /// The packet was consumed without completing a picture
    NoPicture,
}

/// VideoDecoder - synchronous packet-to-picture decode
pub trait VideoDecoder: Send {
    /// Decode `packet` into `picture`.
    ///
    /// The decoder may reshape `picture` to the stream's geometry. An `Err`
    /// is treated like `NoPicture`: the face continues with the next packet.
    fn decode(&mut self, packet: &EncodedPacket, picture: &mut Picture) -> CubecastResult<DecodeOutcome>;

    /// Short name for logs
    fn name(&self) -> &str {
        "decoder"
    }
}

impl<D: VideoDecoder + ?Sized> VideoDecoder for Box<D> {
    fn decode(&mut self, packet: &EncodedPacket, picture: &mut Picture) -> CubecastResult<DecodeOutcome> {
        (**self).decode(packet, picture)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Builds one decoder per face
pub trait DecoderFactory: Send + Sync {
    fn create(&self, face: FaceIndex) -> CubecastResult<Box<dyn VideoDecoder>>;
}

impl<F> DecoderFactory for F
where
    F: Fn(FaceIndex) -> CubecastResult<Box<dyn VideoDecoder>> + Send + Sync,
{
    fn create(&self, face: FaceIndex) -> CubecastResult<Box<dyn VideoDecoder>> {
        self(face)
    }
}
