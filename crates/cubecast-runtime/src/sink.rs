//! Raw delivery into face pipelines
//!
//! The frame source writes one unit into the sink's receive buffer and
//! reports completion. The sink offers the unit to its keyframe gate and
//! re-arms the source before returning. Nothing here blocks.

use std::sync::Arc;

use bytes::Bytes;

use cubecast_core::{CubecastResult, EncodedUnit, FaceIndex, PipelineConfig, PresentationTime, StreamId};
use cubecast_decode::{Admission, FaceChannels, KeyframeGate, START_CODE};
use cubecast_session::StreamDescription;

use crate::FaceCounters;

/// FrameSource - delivers raw units of one stream
pub trait FrameSource: Send {
    /// Request delivery of the next unit
    fn arm(&mut self) -> CubecastResult<()>;

    /// Stop delivering
    fn stop(&mut self) {}
}

/// Opens a frame source per set-up stream
pub trait FrameSourceFactory: Send {
    fn open(&mut self, stream: &StreamDescription, face: FaceIndex) -> CubecastResult<Box<dyn FrameSource>>;
}

/// FaceSink - receive buffer, keyframe gate and source of one face
pub struct FaceSink {
    face: FaceIndex,
    stream: StreamId,
    buffer: Vec<u8>,
    gate: KeyframeGate,
    source: Box<dyn FrameSource>,
    counters: Arc<FaceCounters>,
    arrived: bool,
}

impl FaceSink {
    pub fn new(
        stream: StreamId,
        receive_buffer_size: usize,
        mut gate: KeyframeGate,
        source: Box<dyn FrameSource>,
        counters: Arc<FaceCounters>,
    ) -> Self {
        let face = gate.face();
        let observed = Arc::clone(&counters);
        gate.set_observer(Box::new(move |_, kind, admission| observed.record(kind, admission)));
        Self {
            face,
            stream,
            buffer: vec![0u8; receive_buffer_size],
            gate,
            source,
            counters,
            arrived: false,
        }
    }

    /// Arm the source for the first unit
    pub fn start(&mut self) -> CubecastResult<()> {
        self.source.arm()
    }

    /// Buffer the source writes the next unit into
    pub fn receive_buffer(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Completion of one delivery
    pub fn complete(&mut self, bytes_received: usize, truncated: u32, pts: PresentationTime) -> Admission {
        if !self.arrived {
            self.arrived = true;
            tracing::info!(face = %self.face, stream = %self.stream, "data began arriving");
        }
        if truncated > 0 {
            tracing::warn!(
                face = %self.face,
                truncated,
                buffer = self.buffer.len(),
                "unit truncated, receive buffer too small"
            );
        }

        let len = bytes_received.min(self.buffer.len());
        let unit = EncodedUnit::new(Bytes::copy_from_slice(&self.buffer[..len]), pts).with_truncated(truncated);
        let admission = self.gate.on_unit(unit);
        self.rearm();
        admission
    }

    fn rearm(&mut self) {
        self.gate.try_flush_pending();
        self.counters.sync_gate(self.gate.stats(), self.gate.has_pending());
        if let Err(e) = self.source.arm() {
            tracing::warn!(face = %self.face, error = %e, "failed to re-arm frame source");
        }
    }

    /// Forget sync state, for a re-established session
    pub fn reset(&mut self) {
        self.gate.reset();
        self.arrived = false;
        self.counters.sync_gate(self.gate.stats(), false);
    }

    pub fn stop(&mut self) {
        self.source.stop();
    }

    pub fn face(&self) -> FaceIndex {
        self.face
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn gate(&self) -> &KeyframeGate {
        &self.gate
    }

    pub fn counters(&self) -> &Arc<FaceCounters> {
        &self.counters
    }

    pub fn has_arrived(&self) -> bool {
        self.arrived
    }
}

impl std::fmt::Debug for FaceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceSink")
            .field("face", &self.face)
            .field("stream", &self.stream)
            .field("buffer", &self.buffer.len())
            .field("sync", &self.gate.sync_state())
            .field("arrived", &self.arrived)
            .finish()
    }
}

/// Pools of a face sized for its receive buffer
pub fn face_channels(face: FaceIndex, config: &PipelineConfig) -> Arc<FaceChannels> {
    let packet_bytes = START_CODE.len() + config.receive_buffer_size;
    Arc::new(FaceChannels::new(face, &config.pools, packet_bytes, config.pixel_format))
}
