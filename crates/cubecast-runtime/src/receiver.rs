//! Cubemap receiver - per-session orchestration
//!
//! Owns everything one session needs: the negotiation state machine, the
//! session client, one face pipeline per set-up stream, the shared frame
//! sampler and the render handoff. Several receivers can run side by side;
//! nothing is process-global.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use cubecast_compose::{
    CubemapAssembler, DisplayConsumer, DisplayObservers, Exchange, FrameSampler, Presenter, RenderHandoff,
    ScalerFactory,
};
use cubecast_core::{
    CubecastError, CubecastResult, FaceIndex, PipelineConfig, PresentationTime, SessionId, StereoCubemap, StreamId,
};
use cubecast_decode::{Admission, DecodeWorker, DecoderFactory, FaceChannels, KeyframeGate};
use cubecast_session::{
    receive_buffer_target, SessionAction, SessionClient, SessionEvent, SessionMachine, SessionState,
};

use crate::{face_channels, FaceCounters, FaceSink, FaceStats, FrameSourceFactory, RuntimeStats};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// External collaborators a receiver is built from
pub struct ReceiverParts {
    pub client: Box<dyn SessionClient>,
    pub sources: Box<dyn FrameSourceFactory>,
    pub decoders: Arc<dyn DecoderFactory>,
    pub scalers: Arc<dyn ScalerFactory>,
}

/// Network and decode side of one face
struct FacePipeline {
    channels: Arc<FaceChannels>,
    sink: FaceSink,
    worker: DecodeWorker,
}

impl FacePipeline {
    fn shutdown(&mut self) {
        self.sink.stop();
        self.channels.close();
        self.worker.shutdown();
    }
}

/// CubemapReceiver - one streaming session from negotiation to composites
pub struct CubemapReceiver {
    config: Arc<PipelineConfig>,
    session: SessionMachine,
    client: Box<dyn SessionClient>,
    sources: Box<dyn FrameSourceFactory>,
    decoders: Arc<dyn DecoderFactory>,
    faces: Vec<Option<FacePipeline>>,
    sampler: Arc<Mutex<FrameSampler>>,
    handoff: Arc<RenderHandoff>,
    /// Failure that ended the session, if any
    last_error: Option<CubecastError>,
}

impl CubemapReceiver {
    pub fn new(config: PipelineConfig, parts: ReceiverParts) -> CubecastResult<Self> {
        config.validate()?;
        let layout = config.layout;
        let geometry = config.face_geometry();
        let id = SessionId::new(NEXT_SESSION.fetch_add(1, Ordering::Relaxed));

        let session = SessionMachine::new(id, layout.face_count(), config.start_time, config.play_scale);
        let sampler = FrameSampler::new(layout, geometry, parts.scalers);
        let handoff = RenderHandoff::new(config.pools.exchange_capacity, layout, geometry);

        tracing::info!(session = %id, url = %config.stream_url, ?layout, resolution = config.face_resolution, "receiver created");
        Ok(Self {
            session,
            client: parts.client,
            sources: parts.sources,
            decoders: parts.decoders,
            faces: (0..layout.face_count()).map(|_| None).collect(),
            sampler: Arc::new(Mutex::new(sampler)),
            handoff: Arc::new(handoff),
            last_error: None,
            config: Arc::new(config),
        })
    }

    /// Begin negotiation
    pub fn start(&mut self) -> CubecastResult<()> {
        self.handle_event(SessionEvent::Start)
    }

    /// Feed one session-client completion
    pub fn handle_event(&mut self, event: SessionEvent) -> CubecastResult<()> {
        let mut events = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            for action in self.session.handle(event)? {
                // a follow-up reports a failure or teardown and ends the batch
                if let Some(follow_up) = self.perform(action) {
                    events.push_back(follow_up);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Completion of a raw delivery into `face`'s receive buffer
    pub fn on_frame(
        &mut self,
        face: FaceIndex,
        bytes_received: usize,
        truncated: u32,
        pts: PresentationTime,
    ) -> CubecastResult<Admission> {
        let faces = self.faces.len();
        let pipeline = self
            .faces
            .get_mut(face.as_usize())
            .and_then(Option::as_mut)
            .ok_or(CubecastError::FaceOutOfRange { face, faces })?;
        Ok(pipeline.sink.complete(bytes_received, truncated, pts))
    }

    /// Sink of an open face, for the frame source to write into
    pub fn sink_mut(&mut self, face: FaceIndex) -> Option<&mut FaceSink> {
        self.faces
            .get_mut(face.as_usize())
            .and_then(Option::as_mut)
            .map(|p| &mut p.sink)
    }

    /// Close every face and tear the session down
    pub fn shutdown(&mut self) -> CubecastResult<()> {
        let result = self.handle_event(SessionEvent::Shutdown);
        for face in 0..self.faces.len() {
            self.close_face(FaceIndex(face as u8));
        }
        self.handoff.close();
        result
    }

    /// Carry out one action; returns the event that reports its failure
    fn perform(&mut self, action: SessionAction) -> Option<SessionEvent> {
        match action {
            SessionAction::SendCapabilities => self
                .client
                .send_capabilities_request()
                .err()
                .map(|e| SessionEvent::CapabilitiesReady(Err(e.to_string()))),
            SessionAction::SendDescribe => self
                .client
                .send_describe()
                .err()
                .map(|e| SessionEvent::DescribeReady(Err(e.to_string()))),
            SessionAction::ConfigureReceiveBuffer(stream) => {
                self.configure_receive_buffer(stream);
                None
            }
            SessionAction::SendSetup(stream) => self.client.send_setup(&stream).err().map(|e| {
                SessionEvent::SetupReady {
                    stream: stream.id,
                    result: Err(e.to_string()),
                }
            }),
            SessionAction::OpenFace { face, stream } => match self.open_face(face, stream) {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(face = %face, stream = %stream, error = %e, "failed to open face pipeline");
                    self.last_error = Some(e);
                    Some(SessionEvent::Shutdown)
                }
            },
            SessionAction::SendPlay { range, scale } => self
                .client
                .send_play(self.session.id(), &range, scale)
                .err()
                .map(|e| SessionEvent::PlayReady(Err(e.to_string()))),
            SessionAction::Playing => {
                tracing::info!(session = %self.session.id(), faces = self.open_faces(), "data is being streamed");
                None
            }
            SessionAction::CloseFace { face, .. } => {
                self.close_face(face);
                None
            }
            SessionAction::Teardown { error } => {
                if let Some(error) = error {
                    self.last_error = Some(error);
                }
                if let Err(e) = self.client.send_teardown(self.session.id()) {
                    tracing::warn!(session = %self.session.id(), error = %e, "teardown request failed");
                }
                Some(SessionEvent::TeardownComplete)
            }
            SessionAction::Closed => {
                tracing::info!(session = %self.session.id(), "session closed");
                self.handoff.close();
                None
            }
        }
    }

    fn configure_receive_buffer(&mut self, stream: StreamId) {
        let current = self.client.receive_buffer_size(stream);
        let Some(target) = receive_buffer_target(
            self.config.socket_buffer_override,
            self.config.receive_buffer_size,
            current,
        ) else {
            return;
        };
        let granted = self.client.set_receive_buffer_size(stream, target);
        if self.config.socket_buffer_override > 0 {
            tracing::info!(stream = %stream, from = current, to = granted, "changed socket receive buffer size");
        } else {
            tracing::debug!(stream = %stream, from = current, to = granted, "raised socket receive buffer size");
        }
    }

    fn open_face(&mut self, face: FaceIndex, stream: StreamId) -> CubecastResult<()> {
        let faces = self.faces.len();
        if face.as_usize() >= faces {
            return Err(CubecastError::FaceOutOfRange { face, faces });
        }
        let description = self
            .session
            .description()
            .and_then(|d| d.stream(stream))
            .cloned()
            .ok_or(CubecastError::UnknownStream(stream))?;

        let channels = face_channels(face, &self.config);
        let decoder = self.decoders.create(face)?;
        let worker = DecodeWorker::spawn(Arc::clone(&channels), decoder)?;
        let source = self.sources.open(&description, face)?;
        let gate = KeyframeGate::new(Arc::clone(&channels), self.config.pending_keyframe);
        let mut sink = FaceSink::new(
            stream,
            self.config.receive_buffer_size,
            gate,
            source,
            Arc::new(FaceCounters::default()),
        );

        self.sampler.lock().attach(face, Arc::clone(&channels))?;
        let started = sink.start();
        self.faces[face.as_usize()] = Some(FacePipeline { channels, sink, worker });
        started?;

        tracing::info!(face = %face, stream = %stream, kind = %description.label(), "face pipeline opened");
        Ok(())
    }

    fn close_face(&mut self, face: FaceIndex) {
        let Some(mut pipeline) = self.faces.get_mut(face.as_usize()).and_then(Option::take) else {
            return;
        };
        pipeline.shutdown();
        // the face keeps showing its last picture
        let _ = self.sampler.lock().detach(face);
        tracing::info!(face = %face, stream = %pipeline.sink.stream(), "face pipeline closed");
    }

    /// Build the assembly driver. Only one compositor can exist per receiver.
    pub fn compositor(&self) -> CubecastResult<Compositor> {
        let write = self
            .handoff
            .take_write_buffer()
            .ok_or_else(|| CubecastError::Allocation("compositor already created".into()))?;
        Ok(Compositor {
            sampler: Arc::clone(&self.sampler),
            assembler: CubemapAssembler::new(self.config.layout, self.config.face_geometry()),
            handoff: Arc::clone(&self.handoff),
            write: Some(write),
        })
    }

    /// Start a display consumer on its own thread
    pub fn spawn_display(
        &self,
        presenter: Box<dyn Presenter>,
        observers: DisplayObservers,
    ) -> CubecastResult<DisplayConsumer> {
        DisplayConsumer::spawn(Arc::clone(&self.handoff), presenter, observers)
    }

    pub fn stats(&self) -> RuntimeStats {
        let faces = self
            .faces
            .iter()
            .flatten()
            .map(|p| {
                FaceStats::collect(
                    p.sink.face(),
                    p.sink.stream(),
                    p.sink.counters(),
                    &p.worker.stats(),
                )
            })
            .collect();
        RuntimeStats {
            session: self.session.state().to_string(),
            faces,
            exchange: self.handoff.stats().into(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn config(&self) -> &Arc<PipelineConfig> {
        &self.config
    }

    pub fn handoff(&self) -> &Arc<RenderHandoff> {
        &self.handoff
    }

    pub fn open_faces(&self) -> usize {
        self.faces.iter().flatten().count()
    }

    /// Decode-side channels of an open face
    pub fn channels(&self, face: FaceIndex) -> Option<&Arc<FaceChannels>> {
        self.faces
            .get(face.as_usize())
            .and_then(Option::as_ref)
            .map(|p| &p.channels)
    }

    pub fn last_error(&self) -> Option<&CubecastError> {
        self.last_error.as_ref()
    }
}

impl Drop for CubemapReceiver {
    fn drop(&mut self) {
        for face in 0..self.faces.len() {
            self.close_face(FaceIndex(face as u8));
        }
        self.handoff.close();
    }
}

impl std::fmt::Debug for CubemapReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CubemapReceiver")
            .field("session", &self.session.id())
            .field("state", &self.session.state())
            .field("open_faces", &self.open_faces())
            .field("handoff", &self.handoff)
            .finish()
    }
}

/// Compositor - assembles composites and hands them to the display
pub struct Compositor {
    sampler: Arc<Mutex<FrameSampler>>,
    assembler: CubemapAssembler,
    handoff: Arc<RenderHandoff>,
    write: Option<StereoCubemap>,
}

impl Compositor {
    /// Assemble one composite and offer it to the display.
    /// Returns `false` once the handoff is shut down.
    pub fn compose(&mut self) -> CubecastResult<bool> {
        let Some(mut composite) = self.write.take() else {
            return Ok(false);
        };
        let assembled = {
            let mut sampler = self.sampler.lock();
            self.assembler.assemble(&mut sampler, &mut composite)
        };
        if let Err(e) = assembled {
            self.write = Some(composite);
            return Err(e);
        }

        match self.handoff.exchange(composite) {
            Exchange::Swapped(next) | Exchange::Kept(next) => {
                self.write = Some(next);
                Ok(true)
            }
            Exchange::Closed => {
                tracing::debug!("render handoff closed, compositor stopping");
                Ok(false)
            }
        }
    }

    /// Composite currently being written
    pub fn current(&self) -> Option<&StereoCubemap> {
        self.write.as_ref()
    }

    pub fn cycles(&self) -> u64 {
        self.assembler.cycles()
    }
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("assembler", &self.assembler)
            .field("writing", &self.write.as_ref().map(|c| c.id()))
            .finish()
    }
}
