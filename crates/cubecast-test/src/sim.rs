//! Simulated collaborators
//!
//! Scripted stand-ins for everything a `CubemapReceiver` talks to: the
//! bitstream decoder, the session-protocol client and the frame sources.
//! Each one records what it was asked to do in a shared log the test thread
//! can inspect while the pipeline runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use cubecast_compose::NearestScalerFactory;
use cubecast_core::{
    CubecastError, CubecastResult, CubemapLayout, FaceIndex, Picture, PictureGeometry, PipelineConfig, PixelFormat,
    PresentationTime, SessionId, StreamId, UnitKind,
};
use cubecast_decode::{Admission, DecodeOutcome, DecoderFactory, EncodedPacket, VideoDecoder};
use cubecast_runtime::{CubemapReceiver, FrameSource, FrameSourceFactory, ReceiverParts};
use cubecast_session::{PlayRange, SessionClient, SessionDescription, SessionEvent, SessionState, StreamDescription};

/// NAL header byte of a sequence parameter set
pub const KEYFRAME_HEADER: u8 = 0x67;

/// NAL header byte of a non-IDR slice
pub const DEPENDENT_HEADER: u8 = 0x41;

/// Tag the simulated decoder rejects
pub const CORRUPT_TAG: u8 = 0xFF;

/// Longest a latched decoder waits before decoding anyway
pub const LATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Keyframe unit carrying `tag`
pub fn keyframe(tag: u8) -> Vec<u8> {
    vec![KEYFRAME_HEADER, tag]
}

/// Dependent unit carrying `tag`
pub fn dependent(tag: u8) -> Vec<u8> {
    vec![DEPENDENT_HEADER, tag]
}

/// Poll `cond` every millisecond until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Receiver configuration for simulated runs: gray faces, small buffers
pub fn sim_config(layout: CubemapLayout, face_resolution: u32) -> PipelineConfig {
    let mut config = PipelineConfig::for_url("rtsp://sim.local:8554/cubemap");
    config.layout = layout;
    config.face_resolution = face_resolution;
    config.pixel_format = PixelFormat::Gray8;
    config.receive_buffer_size = 64;
    config
}

/// `faces` receivable H.264 streams, plus an audio stream and a video
/// stream without a client port that must both be skipped
pub fn cube_description(faces: u32) -> SessionDescription {
    let mut streams: Vec<StreamDescription> = (0..faces)
        .map(|i| StreamDescription::h264(StreamId(i + 1), 5000 + 2 * i as u16))
        .collect();
    streams.insert(0, StreamDescription::new(StreamId(100), "audio", "MPEG4-GENERIC", 4000));
    streams.push(StreamDescription::h264(StreamId(101), 0));
    SessionDescription::new(streams)
}

// ============================================================================
// DECODER
// ============================================================================

/// Latch - counted permits a decoder waits on before each packet
#[derive(Clone, Default)]
pub struct Latch {
    inner: Arc<(Mutex<LatchState>, Condvar)>,
}

#[derive(Default)]
struct LatchState {
    permits: u64,
    open: bool,
    waiting: usize,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `n` more decodes through
    pub fn release(&self, n: u64) {
        let (lock, cvar) = &*self.inner;
        lock.lock().permits += n;
        cvar.notify_all();
    }

    /// Let every decode through from now on
    pub fn open(&self) {
        let (lock, cvar) = &*self.inner;
        lock.lock().open = true;
        cvar.notify_all();
    }

    /// Threads currently held
    pub fn waiting(&self) -> usize {
        self.inner.0.lock().waiting
    }

    /// Take one permit, waiting at most `timeout`. Returns whether one was granted.
    pub fn acquire(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut state = lock.lock();
        state.waiting += 1;
        let granted = loop {
            if state.open {
                break true;
            }
            if state.permits > 0 {
                state.permits -= 1;
                break true;
            }
            if cvar.wait_until(&mut state, deadline).timed_out() {
                break false;
            }
        };
        state.waiting -= 1;
        granted
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.0.lock();
        f.debug_struct("Latch")
            .field("permits", &state.permits)
            .field("open", &state.open)
            .field("waiting", &state.waiting)
            .finish()
    }
}

/// One packet as the decoder saw it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedUnit {
    pub face: FaceIndex,
    pub kind: UnitKind,
    pub tag: Option<u8>,
    pub pts: PresentationTime,
    pub sequence: u64,
}

/// Every packet handed to any simulated decoder, in decode order
#[derive(Clone, Debug, Default)]
pub struct DecodeLog(Arc<Mutex<Vec<DecodedUnit>>>);

impl DecodeLog {
    fn push(&self, unit: DecodedUnit) {
        self.0.lock().push(unit);
    }

    pub fn units(&self) -> Vec<DecodedUnit> {
        self.0.lock().clone()
    }

    pub fn for_face(&self, face: FaceIndex) -> Vec<DecodedUnit> {
        self.0.lock().iter().filter(|u| u.face == face).copied().collect()
    }

    /// Tags decoded for `face`, in order
    pub fn tags(&self, face: FaceIndex) -> Vec<u8> {
        self.for_face(face).iter().filter_map(|u| u.tag).collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// TagDecoder - turns `[header, tag, ..]` into a square gray picture filled with `tag`
///
/// Units shorter than two bytes complete no picture; `CORRUPT_TAG` is
/// rejected as a decode error.
#[derive(Debug)]
pub struct TagDecoder {
    face: FaceIndex,
    size: u32,
    latch: Option<Latch>,
    log: DecodeLog,
}

impl VideoDecoder for TagDecoder {
    fn decode(&mut self, packet: &EncodedPacket, picture: &mut Picture) -> CubecastResult<DecodeOutcome> {
        if let Some(latch) = &self.latch {
            if !latch.acquire(LATCH_TIMEOUT) {
                tracing::warn!(face = %self.face, "decode latch timed out");
            }
        }

        let tag = packet.payload().get(1).copied();
        self.log.push(DecodedUnit {
            face: self.face,
            kind: packet.kind(),
            tag,
            pts: packet.pts(),
            sequence: packet.sequence(),
        });

        match tag {
            None => Ok(DecodeOutcome::NoPicture),
            Some(CORRUPT_TAG) => Err(CubecastError::Decode(format!("corrupt unit {}", packet.sequence()))),
            Some(tag) => {
                let geometry = PictureGeometry::square(self.size, PixelFormat::Gray8);
                if picture.geometry() != geometry {
                    picture.reshape(geometry);
                }
                picture.data_mut().fill(tag);
                Ok(DecodeOutcome::Picture)
            }
        }
    }

    fn name(&self) -> &str {
        "tag"
    }
}

/// Builds a `TagDecoder` per face, all sharing one log and latch
#[derive(Clone, Debug)]
pub struct TagDecoders {
    size: u32,
    latch: Option<Latch>,
    log: DecodeLog,
}

impl TagDecoders {
    /// Decoders producing `size` x `size` pictures
    pub fn new(size: u32) -> Self {
        Self {
            size,
            latch: None,
            log: DecodeLog::default(),
        }
    }

    /// Hold every decode until the latch grants a permit
    pub fn with_latch(mut self, latch: Latch) -> Self {
        self.latch = Some(latch);
        self
    }

    pub fn decoder(&self, face: FaceIndex) -> TagDecoder {
        TagDecoder {
            face,
            size: self.size,
            latch: self.latch.clone(),
            log: self.log.clone(),
        }
    }

    pub fn log(&self) -> DecodeLog {
        self.log.clone()
    }
}

impl DecoderFactory for TagDecoders {
    fn create(&self, face: FaceIndex) -> CubecastResult<Box<dyn VideoDecoder>> {
        Ok(Box::new(self.decoder(face)))
    }
}

// ============================================================================
// SESSION CLIENT
// ============================================================================

/// Request kinds, for scripting failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Capabilities,
    Describe,
    Setup,
    Play,
    Teardown,
}

/// One request the receiver issued
#[derive(Clone, Debug, PartialEq)]
pub enum ClientRequest {
    Capabilities,
    Describe,
    Setup(StreamId),
    Play {
        session: SessionId,
        range: PlayRange,
        scale: f32,
    },
    Teardown(SessionId),
    ReceiveBuffer {
        stream: StreamId,
        bytes: usize,
    },
}

impl ClientRequest {
    pub fn kind(&self) -> Option<RequestKind> {
        match self {
            ClientRequest::Capabilities => Some(RequestKind::Capabilities),
            ClientRequest::Describe => Some(RequestKind::Describe),
            ClientRequest::Setup(_) => Some(RequestKind::Setup),
            ClientRequest::Play { .. } => Some(RequestKind::Play),
            ClientRequest::Teardown(_) => Some(RequestKind::Teardown),
            ClientRequest::ReceiveBuffer { .. } => None,
        }
    }
}

/// Requests issued to a `ScriptedClient`, in order
#[derive(Clone, Debug, Default)]
pub struct ClientLog(Arc<Mutex<Vec<ClientRequest>>>);

impl ClientLog {
    pub fn requests(&self) -> Vec<ClientRequest> {
        self.0.lock().clone()
    }

    pub fn count(&self, kind: RequestKind) -> usize {
        self.0.lock().iter().filter(|r| r.kind() == Some(kind)).count()
    }

    /// Streams set up, in request order
    pub fn setups(&self) -> Vec<StreamId> {
        self.0
            .lock()
            .iter()
            .filter_map(|r| match r {
                ClientRequest::Setup(stream) => Some(*stream),
                _ => None,
            })
            .collect()
    }

    /// Socket buffer sizes requested, per stream
    pub fn receive_buffers(&self) -> HashMap<StreamId, usize> {
        self.0
            .lock()
            .iter()
            .filter_map(|r| match r {
                ClientRequest::ReceiveBuffer { stream, bytes } => Some((*stream, *bytes)),
                _ => None,
            })
            .collect()
    }
}

/// ScriptedClient - records requests and fails the ones it is told to
#[derive(Debug)]
pub struct ScriptedClient {
    log: ClientLog,
    socket_buffer: usize,
    granted: HashMap<StreamId, usize>,
    failing: Vec<RequestKind>,
}

impl ScriptedClient {
    /// Sockets start with `socket_buffer` bytes of receive buffer
    pub fn new(socket_buffer: usize) -> Self {
        Self {
            log: ClientLog::default(),
            socket_buffer,
            granted: HashMap::new(),
            failing: Vec::new(),
        }
    }

    /// Make every request of `kind` fail to send
    pub fn failing(mut self, kind: RequestKind) -> Self {
        self.failing.push(kind);
        self
    }

    pub fn log(&self) -> ClientLog {
        self.log.clone()
    }

    fn record(&mut self, request: ClientRequest) -> CubecastResult<()> {
        let kind = request.kind();
        self.log.0.lock().push(request);
        match kind {
            Some(kind) if self.failing.contains(&kind) => {
                Err(CubecastError::Io(format!("{:?} request refused", kind)))
            }
            _ => Ok(()),
        }
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new(212_992)
    }
}

impl SessionClient for ScriptedClient {
    fn send_capabilities_request(&mut self) -> CubecastResult<()> {
        self.record(ClientRequest::Capabilities)
    }

    fn send_describe(&mut self) -> CubecastResult<()> {
        self.record(ClientRequest::Describe)
    }

    fn send_setup(&mut self, stream: &StreamDescription) -> CubecastResult<()> {
        self.record(ClientRequest::Setup(stream.id))
    }

    fn send_play(&mut self, session: SessionId, range: &PlayRange, scale: f32) -> CubecastResult<()> {
        self.record(ClientRequest::Play {
            session,
            range: range.clone(),
            scale,
        })
    }

    fn send_teardown(&mut self, session: SessionId) -> CubecastResult<()> {
        self.record(ClientRequest::Teardown(session))
    }

    fn receive_buffer_size(&self, stream: StreamId) -> usize {
        self.granted.get(&stream).copied().unwrap_or(self.socket_buffer)
    }

    fn set_receive_buffer_size(&mut self, stream: StreamId, bytes: usize) -> usize {
        self.log.0.lock().push(ClientRequest::ReceiveBuffer { stream, bytes });
        self.granted.insert(stream, bytes);
        bytes
    }
}

// ============================================================================
// FRAME SOURCES
// ============================================================================

/// What the frame sources were asked to do
#[derive(Debug, Default)]
pub struct SourceState {
    pub opened: Vec<(FaceIndex, StreamId)>,
    pub arms: HashMap<FaceIndex, usize>,
    pub stopped: Vec<FaceIndex>,
}

#[derive(Clone, Debug, Default)]
pub struct SourceLog(Arc<Mutex<SourceState>>);

impl SourceLog {
    pub fn opened(&self) -> Vec<(FaceIndex, StreamId)> {
        self.0.lock().opened.clone()
    }

    /// Times the source of `face` was armed
    pub fn arms(&self, face: FaceIndex) -> usize {
        self.0.lock().arms.get(&face).copied().unwrap_or(0)
    }

    pub fn is_stopped(&self, face: FaceIndex) -> bool {
        self.0.lock().stopped.contains(&face)
    }
}

struct ScriptedSource {
    face: FaceIndex,
    log: SourceLog,
}

impl FrameSource for ScriptedSource {
    fn arm(&mut self) -> CubecastResult<()> {
        *self.log.0.lock().arms.entry(self.face).or_default() += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.log.0.lock().stopped.push(self.face);
    }
}

/// ScriptedSources - opens a recording frame source per face
#[derive(Debug, Default)]
pub struct ScriptedSources {
    log: SourceLog,
    failing: Option<FaceIndex>,
}

impl ScriptedSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to open the source of `face`
    pub fn failing(mut self, face: FaceIndex) -> Self {
        self.failing = Some(face);
        self
    }

    pub fn log(&self) -> SourceLog {
        self.log.clone()
    }
}

impl FrameSourceFactory for ScriptedSources {
    fn open(&mut self, stream: &StreamDescription, face: FaceIndex) -> CubecastResult<Box<dyn FrameSource>> {
        if self.failing == Some(face) {
            return Err(CubecastError::Io(format!("no socket for stream {}", stream.id)));
        }
        self.log.0.lock().opened.push((face, stream.id));
        Ok(Box::new(ScriptedSource {
            face,
            log: self.log.clone(),
        }))
    }
}

// ============================================================================
// RECEIVER DRIVER
// ============================================================================

/// SimReceiver - a `CubemapReceiver` wired to simulated collaborators
pub struct SimReceiver {
    pub receiver: CubemapReceiver,
    pub client: ClientLog,
    pub sources: SourceLog,
    pub decodes: DecodeLog,
}

impl SimReceiver {
    /// Receiver with default collaborators; pictures are decoded at face resolution
    pub fn new(config: PipelineConfig) -> CubecastResult<Self> {
        let decoders = TagDecoders::new(config.face_resolution);
        Self::build(config, decoders, ScriptedClient::default(), ScriptedSources::new())
    }

    pub fn build(
        config: PipelineConfig,
        decoders: TagDecoders,
        client: ScriptedClient,
        sources: ScriptedSources,
    ) -> CubecastResult<Self> {
        let client_log = client.log();
        let source_log = sources.log();
        let decodes = decoders.log();
        let receiver = CubemapReceiver::new(
            config,
            ReceiverParts {
                client: Box::new(client),
                sources: Box::new(sources),
                decoders: Arc::new(decoders),
                scalers: Arc::new(NearestScalerFactory),
            },
        )?;
        Ok(Self {
            receiver,
            client: client_log,
            sources: source_log,
            decodes,
        })
    }

    /// Answer every request successfully until the session plays or ends
    pub fn negotiate(&mut self, description: SessionDescription) -> CubecastResult<SessionState> {
        loop {
            let event = match self.receiver.state() {
                SessionState::Idle => SessionEvent::Start,
                SessionState::CapabilitiesPending => SessionEvent::CapabilitiesReady(Ok(())),
                SessionState::DescribePending => SessionEvent::DescribeReady(Ok(description.clone())),
                SessionState::SetupPending { stream } => SessionEvent::SetupReady { stream, result: Ok(()) },
                SessionState::PlayPending => SessionEvent::PlayReady(Ok(())),
                state => return Ok(state),
            };
            self.receiver.handle_event(event)?;
        }
    }

    /// Write `payload` into the receive buffer of `face` and complete the delivery
    pub fn deliver(&mut self, face: FaceIndex, payload: &[u8], pts: PresentationTime) -> CubecastResult<Admission> {
        let faces = self.receiver.config().layout.face_count();
        let sink = self
            .receiver
            .sink_mut(face)
            .ok_or(CubecastError::FaceOutOfRange { face, faces })?;
        let buffer = sink.receive_buffer();
        let len = payload.len().min(buffer.len());
        buffer[..len].copy_from_slice(&payload[..len]);
        let truncated = (payload.len() - len) as u32;
        self.receiver.on_frame(face, len, truncated, pts)
    }
}

impl std::fmt::Debug for SimReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimReceiver")
            .field("receiver", &self.receiver)
            .field("decoded", &self.decodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_permits() {
        let latch = Latch::new();
        assert!(!latch.acquire(Duration::from_millis(5)));
        latch.release(2);
        assert!(latch.acquire(Duration::from_millis(5)));
        assert!(latch.acquire(Duration::from_millis(5)));
        assert!(!latch.acquire(Duration::from_millis(5)));
        latch.open();
        assert!(latch.acquire(Duration::from_millis(5)));
        assert_eq!(latch.waiting(), 0);
    }

    #[test]
    fn test_latch_wakes_waiter() {
        let latch = Latch::new();
        let held = latch.clone();
        let waiter = std::thread::spawn(move || held.acquire(Duration::from_secs(5)));
        assert!(wait_until(Duration::from_secs(5), || latch.waiting() == 1));
        latch.release(1);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_cube_description_filters() {
        let description = cube_description(6);
        assert_eq!(description.streams.len(), 8);
        assert_eq!(description.receivable().count(), 6);
    }

    #[test]
    fn test_scripted_client_failures() {
        let mut client = ScriptedClient::default().failing(RequestKind::Play);
        let log = client.log();
        assert!(client.send_describe().is_ok());
        let range = PlayRange::Relative { start: 0.0, end: None };
        assert!(client.send_play(SessionId(1), &range, 1.0).is_err());
        assert_eq!(client.set_receive_buffer_size(StreamId(1), 1 << 20), 1 << 20);
        assert_eq!(client.receive_buffer_size(StreamId(1)), 1 << 20);
        assert_eq!(client.receive_buffer_size(StreamId(2)), 212_992);
        assert_eq!(log.count(RequestKind::Play), 1);
        assert_eq!(log.receive_buffers().get(&StreamId(1)), Some(&(1 << 20)));
    }
}
