//! Session negotiation state machine
//!
//! ```text
//! Idle -> CapabilitiesPending -> DescribePending -> SetupPending(s1..sn)
//!      -> PlayPending -> Playing -> Closed
//!                  any failure / Shutdown -> Closing -> Closed
//! ```
//!
//! Every negotiation failure is fatal to the session: open faces are closed
//! and the session is torn down. Nothing is retried.

use std::collections::BTreeSet;

use cubecast_core::{CubecastError, CubecastResult, FaceIndex, NegotiationStage, SessionId, StreamId};

use crate::{PlayRange, SessionDescription, StreamDescription};

/// Negotiation state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CapabilitiesPending,
    DescribePending,
    /// Waiting for the setup of one stream
    SetupPending { stream: StreamId },
    PlayPending,
    Playing,
    /// Teardown requested, waiting for it to complete
    Closing,
    Closed,
}

impl SessionState {
    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::CapabilitiesPending => f.write_str("capabilities-pending"),
            SessionState::DescribePending => f.write_str("describe-pending"),
            SessionState::SetupPending { stream } => write!(f, "setup-pending({})", stream),
            SessionState::PlayPending => f.write_str("play-pending"),
            SessionState::Playing => f.write_str("playing"),
            SessionState::Closing => f.write_str("closing"),
            SessionState::Closed => f.write_str("closed"),
        }
    }
}

/// Completions and commands fed to the machine
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Start,
    CapabilitiesReady(Result<(), String>),
    DescribeReady(Result<SessionDescription, String>),
    SetupReady { stream: StreamId, result: Result<(), String> },
    PlayReady(Result<(), String>),
    /// End of stream or goodbye from the sender
    StreamClosed(StreamId),
    Shutdown,
    TeardownComplete,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Start => "start",
            SessionEvent::CapabilitiesReady(_) => "capabilities-ready",
            SessionEvent::DescribeReady(_) => "describe-ready",
            SessionEvent::SetupReady { .. } => "setup-ready",
            SessionEvent::PlayReady(_) => "play-ready",
            SessionEvent::StreamClosed(_) => "stream-closed",
            SessionEvent::Shutdown => "shutdown",
            SessionEvent::TeardownComplete => "teardown-complete",
        }
    }
}

/// What the orchestrator must do next
#[derive(Clone, Debug, PartialEq)]
pub enum SessionAction {
    SendCapabilities,
    SendDescribe,
    /// Size the stream's socket receive buffer
    ConfigureReceiveBuffer(StreamId),
    SendSetup(StreamDescription),
    /// Build the face pipeline for a set-up stream
    OpenFace { face: FaceIndex, stream: StreamId },
    SendPlay { range: PlayRange, scale: f32 },
    /// Delivery has started
    Playing,
    /// Shut the face pipeline down
    CloseFace { face: FaceIndex, stream: StreamId },
    /// Tear the session down; `error` is the failure that caused it
    Teardown { error: Option<CubecastError> },
    Closed,
}

/// Stream routed to a face
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaceAssignment {
    pub face: FaceIndex,
    pub stream: StreamId,
}

/// SessionMachine - per-session negotiation context
#[derive(Debug)]
pub struct SessionMachine {
    id: SessionId,
    state: SessionState,
    /// Most faces the composite layout can take
    face_limit: usize,
    start_time: f64,
    play_scale: f32,
    description: Option<SessionDescription>,
    /// Receivable streams in face order
    assignments: Vec<FaceAssignment>,
    setup_cursor: usize,
    open: BTreeSet<StreamId>,
    /// Failure that closed the session, if any
    failure: Option<CubecastError>,
}

impl SessionMachine {
    pub fn new(id: SessionId, face_limit: usize, start_time: f64, play_scale: f32) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            face_limit,
            start_time,
            play_scale,
            description: None,
            assignments: Vec::new(),
            setup_cursor: 0,
            open: BTreeSet::new(),
            failure: None,
        }
    }

    /// Apply one event. Events that make no sense in the current state are
    /// rejected with `InvalidTransition` and leave the state unchanged.
    pub fn handle(&mut self, event: SessionEvent) -> CubecastResult<Vec<SessionAction>> {
        use SessionEvent as E;
        use SessionState as S;

        let before = self.state;
        let actions = match (self.state, event) {
            (S::Idle, E::Start) => {
                self.state = S::CapabilitiesPending;
                vec![SessionAction::SendCapabilities]
            }
            (S::CapabilitiesPending, E::CapabilitiesReady(Ok(()))) => {
                self.state = S::DescribePending;
                vec![SessionAction::SendDescribe]
            }
            (S::CapabilitiesPending, E::CapabilitiesReady(Err(reason))) => {
                self.fail(NegotiationStage::Capabilities, reason)
            }
            (S::DescribePending, E::DescribeReady(Ok(description))) => self.on_described(description),
            (S::DescribePending, E::DescribeReady(Err(reason))) => self.fail(NegotiationStage::Describe, reason),
            (S::SetupPending { stream }, E::SetupReady { stream: done, result }) if stream == done => match result {
                Ok(()) => self.setup_next(),
                Err(reason) => self.fail(NegotiationStage::Setup, format!("stream {}: {}", done, reason)),
            },
            (S::PlayPending, E::PlayReady(Ok(()))) => {
                self.state = S::Playing;
                vec![SessionAction::Playing]
            }
            (S::PlayPending, E::PlayReady(Err(reason))) => self.fail(NegotiationStage::Play, reason),
            (S::PlayPending | S::Playing, E::StreamClosed(stream)) => self.on_stream_closed(stream)?,
            (S::Closing, E::TeardownComplete) => {
                self.state = S::Closed;
                vec![SessionAction::Closed]
            }
            (S::Closing | S::Closed, E::Shutdown) => Vec::new(),
            (S::Idle, E::Shutdown) => {
                self.state = S::Closed;
                vec![SessionAction::Closed]
            }
            (_, E::Shutdown) => self.begin_close(None),
            (state, event) => {
                return Err(CubecastError::InvalidTransition {
                    state: state.to_string(),
                    event: event.name().to_string(),
                })
            }
        };

        if self.state != before {
            tracing::info!(session = %self.id, from = %before, to = %self.state, "session transition");
        }
        Ok(actions)
    }

    fn on_described(&mut self, description: SessionDescription) -> Vec<SessionAction> {
        for skipped in description.streams.iter().filter(|s| !s.is_receivable()) {
            tracing::info!(stream = %skipped.id, kind = %skipped.label(), port = skipped.client_port, "stream skipped");
        }

        let receivable: Vec<StreamDescription> = description.receivable().cloned().collect();
        if receivable.is_empty() {
            self.description = Some(description);
            return self.fail(NegotiationStage::Describe, "no receivable video streams".to_string());
        }
        if receivable.len() > self.face_limit {
            tracing::warn!(
                streams = receivable.len(),
                faces = self.face_limit,
                "more video streams than faces, extra streams ignored"
            );
        }

        self.assignments = receivable
            .iter()
            .take(self.face_limit)
            .enumerate()
            .map(|(i, s)| FaceAssignment {
                face: FaceIndex(i as u8),
                stream: s.id,
            })
            .collect();
        self.description = Some(description);
        self.setup_cursor = 0;

        let mut actions: Vec<SessionAction> = self
            .assignments
            .iter()
            .map(|a| SessionAction::ConfigureReceiveBuffer(a.stream))
            .collect();
        actions.extend(self.request_setup());
        actions
    }

    fn setup_next(&mut self) -> Vec<SessionAction> {
        self.setup_cursor += 1;
        if self.setup_cursor < self.assignments.len() {
            return self.request_setup();
        }

        let mut actions: Vec<SessionAction> = self
            .assignments
            .iter()
            .map(|a| SessionAction::OpenFace {
                face: a.face,
                stream: a.stream,
            })
            .collect();
        self.open = self.assignments.iter().map(|a| a.stream).collect();

        let range = self
            .description
            .as_ref()
            .map(|d| d.play_range(self.start_time))
            .unwrap_or(PlayRange::Relative {
                start: self.start_time,
                end: None,
            });
        actions.push(SessionAction::SendPlay {
            range,
            scale: self.play_scale,
        });
        self.state = SessionState::PlayPending;
        actions
    }

    fn request_setup(&mut self) -> Vec<SessionAction> {
        let Some(assignment) = self.assignments.get(self.setup_cursor).copied() else {
            return Vec::new();
        };
        let stream = self
            .description
            .as_ref()
            .and_then(|d| d.stream(assignment.stream))
            .cloned();
        match stream {
            Some(stream) => {
                self.state = SessionState::SetupPending { stream: stream.id };
                vec![SessionAction::SendSetup(stream)]
            }
            None => self.fail(NegotiationStage::Setup, format!("stream {} vanished", assignment.stream)),
        }
    }

    fn on_stream_closed(&mut self, stream: StreamId) -> CubecastResult<Vec<SessionAction>> {
        let face = self.face_for(stream).ok_or(CubecastError::UnknownStream(stream))?;
        if !self.open.remove(&stream) {
            return Ok(Vec::new());
        }
        tracing::info!(session = %self.id, stream = %stream, face = %face, "stream closed");

        let mut actions = vec![SessionAction::CloseFace { face, stream }];
        if self.open.is_empty() {
            self.state = SessionState::Closed;
            actions.push(SessionAction::Closed);
        }
        Ok(actions)
    }

    fn fail(&mut self, stage: NegotiationStage, reason: String) -> Vec<SessionAction> {
        let error = CubecastError::negotiation(stage, reason);
        tracing::error!(session = %self.id, error = %error, "negotiation failed");
        self.failure = Some(error.clone());
        self.begin_close(Some(error))
    }

    fn begin_close(&mut self, error: Option<CubecastError>) -> Vec<SessionAction> {
        let mut actions: Vec<SessionAction> = self
            .assignments
            .iter()
            .filter(|a| self.open.contains(&a.stream))
            .map(|a| SessionAction::CloseFace {
                face: a.face,
                stream: a.stream,
            })
            .collect();
        self.open.clear();
        actions.push(SessionAction::Teardown { error });
        self.state = SessionState::Closing;
        actions
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn description(&self) -> Option<&SessionDescription> {
        self.description.as_ref()
    }

    pub fn assignments(&self) -> &[FaceAssignment] {
        &self.assignments
    }

    pub fn face_for(&self, stream: StreamId) -> Option<FaceIndex> {
        self.assignments.iter().find(|a| a.stream == stream).map(|a| a.face)
    }

    /// Streams whose face pipeline is open
    pub fn open_streams(&self) -> usize {
        self.open.len()
    }

    pub fn failure(&self) -> Option<&CubecastError> {
        self.failure.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn description(n: u32) -> SessionDescription {
        SessionDescription::new((1..=n).map(|i| StreamDescription::h264(StreamId(i), 5000 + i as u16 * 2)).collect())
    }

    fn machine() -> SessionMachine {
        SessionMachine::new(SessionId(1), 6, 0.0, 1.0)
    }

    /// Drive a machine into Playing with `n` streams
    fn playing(n: u32) -> SessionMachine {
        let mut m = machine();
        m.handle(SessionEvent::Start).unwrap();
        m.handle(SessionEvent::CapabilitiesReady(Ok(()))).unwrap();
        m.handle(SessionEvent::DescribeReady(Ok(description(n)))).unwrap();
        for i in 1..=n {
            m.handle(SessionEvent::SetupReady {
                stream: StreamId(i),
                result: Ok(()),
            })
            .unwrap();
        }
        m.handle(SessionEvent::PlayReady(Ok(()))).unwrap();
        m
    }

    #[test]
    fn test_full_negotiation() {
        let mut m = machine();
        assert_eq!(m.handle(SessionEvent::Start).unwrap(), vec![SessionAction::SendCapabilities]);
        assert_eq!(
            m.handle(SessionEvent::CapabilitiesReady(Ok(()))).unwrap(),
            vec![SessionAction::SendDescribe]
        );

        let actions = m.handle(SessionEvent::DescribeReady(Ok(description(2)))).unwrap();
        assert_eq!(
            actions,
            vec![
                SessionAction::ConfigureReceiveBuffer(StreamId(1)),
                SessionAction::ConfigureReceiveBuffer(StreamId(2)),
                SessionAction::SendSetup(StreamDescription::h264(StreamId(1), 5002)),
            ]
        );
        assert_eq!(m.state(), SessionState::SetupPending { stream: StreamId(1) });

        let actions = m
            .handle(SessionEvent::SetupReady {
                stream: StreamId(1),
                result: Ok(()),
            })
            .unwrap();
        assert_eq!(actions, vec![SessionAction::SendSetup(StreamDescription::h264(StreamId(2), 5004))]);

        let actions = m
            .handle(SessionEvent::SetupReady {
                stream: StreamId(2),
                result: Ok(()),
            })
            .unwrap();
        assert_eq!(
            actions,
            vec![
                SessionAction::OpenFace { face: FaceIndex(0), stream: StreamId(1) },
                SessionAction::OpenFace { face: FaceIndex(1), stream: StreamId(2) },
                SessionAction::SendPlay {
                    range: PlayRange::Relative { start: 0.0, end: None },
                    scale: 1.0
                },
            ]
        );
        assert_eq!(m.handle(SessionEvent::PlayReady(Ok(()))).unwrap(), vec![SessionAction::Playing]);
        assert_eq!(m.state(), SessionState::Playing);
        assert_eq!(m.open_streams(), 2);
    }

    #[test]
    fn test_unreceivable_streams_skipped() {
        let mut m = machine();
        m.handle(SessionEvent::Start).unwrap();
        m.handle(SessionEvent::CapabilitiesReady(Ok(()))).unwrap();
        let desc = SessionDescription::new(vec![
            StreamDescription::new(StreamId(1), "audio", "OPUS", 4000),
            StreamDescription::h264(StreamId(2), 0),
            StreamDescription::h264(StreamId(3), 4004),
        ]);
        m.handle(SessionEvent::DescribeReady(Ok(desc))).unwrap();
        assert_eq!(m.assignments(), &[FaceAssignment { face: FaceIndex(0), stream: StreamId(3) }]);
    }

    #[test]
    fn test_describe_without_video_fails() {
        let mut m = machine();
        m.handle(SessionEvent::Start).unwrap();
        m.handle(SessionEvent::CapabilitiesReady(Ok(()))).unwrap();
        let actions = m.handle(SessionEvent::DescribeReady(Ok(SessionDescription::default()))).unwrap();
        assert!(matches!(
            actions.as_slice(),
            [SessionAction::Teardown { error: Some(CubecastError::Negotiation { stage: NegotiationStage::Describe, .. }) }]
        ));
        assert_eq!(m.state(), SessionState::Closing);
    }

    #[test]
    fn test_setup_failure_tears_down() {
        let mut m = machine();
        m.handle(SessionEvent::Start).unwrap();
        m.handle(SessionEvent::CapabilitiesReady(Ok(()))).unwrap();
        m.handle(SessionEvent::DescribeReady(Ok(description(3)))).unwrap();
        let actions = m
            .handle(SessionEvent::SetupReady {
                stream: StreamId(1),
                result: Err("461 Unsupported Transport".into()),
            })
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], SessionAction::Teardown { error: Some(_) }));
        assert!(m.failure().is_some());

        assert_eq!(m.handle(SessionEvent::TeardownComplete).unwrap(), vec![SessionAction::Closed]);
        assert!(m.state().is_closed());
    }

    #[test]
    fn test_play_failure_closes_open_faces() {
        let mut m = machine();
        m.handle(SessionEvent::Start).unwrap();
        m.handle(SessionEvent::CapabilitiesReady(Ok(()))).unwrap();
        m.handle(SessionEvent::DescribeReady(Ok(description(1)))).unwrap();
        m.handle(SessionEvent::SetupReady {
            stream: StreamId(1),
            result: Ok(()),
        })
        .unwrap();
        let actions = m.handle(SessionEvent::PlayReady(Err("454 Session Not Found".into()))).unwrap();
        assert_eq!(actions[0], SessionAction::CloseFace { face: FaceIndex(0), stream: StreamId(1) });
        assert!(matches!(actions[1], SessionAction::Teardown { error: Some(_) }));
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut m = machine();
        let err = m.handle(SessionEvent::PlayReady(Ok(()))).unwrap_err();
        assert_eq!(
            err,
            CubecastError::InvalidTransition {
                state: "idle".into(),
                event: "play-ready".into()
            }
        );
        assert_eq!(m.state(), SessionState::Idle);

        m.handle(SessionEvent::Start).unwrap();
        m.handle(SessionEvent::CapabilitiesReady(Ok(()))).unwrap();
        m.handle(SessionEvent::DescribeReady(Ok(description(2)))).unwrap();
        // completion for a stream that is not being set up
        assert!(m
            .handle(SessionEvent::SetupReady {
                stream: StreamId(2),
                result: Ok(())
            })
            .is_err());
    }

    #[test]
    fn test_all_streams_closed_closes_session() {
        let mut m = playing(2);
        assert_eq!(
            m.handle(SessionEvent::StreamClosed(StreamId(2))).unwrap(),
            vec![SessionAction::CloseFace { face: FaceIndex(1), stream: StreamId(2) }]
        );
        // repeated goodbye is a no-op
        assert!(m.handle(SessionEvent::StreamClosed(StreamId(2))).unwrap().is_empty());
        assert_eq!(
            m.handle(SessionEvent::StreamClosed(StreamId(1))).unwrap(),
            vec![
                SessionAction::CloseFace { face: FaceIndex(0), stream: StreamId(1) },
                SessionAction::Closed
            ]
        );
        assert!(m.state().is_closed());
        assert_eq!(
            m.handle(SessionEvent::StreamClosed(StreamId(9))).unwrap_err(),
            CubecastError::InvalidTransition {
                state: "closed".into(),
                event: "stream-closed".into()
            }
        );
    }

    #[test]
    fn test_unknown_stream_closed() {
        let mut m = playing(1);
        assert_eq!(
            m.handle(SessionEvent::StreamClosed(StreamId(42))).unwrap_err(),
            CubecastError::UnknownStream(StreamId(42))
        );
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut m = playing(2);
        let actions = m.handle(SessionEvent::Shutdown).unwrap();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[2], SessionAction::Teardown { error: None });
        assert!(m.handle(SessionEvent::Shutdown).unwrap().is_empty());
        m.handle(SessionEvent::TeardownComplete).unwrap();
        assert!(m.handle(SessionEvent::Shutdown).unwrap().is_empty());
    }

    #[test]
    fn test_face_limit_caps_streams() {
        let mut m = SessionMachine::new(SessionId(2), 2, 0.0, 1.0);
        m.handle(SessionEvent::Start).unwrap();
        m.handle(SessionEvent::CapabilitiesReady(Ok(()))).unwrap();
        m.handle(SessionEvent::DescribeReady(Ok(description(4)))).unwrap();
        assert_eq!(m.assignments().len(), 2);
    }

    #[test]
    fn test_absolute_play_range() {
        let mut m = machine();
        m.handle(SessionEvent::Start).unwrap();
        m.handle(SessionEvent::CapabilitiesReady(Ok(()))).unwrap();
        let desc = description(1).with_absolute_range("20240101T000000Z", Some("20240101T010000Z".into()));
        m.handle(SessionEvent::DescribeReady(Ok(desc))).unwrap();
        let actions = m
            .handle(SessionEvent::SetupReady {
                stream: StreamId(1),
                result: Ok(()),
            })
            .unwrap();
        assert!(matches!(
            actions.last(),
            Some(SessionAction::SendPlay { range: PlayRange::Absolute { .. }, .. })
        ));
    }

    fn event() -> impl Strategy<Value = SessionEvent> {
        prop_oneof![
            Just(SessionEvent::Start),
            any::<bool>().prop_map(|ok| SessionEvent::CapabilitiesReady(if ok { Ok(()) } else { Err("x".into()) })),
            (0u32..4).prop_map(|n| SessionEvent::DescribeReady(Ok(description(n)))),
            (1u32..4, any::<bool>()).prop_map(|(s, ok)| SessionEvent::SetupReady {
                stream: StreamId(s),
                result: if ok { Ok(()) } else { Err("x".into()) },
            }),
            any::<bool>().prop_map(|ok| SessionEvent::PlayReady(if ok { Ok(()) } else { Err("x".into()) })),
            (1u32..4).prop_map(|s| SessionEvent::StreamClosed(StreamId(s))),
            Just(SessionEvent::Shutdown),
            Just(SessionEvent::TeardownComplete),
        ]
    }

    proptest! {
        #[test]
        fn prop_rejected_events_leave_state(events in prop::collection::vec(event(), 0..40)) {
            let mut m = machine();
            for e in events {
                let before = m.state();
                if m.handle(e).is_err() {
                    prop_assert_eq!(m.state(), before);
                }
                prop_assert!(m.open_streams() <= m.assignments().len());
                if matches!(m.state(), SessionState::Closing | SessionState::Closed) {
                    prop_assert_eq!(m.open_streams(), 0);
                }
            }
        }
    }
}
