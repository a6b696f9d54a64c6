//! CUBECAST Runtime - Receiver orchestration
//!
//! `CubemapReceiver` is the per-session context. It runs on the session
//! client's event loop and:
//! 1. Feeds negotiation completions to the `SessionMachine`
//! 2. Carries out the resulting actions (requests, socket sizing)
//! 3. Builds a face pipeline per set-up stream: `FaceSink` (gate) ->
//!    `DecodeWorker` -> `FrameSampler`
//! 4. Tears faces down on end of stream, failure or shutdown
//!
//! Assembly and display run on their own cadence through `Compositor` and
//! `DisplayConsumer`.

pub mod sink;
pub mod stats;
pub mod receiver;
pub mod telemetry;

pub use sink::*;
pub use stats::*;
pub use receiver::*;
pub use telemetry::*;
