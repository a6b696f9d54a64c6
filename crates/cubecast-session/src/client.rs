//! Session-protocol client seam
//!
//! Requests are fire-and-forget: each completes later through a
//! `SessionEvent` fed to the `SessionMachine` on the client's event loop.

use cubecast_core::{CubecastResult, SessionId, StreamId};

use crate::{PlayRange, StreamDescription};

/// SessionClient - control-plane requests of the session protocol
pub trait SessionClient: Send {
    /// Ask the server for its capabilities
    fn send_capabilities_request(&mut self) -> CubecastResult<()>;

    /// Ask for the session description
    fn send_describe(&mut self) -> CubecastResult<()>;

    /// Set up delivery of one stream
    fn send_setup(&mut self, stream: &StreamDescription) -> CubecastResult<()>;

    /// Start delivery of every set-up stream
    fn send_play(&mut self, session: SessionId, range: &PlayRange, scale: f32) -> CubecastResult<()>;

    /// Stop delivery and release the session
    fn send_teardown(&mut self, session: SessionId) -> CubecastResult<()>;

    /// Current socket receive buffer of a stream, in bytes
    fn receive_buffer_size(&self, stream: StreamId) -> usize;

    /// Request a socket receive buffer size; returns the size granted
    fn set_receive_buffer_size(&mut self, stream: StreamId, bytes: usize) -> usize;
}

/// Socket buffer size to request for a stream, if any.
///
/// An explicit override always applies. Otherwise the buffer is raised to
/// the receive buffer size when that is larger than what the socket has.
pub fn receive_buffer_target(override_bytes: usize, receive_buffer: usize, current: usize) -> Option<usize> {
    if override_bytes > 0 {
        Some(override_bytes)
    } else if receive_buffer > current {
        Some(receive_buffer)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_buffer_target() {
        assert_eq!(receive_buffer_target(0, 1_000_000, 212_992), Some(1_000_000));
        assert_eq!(receive_buffer_target(0, 100_000, 212_992), None);
        assert_eq!(receive_buffer_target(4_000_000, 100_000, 212_992), Some(4_000_000));
    }
}
