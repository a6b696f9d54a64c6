//! CUBECAST Session - Negotiating a multi-face stream
//!
//! The session-protocol client (capabilities, describe, setup, play,
//! teardown) lives behind `SessionClient`. `SessionMachine` turns the
//! client's completion callbacks into typed events and decides, in one
//! dispatch function, which requests to issue and which face pipelines to
//! open or close.

pub mod description;
pub mod client;
pub mod machine;

pub use description::*;
pub use client::*;
pub use machine::*;
