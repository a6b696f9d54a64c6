//! CUBECAST Core - Fundamental types and primitives
//!
//! This crate defines the core types shared by every pipeline stage:
//! - Identifiers (FaceIndex, EyeIndex, StreamId, SessionId, SlotId)
//! - Time primitives (PresentationTime, WallTime)
//! - Coded units and their keyframe classification
//! - Pictures, cubemap faces and stereo cubemaps
//! - Pipeline configuration
//! - The workspace error type

pub mod id;
pub mod time;
pub mod unit;
pub mod picture;
pub mod cubemap;
pub mod config;
pub mod error;

pub use id::*;
pub use time::*;
pub use unit::*;
pub use picture::*;
pub use cubemap::*;
pub use config::*;
pub use error::*;
