//! CUBECAST Test Harness - Simulation and end-to-end validation
//!
//! This crate provides:
//! - Scripted stand-ins for the decoder, session client and frame sources
//! - Seeded chaos arrivals against a live gate and decode worker
//! - End-to-end scenarios through a full receiver

pub mod sim;
pub mod chaos;
pub mod integration;

pub use sim::*;
pub use chaos::*;
pub use integration::*;
