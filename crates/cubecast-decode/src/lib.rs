//! CUBECAST Decode - From network units to decoded pictures
//!
//! Per face:
//! 1. `KeyframeGate` decides, on the network thread, whether an arriving
//!    unit is admitted, reserved or dropped, and never blocks
//! 2. Admitted units are framed into pooled `EncodedPacket`s and queued
//! 3. A dedicated `DecodeWorker` thread pops packets and free pictures,
//!    runs the `VideoDecoder` and publishes decoded pictures
//!
//! `FaceChannels` bundles the pools and queues one face's stages share.

pub mod packet;
pub mod channels;
pub mod gate;
pub mod decoder;
pub mod worker;

pub use packet::*;
pub use channels::*;
pub use gate::*;
pub use decoder::*;
pub use worker::*;
