//! CUBECAST Compose - From decoded pictures to displayed composites
//!
//! - `FrameSampler`: non-blocking "latest picture" per face, rescaled to the
//!   target face geometry, falling back to the previous sample
//! - `CubemapAssembler`: samples every face into a `StereoCubemap`
//! - `RenderHandoff`: swaps composites with the display consumer through a
//!   small exchange pool, without allocating after warm-up

pub mod scaler;
pub mod sampler;
pub mod assembler;
pub mod handoff;

pub use scaler::*;
pub use sampler::*;
pub use assembler::*;
pub use handoff::*;
