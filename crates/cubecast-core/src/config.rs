//! Pipeline configuration
//!
//! Set once at construction and shared immutably afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{CubecastError, CubecastResult, CubemapLayout, PictureGeometry, PixelFormat};

/// What happens when a keyframe arrives while one is already reserved
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKeyframePolicy {
    /// The reservation made first stands until a slot frees
    #[default]
    KeepFirst,
    /// A newer keyframe replaces the reservation
    ReplaceWithLatest,
}

/// Pool capacities
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Encoded packets per face (C)
    pub packet_capacity: usize,
    /// Decoded pictures per face (F)
    pub picture_capacity: usize,
    /// Spare composites in the render exchange (P)
    pub exchange_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            packet_capacity: 1,
            picture_capacity: 1,
            exchange_capacity: 1,
        }
    }
}

/// Pipeline configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Address of the stream to receive
    pub stream_url: String,
    /// Target per-face resolution (faces are square)
    pub face_resolution: u32,
    /// Target per-face pixel format
    pub pixel_format: PixelFormat,
    /// Eyes and faces per eye
    pub layout: CubemapLayout,
    pub pools: PoolConfig,
    /// Per-face receive buffer handed to the frame source
    pub receive_buffer_size: usize,
    /// Explicit socket receive buffer size; 0 lets the receive buffer size decide
    pub socket_buffer_override: usize,
    pub pending_keyframe: PendingKeyframePolicy,
    /// Relative start time for play, in seconds
    pub start_time: f64,
    /// Playback scale requested from the server
    pub play_scale: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            stream_url: String::new(),
            face_resolution: 1024,
            pixel_format: PixelFormat::Rgba,
            layout: CubemapLayout::MONO,
            pools: PoolConfig::default(),
            receive_buffer_size: 1_000_000,
            socket_buffer_override: 0,
            pending_keyframe: PendingKeyframePolicy::KeepFirst,
            start_time: 0.0,
            play_scale: 1.0,
        }
    }
}

impl PipelineConfig {
    /// Configuration for a stream address with defaults for everything else
    pub fn for_url(url: impl Into<String>) -> Self {
        PipelineConfig {
            stream_url: url.into(),
            ..Default::default()
        }
    }

    /// Parse from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> CubecastResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| CubecastError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> CubecastResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CubecastError::Io(e.to_string()))?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> CubecastResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| CubecastError::InvalidConfig(e.to_string()))
    }

    /// Geometry every assembled face is scaled to
    pub fn face_geometry(&self) -> PictureGeometry {
        PictureGeometry::square(self.face_resolution, self.pixel_format)
    }

    pub fn validate(&self) -> CubecastResult<()> {
        if self.stream_url.is_empty() {
            return Err(CubecastError::InvalidConfig("stream_url is empty".into()));
        }
        if self.face_resolution == 0 {
            return Err(CubecastError::InvalidConfig("face_resolution is zero".into()));
        }
        if self.pools.packet_capacity == 0 {
            return Err(CubecastError::InvalidConfig("packet_capacity is zero".into()));
        }
        if self.pools.picture_capacity == 0 {
            return Err(CubecastError::InvalidConfig("picture_capacity is zero".into()));
        }
        if self.pools.exchange_capacity == 0 {
            return Err(CubecastError::InvalidConfig("exchange_capacity is zero".into()));
        }
        if self.receive_buffer_size == 0 {
            return Err(CubecastError::InvalidConfig("receive_buffer_size is zero".into()));
        }
        if !(self.play_scale.is_finite() && self.play_scale > 0.0) {
            return Err(CubecastError::InvalidConfig(format!(
                "play_scale must be positive, got {}",
                self.play_scale
            )));
        }
        self.layout.validate()
    }
}
