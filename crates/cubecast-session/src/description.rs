//! Session descriptions as returned by describe

use serde::{Deserialize, Serialize};

use cubecast_core::{CubecastError, CubecastResult, StreamId};

/// Medium a face pipeline can be built for
pub const VIDEO_MEDIUM: &str = "video";

/// Codec a face pipeline can be built for
pub const H264_CODEC: &str = "H264";

/// One media stream of a session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescription {
    pub id: StreamId,
    /// Medium name, e.g. "video" or "audio"
    pub medium: String,
    /// Codec name, e.g. "H264"
    pub codec: String,
    /// Local port the stream is received on; 0 when none was assigned
    pub client_port: u16,
}

impl StreamDescription {
    pub fn new(id: StreamId, medium: impl Into<String>, codec: impl Into<String>, client_port: u16) -> Self {
        Self {
            id,
            medium: medium.into(),
            codec: codec.into(),
            client_port,
        }
    }

    /// An H.264 video stream on port `client_port`
    pub fn h264(id: StreamId, client_port: u16) -> Self {
        Self::new(id, VIDEO_MEDIUM, H264_CODEC, client_port)
    }

    /// Whether a face pipeline can receive this stream
    pub fn is_receivable(&self) -> bool {
        self.medium == VIDEO_MEDIUM && self.codec == H264_CODEC && self.client_port != 0
    }

    /// "medium/codec", as used in logs
    pub fn label(&self) -> String {
        format!("{}/{}", self.medium, self.codec)
    }
}

/// Description of a whole session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub streams: Vec<StreamDescription>,
    /// Absolute start time, when the session is seekable by wall clock
    #[serde(default)]
    pub abs_start: Option<String>,
    #[serde(default)]
    pub abs_end: Option<String>,
}

impl SessionDescription {
    pub fn new(streams: Vec<StreamDescription>) -> Self {
        Self {
            streams,
            abs_start: None,
            abs_end: None,
        }
    }

    pub fn with_absolute_range(mut self, start: impl Into<String>, end: Option<String>) -> Self {
        self.abs_start = Some(start.into());
        self.abs_end = end;
        self
    }

    pub fn from_json_str(json: &str) -> CubecastResult<Self> {
        serde_json::from_str(json).map_err(|e| CubecastError::InvalidConfig(e.to_string()))
    }

    /// Streams a face pipeline can be built for, in description order
    pub fn receivable(&self) -> impl Iterator<Item = &StreamDescription> {
        self.streams.iter().filter(|s| s.is_receivable())
    }

    pub fn stream(&self, id: StreamId) -> Option<&StreamDescription> {
        self.streams.iter().find(|s| s.id == id)
    }

    /// Range to request at play: absolute when the description carries an
    /// absolute start, otherwise relative from `start_time`, open-ended
    pub fn play_range(&self, start_time: f64) -> PlayRange {
        match &self.abs_start {
            Some(start) => PlayRange::Absolute {
                start: start.clone(),
                end: self.abs_end.clone(),
            },
            None => PlayRange::Relative {
                start: start_time,
                end: None,
            },
        }
    }
}

/// Range requested by play
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayRange {
    /// Wall-clock times as given by the description
    Absolute { start: String, end: Option<String> },
    /// Normal play time in seconds; `None` plays to the end
    Relative { start: f64, end: Option<f64> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receivable_filter() {
        let desc = SessionDescription::new(vec![
            StreamDescription::h264(StreamId(1), 5000),
            StreamDescription::new(StreamId(2), "audio", "MPEG4-GENERIC", 5002),
            StreamDescription::h264(StreamId(3), 0),
            StreamDescription::new(StreamId(4), "video", "H265", 5006),
            StreamDescription::h264(StreamId(5), 5008),
        ]);
        let ids: Vec<_> = desc.receivable().map(|s| s.id).collect();
        assert_eq!(ids, vec![StreamId(1), StreamId(5)]);
        assert_eq!(desc.stream(StreamId(2)).map(|s| s.label()), Some("audio/MPEG4-GENERIC".into()));
    }

    #[test]
    fn test_play_range_selection() {
        let desc = SessionDescription::new(Vec::new());
        assert_eq!(desc.play_range(1.5), PlayRange::Relative { start: 1.5, end: None });

        let desc = desc.with_absolute_range("20240101T000000Z", None);
        assert_eq!(
            desc.play_range(1.5),
            PlayRange::Absolute {
                start: "20240101T000000Z".into(),
                end: None
            }
        );
    }

    #[test]
    fn test_description_from_json() {
        let json = r#"{"streams":[{"id":7,"medium":"video","codec":"H264","client_port":6000}]}"#;
        let desc = SessionDescription::from_json_str(json).unwrap();
        assert_eq!(desc.streams.len(), 1);
        assert!(desc.streams[0].is_receivable());
        assert!(desc.abs_start.is_none());
        assert!(SessionDescription::from_json_str("{").is_err());
    }
}
