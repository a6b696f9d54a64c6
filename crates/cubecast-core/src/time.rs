//! Time primitives for CUBECAST
//!
//! Two clocks matter to the pipeline:
//! - Presentation time: the sender's timestamp carried with every coded unit
//! - Wall time: the local clock at which a face was sampled for assembly

use std::ops::Sub;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Presentation time - microseconds since the Unix epoch, as stamped by
/// the sender and carried through decode unchanged
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PresentationTime(pub i64);

impl PresentationTime {
    pub const ZERO: PresentationTime = PresentationTime(0);

    #[inline]
    pub fn from_micros(micros: i64) -> Self {
        PresentationTime(micros)
    }

    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        PresentationTime(millis * 1000)
    }

    /// Build from a (seconds, microseconds) pair as delivered by the source
    #[inline]
    pub fn from_secs_micros(secs: i64, micros: i64) -> Self {
        PresentationTime(secs * 1_000_000 + micros)
    }

    #[inline]
    pub fn as_micros(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn as_millis(self) -> i64 {
        self.0 / 1000
    }

    /// Signed lag of this presentation time behind `now`, in microseconds.
    /// Positive when the unit is late.
    #[inline]
    pub fn lag_behind(self, now: WallTime) -> i64 {
        now.0 - self.0
    }
}

impl std::fmt::Debug for PresentationTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pts({:.3}ms)", self.0 as f64 / 1000.0)
    }
}

/// Wall-clock time - microseconds since the Unix epoch on the local host
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct WallTime(pub i64);

impl WallTime {
    pub const ZERO: WallTime = WallTime(0);

    /// Read the system clock
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        WallTime(micros)
    }

    #[inline]
    pub fn from_micros(micros: i64) -> Self {
        WallTime(micros)
    }

    #[inline]
    pub fn as_micros(self) -> i64 {
        self.0
    }
}

impl Sub<WallTime> for WallTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: WallTime) -> Self::Output {
        let diff = self.0 - rhs.0;
        if diff >= 0 {
            Duration::from_micros(diff as u64)
        } else {
            Duration::ZERO
        }
    }
}

impl std::fmt::Debug for WallTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wall({}us)", self.0)
    }
}
