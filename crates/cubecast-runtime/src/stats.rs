//! Runtime statistics
//!
//! Counters are written on the network thread and read from anywhere as
//! plain snapshots.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

use cubecast_compose::HandoffStats;
use cubecast_core::{CubecastError, CubecastResult, FaceIndex, StreamId, UnitKind};
use cubecast_decode::{Admission, DropReason, GateStats, WorkerStats};

/// Live counters of one face's network side
#[derive(Debug, Default)]
pub struct FaceCounters {
    received: AtomicU64,
    admitted: AtomicU64,
    admitted_keyframes: AtomicU64,
    dropped: AtomicU64,
    dropped_unsynced: AtomicU64,
    dropped_exhausted: AtomicU64,
    truncated: AtomicU64,
    reserved: AtomicU64,
    pending: AtomicBool,
}

impl FaceCounters {
    /// Record one admission decision
    pub fn record(&self, kind: UnitKind, admission: Admission) {
        self.received.fetch_add(1, Ordering::Relaxed);
        match admission {
            Admission::Admitted => {
                self.admitted.fetch_add(1, Ordering::Relaxed);
                if kind.is_keyframe() {
                    self.admitted_keyframes.fetch_add(1, Ordering::Relaxed);
                }
            }
            Admission::Dropped(reason) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                match reason {
                    DropReason::Unsynced => {
                        self.dropped_unsynced.fetch_add(1, Ordering::Relaxed);
                    }
                    DropReason::PoolExhausted | DropReason::Reserved => {
                        self.dropped_exhausted.fetch_add(1, Ordering::Relaxed);
                    }
                    DropReason::SupersededByPending | DropReason::Closed => {}
                }
            }
        }
    }

    /// Mirror the gate's own counters
    pub fn sync_gate(&self, gate: &GateStats, pending: bool) {
        self.truncated.store(gate.truncated, Ordering::Relaxed);
        self.reserved.store(gate.reserved + gate.replaced, Ordering::Relaxed);
        self.pending.store(pending, Ordering::Relaxed);
    }
}

/// Snapshot of one face
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FaceStats {
    pub face: u8,
    pub stream: u32,
    pub received: u64,
    pub admitted: u64,
    pub admitted_keyframes: u64,
    pub dropped: u64,
    pub dropped_unsynced: u64,
    pub dropped_exhausted: u64,
    pub truncated: u64,
    /// Keyframes that went into the reservation
    pub reserved: u64,
    /// Whether a reservation is held right now
    pub pending: bool,
    pub decoded: u64,
    pub decode_failures: u64,
    pub no_picture: u64,
    pub avg_lag_us: i64,
    pub max_lag_us: i64,
}

impl FaceStats {
    pub fn collect(face: FaceIndex, stream: StreamId, counters: &FaceCounters, worker: &WorkerStats) -> Self {
        Self {
            face: face.0,
            stream: stream.0,
            received: counters.received.load(Ordering::Relaxed),
            admitted: counters.admitted.load(Ordering::Relaxed),
            admitted_keyframes: counters.admitted_keyframes.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            dropped_unsynced: counters.dropped_unsynced.load(Ordering::Relaxed),
            dropped_exhausted: counters.dropped_exhausted.load(Ordering::Relaxed),
            truncated: counters.truncated.load(Ordering::Relaxed),
            reserved: counters.reserved.load(Ordering::Relaxed),
            pending: counters.pending.load(Ordering::Relaxed),
            decoded: worker.decoded,
            decode_failures: worker.failures,
            no_picture: worker.no_picture,
            avg_lag_us: worker.window_avg_lag_us,
            max_lag_us: worker.window_max_lag_us,
        }
    }
}

/// Handoff counters, serializable
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExchangeStats {
    pub swaps: u64,
    pub skips: u64,
    pub recycled: u64,
}

impl From<HandoffStats> for ExchangeStats {
    fn from(s: HandoffStats) -> Self {
        Self {
            swaps: s.swaps,
            skips: s.skips,
            recycled: s.recycled,
        }
    }
}

/// Snapshot of a whole receiver
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    pub session: String,
    /// Faces with an open pipeline, in face order
    pub faces: Vec<FaceStats>,
    pub exchange: ExchangeStats,
}

impl RuntimeStats {
    pub fn face(&self, face: FaceIndex) -> Option<&FaceStats> {
        self.faces.iter().find(|f| f.face == face.0)
    }

    pub fn total_dropped(&self) -> u64 {
        self.faces.iter().map(|f| f.dropped).sum()
    }

    pub fn to_json(&self) -> CubecastResult<String> {
        serde_json::to_string(self).map_err(|e| CubecastError::Io(e.to_string()))
    }
}
