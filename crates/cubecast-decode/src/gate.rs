//! Keyframe sync and drop policy
//!
//! Runs on the network thread, once per arriving unit, and never blocks.
//! The decoder of a face must always start from a keyframe and must never
//! be starved by a backlog of dependent units it can no longer use:
//!
//! | packet free? | reservation held | unit      | sync     | outcome                         |
//! |--------------|------------------|-----------|----------|---------------------------------|
//! | yes          | yes              | any       | any      | reservation queued, unit dropped |
//! | yes          | no               | dependent | synced   | unit queued                     |
//! | yes          | no               | keyframe  | any      | unit queued, now synced         |
//! | yes          | no               | dependent | unsynced | unit dropped                    |
//! | no           | -                | keyframe  | any      | unit reserved (per policy), dropped |
//! | no           | -                | dependent | any      | unit dropped                    |
//!
//! A reservation is the payload of a keyframe that arrived while every
//! packet was in use. It is held outside the pool (at most one per face)
//! and packaged into the next packet that frees up, which is the packet the
//! triggering arrival would otherwise have used. Pool capacity is therefore
//! conserved across the reservation path.

use std::sync::Arc;

use cubecast_core::{EncodedUnit, FaceIndex, PendingKeyframePolicy, UnitKind};
use cubecast_pool::{BoundedQueue, SlotPool, TryPopError};

use crate::{EncodedPacket, FaceChannels, PacketSlot};

/// Whether a face's decoder has been fed a keyframe yet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Unsynced,
    Synced,
}

/// Why a unit did not reach the decoder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Dependent unit before the first keyframe
    Unsynced,
    /// No free packet and nothing to reserve
    PoolExhausted,
    /// No free packet; the keyframe was kept as the reservation
    Reserved,
    /// A packet freed up but went to the held reservation
    SupersededByPending,
    /// The face's channels are closed
    Closed,
}

/// Outcome of offering one unit to the gate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Admission {
    Admitted,
    Dropped(DropReason),
}

impl Admission {
    #[inline]
    pub fn is_admitted(self) -> bool {
        self == Admission::Admitted
    }

    #[inline]
    pub fn is_dropped(self) -> bool {
        !self.is_admitted()
    }
}

/// Gate counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GateStats {
    pub received: u64,
    pub admitted: u64,
    pub dropped: u64,
    /// Keyframes stored as the reservation
    pub reserved: u64,
    /// Reservations overwritten by a newer keyframe
    pub replaced: u64,
    /// Reservations that made it into a packet
    pub flushed: u64,
    /// Units that arrived truncated
    pub truncated: u64,
}

/// Called for every unit with its kind and the decision taken
pub type AdmissionObserver = Box<dyn FnMut(FaceIndex, UnitKind, Admission) + Send>;

/// KeyframeGate - per-face admission state machine
pub struct KeyframeGate {
    face: FaceIndex,
    channels: Arc<FaceChannels>,
    sync: SyncState,
    pending: Option<EncodedUnit>,
    policy: PendingKeyframePolicy,
    /// Next admission sequence number
    sequence: u64,
    stats: GateStats,
    observer: Option<AdmissionObserver>,
}

impl KeyframeGate {
    pub fn new(channels: Arc<FaceChannels>, policy: PendingKeyframePolicy) -> Self {
        Self {
            face: channels.face,
            channels,
            sync: SyncState::Unsynced,
            pending: None,
            policy,
            sequence: 0,
            stats: GateStats::default(),
            observer: None,
        }
    }

    /// Install an observer for admitted/dropped units
    pub fn set_observer(&mut self, observer: AdmissionObserver) {
        self.observer = Some(observer);
    }

    /// Offer one arriving unit
    pub fn on_unit(&mut self, unit: EncodedUnit) -> Admission {
        self.stats.received += 1;
        if unit.truncated > 0 {
            self.stats.truncated += 1;
        }
        let kind = unit.kind;

        let admission = if self.channels.is_closed() {
            Admission::Dropped(DropReason::Closed)
        } else {
            match self.channels.packet_pool.try_acquire() {
                Ok(slot) => self.admit_into(slot, unit),
                Err(TryPopError::Empty) => self.on_exhausted(unit),
                Err(TryPopError::Closed) => Admission::Dropped(DropReason::Closed),
            }
        };

        match admission {
            Admission::Admitted => self.stats.admitted += 1,
            Admission::Dropped(_) => self.stats.dropped += 1,
        }
        tracing::trace!(face = %self.face, ?kind, ?admission, sync = ?self.sync, "unit offered");
        if let Some(observer) = self.observer.as_mut() {
            observer(self.face, kind, admission);
        }
        admission
    }

    /// Queue a held reservation if a packet is free, without an arrival.
    /// Returns whether the reservation was queued.
    pub fn try_flush_pending(&mut self) -> bool {
        if self.pending.is_none() {
            return false;
        }
        let Ok(slot) = self.channels.packet_pool.try_acquire() else {
            return false;
        };
        self.flush_into(slot)
    }

    /// Forget sync state and any reservation, for a re-established session
    pub fn reset(&mut self) {
        if self.sync == SyncState::Synced || self.pending.is_some() {
            tracing::info!(face = %self.face, "keyframe gate reset");
        }
        self.sync = SyncState::Unsynced;
        self.pending = None;
    }

    pub fn face(&self) -> FaceIndex {
        self.face
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync
    }

    /// The held reservation, if any
    pub fn pending(&self) -> Option<&EncodedUnit> {
        self.pending.as_ref()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn stats(&self) -> &GateStats {
        &self.stats
    }

    fn admit_into(&mut self, slot: PacketSlot, unit: EncodedUnit) -> Admission {
        if self.pending.is_some() {
            return if self.flush_into(slot) {
                Admission::Dropped(DropReason::SupersededByPending)
            } else {
                Admission::Dropped(DropReason::Closed)
            };
        }

        match (unit.kind, self.sync) {
            (UnitKind::Keyframe, _) | (UnitKind::Dependent, SyncState::Synced) => {
                if self.enqueue(slot, &unit) {
                    self.mark_synced();
                    Admission::Admitted
                } else {
                    Admission::Dropped(DropReason::Closed)
                }
            }
            (UnitKind::Dependent, SyncState::Unsynced) => {
                self.recycle(slot);
                Admission::Dropped(DropReason::Unsynced)
            }
        }
    }

    fn on_exhausted(&mut self, unit: EncodedUnit) -> Admission {
        if !unit.kind.is_keyframe() {
            return Admission::Dropped(DropReason::PoolExhausted);
        }

        match (&self.pending, self.policy) {
            (None, _) => {
                tracing::debug!(face = %self.face, pts = ?unit.pts, "keyframe reserved, packets exhausted");
                self.pending = Some(unit);
                self.stats.reserved += 1;
                Admission::Dropped(DropReason::Reserved)
            }
            (Some(_), PendingKeyframePolicy::ReplaceWithLatest) => {
                self.pending = Some(unit);
                self.stats.replaced += 1;
                Admission::Dropped(DropReason::Reserved)
            }
            (Some(_), PendingKeyframePolicy::KeepFirst) => {
                Admission::Dropped(DropReason::PoolExhausted)
            }
        }
    }

    /// Package the reservation into `slot` and queue it
    fn flush_into(&mut self, slot: PacketSlot) -> bool {
        let Some(pending) = self.pending.take() else {
            self.recycle(slot);
            return false;
        };
        if self.enqueue(slot, &pending) {
            self.stats.flushed += 1;
            self.mark_synced();
            tracing::debug!(face = %self.face, pts = ?pending.pts, "reserved keyframe queued");
            true
        } else {
            false
        }
    }

    fn enqueue(&mut self, mut slot: PacketSlot, unit: &EncodedUnit) -> bool {
        slot.package(unit, self.sequence);
        match self.channels.packet_queue.push(slot) {
            Ok(()) => {
                self.sequence += 1;
                true
            }
            Err(rejected) => {
                self.recycle(rejected.into_inner());
                false
            }
        }
    }

    fn recycle(&self, slot: PacketSlot) {
        // a closed pool retires the slot; nothing else can hold it
        let _ = self.channels.packet_pool.release(slot);
    }

    fn mark_synced(&mut self) {
        if self.sync == SyncState::Unsynced {
            tracing::info!(face = %self.face, "face synchronized on keyframe");
            self.sync = SyncState::Synced;
        }
    }

    /// Pool the gate draws packets from
    pub fn packet_pool(&self) -> &SlotPool<EncodedPacket> {
        &self.channels.packet_pool
    }

    /// Queue admitted packets go to
    pub fn packet_queue(&self) -> &BoundedQueue<PacketSlot> {
        &self.channels.packet_queue
    }
}
