//! End-to-end Integration Test Suite
//!
//! Scenarios that run real threads end to end:
//! - Keyframe sync through a live receiver
//! - Reservation and flush against a held decoder
//! - Stale-frame substitution and zero-allocation display handoff
//! - Shutdown liveness with every stage blocked
//! - Full negotiation, decode, assembly and display

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use cubecast_core::{
    CubecastError, CubecastResult, CubemapLayout, EncodedUnit, FaceIndex, PendingKeyframePolicy, PixelFormat,
    PoolConfig, PresentationTime, StereoCubemap,
};
use cubecast_decode::{Admission, DecodeWorker, FaceChannels, KeyframeGate, SyncState};
use cubecast_session::SessionState;

use crate::sim::{
    cube_description, dependent, keyframe, sim_config, wait_until, Latch, ScriptedClient, ScriptedSources,
    SimReceiver, TagDecoders,
};

/// Longest any scenario step may wait on another thread
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// One face, one stream
pub const SINGLE_FACE: CubemapLayout = CubemapLayout {
    eyes: 1,
    faces_per_eye: 1,
};

fn within(what: &str, cond: impl FnMut() -> bool) -> CubecastResult<()> {
    if wait_until(STEP_TIMEOUT, cond) {
        Ok(())
    } else {
        Err(CubecastError::Io(format!("timed out waiting for {}", what)))
    }
}

/// Wait until every packet of a face is back in its pool
pub fn settle(channels: &FaceChannels) -> CubecastResult<()> {
    within("packets to drain", || {
        channels.packet_queue.is_empty() && channels.packet_pool.available() == channels.packet_pool.capacity()
    })
}

/// Composite the display would show next; hands it straight back afterwards
pub fn take_composite<T>(
    sim: &SimReceiver,
    inspect: impl FnOnce(&StereoCubemap) -> T,
) -> CubecastResult<T> {
    let handoff = sim.receiver.handoff();
    let composite = handoff.next_for_display().ok_or(CubecastError::Closed)?;
    let seen = inspect(&composite);
    handoff.recycle(composite)?;
    Ok(seen)
}

/// First byte of every face of a composite, in face order
pub fn face_tags(composite: &StereoCubemap) -> Vec<u8> {
    composite
        .iter_faces()
        .map(|f| f.content.data().first().copied().unwrap_or(0))
        .collect()
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// What a scenario observed
#[derive(Clone, Debug, Default)]
pub struct ScenarioOutcome {
    /// Gate decision per offered unit, in arrival order
    pub admissions: Vec<Admission>,
    /// Sync state after each offered unit
    pub sync: Vec<SyncState>,
    /// Tags the decoder received, in decode order
    pub decoded_tags: Vec<u8>,
    /// Units the gate counted as dropped
    pub dropped: u64,
    /// Tag of the reservation just before it was flushed
    pub reserved_tag: Option<u8>,
    /// Whether the reservation went out without a further arrival
    pub flushed_without_arrival: bool,
}

/// `[D, D, K, D]` into a single-slot face of a live receiver
pub fn scenario_sync_on_keyframe() -> CubecastResult<ScenarioOutcome> {
    let face = FaceIndex(0);
    let mut config = sim_config(SINGLE_FACE, 2);
    config.pools.picture_capacity = 2;
    let mut sim = SimReceiver::new(config)?;
    if sim.negotiate(cube_description(1))? != SessionState::Playing {
        return Err(CubecastError::Io("session did not reach playing".into()));
    }
    let channels = sim
        .receiver
        .channels(face)
        .cloned()
        .ok_or(CubecastError::FaceOutOfRange { face, faces: 1 })?;

    let mut outcome = ScenarioOutcome::default();
    let units = [dependent(1), dependent(2), keyframe(3), dependent(4)];
    for (i, unit) in units.iter().enumerate() {
        // the single packet must be back before the trailing unit arrives
        settle(&channels)?;
        let admission = sim.deliver(face, unit, PresentationTime::from_millis(i as i64))?;
        outcome.admissions.push(admission);
        if let Some(sink) = sim.receiver.sink_mut(face) {
            outcome.sync.push(sink.gate().sync_state());
        }
    }
    within("trailing unit to decode", || sim.decodes.len() == 2)?;

    outcome.decoded_tags = sim.decodes.tags(face);
    outcome.dropped = sim
        .receiver
        .sink_mut(face)
        .map(|sink| sink.gate().stats().dropped)
        .unwrap_or_default();
    sim.receiver.shutdown()?;
    Ok(outcome)
}

/// `[K1, K2, D]` with the only packet held by the decoder until K1 decodes
pub fn scenario_keyframe_reservation(policy: PendingKeyframePolicy) -> CubecastResult<ScenarioOutcome> {
    let face = FaceIndex(0);
    let pools = PoolConfig {
        packet_capacity: 1,
        picture_capacity: 1,
        exchange_capacity: 1,
    };
    let channels = Arc::new(FaceChannels::new(face, &pools, 16, PixelFormat::Gray8));
    let latch = Latch::new();
    let decoders = TagDecoders::new(2).with_latch(latch.clone());
    let log = decoders.log();
    let mut worker = DecodeWorker::spawn(Arc::clone(&channels), Box::new(decoders.decoder(face)))?;
    let mut gate = KeyframeGate::new(Arc::clone(&channels), policy);

    let mut outcome = ScenarioOutcome::default();
    let units = [keyframe(1), keyframe(2), dependent(3)];
    for (i, unit) in units.iter().enumerate() {
        let unit = EncodedUnit::new(Bytes::copy_from_slice(unit), PresentationTime::from_millis(i as i64));
        outcome.admissions.push(gate.on_unit(unit));
        outcome.sync.push(gate.sync_state());
        if i == 0 {
            within("decoder to take K1", || latch.waiting() == 1)?;
        }
    }
    outcome.reserved_tag = gate.pending().and_then(|u| u.data.get(1).copied());
    outcome.dropped = gate.stats().dropped;

    latch.release(1);
    within("K1's packet to return", || channels.packet_pool.available() == 1)?;
    outcome.flushed_without_arrival = gate.try_flush_pending();
    outcome.sync.push(gate.sync_state());

    // K1's picture occupies the only picture slot until it is sampled
    let first = channels.picture_queue.pop().ok_or(CubecastError::Closed)?;
    channels.picture_pool.release(first).map_err(|e| CubecastError::Allocation(e.to_string()))?;
    latch.open();
    within("reservation to decode", || log.len() == 2)?;

    channels.close();
    worker.shutdown();
    outcome.decoded_tags = log.tags(face);
    Ok(outcome)
}

/// Keyframe reserved while the decoder holds the only packet, then flushed
/// by the next arrival. Returns the packets at rest once everything drained.
pub fn scenario_flush_by_arrival() -> CubecastResult<usize> {
    let face = FaceIndex(0);
    let latch = Latch::new();
    let mut sim = SimReceiver::build(
        sim_config(SINGLE_FACE, 2),
        TagDecoders::new(2).with_latch(latch.clone()),
        ScriptedClient::default(),
        ScriptedSources::new(),
    )?;
    sim.negotiate(cube_description(1))?;
    let channels = sim
        .receiver
        .channels(face)
        .cloned()
        .ok_or(CubecastError::FaceOutOfRange { face, faces: 1 })?;

    sim.deliver(face, &keyframe(1), PresentationTime::from_millis(1))?;
    within("decoder to take K1", || latch.waiting() == 1)?;
    sim.deliver(face, &keyframe(2), PresentationTime::from_millis(2))?;
    latch.release(1);
    within("K1's packet to return", || channels.packet_pool.available() == 1)?;

    // the arriving unit's slot carries the reservation instead
    sim.deliver(face, &dependent(3), PresentationTime::from_millis(3))?;
    if let Some(picture) = channels.picture_queue.pop() {
        let _ = channels.picture_pool.release(picture);
    }
    latch.open();
    within("reservation to decode", || sim.decodes.len() == 2)?;
    settle(&channels)?;

    let at_rest = channels.packets_at_rest();
    sim.receiver.shutdown()?;
    Ok(at_rest)
}
