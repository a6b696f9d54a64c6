//! Chaos testing for a face pipeline
//!
//! Drives a live keyframe gate, decode worker and face sampler with a
//! seeded stream of hostile arrivals:
//! - Streams joined mid-group
//! - Random and burst loss
//! - Corrupt units the decoder rejects
//! - Truncated deliveries
//! - Irregular sampling, so the picture pool backs up

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cubecast_compose::{FaceSampler, NearestScalerFactory};
use cubecast_core::{
    CubecastResult, EncodedUnit, FaceIndex, PendingKeyframePolicy, PictureGeometry, PixelFormat, PoolConfig,
    PresentationTime, UnitKind,
};
use cubecast_decode::{Admission, DecodeWorker, FaceChannels, KeyframeGate};

use crate::sim::{wait_until, TagDecoders, CORRUPT_TAG, DEPENDENT_HEADER, KEYFRAME_HEADER};

/// Longest a run may take to drain once arrivals stop
pub const QUIESCE_TIMEOUT: Duration = Duration::from_secs(10);

const PICTURE_SIZE: u32 = 4;

/// Arrival chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Units offered to the gate, lost ones excluded
    pub units: usize,
    /// Units per group; each group opens with a keyframe
    pub gop: u32,
    /// Independent loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability that a loss starts a burst
    pub burst_loss_prob: f64,
    /// Burst loss length range
    pub burst_length: (u32, u32),
    /// Probability that a unit is undecodable
    pub corrupt_prob: f64,
    /// Probability that a delivery was truncated
    pub truncate_prob: f64,
    /// Probability that the sampler pulls after an arrival
    pub sample_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            units: 400,
            gop: 12,
            loss_rate: 0.02,
            burst_loss_prob: 0.1,
            burst_length: (2, 5),
            corrupt_prob: 0.01,
            truncate_prob: 0.01,
            sample_prob: 0.5,
        }
    }
}

impl ChaosConfig {
    /// Clean link, sampler keeping up
    pub fn good() -> Self {
        ChaosConfig {
            units: 300,
            gop: 30,
            loss_rate: 0.001,
            burst_loss_prob: 0.0,
            burst_length: (1, 2),
            corrupt_prob: 0.0,
            truncate_prob: 0.0,
            sample_prob: 0.9,
        }
    }

    /// Lossy link, slow sampler
    pub fn poor() -> Self {
        ChaosConfig {
            units: 500,
            gop: 8,
            loss_rate: 0.05,
            burst_loss_prob: 0.2,
            burst_length: (3, 8),
            corrupt_prob: 0.03,
            truncate_prob: 0.05,
            sample_prob: 0.3,
        }
    }

    /// Heavy loss, frequent corruption, sampler mostly stalled
    pub fn hostile() -> Self {
        ChaosConfig {
            units: 800,
            gop: 5,
            loss_rate: 0.15,
            burst_loss_prob: 0.3,
            burst_length: (5, 15),
            corrupt_prob: 0.1,
            truncate_prob: 0.1,
            sample_prob: 0.05,
        }
    }
}

/// One unit as it reaches the gate
#[derive(Clone, Debug)]
pub struct Arrival {
    /// Position in the sender's stream, lost units included
    pub index: u64,
    pub unit: EncodedUnit,
}

/// Arrival generator statistics
#[derive(Clone, Debug, Default)]
pub struct ArrivalStats {
    pub sent: u64,
    pub delivered: u64,
    pub lost: u64,
    pub keyframes: u64,
    pub corrupt: u64,
    pub truncated: u64,
}

impl ArrivalStats {
    pub fn loss_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.lost as f64 / self.sent as f64
        }
    }
}

/// ArrivalGenerator - seeded stream of units as a lossy link delivers them
pub struct ArrivalGenerator {
    config: ChaosConfig,
    rng: StdRng,
    next_index: u64,
    burst_remaining: u32,
    stats: ArrivalStats,
}

impl ArrivalGenerator {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        // join somewhere inside the first group
        let next_index = rng.gen_range(0..config.gop.max(1)) as u64;
        Self {
            config,
            rng,
            next_index,
            burst_remaining: 0,
            stats: ArrivalStats::default(),
        }
    }

    pub fn stats(&self) -> &ArrivalStats {
        &self.stats
    }

    fn should_drop(&mut self) -> bool {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }
        if self.rng.gen_bool(self.config.loss_rate) {
            if self.rng.gen_bool(self.config.burst_loss_prob) {
                let (min, max) = self.config.burst_length;
                self.burst_remaining = self.rng.gen_range(min..=max.max(min)).saturating_sub(1);
            }
            return true;
        }
        false
    }

    fn build(&mut self, index: u64) -> EncodedUnit {
        let keyframe = index % self.config.gop.max(1) as u64 == 0;
        let header = if keyframe { KEYFRAME_HEADER } else { DEPENDENT_HEADER };
        let tag = if self.rng.gen_bool(self.config.corrupt_prob) {
            self.stats.corrupt += 1;
            CORRUPT_TAG
        } else {
            (index % 250) as u8
        };
        let truncated = if self.rng.gen_bool(self.config.truncate_prob) {
            self.stats.truncated += 1;
            self.rng.gen_range(1..1500)
        } else {
            0
        };
        if keyframe {
            self.stats.keyframes += 1;
        }

        EncodedUnit::new(
            Bytes::from(vec![header, tag]),
            PresentationTime::from_millis(index as i64),
        )
        .with_truncated(truncated)
    }
}

impl Iterator for ArrivalGenerator {
    type Item = Arrival;

    fn next(&mut self) -> Option<Arrival> {
        while self.stats.delivered < self.config.units as u64 {
            let index = self.next_index;
            self.next_index += 1;
            self.stats.sent += 1;
            if self.should_drop() {
                self.stats.lost += 1;
                continue;
            }
            self.stats.delivered += 1;
            let unit = self.build(index);
            return Some(Arrival { index, unit });
        }
        None
    }
}

/// Result of one chaos run
#[derive(Clone, Debug, Default)]
pub struct ChaosResult {
    pub arrivals: ArrivalStats,
    pub admitted: u64,
    pub dropped: u64,
    pub flushed: u64,
    /// Packets the decoder was handed
    pub decoded: u64,
    pub fresh_samples: u64,
    pub invariant_violations: Vec<String>,
}

impl ChaosResult {
    pub fn passed(&self) -> bool {
        self.invariant_violations.is_empty()
    }
}

/// ChaosHarness - one face pipeline under seeded chaos
#[derive(Clone, Debug)]
pub struct ChaosHarness {
    config: ChaosConfig,
    pools: PoolConfig,
    policy: PendingKeyframePolicy,
    seed: u64,
}

impl ChaosHarness {
    pub fn new(config: ChaosConfig, pools: PoolConfig, seed: u64) -> Self {
        Self {
            config,
            pools,
            policy: PendingKeyframePolicy::KeepFirst,
            seed,
        }
    }

    pub fn with_policy(mut self, policy: PendingKeyframePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Offer every arrival, let the pipeline drain, then check invariants
    pub fn run(&self) -> CubecastResult<ChaosResult> {
        let face = FaceIndex(0);
        let channels = Arc::new(FaceChannels::new(face, &self.pools, 64, PixelFormat::Gray8));
        let decoders = TagDecoders::new(PICTURE_SIZE);
        let log = decoders.log();
        let mut worker = DecodeWorker::spawn(Arc::clone(&channels), Box::new(decoders.decoder(face)))?;

        let mut gate = KeyframeGate::new(Arc::clone(&channels), self.policy);
        let admissions: Arc<Mutex<Vec<(UnitKind, Admission)>>> = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&admissions);
        gate.set_observer(Box::new(move |_, kind, admission| observed.lock().push((kind, admission))));

        let target = PictureGeometry::square(PICTURE_SIZE, PixelFormat::Gray8);
        let mut sampler = FaceSampler::new(face, target, Arc::new(NearestScalerFactory));
        sampler.attach(Arc::clone(&channels));

        let mut rng = StdRng::seed_from_u64(self.seed.rotate_left(17));
        let mut violations = Vec::new();
        let mut arrivals = ArrivalGenerator::new(self.config.clone(), self.seed);

        for arrival in arrivals.by_ref() {
            gate.on_unit(arrival.unit);
            gate.try_flush_pending();

            if channels.packet_pool.available() > self.pools.packet_capacity {
                violations.push(format!("packet pool over capacity at unit {}", arrival.index));
            }
            if channels.picture_pool.available() > self.pools.picture_capacity {
                violations.push(format!("picture pool over capacity at unit {}", arrival.index));
            }
            if rng.gen_bool(self.config.sample_prob) {
                sampler.sample_latest();
            }
        }

        let packets = self.pools.packet_capacity;
        let settled = wait_until(QUIESCE_TIMEOUT, || {
            gate.try_flush_pending();
            sampler.sample_latest();
            !gate.has_pending() && channels.packet_queue.is_empty() && channels.packet_pool.available() == packets
        });
        if !settled {
            violations.push(format!(
                "pipeline did not drain: {} packets free, {} queued",
                channels.packet_pool.available(),
                channels.packet_queue.len()
            ));
        }
        while !channels.picture_queue.is_empty() {
            sampler.sample_latest();
        }
        if channels.picture_pool.available() != self.pools.picture_capacity {
            violations.push(format!(
                "pictures leaked: {} of {} back in the pool",
                channels.picture_pool.available(),
                self.pools.picture_capacity
            ));
        }

        let decoded = log.units();
        match decoded.first() {
            Some(first) if first.kind != UnitKind::Keyframe => {
                violations.push(format!("first decoded unit {} is not a keyframe", first.sequence));
            }
            _ => {}
        }
        for (expected, unit) in decoded.iter().enumerate() {
            if unit.sequence != expected as u64 {
                violations.push(format!("decoded sequence {} at position {}", unit.sequence, expected));
                break;
            }
        }
        if decoded.windows(2).any(|w| w[0].pts >= w[1].pts) {
            violations.push("decode order went back in time".to_string());
        }

        let stats = gate.stats().clone();
        if stats.received != stats.admitted + stats.dropped {
            violations.push(format!(
                "gate miscounted: {} received, {} admitted, {} dropped",
                stats.received, stats.admitted, stats.dropped
            ));
        }
        if decoded.len() as u64 != stats.admitted + stats.flushed {
            violations.push(format!(
                "{} packets decoded for {} admitted and {} flushed",
                decoded.len(),
                stats.admitted,
                stats.flushed
            ));
        }
        if admissions.lock().len() as u64 != stats.received {
            violations.push("observer missed admission decisions".to_string());
        }

        channels.close();
        worker.shutdown();
        if !worker.is_finished() {
            violations.push("decode worker still running after shutdown".to_string());
        }

        tracing::debug!(
            seed = self.seed,
            admitted = stats.admitted,
            dropped = stats.dropped,
            decoded = decoded.len(),
            violations = violations.len(),
            "chaos run finished"
        );
        Ok(ChaosResult {
            arrivals: arrivals.stats().clone(),
            admitted: stats.admitted,
            dropped: stats.dropped,
            flushed: stats.flushed,
            decoded: decoded.len() as u64,
            fresh_samples: sampler.stats().fresh,
            invariant_violations: violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pools(packets: usize, pictures: usize) -> PoolConfig {
        PoolConfig {
            packet_capacity: packets,
            picture_capacity: pictures,
            exchange_capacity: 1,
        }
    }

    #[test]
    fn test_generator_is_deterministic() {
        let a: Vec<u64> = ArrivalGenerator::new(ChaosConfig::poor(), 7).map(|a| a.index).collect();
        let b: Vec<u64> = ArrivalGenerator::new(ChaosConfig::poor(), 7).map(|a| a.index).collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), ChaosConfig::poor().units);
    }

    #[test]
    fn test_generator_loss() {
        let mut generator = ArrivalGenerator::new(ChaosConfig::hostile(), 42);
        let delivered = generator.by_ref().count();
        let stats = generator.stats();
        assert_eq!(delivered as u64, stats.delivered);
        assert_eq!(stats.sent, stats.delivered + stats.lost);
        assert!(stats.loss_rate() > 0.05, "loss rate {}", stats.loss_rate());
    }

    #[test]
    fn test_generator_groups_open_with_keyframes() {
        let config = ChaosConfig {
            loss_rate: 0.0,
            corrupt_prob: 0.0,
            ..ChaosConfig::default()
        };
        for arrival in ArrivalGenerator::new(config.clone(), 3) {
            let expected = arrival.index % config.gop as u64 == 0;
            assert_eq!(arrival.unit.kind.is_keyframe(), expected);
        }
    }

    #[test]
    fn test_good_link() {
        let result = ChaosHarness::new(ChaosConfig::good(), pools(4, 2), 1).run().unwrap();
        assert!(result.passed(), "{:?}", result.invariant_violations);
        assert!(result.decoded > 0);
        assert!(result.fresh_samples > 0);
    }

    #[test]
    fn test_poor_link_single_slots() {
        let result = ChaosHarness::new(ChaosConfig::poor(), pools(1, 1), 2).run().unwrap();
        assert!(result.passed(), "{:?}", result.invariant_violations);
    }

    #[test]
    fn test_hostile_link_latest_keyframe() {
        let result = ChaosHarness::new(ChaosConfig::hostile(), pools(1, 1), 3)
            .with_policy(PendingKeyframePolicy::ReplaceWithLatest)
            .run()
            .unwrap();
        assert!(result.passed(), "{:?}", result.invariant_violations);
        assert!(result.dropped > 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_invariants_hold_for_any_seed(
            seed in any::<u64>(),
            packets in 1usize..4,
            pictures in 1usize..3,
            latest in any::<bool>(),
        ) {
            let policy = if latest {
                PendingKeyframePolicy::ReplaceWithLatest
            } else {
                PendingKeyframePolicy::KeepFirst
            };
            let config = ChaosConfig { units: 150, ..ChaosConfig::poor() };
            let result = ChaosHarness::new(config, pools(packets, pictures), seed)
                .with_policy(policy)
                .run()
                .unwrap();
            prop_assert!(result.passed(), "{:?}", result.invariant_violations);
        }
    }
}
