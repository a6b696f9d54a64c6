//! Per-face decode worker
//!
//! One thread per face. The worker blocks only on its own packet queue and
//! picture pool; closing either ends the loop.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cubecast_core::{CubecastError, CubecastResult, FaceIndex, WallTime};
use cubecast_pool::{ReleaseError, Slot, SlotPool};

use crate::{DecodeOutcome, FaceChannels, VideoDecoder};

/// Packets per latency reporting window
pub const LATENCY_WINDOW: u64 = 100;

#[derive(Debug, Default)]
struct WorkerCounters {
    packets: AtomicU64,
    decoded: AtomicU64,
    no_picture: AtomicU64,
    failures: AtomicU64,
    window_avg_lag_us: AtomicI64,
    window_max_lag_us: AtomicI64,
}

/// Decode worker counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Packets taken off the queue
    pub packets: u64,
    /// Pictures published
    pub decoded: u64,
    /// Packets that completed no picture
    pub no_picture: u64,
    /// Packets the decoder rejected
    pub failures: u64,
    /// Mean lag of the last full window, in microseconds
    pub window_avg_lag_us: i64,
    /// Worst lag of the last full window, in microseconds
    pub window_max_lag_us: i64,
}

/// Running presentation lag over one window
#[derive(Debug, Default)]
struct LatencyWindow {
    count: u64,
    sum: i64,
    max: i64,
}

impl LatencyWindow {
    /// Record one lag; returns (avg, max) when the window completes
    fn record(&mut self, lag: i64) -> Option<(i64, i64)> {
        if self.count == 0 || lag > self.max {
            self.max = lag;
        }
        self.sum = self.sum.saturating_add(lag);
        self.count += 1;
        if self.count < LATENCY_WINDOW {
            return None;
        }
        let result = (self.sum / self.count as i64, self.max);
        *self = LatencyWindow::default();
        Some(result)
    }
}

/// DecodeWorker - handle to a face's decode thread
pub struct DecodeWorker {
    face: FaceIndex,
    channels: Arc<FaceChannels>,
    counters: Arc<WorkerCounters>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    /// Start decoding `channels` with `decoder` on a new thread
    pub fn spawn(channels: Arc<FaceChannels>, decoder: Box<dyn VideoDecoder>) -> CubecastResult<Self> {
        let face = channels.face;
        let counters = Arc::new(WorkerCounters::default());
        let handle = {
            let channels = Arc::clone(&channels);
            let counters = Arc::clone(&counters);
            thread::Builder::new()
                .name(format!("cubecast-decode-{}", face))
                .spawn(move || run(&channels, decoder, &counters))
                .map_err(|e| CubecastError::Io(e.to_string()))?
        };
        tracing::debug!(face = %face, "decode worker started");
        Ok(Self {
            face,
            channels,
            counters,
            handle: Some(handle),
        })
    }

    pub fn face(&self) -> FaceIndex {
        self.face
    }

    pub fn stats(&self) -> WorkerStats {
        let c = &self.counters;
        WorkerStats {
            packets: c.packets.load(Ordering::Relaxed),
            decoded: c.decoded.load(Ordering::Relaxed),
            no_picture: c.no_picture.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            window_avg_lag_us: c.window_avg_lag_us.load(Ordering::Relaxed),
            window_max_lag_us: c.window_max_lag_us.load(Ordering::Relaxed),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Close the face's channels and wait for the thread to exit
    pub fn shutdown(&mut self) {
        self.channels.close();
        self.join();
    }

    /// Wait for the thread to exit without closing anything
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(face = %self.face, "decode worker panicked");
            }
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DecodeWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeWorker")
            .field("face", &self.face)
            .field("running", &!self.is_finished())
            .field("stats", &self.stats())
            .finish()
    }
}

fn run(channels: &FaceChannels, mut decoder: Box<dyn VideoDecoder>, counters: &WorkerCounters) {
    let face = channels.face;
    let mut window = LatencyWindow::default();

    while let Some(packet) = channels.packet_queue.pop() {
        counters.packets.fetch_add(1, Ordering::Relaxed);

        let Some(mut picture) = channels.picture_pool.acquire() else {
            recycle(face, &channels.packet_pool, packet);
            break;
        };

        if let Some((avg, max)) = window.record(packet.pts().lag_behind(WallTime::now())) {
            counters.window_avg_lag_us.store(avg, Ordering::Relaxed);
            counters.window_max_lag_us.store(max, Ordering::Relaxed);
            tracing::debug!(face = %face, avg_lag_us = avg, max_lag_us = max, "decode latency");
        }

        match decoder.decode(&packet, &mut picture) {
            Ok(DecodeOutcome::Picture) => {
                picture.pts = packet.pts();
                counters.decoded.fetch_add(1, Ordering::Relaxed);
                if let Err(rejected) = channels.picture_queue.push(picture) {
                    recycle(face, &channels.picture_pool, rejected.into_inner());
                }
            }
            Ok(DecodeOutcome::NoPicture) => {
                counters.no_picture.fetch_add(1, Ordering::Relaxed);
                recycle(face, &channels.picture_pool, picture);
            }
            Err(e) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(face = %face, decoder = decoder.name(), error = %e, "packet rejected");
                recycle(face, &channels.picture_pool, picture);
            }
        }

        recycle(face, &channels.packet_pool, packet);
    }

    tracing::info!(face = %face, "decode worker stopped");
}

/// Hand a slot back to its pool. Returns whether the pool took it.
fn recycle<T>(face: FaceIndex, pool: &SlotPool<T>, slot: Slot<T>) -> bool {
    match pool.release(slot) {
        Ok(()) => true,
        // a closed pool retires the slot
        Err(ReleaseError::Closed(_)) => false,
        Err(ReleaseError::Foreign(slot)) => {
            tracing::warn!(face = %face, pool = pool.name(), slot = ?slot.id(), "slot from another pool dropped");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cubecast_core::{
        EncodedUnit, Picture, PictureGeometry, PixelFormat, PoolConfig, PresentationTime, UnitKind,
    };
    use std::time::{Duration, Instant};

    use crate::EncodedPacket;

    /// Writes the payload's second byte into a 1x1 gray picture; odd bytes
    /// complete no picture, 0xFF is rejected
    struct TagDecoder;

    impl VideoDecoder for TagDecoder {
        fn decode(&mut self, packet: &EncodedPacket, picture: &mut Picture) -> CubecastResult<DecodeOutcome> {
            let tag = packet.payload().get(1).copied().unwrap_or(0);
            if tag == 0xFF {
                return Err(CubecastError::Decode("corrupt".into()));
            }
            if tag % 2 == 1 {
                return Ok(DecodeOutcome::NoPicture);
            }
            picture.reshape(PictureGeometry::new(1, 1, PixelFormat::Gray8));
            picture.data_mut()[0] = tag;
            Ok(DecodeOutcome::Picture)
        }
    }

    fn channels(packets: usize, pictures: usize) -> Arc<FaceChannels> {
        let pools = PoolConfig {
            packet_capacity: packets,
            picture_capacity: pictures,
            exchange_capacity: 1,
        };
        Arc::new(FaceChannels::new(FaceIndex(1), &pools, 16, PixelFormat::Gray8))
    }

    fn submit(ch: &FaceChannels, tag: u8, millis: i64) {
        let mut slot = ch.packet_pool.acquire().unwrap();
        let unit = EncodedUnit::with_kind(
            Bytes::from(vec![0x41, tag]),
            UnitKind::Dependent,
            PresentationTime::from_millis(millis),
        );
        slot.package(&unit, tag as u64);
        ch.packet_queue.push(slot).unwrap();
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_publishes_stamped_pictures_in_order() {
        let ch = channels(2, 4);
        let worker = DecodeWorker::spawn(Arc::clone(&ch), Box::new(TagDecoder)).unwrap();

        submit(&ch, 2, 10);
        submit(&ch, 4, 20);
        let first = ch.picture_queue.pop().unwrap();
        let second = ch.picture_queue.pop().unwrap();
        assert_eq!((first.data()[0], first.pts), (2, PresentationTime::from_millis(10)));
        assert_eq!((second.data()[0], second.pts), (4, PresentationTime::from_millis(20)));

        wait_until(|| worker.stats().decoded == 2);
        ch.picture_pool.release(first).unwrap();
        ch.picture_pool.release(second).unwrap();
    }

    #[test]
    fn test_failures_recycle_both_buffers() {
        let ch = channels(1, 1);
        let worker = DecodeWorker::spawn(Arc::clone(&ch), Box::new(TagDecoder)).unwrap();

        submit(&ch, 0xFF, 0);
        wait_until(|| worker.stats().failures == 1);
        submit(&ch, 3, 0);
        wait_until(|| worker.stats().no_picture == 1);
        submit(&ch, 6, 0);

        let picture = ch.picture_queue.pop().unwrap();
        assert_eq!(picture.data()[0], 6);
        wait_until(|| ch.packet_pool.available() == 1);
        assert_eq!(ch.picture_pool.available(), 0);
        ch.picture_pool.release(picture).unwrap();
    }

    #[test]
    fn test_close_stops_blocked_worker() {
        let ch = channels(1, 1);
        let mut worker = DecodeWorker::spawn(Arc::clone(&ch), Box::new(TagDecoder)).unwrap();
        thread::sleep(Duration::from_millis(10));
        assert!(!worker.is_finished());

        ch.close();
        let start = Instant::now();
        worker.join();
        assert!(worker.is_finished());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_blocked_on_pictures_exits_on_close() {
        // the only picture is held downstream, so the worker waits on the pool
        let ch = channels(2, 1);
        let mut worker = DecodeWorker::spawn(Arc::clone(&ch), Box::new(TagDecoder)).unwrap();
        submit(&ch, 2, 0);
        let held = ch.picture_queue.pop().unwrap();
        submit(&ch, 4, 0);
        wait_until(|| worker.stats().packets == 2);

        worker.shutdown();
        assert!(worker.is_finished());
        assert_eq!(worker.stats().decoded, 1);
        drop(held);
    }

    #[test]
    fn test_recycle_rejects_foreign_and_closed() {
        let own = SlotPool::new("own", 1, |_| 0u8);
        let other = SlotPool::new("other", 1, |_| 0u8);

        let slot = own.try_acquire().unwrap();
        assert!(recycle(FaceIndex(1), &own, slot));
        assert_eq!(own.available(), 1);

        let stray = other.try_acquire().unwrap();
        assert!(!recycle(FaceIndex(1), &own, stray));
        assert_eq!(own.available(), 1);
        assert_eq!(other.outstanding(), 1);

        let held = own.try_acquire().unwrap();
        own.close();
        assert!(!recycle(FaceIndex(1), &own, held));
    }

    #[test]
    fn test_latency_window() {
        let mut window = LatencyWindow::default();
        for i in 0..LATENCY_WINDOW - 1 {
            assert_eq!(window.record(i as i64), None);
        }
        assert_eq!(window.record(1000), Some(((4851 + 1000) / 100, 1000)));
        assert_eq!(window.count, 0);
    }
}
