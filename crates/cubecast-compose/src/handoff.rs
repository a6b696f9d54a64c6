//! Render handoff
//!
//! Composites circulate between the assembler and the display consumer
//! through two queues: `spares` (consumer -> producer) and `inbound`
//! (producer -> consumer). The producer always owns exactly one write
//! buffer, so after warm-up `exchange_capacity + 1` composites circulate and
//! nothing else is ever allocated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use cubecast_core::{
    CubecastError, CubecastResult, CubemapLayout, EyeIndex, FaceIndex, PictureGeometry, StereoCubemap,
};
use cubecast_pool::{BoundedQueue, TryPopError};

/// Result of handing a finished composite to the consumer
#[derive(Debug)]
pub enum Exchange {
    /// The composite went to the consumer; write the next one into this spare
    Swapped(StereoCubemap),
    /// No spare was free; the composite comes back to be rewritten
    Kept(StereoCubemap),
    /// The handoff is shut down
    Closed,
}

impl Exchange {
    /// Buffer to write the next composite into, `None` on shutdown
    pub fn into_buffer(self) -> Option<StereoCubemap> {
        match self {
            Exchange::Swapped(buffer) | Exchange::Kept(buffer) => Some(buffer),
            Exchange::Closed => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Exchange::Closed)
    }
}

/// Handoff counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandoffStats {
    /// Composites delivered to the consumer
    pub swaps: u64,
    /// Exchanges that found no spare
    pub skips: u64,
    /// Composites returned by the consumer
    pub recycled: u64,
}

/// RenderHandoff - zero-allocation composite exchange
pub struct RenderHandoff {
    spares: BoundedQueue<StereoCubemap>,
    inbound: BoundedQueue<StereoCubemap>,
    /// Producer's initial write buffer, until taken
    write_buffer: Mutex<Option<StereoCubemap>>,
    swaps: AtomicU64,
    skips: AtomicU64,
    recycled: AtomicU64,
}

impl RenderHandoff {
    /// Preallocate `capacity` spares plus the producer's write buffer
    pub fn new(capacity: usize, layout: CubemapLayout, geometry: PictureGeometry) -> Self {
        let spares = (1..=capacity as u64).map(|id| StereoCubemap::allocate(id, layout, geometry));
        tracing::debug!(capacity, ?layout, "render handoff allocated");
        Self {
            spares: BoundedQueue::with_items(capacity, spares),
            inbound: BoundedQueue::new(capacity),
            write_buffer: Mutex::new(Some(StereoCubemap::allocate(0, layout, geometry))),
            swaps: AtomicU64::new(0),
            skips: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
        }
    }

    /// The producer's first write buffer; `None` after the first call
    pub fn take_write_buffer(&self) -> Option<StereoCubemap> {
        self.write_buffer.lock().take()
    }

    /// Producer side: offer a finished composite, get the next write buffer
    pub fn exchange(&self, composite: StereoCubemap) -> Exchange {
        if self.spares.is_closed() {
            return Exchange::Closed;
        }
        match self.spares.try_pop() {
            Ok(spare) => match self.inbound.push(composite) {
                Ok(()) => {
                    self.swaps.fetch_add(1, Ordering::Relaxed);
                    Exchange::Swapped(spare)
                }
                Err(_) => Exchange::Closed,
            },
            Err(TryPopError::Empty) => {
                self.skips.fetch_add(1, Ordering::Relaxed);
                Exchange::Kept(composite)
            }
            Err(TryPopError::Closed) => Exchange::Closed,
        }
    }

    /// Consumer side: block for the next composite. `None` once closed.
    pub fn next_for_display(&self) -> Option<StereoCubemap> {
        self.inbound.pop()
    }

    /// Consumer side: hand a presented composite back for reuse
    pub fn recycle(&self, composite: StereoCubemap) -> CubecastResult<()> {
        self.spares.push(composite)?;
        self.recycled.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Shut down both directions. Idempotent.
    pub fn close(&self) {
        self.inbound.close();
        self.spares.close();
    }

    pub fn is_closed(&self) -> bool {
        self.spares.is_closed()
    }

    /// Spares currently waiting for the producer
    pub fn spares_available(&self) -> usize {
        self.spares.len()
    }

    /// Composites waiting for the consumer
    pub fn pending_display(&self) -> usize {
        self.inbound.len()
    }

    pub fn stats(&self) -> HandoffStats {
        HandoffStats {
            swaps: self.swaps.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RenderHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHandoff")
            .field("spares", &self.spares)
            .field("inbound", &self.inbound)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Presenter - puts composites on screen
pub trait Presenter: Send {
    fn present(&mut self, composite: &StereoCubemap) -> CubecastResult<()>;
}

impl<F> Presenter for F
where
    F: FnMut(&StereoCubemap) -> CubecastResult<()> + Send,
{
    fn present(&mut self, composite: &StereoCubemap) -> CubecastResult<()> {
        self(composite)
    }
}

/// Optional presentation callbacks
#[derive(Default)]
pub struct DisplayObservers {
    /// Called per presented face with `face + eye * faces_per_eye`
    pub on_face: Option<Box<dyn FnMut(FaceIndex) + Send>>,
    /// Called per presented composite with its buffer id
    pub on_composite: Option<Box<dyn FnMut(u64) + Send>>,
}

/// Display - consumer loop over a `RenderHandoff`
pub struct Display {
    handoff: Arc<RenderHandoff>,
    presenter: Box<dyn Presenter>,
    observers: DisplayObservers,
    presented: Arc<AtomicU64>,
}

impl Display {
    pub fn new(handoff: Arc<RenderHandoff>, presenter: Box<dyn Presenter>, observers: DisplayObservers) -> Self {
        Self {
            handoff,
            presenter,
            observers,
            presented: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Present one composite, blocking until one arrives. `false` once closed.
    pub fn present_next(&mut self) -> bool {
        let Some(composite) = self.handoff.next_for_display() else {
            return false;
        };

        match self.presenter.present(&composite) {
            Ok(()) => {
                self.presented.fetch_add(1, Ordering::Relaxed);
                self.notify(&composite);
            }
            Err(e) => tracing::warn!(composite = composite.id(), error = %e, "present failed"),
        }

        self.handoff.recycle(composite).is_ok()
    }

    /// Present until the handoff closes
    pub fn run(&mut self) {
        while self.present_next() {}
        tracing::info!(presented = self.presented(), "display consumer stopped");
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    fn notify(&mut self, composite: &StereoCubemap) {
        if let Some(on_face) = self.observers.on_face.as_mut() {
            let per_eye = composite.layout().faces_per_eye;
            for (eye, cubemap) in composite.eyes().iter().enumerate() {
                for face in 0..cubemap.faces_count() {
                    on_face(FaceIndex::from_eye_face(EyeIndex(eye as u8), face as u8, per_eye));
                }
            }
        }
        if let Some(on_composite) = self.observers.on_composite.as_mut() {
            on_composite(composite.id());
        }
    }
}

/// DisplayConsumer - `Display` running on its own thread
pub struct DisplayConsumer {
    handoff: Arc<RenderHandoff>,
    presented: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl DisplayConsumer {
    pub fn spawn(
        handoff: Arc<RenderHandoff>,
        presenter: Box<dyn Presenter>,
        observers: DisplayObservers,
    ) -> CubecastResult<Self> {
        let mut display = Display::new(Arc::clone(&handoff), presenter, observers);
        let presented = Arc::clone(&display.presented);
        let handle = thread::Builder::new()
            .name("cubecast-display".into())
            .spawn(move || display.run())
            .map_err(|e| CubecastError::Io(e.to_string()))?;
        Ok(Self {
            handoff,
            presented,
            handle: Some(handle),
        })
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    /// Close the handoff and wait for the consumer to exit
    pub fn shutdown(&mut self) {
        self.handoff.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("display consumer panicked");
            }
        }
    }
}

impl Drop for DisplayConsumer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubecast_core::PixelFormat;
    use std::collections::BTreeSet;
    use std::time::{Duration, Instant};

    fn handoff(capacity: usize) -> Arc<RenderHandoff> {
        Arc::new(RenderHandoff::new(
            capacity,
            CubemapLayout { eyes: 2, faces_per_eye: 2 },
            PictureGeometry::square(1, PixelFormat::Gray8),
        ))
    }

    #[test]
    fn test_swap_then_keep_when_no_spare() {
        let h = handoff(1);
        let write = h.take_write_buffer().unwrap();
        assert!(h.take_write_buffer().is_none());

        let next = match h.exchange(write) {
            Exchange::Swapped(spare) => spare,
            other => panic!("expected swap, got {:?}", other),
        };
        assert_eq!(next.id(), 1);
        assert_eq!(h.pending_display(), 1);

        // consumer has not returned anything yet
        let kept = match h.exchange(next) {
            Exchange::Kept(buffer) => buffer,
            other => panic!("expected keep, got {:?}", other),
        };
        assert_eq!(kept.id(), 1);
        assert_eq!(h.stats(), HandoffStats { swaps: 1, skips: 1, recycled: 0 });
    }

    #[test]
    fn test_closed_exchange_signals_shutdown() {
        let h = handoff(2);
        let write = h.take_write_buffer().unwrap();
        h.close();
        h.close();
        assert!(h.exchange(write).is_closed());
        assert!(h.next_for_display().is_none());
    }

    #[test]
    fn test_fixed_buffer_set_after_warm_up() {
        let capacity = 2;
        let h = handoff(capacity);
        let mut write = h.take_write_buffer().unwrap();
        let mut seen = BTreeSet::new();

        for round in 0..50 {
            seen.insert(write.id());
            write = h.exchange(write).into_buffer().unwrap();
            // consumer presents every other round
            if round % 2 == 0 {
                while let Ok(shown) = h.inbound.try_pop() {
                    seen.insert(shown.id());
                    h.recycle(shown).unwrap();
                }
            }
        }
        assert_eq!(seen, (0..=capacity as u64).collect::<BTreeSet<_>>());
    }

    #[test]
    fn test_display_consumer_presents_and_recycles() {
        let h = handoff(1);
        let faces = Arc::new(Mutex::new(Vec::new()));
        let composites = Arc::new(Mutex::new(Vec::new()));
        let observers = DisplayObservers {
            on_face: Some(Box::new({
                let faces = Arc::clone(&faces);
                move |face: FaceIndex| faces.lock().push(face.0)
            })),
            on_composite: Some(Box::new({
                let composites = Arc::clone(&composites);
                move |id: u64| composites.lock().push(id)
            })),
        };
        let presenter = |_: &StereoCubemap| -> CubecastResult<()> { Ok(()) };
        let mut consumer = DisplayConsumer::spawn(Arc::clone(&h), Box::new(presenter), observers).unwrap();

        let write = h.take_write_buffer().unwrap();
        let _next = h.exchange(write).into_buffer().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while h.spares_available() == 0 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(consumer.presented(), 1);
        assert_eq!(*faces.lock(), vec![0, 1, 2, 3]);
        assert_eq!(*composites.lock(), vec![0]);

        consumer.shutdown();
        assert!(h.is_closed());
    }

    #[test]
    fn test_failed_present_still_recycles() {
        let h = handoff(1);
        let presenter = |_: &StereoCubemap| -> CubecastResult<()> { Err(CubecastError::Io("surface lost".into())) };
        let mut display = Display::new(Arc::clone(&h), Box::new(presenter), DisplayObservers::default());
        let write = h.take_write_buffer().unwrap();
        let _next = h.exchange(write);

        assert!(display.present_next());
        assert_eq!(display.presented(), 0);
        assert_eq!(h.spares_available(), 1);
    }
}
