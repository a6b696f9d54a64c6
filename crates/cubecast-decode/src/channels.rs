//! Per-face pools and queues

use cubecast_core::{FaceIndex, Picture, PictureGeometry, PixelFormat, PoolConfig};
use cubecast_pool::{BoundedQueue, Slot, SlotPool};

use crate::EncodedPacket;

/// Pooled packet handle
pub type PacketSlot = Slot<EncodedPacket>;

/// Pooled picture handle
pub type PictureSlot = Slot<Picture>;

/// FaceChannels - everything one face's stages exchange buffers through
///
/// Packets: `packet_pool` -> gate -> `packet_queue` -> worker -> `packet_pool`.
/// Pictures: `picture_pool` -> worker -> `picture_queue` -> sampler -> `picture_pool`.
pub struct FaceChannels {
    pub face: FaceIndex,
    /// Free encoded packets (capacity C)
    pub packet_pool: SlotPool<EncodedPacket>,
    /// Admitted packets awaiting decode, in admission order
    pub packet_queue: BoundedQueue<PacketSlot>,
    /// Free decode buffers (capacity F)
    pub picture_pool: SlotPool<Picture>,
    /// Decoded pictures awaiting sampling, in decode-completion order
    pub picture_queue: BoundedQueue<PictureSlot>,
}

impl FaceChannels {
    /// Allocate a face's pools; `packet_bytes` sizes each packet buffer up front
    pub fn new(face: FaceIndex, pools: &PoolConfig, packet_bytes: usize, format: PixelFormat) -> Self {
        let packet_capacity = pools.packet_capacity;
        let picture_capacity = pools.picture_capacity;
        Self {
            face,
            packet_pool: SlotPool::new("packets", packet_capacity, |_| {
                EncodedPacket::with_capacity(packet_bytes)
            }),
            packet_queue: BoundedQueue::new(packet_capacity),
            // decoders reshape pictures to the stream's geometry on first use
            picture_pool: SlotPool::new("pictures", picture_capacity, |_| {
                Picture::new(PictureGeometry::new(0, 0, format))
            }),
            picture_queue: BoundedQueue::new(picture_capacity),
        }
    }

    /// Close every pool and queue of this face. Idempotent.
    pub fn close(&self) {
        self.packet_queue.close();
        self.packet_pool.close();
        self.picture_queue.close();
        self.picture_pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.packet_queue.is_closed()
    }

    /// Packets in the pool or queued for decode; the remainder is in flight
    pub fn packets_at_rest(&self) -> usize {
        self.packet_pool.available() + self.packet_queue.len()
    }

    /// Pictures in the pool or queued for sampling
    pub fn pictures_at_rest(&self) -> usize {
        self.picture_pool.available() + self.picture_queue.len()
    }
}

impl std::fmt::Debug for FaceChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceChannels")
            .field("face", &self.face)
            .field("packet_pool", &self.packet_pool)
            .field("packet_queue", &self.packet_queue)
            .field("picture_pool", &self.picture_pool)
            .field("picture_queue", &self.picture_queue)
            .finish()
    }
}
