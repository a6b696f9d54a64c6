//! CUBECAST Pool - Buffer exchange primitives
//!
//! Every buffer that crosses a thread boundary travels through one of these:
//! - `BoundedQueue`: closable blocking FIFO (pop / try_pop / push / close)
//! - `SlotPool`: fixed-capacity arena of preallocated buffers, handed out as
//!   owned `Slot` handles and moved back on release
//!
//! Blocking happens only inside `pop`/`acquire`. Closing is the single
//! cancellation primitive: it wakes every waiter and is irreversible.

pub mod queue;
pub mod arena;

pub use queue::*;
pub use arena::*;
