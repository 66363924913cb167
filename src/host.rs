//! Host collaborator surface — scratch buffers and fatal-error reporting.
//!
//! The runtime never allocates byte storage on its own: string contents and
//! bytecode live in fixed-size scratch buffers handed out by the embedding
//! host. A [`ScratchBuffer`] is a shared-ownership handle; the data-buffer
//! cell that owns it releases the handle when the cell is finalized.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Size of one host scratch buffer, in bytes.
pub const SCRATCH_BUFFER_SIZE: usize = 2048;

/// Shared-ownership handle to a fixed-size host byte block.
#[derive(Clone)]
pub struct ScratchBuffer {
    data: Rc<RefCell<[u8; SCRATCH_BUFFER_SIZE]>>,
}

impl ScratchBuffer {
    pub fn new() -> Self {
        Self {
            data: Rc::new(RefCell::new([0u8; SCRATCH_BUFFER_SIZE])),
        }
    }

    /// Read access to the buffer contents.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.borrow()[..])
    }

    /// Write access to the buffer contents.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.data.borrow_mut()[..])
    }

    fn downgrade(&self) -> Weak<RefCell<[u8; SCRATCH_BUFFER_SIZE]>> {
        Rc::downgrade(&self.data)
    }
}

impl Default for ScratchBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScratchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScratchBuffer({} refs)", Rc::strong_count(&self.data))
    }
}

/// A host-provided (name, integer) pair that backs variable lookup after
/// the lexical chain and globals tree both miss.
#[derive(Clone, Copy, Debug)]
pub struct IntegralConstant {
    pub name: &'static str,
    pub value: i32,
}

/// Everything the runtime needs from the embedding host.
pub trait Host {
    /// Hand out a fresh scratch buffer.
    fn make_scratch_buffer(&mut self) -> ScratchBuffer;

    /// Hint for how many more scratch buffers the host can provide.
    /// The runtime pre-collects before allocating a data buffer when this
    /// reaches zero.
    fn scratch_buffers_remaining(&self) -> usize;

    /// Abort with a message. Must not return.
    fn fatal(&mut self, msg: &str) -> !;
}

/// Default host backed by process memory, with a fixed buffer budget.
pub struct StdHost {
    budget: usize,
    outstanding: Vec<Weak<RefCell<[u8; SCRATCH_BUFFER_SIZE]>>>,
}

impl StdHost {
    pub fn new() -> Self {
        Self::with_budget(64)
    }

    pub fn with_budget(budget: usize) -> Self {
        Self {
            budget,
            outstanding: Vec::new(),
        }
    }

    fn live_count(&self) -> usize {
        self.outstanding
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

impl Default for StdHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for StdHost {
    fn make_scratch_buffer(&mut self) -> ScratchBuffer {
        self.outstanding.retain(|w| w.strong_count() > 0);
        let buffer = ScratchBuffer::new();
        self.outstanding.push(buffer.downgrade());
        buffer
    }

    fn scratch_buffers_remaining(&self) -> usize {
        self.budget.saturating_sub(self.live_count())
    }

    fn fatal(&mut self, msg: &str) -> ! {
        panic!("fatal host error: {msg}");
    }
}
