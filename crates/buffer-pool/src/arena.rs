//! Lock-Free Buffer Arena Implementation

use isp_protocol::{
    BufferDescriptor, BufferHandle, BufferPool, FreeBuffer, IspError, LogicalCaptureMode,
};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Largest arena the 16-bit handles can address
pub const MAX_ARENA_SLOTS: usize = u16::MAX as usize;

const FREE: u8 = 0;
const HARDWARE: u8 = 1;
const CONSUMER: u8 = 2;

/// Stage currently owning a buffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOwner {
    /// In the free list
    Free,
    /// Programmed into an engine register
    Hardware,
    /// Delivered to the consumer
    Consumer,
}

impl SlotOwner {
    fn from_raw(raw: u8) -> Self {
        match raw {
            FREE => SlotOwner::Free,
            HARDWARE => SlotOwner::Hardware,
            _ => SlotOwner::Consumer,
        }
    }
}

/// Arena construction errors
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("Arena holds at most {max} buffers, got {requested}")]
    TooManySlots { requested: usize, max: usize },

    #[error("Buffer layout for {0:?} overflows the address or fd range")]
    LayoutOverflow(LogicalCaptureMode),
}

/// Pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    /// Successful reservations
    pub reserved: usize,
    /// Reservations refused for lack of a free buffer
    pub exhausted: usize,
    /// Buffers returned to the free list
    pub released: usize,
}

struct Slot {
    mode: LogicalCaptureMode,
    desc: BufferDescriptor,
    owner: AtomicU8,
}

/// Fixed-capacity buffer pool
///
/// Every slot carries an atomic owner tag; each handoff is a single
/// compare-exchange, so a buffer can never be both free and owned.
pub struct BufferArena {
    /// Pre-registered buffers
    slots: Box<[Slot]>,
    reserved: AtomicUsize,
    exhausted: AtomicUsize,
    released: AtomicUsize,
}

impl BufferArena {
    /// Create an arena from `(mode, descriptor)` pairs; handles follow input order
    pub fn new<I>(buffers: I) -> Result<Self, ArenaError>
    where
        I: IntoIterator<Item = (LogicalCaptureMode, BufferDescriptor)>,
    {
        let slots: Vec<Slot> = buffers
            .into_iter()
            .map(|(mode, desc)| Slot {
                mode,
                desc,
                owner: AtomicU8::new(FREE),
            })
            .collect();

        if slots.len() > MAX_ARENA_SLOTS {
            return Err(ArenaError::TooManySlots {
                requested: slots.len(),
                max: MAX_ARENA_SLOTS,
            });
        }

        info!("Creating buffer arena with {} buffers", slots.len());

        Ok(Self {
            slots: slots.into_boxed_slice(),
            reserved: AtomicUsize::new(0),
            exhausted: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        })
    }

    /// Total number of buffers
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Free buffers registered for `mode`
    pub fn available(&self, mode: LogicalCaptureMode) -> usize {
        self.slots
            .iter()
            .filter(|s| s.mode == mode && s.owner.load(Ordering::Acquire) == FREE)
            .count()
    }

    /// Current owner of a slot
    pub fn owner(&self, handle: BufferHandle) -> Option<SlotOwner> {
        self.slots
            .get(handle.index() as usize)
            .map(|s| SlotOwner::from_raw(s.owner.load(Ordering::Acquire)))
    }

    /// Owner of every slot, in handle order
    pub fn owners(&self) -> Vec<SlotOwner> {
        self.slots
            .iter()
            .map(|s| SlotOwner::from_raw(s.owner.load(Ordering::Acquire)))
            .collect()
    }

    /// Snapshot of the pool counters
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            reserved: self.reserved.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, buffer: &FreeBuffer) -> Result<&Slot, IspError> {
        self.slots
            .get(buffer.handle.index() as usize)
            .ok_or(IspError::NotOwned {
                index: buffer.handle.index(),
            })
    }
}

impl BufferPool for BufferArena {
    fn reserve(&self, mode: LogicalCaptureMode) -> Result<FreeBuffer, IspError> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.mode != mode {
                continue;
            }
            if slot
                .owner
                .compare_exchange(FREE, HARDWARE, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.reserved.fetch_add(1, Ordering::Relaxed);
                debug!(index, ?mode, "Reserved buffer");
                return Ok(FreeBuffer {
                    handle: BufferHandle::new(index as u16),
                    mode,
                    desc: slot.desc,
                });
            }
        }

        self.exhausted.fetch_add(1, Ordering::Relaxed);
        Err(IspError::PoolExhausted(mode))
    }

    fn release(&self, buffer: &FreeBuffer) -> Result<(), IspError> {
        let slot = self.slot(buffer)?;
        let previous = slot
            .owner
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |owner| {
                (owner != FREE).then_some(FREE)
            });

        match previous {
            Ok(owner) => {
                self.released.fetch_add(1, Ordering::Relaxed);
                debug!(
                    index = buffer.handle.index(),
                    from = ?SlotOwner::from_raw(owner),
                    "Released buffer"
                );
                Ok(())
            }
            Err(_) => {
                warn!(index = buffer.handle.index(), "Release of a buffer already free");
                Err(IspError::NotOwned {
                    index: buffer.handle.index(),
                })
            }
        }
    }

    fn hand_off(&self, buffer: &FreeBuffer) -> Result<(), IspError> {
        let slot = self.slot(buffer)?;
        slot.owner
            .compare_exchange(HARDWARE, CONSUMER, Ordering::AcqRel, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| IspError::NotOwned {
                index: buffer.handle.index(),
            })
    }
}
