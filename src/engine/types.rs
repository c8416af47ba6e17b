//! Core identifier types shared across the engine.
//!
//! This module defines the small, copyable handles used throughout the
//! runtime:
//!
//! - [`Slot`]: a stable, generation-guarded index into one storage.
//! - [`HostId`]: the archetype index of an entity host inside a world.
//! - [`SchedulerId`]: distinguishes scheduler instances so system
//!   registrations on different `(world, scheduler)` pairs never collide.
//!
//! ## Design
//! Handles are plain value types. Holding one never extends the lifetime
//! of what it names; validity is always re-checked at the point of use via
//! the generation counter (slots) or the host table (host ids).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Index component of a [`Slot`].
pub type SlotIndex = u32;
/// Generation counter used to invalidate recycled slots.
pub type Generation = u32;

/// Default number of payload cells per page in sparse storage.
///
/// Must be a power of two so slot indices split into `(page, offset)`
/// with shifts and masks.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Stable handle to one allocated cell inside a storage.
///
/// A slot stays valid from `allocate` until the matching `release`.
/// Indices are recycled, so a slot also carries the generation it was
/// allocated under; a recycled index with an older generation is stale
/// and every checked accessor rejects it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    /// Cell index within the storage.
    pub index: SlotIndex,
    /// Generation the cell had when this slot was handed out.
    pub generation: Generation,
}

impl Slot {
    /// Builds a slot from its parts.
    #[inline]
    pub fn new(index: SlotIndex, generation: Generation) -> Self {
        Self { index, generation }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({}v{})", self.index, self.generation)
    }
}

/// Archetype index of a host within its world.
///
/// Host ids are dense: the world keeps hosts in a vector and maps each
/// archetype to exactly one live id, so lookup is O(1) in both
/// directions. Ids of released hosts are not reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub u32);

impl fmt::Debug for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostId({})", self.0)
    }
}

/// Process-unique identifier of a scheduler instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SchedulerId(pub(crate) u64);

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(0);

impl SchedulerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed))
    }
}
