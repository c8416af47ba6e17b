//! Slot-addressed payload storage.
//!
//! A storage owns the payload cells of one entity host and hands out
//! [`Slot`] handles that stay valid until released. Two interchangeable
//! shapes implement the same [`Storage`] contract:
//!
//! - [`ArrayStorage`]: one contiguous buffer plus a free list of
//!   released cells. Capacity grows geometrically. Enumeration walks the
//!   dense prefix and skips the free set.
//! - [`SparseStorage`]: capacity partitioned into fixed-size pages
//!   allocated on demand, with a sparse→dense index that yields O(1)
//!   allocate/release and O(allocated) iteration without scanning gaps.
//!   Page memory never moves, so payload references survive unrelated
//!   allocations.
//!
//! ## Invariants
//! - A slot returned by `allocate`/`allocate_with` is valid until the
//!   matching `release`; every checked accessor rejects stale slots.
//! - `count()` always equals the number of valid slots.
//! - Cell generations increment on release, so a recycled index cannot
//!   be confused with the slot it used to back.
//!
//! ## Reference stability
//! `ArrayStorage` may relocate payloads when it grows; callers must not
//! hold references across an allocation. `SparseStorage` only ever
//! appends pages and keeps payload addresses fixed for the lifetime of
//! the slot.

use crate::engine::error::{EcsError, EcsResult};
use crate::engine::types::{Generation, Slot, SlotIndex, DEFAULT_PAGE_SIZE};

/// Contract shared by both storage shapes.
///
/// The `Sibling` associated type lets callers construct a storage of the
/// same shape and capacity parameters for a different payload type,
/// which is how adjacent columns are built for an archetype split
/// without hard-coding the storage choice.
pub trait Storage<T> {
    /// Storage of the same shape for payload type `U`.
    type Sibling<U: 'static>: Storage<U>;

    /// Allocates a slot holding a default-initialised payload.
    fn allocate(&mut self) -> Slot
    where
        T: Default,
    {
        self.allocate_with(T::default())
    }

    /// Allocates a slot holding `value`.
    fn allocate_with(&mut self, value: T) -> Slot;

    /// Releases `slot` and returns its payload.
    ///
    /// After this call `is_valid(slot)` is `false` and the cell is
    /// available for reuse under a new generation.
    fn release(&mut self, slot: Slot) -> EcsResult<T>;

    /// Returns `true` if `slot` is currently allocated.
    fn is_valid(&self, slot: Slot) -> bool;

    /// Returns a reference to the payload of `slot`.
    fn get(&self, slot: Slot) -> EcsResult<&T>;

    /// Returns a mutable reference to the payload of `slot`.
    fn get_mut(&mut self, slot: Slot) -> EcsResult<&mut T>;

    /// Returns a reference to the payload of `slot` without checking
    /// validity.
    ///
    /// # Safety
    /// `slot` must be valid. Debug builds assert this.
    unsafe fn get_unchecked(&self, slot: Slot) -> &T;

    /// Mutable variant of [`Storage::get_unchecked`].
    ///
    /// # Safety
    /// `slot` must be valid. Debug builds assert this.
    unsafe fn get_unchecked_mut(&mut self, slot: Slot) -> &mut T;

    /// Number of currently allocated slots.
    fn count(&self) -> usize;

    /// Appends every allocated slot to `out`.
    fn collect_slots(&self, out: &mut Vec<Slot>);

    /// Returns the allocated slots as a fresh vector.
    fn slots(&self) -> Vec<Slot> {
        let mut out = Vec::with_capacity(self.count());
        self.collect_slots(&mut out);
        out
    }

    /// Copies the payloads of `slots` into `out`, in order.
    ///
    /// `out` is appended to so callers can pool the buffer across calls.
    /// Fails on the first invalid slot, leaving `out` with the values
    /// copied so far.
    fn fetch(&self, slots: &[Slot], out: &mut Vec<T>) -> EcsResult<()>
    where
        T: Clone,
    {
        out.reserve(slots.len());
        for &slot in slots {
            out.push(self.get(slot)?.clone());
        }
        Ok(())
    }

    /// Writes `values` back into `slots`, the inverse of
    /// [`Storage::fetch`].
    ///
    /// Validates lengths and every slot before writing anything, so a
    /// failed call leaves the storage unchanged.
    fn write_back(&mut self, slots: &[Slot], values: &[T]) -> EcsResult<()>
    where
        T: Clone,
    {
        if slots.len() != values.len() {
            return Err(EcsError::LengthMismatch {
                slots: slots.len(),
                values: values.len(),
            });
        }
        for &slot in slots {
            if !self.is_valid(slot) {
                return Err(EcsError::InvalidSlot {
                    index: slot.index,
                    generation: slot.generation,
                });
            }
        }
        for (&slot, value) in slots.iter().zip(values) {
            *self.get_mut(slot)? = value.clone();
        }
        Ok(())
    }

    /// Constructs an empty storage of the same shape and capacity
    /// parameters for payload type `U`.
    fn create_sibling<U: 'static>(&self) -> Self::Sibling<U>;
}

#[inline]
fn invalid(slot: Slot) -> EcsError {
    EcsError::InvalidSlot {
        index: slot.index,
        generation: slot.generation,
    }
}

// ─── Array storage ───────────────────────────────────────────────────────

struct ArrayCell<T> {
    value: Option<T>,
    generation: Generation,
}

/// Contiguous storage: one geometric buffer plus a free list.
pub struct ArrayStorage<T> {
    cells: Vec<ArrayCell<T>>,
    free: Vec<SlotIndex>,
    live: usize,
}

impl<T> ArrayStorage<T> {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self {
            cells: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Creates an empty storage with room for `capacity` payloads before
    /// the first growth.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cells: Vec::with_capacity(capacity),
            free: Vec::new(),
            live: 0,
        }
    }

    #[inline]
    fn cell(&self, slot: Slot) -> Option<&ArrayCell<T>> {
        self.cells
            .get(slot.index as usize)
            .filter(|c| c.generation == slot.generation && c.value.is_some())
    }
}

impl<T> Default for ArrayStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Storage<T> for ArrayStorage<T> {
    type Sibling<U: 'static> = ArrayStorage<U>;

    fn allocate_with(&mut self, value: T) -> Slot {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let cell = &mut self.cells[index as usize];
            cell.value = Some(value);
            return Slot::new(index, cell.generation);
        }
        let index = self.cells.len() as SlotIndex;
        self.cells.push(ArrayCell {
            value: Some(value),
            generation: 0,
        });
        Slot::new(index, 0)
    }

    fn release(&mut self, slot: Slot) -> EcsResult<T> {
        let cell = self
            .cells
            .get_mut(slot.index as usize)
            .filter(|c| c.generation == slot.generation)
            .ok_or_else(|| invalid(slot))?;
        let value = cell.value.take().ok_or_else(|| invalid(slot))?;
        cell.generation = cell.generation.wrapping_add(1);
        self.free.push(slot.index);
        self.live -= 1;
        Ok(value)
    }

    #[inline]
    fn is_valid(&self, slot: Slot) -> bool {
        self.cell(slot).is_some()
    }

    fn get(&self, slot: Slot) -> EcsResult<&T> {
        self.cell(slot)
            .and_then(|c| c.value.as_ref())
            .ok_or_else(|| invalid(slot))
    }

    fn get_mut(&mut self, slot: Slot) -> EcsResult<&mut T> {
        self.cells
            .get_mut(slot.index as usize)
            .filter(|c| c.generation == slot.generation)
            .and_then(|c| c.value.as_mut())
            .ok_or_else(|| invalid(slot))
    }

    unsafe fn get_unchecked(&self, slot: Slot) -> &T {
        debug_assert!(self.is_valid(slot), "get_unchecked on invalid {slot:?}");
        unsafe {
            self.cells
                .get_unchecked(slot.index as usize)
                .value
                .as_ref()
                .unwrap_unchecked()
        }
    }

    unsafe fn get_unchecked_mut(&mut self, slot: Slot) -> &mut T {
        debug_assert!(self.is_valid(slot), "get_unchecked_mut on invalid {slot:?}");
        unsafe {
            self.cells
                .get_unchecked_mut(slot.index as usize)
                .value
                .as_mut()
                .unwrap_unchecked()
        }
    }

    #[inline]
    fn count(&self) -> usize {
        self.live
    }

    fn collect_slots(&self, out: &mut Vec<Slot>) {
        out.reserve(self.live);
        for (index, cell) in self.cells.iter().enumerate() {
            if cell.value.is_some() {
                out.push(Slot::new(index as SlotIndex, cell.generation));
            }
        }
    }

    fn create_sibling<U: 'static>(&self) -> ArrayStorage<U> {
        ArrayStorage::with_capacity(self.cells.capacity())
    }
}

// ─── Sparse paged storage ────────────────────────────────────────────────

struct SlotMeta {
    generation: Generation,
    dense_pos: u32,
}

const DEAD: u32 = u32::MAX;

/// Paged storage: fixed-size pages allocated on demand, with a
/// sparse→dense index over allocated slots.
///
/// The dense list makes iteration proportional to the number of
/// allocated slots rather than to the address space, and pages are never
/// moved or dropped while the storage lives, so payload references stay
/// valid until their slot is released.
pub struct SparseStorage<T> {
    page_size: usize,
    shift: u32,
    pages: Vec<Option<Box<[Option<T>]>>>,
    meta: Vec<SlotMeta>,
    dense: Vec<SlotIndex>,
    free: Vec<SlotIndex>,
}

impl<T> SparseStorage<T> {
    /// Creates an empty storage with the default page size.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Creates an empty storage with `page_size` cells per page.
    ///
    /// `page_size` must be a power of two.
    pub fn with_page_size(page_size: usize) -> Self {
        assert!(
            page_size.is_power_of_two() && page_size > 0,
            "page size must be a power of two"
        );
        Self {
            page_size,
            shift: page_size.trailing_zeros(),
            pages: Vec::new(),
            meta: Vec::new(),
            dense: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Cells per page.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[inline]
    fn split(&self, index: SlotIndex) -> (usize, usize) {
        let index = index as usize;
        (index >> self.shift, index & (self.page_size - 1))
    }

    #[inline]
    fn valid_meta(&self, slot: Slot) -> bool {
        self.meta
            .get(slot.index as usize)
            .map_or(false, |m| m.generation == slot.generation && m.dense_pos != DEAD)
    }

    fn ensure_page(&mut self, page: usize) {
        if page >= self.pages.len() {
            self.pages.resize_with(page + 1, || None);
        }
        if self.pages[page].is_none() {
            let mut cells = Vec::with_capacity(self.page_size);
            cells.resize_with(self.page_size, || None);
            self.pages[page] = Some(cells.into_boxed_slice());
        }
    }

    #[inline]
    fn cell(&self, index: SlotIndex) -> Option<&Option<T>> {
        let (page, offset) = self.split(index);
        self.pages.get(page)?.as_ref().map(|p| &p[offset])
    }

    #[inline]
    fn cell_mut(&mut self, index: SlotIndex) -> Option<&mut Option<T>> {
        let (page, offset) = self.split(index);
        self.pages.get_mut(page)?.as_mut().map(|p| &mut p[offset])
    }
}

impl<T> Default for SparseStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Storage<T> for SparseStorage<T> {
    type Sibling<U: 'static> = SparseStorage<U>;

    fn allocate_with(&mut self, value: T) -> Slot {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.meta.len() as SlotIndex;
                self.meta.push(SlotMeta {
                    generation: 0,
                    dense_pos: DEAD,
                });
                index
            }
        };
        let (page, offset) = self.split(index);
        self.ensure_page(page);
        let cells = self.pages[page].as_mut().expect("page just ensured");
        cells[offset] = Some(value);

        let meta = &mut self.meta[index as usize];
        meta.dense_pos = self.dense.len() as u32;
        self.dense.push(index);
        Slot::new(index, meta.generation)
    }

    fn release(&mut self, slot: Slot) -> EcsResult<T> {
        if !self.valid_meta(slot) {
            return Err(invalid(slot));
        }
        let value = self
            .cell_mut(slot.index)
            .and_then(Option::take)
            .ok_or_else(|| invalid(slot))?;

        let dense_pos = self.meta[slot.index as usize].dense_pos as usize;
        self.dense.swap_remove(dense_pos);
        if let Some(&moved) = self.dense.get(dense_pos) {
            self.meta[moved as usize].dense_pos = dense_pos as u32;
        }

        let meta = &mut self.meta[slot.index as usize];
        meta.dense_pos = DEAD;
        meta.generation = meta.generation.wrapping_add(1);
        self.free.push(slot.index);
        Ok(value)
    }

    #[inline]
    fn is_valid(&self, slot: Slot) -> bool {
        self.valid_meta(slot)
    }

    fn get(&self, slot: Slot) -> EcsResult<&T> {
        if !self.valid_meta(slot) {
            return Err(invalid(slot));
        }
        self.cell(slot.index)
            .and_then(Option::as_ref)
            .ok_or_else(|| invalid(slot))
    }

    fn get_mut(&mut self, slot: Slot) -> EcsResult<&mut T> {
        if !self.valid_meta(slot) {
            return Err(invalid(slot));
        }
        self.cell_mut(slot.index)
            .and_then(Option::as_mut)
            .ok_or_else(|| invalid(slot))
    }

    unsafe fn get_unchecked(&self, slot: Slot) -> &T {
        debug_assert!(self.is_valid(slot), "get_unchecked on invalid {slot:?}");
        let (page, offset) = self.split(slot.index);
        unsafe {
            self.pages
                .get_unchecked(page)
                .as_ref()
                .unwrap_unchecked()
                .get_unchecked(offset)
                .as_ref()
                .unwrap_unchecked()
        }
    }

    unsafe fn get_unchecked_mut(&mut self, slot: Slot) -> &mut T {
        debug_assert!(self.is_valid(slot), "get_unchecked_mut on invalid {slot:?}");
        let (page, offset) = self.split(slot.index);
        unsafe {
            self.pages
                .get_unchecked_mut(page)
                .as_mut()
                .unwrap_unchecked()
                .get_unchecked_mut(offset)
                .as_mut()
                .unwrap_unchecked()
        }
    }

    #[inline]
    fn count(&self) -> usize {
        self.dense.len()
    }

    fn collect_slots(&self, out: &mut Vec<Slot>) {
        out.reserve(self.dense.len());
        for &index in &self.dense {
            out.push(Slot::new(index, self.meta[index as usize].generation));
        }
    }

    fn create_sibling<U: 'static>(&self) -> SparseStorage<U> {
        SparseStorage::with_page_size(self.page_size)
    }
}
