//! Commands, command pooling, and the deferred command buffer.
//!
//! A command is an executable event: `World::modify` runs it against a
//! target entity and then delivers the command value itself as an event
//! to that target, so reactive systems can key their triggers on command
//! types.
//!
//! The [`CommandBuffer`] is the opt-in parallel path: worker threads
//! record `(target, command)` pairs into thread-local queues, and
//! [`CommandBuffer::submit`] drains the queues in thread-registration
//! order on the calling thread, at a safe point between tick phases. A
//! failing command leaves later entries queued; entries executed before
//! the failure stay executed, so retry policy belongs to the caller.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_queue::SegQueue;
use tracing::debug_span;

use crate::engine::entity::EntityRef;
use crate::engine::error::EcsResult;
use crate::engine::events::Event;
use crate::engine::world::World;

/// An executable event that mutates a target entity.
///
/// The command knows which component(s) of the target it touches.
/// After execution and event delivery the core hands the value back via
/// the reclaim hooks; the defaults drop it, and pooled commands override
/// them to return into a [`Pool`] addon.
pub trait Command: Event {
    /// Applies the command to `target`.
    fn execute(&mut self, world: &mut World, target: EntityRef) -> EcsResult<()>;

    /// Reclaims an owned command after dispatch. Default: drop.
    fn reclaim(this: Self, world: &mut World)
    where
        Self: Sized,
    {
        let _ = (this, world);
    }

    /// Reclaims a boxed command after dispatch. Default: drop.
    fn reclaim_boxed(self: Box<Self>, world: &mut World) {
        let _ = world;
    }
}

/// Contract for poolable values: a reset hook invoked on release.
pub trait Reusable: Default + 'static {
    /// Restores the value to its pristine state before it re-enters the
    /// pool.
    fn reset(&mut self);
}

/// Typed object pool with an acquire/release pair.
///
/// Bounded: releases beyond the retention capacity drop the value.
/// `Pool` implements `Default`, so it can live as a world addon and be
/// acquired on demand (`world.acquire_addon::<Pool<MyCommand>>()`).
pub struct Pool<T: Reusable> {
    free: RefCell<Vec<T>>,
    capacity: usize,
}

impl<T: Reusable> Pool<T> {
    /// Creates a pool retaining at most `capacity` released values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            free: RefCell::new(Vec::new()),
            capacity,
        }
    }

    /// Takes a pooled value, or a fresh default if the pool is empty.
    pub fn acquire(&self) -> T {
        self.free.borrow_mut().pop().unwrap_or_default()
    }

    /// Resets `value` and returns it to the pool.
    pub fn release(&self, mut value: T) {
        value.reset();
        let mut free = self.free.borrow_mut();
        if free.len() < self.capacity {
            free.push(value);
        }
    }

    /// Number of values currently pooled.
    pub fn len(&self) -> usize {
        self.free.borrow().len()
    }

    /// Returns `true` if no values are pooled.
    pub fn is_empty(&self) -> bool {
        self.free.borrow().is_empty()
    }
}

impl<T: Reusable> Default for Pool<T> {
    fn default() -> Self {
        Self::with_capacity(64)
    }
}

// ─── Command buffer ──────────────────────────────────────────────────────

type Entry = (EntityRef, Box<dyn Command + Send>);

struct BufferShard {
    queue: SegQueue<Entry>,
}

struct BufferInner {
    id: u64,
    // Shards in thread-registration order; submit drains them in this
    // order.
    shards: Mutex<Vec<Arc<BufferShard>>>,
}

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static LOCAL_SHARDS: RefCell<HashMap<u64, Arc<BufferShard>>> = RefCell::new(HashMap::new());
}

/// Side-channel for deferred mutations, safe to fill from worker
/// threads.
///
/// Cloning yields another handle to the same buffer. Each recording
/// thread gets its own queue, created on first use and registered in
/// creation order.
pub struct CommandBuffer {
    inner: Arc<BufferInner>,
}

impl CommandBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BufferInner {
                id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
                shards: Mutex::new(Vec::new()),
            }),
        }
    }

    fn local_shard(&self) -> Arc<BufferShard> {
        LOCAL_SHARDS.with(|map| {
            map.borrow_mut()
                .entry(self.inner.id)
                .or_insert_with(|| {
                    let shard = Arc::new(BufferShard {
                        queue: SegQueue::new(),
                    });
                    self.inner
                        .shards
                        .lock()
                        .expect("command buffer shard registry poisoned")
                        .push(shard.clone());
                    shard
                })
                .clone()
        })
    }

    /// Appends a deferred `(command, target)` entry to the calling
    /// thread's queue.
    pub fn record<C: Command + Send>(&self, target: EntityRef, command: C) {
        self.local_shard().queue.push((target, Box::new(command)));
    }

    /// Drains all threads' queues in creation order, executing each
    /// entry against `world` through the modify path (execute, then
    /// command-typed event, then reclaim).
    ///
    /// A failing entry aborts the drain: it is consumed, entries already
    /// executed stay executed, and the remainder stays queued.
    pub fn submit(&self, world: &mut World) -> EcsResult<()> {
        let _span = debug_span!("command_buffer_submit").entered();
        let shards: Vec<Arc<BufferShard>> = self
            .inner
            .shards
            .lock()
            .expect("command buffer shard registry poisoned")
            .clone();
        for shard in shards {
            while let Some((target, command)) = shard.queue.pop() {
                world.modify_boxed(target, command)?;
            }
        }
        Ok(())
    }

    /// Number of entries currently queued across all threads.
    pub fn pending(&self) -> usize {
        self.inner
            .shards
            .lock()
            .expect("command buffer shard registry poisoned")
            .iter()
            .map(|shard| shard.queue.len())
            .sum()
    }

    /// Returns `true` if no entries are queued.
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}

impl Clone for CommandBuffer {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}
