//! Event routing.
//!
//! The dispatcher fans each event out to three listener registries in a
//! fixed order: listeners attached to the target entity first, then
//! listeners registered for the event's runtime type, then global
//! listeners. Within a registry, listeners run in registration order.
//!
//! ## Mutation during dispatch
//! Listener lists may be mutated while a fan-out is in flight. The
//! dispatcher snapshots the live entries of each registry as it reaches
//! it, so:
//!
//! - listeners added during dispatch do not observe the in-flight event;
//! - listeners removed during dispatch still receive the in-flight
//!   event.
//!
//! Removal is a deferred tombstone (`dead` flag); dead entries are
//! compacted only when no dispatch is running, keeping iteration
//! structurally stable at any nesting depth.
//!
//! A listener signals self-removal by returning `Ok(true)`. A listener
//! error aborts the remainder of the fan-out and propagates out of
//! `send`; side effects of earlier listeners remain.

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::engine::entity::EntityRef;
use crate::engine::error::EcsResult;
use crate::engine::events::Event;
use crate::engine::world::World;

/// Listener callback. Returns `Ok(true)` to remove itself.
pub type ListenerFn = dyn FnMut(&mut World, EntityRef, &dyn Event) -> EcsResult<bool>;

struct ListenerSlot {
    dead: Cell<bool>,
    callback: RefCell<Box<ListenerFn>>,
}

/// Cancellation handle for a registered listener.
///
/// Cancelling is idempotent; the listener stops receiving events that
/// are dispatched after the cancellation.
#[derive(Clone)]
pub struct Listener {
    slot: Rc<ListenerSlot>,
}

impl Listener {
    /// Marks the listener for removal.
    pub fn cancel(&self) {
        self.slot.dead.set(true);
    }

    /// Returns `true` until the listener is cancelled or self-removed.
    pub fn is_active(&self) -> bool {
        !self.slot.dead.get()
    }
}

#[derive(Default)]
struct DispatcherInner {
    global: RefCell<Vec<Rc<ListenerSlot>>>,
    by_type: RefCell<HashMap<TypeId, Vec<Rc<ListenerSlot>>>>,
    by_entity: RefCell<HashMap<EntityRef, Vec<Rc<ListenerSlot>>>>,
    depth: Cell<u32>,
    needs_compaction: Cell<bool>,
}

/// Per-world event bus.
///
/// `Dispatcher` is a cheap-clone handle; the world owns one and clones
/// it for the duration of each fan-out so listeners can receive
/// `&mut World`.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Rc<DispatcherInner>,
}

impl Dispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    fn install(list: &mut Vec<Rc<ListenerSlot>>, callback: Box<ListenerFn>) -> Listener {
        let slot = Rc::new(ListenerSlot {
            dead: Cell::new(false),
            callback: RefCell::new(callback),
        });
        list.push(slot.clone());
        Listener { slot }
    }

    /// Registers a listener receiving every event.
    pub fn listen_global(
        &self,
        callback: impl FnMut(&mut World, EntityRef, &dyn Event) -> EcsResult<bool> + 'static,
    ) -> Listener {
        Self::install(&mut self.inner.global.borrow_mut(), Box::new(callback))
    }

    /// Registers a listener receiving every event whose runtime type is
    /// `Ev`.
    pub fn listen_type<Ev: 'static>(
        &self,
        callback: impl FnMut(&mut World, EntityRef, &dyn Event) -> EcsResult<bool> + 'static,
    ) -> Listener {
        self.listen_type_id(TypeId::of::<Ev>(), Box::new(callback))
    }

    pub(crate) fn listen_type_id(&self, type_id: TypeId, callback: Box<ListenerFn>) -> Listener {
        let mut by_type = self.inner.by_type.borrow_mut();
        Self::install(by_type.entry(type_id).or_default(), callback)
    }

    /// Registers a listener receiving every event targeted at `entity`.
    pub fn listen_entity(
        &self,
        entity: EntityRef,
        callback: impl FnMut(&mut World, EntityRef, &dyn Event) -> EcsResult<bool> + 'static,
    ) -> Listener {
        let mut by_entity = self.inner.by_entity.borrow_mut();
        Self::install(by_entity.entry(entity).or_default(), Box::new(callback))
    }

    /// Drops every per-entity listener of `entity`. Idempotent.
    pub fn unlisten_all(&self, entity: EntityRef) {
        if let Some(chain) = self.inner.by_entity.borrow_mut().remove(&entity) {
            for slot in chain {
                slot.dead.set(true);
            }
        }
    }

    /// Fans `event` out to the three registries.
    ///
    /// Order: per-entity listeners of `target`, then per-type listeners
    /// of the event's runtime type, then global listeners; registration
    /// order within each registry.
    pub fn send(&self, world: &mut World, target: EntityRef, event: &dyn Event) -> EcsResult<()> {
        let inner = &*self.inner;
        inner.depth.set(inner.depth.get() + 1);
        let result = self.fan_out(world, target, event);
        inner.depth.set(inner.depth.get() - 1);
        if inner.depth.get() == 0 && inner.needs_compaction.get() {
            self.compact();
        }
        result
    }

    fn fan_out(&self, world: &mut World, target: EntityRef, event: &dyn Event) -> EcsResult<()> {
        let inner = &*self.inner;

        let chain = inner
            .by_entity
            .borrow()
            .get(&target)
            .map(|chain| snapshot(chain))
            .unwrap_or_default();
        self.deliver(chain, world, target, event)?;

        let type_id = event.as_any().type_id();
        let typed = inner
            .by_type
            .borrow()
            .get(&type_id)
            .map(|chain| snapshot(chain))
            .unwrap_or_default();
        self.deliver(typed, world, target, event)?;

        let global = snapshot(&inner.global.borrow());
        self.deliver(global, world, target, event)
    }

    fn deliver(
        &self,
        listeners: Vec<Rc<ListenerSlot>>,
        world: &mut World,
        target: EntityRef,
        event: &dyn Event,
    ) -> EcsResult<()> {
        for slot in listeners {
            let mut callback = slot.callback.borrow_mut();
            let remove = callback.as_mut()(world, target, event)?;
            drop(callback);
            if remove {
                slot.dead.set(true);
            }
            if slot.dead.get() {
                self.inner.needs_compaction.set(true);
            }
        }
        Ok(())
    }

    fn compact(&self) {
        let inner = &*self.inner;
        inner.needs_compaction.set(false);
        inner.global.borrow_mut().retain(|slot| !slot.dead.get());
        inner.by_type.borrow_mut().retain(|_, chain| {
            chain.retain(|slot| !slot.dead.get());
            !chain.is_empty()
        });
        inner.by_entity.borrow_mut().retain(|_, chain| {
            chain.retain(|slot| !slot.dead.get());
            !chain.is_empty()
        });
    }

    /// Drops every listener. Used by world disposal.
    pub fn clear(&self) {
        let inner = &*self.inner;
        for slot in inner.global.borrow_mut().drain(..) {
            slot.dead.set(true);
        }
        for (_, chain) in inner.by_type.borrow_mut().drain() {
            for slot in chain {
                slot.dead.set(true);
            }
        }
        for (_, chain) in inner.by_entity.borrow_mut().drain() {
            for slot in chain {
                slot.dead.set(true);
            }
        }
    }

    /// Number of live global listeners.
    pub fn global_listener_count(&self) -> usize {
        live_count(&self.inner.global.borrow())
    }

    /// Number of live listeners for event type `Ev`.
    pub fn type_listener_count<Ev: 'static>(&self) -> usize {
        self.inner
            .by_type
            .borrow()
            .get(&TypeId::of::<Ev>())
            .map_or(0, |chain| live_count(chain))
    }

    /// Number of live listeners attached to `entity`.
    pub fn entity_listener_count(&self, entity: EntityRef) -> usize {
        self.inner
            .by_entity
            .borrow()
            .get(&entity)
            .map_or(0, |chain| live_count(chain))
    }
}

fn snapshot(chain: &[Rc<ListenerSlot>]) -> Vec<Rc<ListenerSlot>> {
    chain
        .iter()
        .filter(|slot| !slot.dead.get())
        .cloned()
        .collect()
}

fn live_count(chain: &[Rc<ListenerSlot>]) -> usize {
    chain.iter().filter(|slot| !slot.dead.get()).count()
}
