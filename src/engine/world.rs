//! The world: registry of entity hosts plus the services bound to them.
//!
//! A world owns:
//! - a dense map from archetype to [`Host`], with O(1) lookup both ways,
//! - one [`Dispatcher`],
//! - a map of typed addon singletons,
//! - a live-entity count maintained by host create/release.
//!
//! Entity mutations flow through the world so the event protocol stays
//! consistent: `add` delivers `world_events::Add` after construction,
//! `remove` delivers `world_events::Remove` while the components are
//! still readable, then unlistens the entity, then releases the slot.
//! `modify` executes a command against the target and then delivers the
//! command value itself as an event to the same target.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::engine::archetype::{ComponentRecord, EntityLayout};
use crate::engine::commands::{Command, CommandBuffer};
use crate::engine::dispatcher::Dispatcher;
use crate::engine::entity::EntityRef;
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::events::{world_events, Event};
use crate::engine::host::{AnyHost, Host, HostHooks};
use crate::engine::query::{Matcher, Query};
use crate::engine::storage::{ArrayStorage, Storage};
use crate::engine::systems::SystemRegistry;
use crate::engine::types::HostId;

type HostRemovedHooks = Rc<RefCell<Vec<Box<dyn FnMut(HostId)>>>>;

/// Container of entity hosts and world-scoped services.
pub struct World {
    hosts: Vec<Option<Box<dyn AnyHost>>>,
    by_archetype: HashMap<TypeId, HostId>,
    dispatcher: Dispatcher,
    addons: HashMap<TypeId, Box<dyn Any>>,
    commands: CommandBuffer,
    count: usize,
    hosts_version: u64,
    host_removed_hooks: HostRemovedHooks,
    disposed_hooks: Vec<Box<dyn FnMut(&mut World)>>,
    disposed: bool,
}

impl World {
    /// Creates an empty world.
    pub fn new() -> Self {
        Self {
            hosts: Vec::new(),
            by_archetype: HashMap::new(),
            dispatcher: Dispatcher::new(),
            addons: HashMap::new(),
            commands: CommandBuffer::new(),
            count: 0,
            hosts_version: 0,
            host_removed_hooks: Rc::default(),
            disposed_hooks: Vec::new(),
            disposed: false,
        }
    }

    /// The world's event dispatcher (cheap-clone handle).
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// The world's deferred command buffer (cheap-clone handle, safe to
    /// hand to worker threads).
    pub fn commands(&self) -> CommandBuffer {
        self.commands.clone()
    }

    /// Drains the world's command buffer on the calling thread.
    pub fn submit_commands(&mut self) -> EcsResult<()> {
        let buffer = self.commands.clone();
        buffer.submit(self)
    }

    /// Live entity count, equal to the sum of host counts.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns `true` once [`World::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    // ─── Hosts ───────────────────────────────────────────────────────────

    fn install_host(&mut self, archetype: TypeId, host: Box<dyn AnyHost>) -> HostId {
        let id = HostId(self.hosts.len() as u32);
        self.hosts.push(Some(host));
        self.hosts[id.0 as usize]
            .as_mut()
            .expect("host installed above")
            .set_id(id);
        self.by_archetype.insert(archetype, id);
        self.hosts_version += 1;
        id
    }

    /// Returns the host for archetype `E`, creating one over an
    /// [`ArrayStorage`] on first demand.
    pub fn ensure_host<E: EntityLayout>(&mut self) -> HostId {
        let archetype = TypeId::of::<E>();
        if let Some(&id) = self.by_archetype.get(&archetype) {
            return id;
        }
        let id = self.install_host(archetype, Box::new(Host::<E, ArrayStorage<E>>::new(ArrayStorage::new())));
        debug!(archetype = type_name::<E>(), host = ?id, "created entity host");
        id
    }

    /// Installs a host for archetype `E` over a caller-chosen storage.
    ///
    /// Fails with `HostAlreadyExists` if the archetype already has a
    /// host.
    pub fn add_host<E: EntityLayout, S: Storage<E> + 'static>(
        &mut self,
        storage: S,
    ) -> EcsResult<HostId> {
        let archetype = TypeId::of::<E>();
        if self.by_archetype.contains_key(&archetype) {
            return Err(EcsError::HostAlreadyExists {
                archetype: type_name::<E>(),
            });
        }
        let id = self.install_host(archetype, Box::new(Host::<E, S>::new(storage)));
        debug!(archetype = type_name::<E>(), host = ?id, "installed entity host");
        Ok(id)
    }

    /// Returns the host with `id`.
    pub fn host(&self, id: HostId) -> EcsResult<&dyn AnyHost> {
        self.hosts
            .get(id.0 as usize)
            .and_then(|h| h.as_deref())
            .ok_or(EcsError::HostNotFound(id))
    }

    fn host_mut(&mut self, id: HostId) -> EcsResult<&mut dyn AnyHost> {
        match self.hosts.get_mut(id.0 as usize).and_then(|h| h.as_deref_mut()) {
            Some(host) => Ok(host),
            None => Err(EcsError::HostNotFound(id)),
        }
    }

    /// Returns the host id for archetype `E`, if one exists.
    pub fn host_of<E: EntityLayout>(&self) -> Option<HostId> {
        self.by_archetype.get(&TypeId::of::<E>()).copied()
    }

    /// Iterates the live hosts in id order.
    pub fn hosts(&self) -> impl Iterator<Item = &dyn AnyHost> {
        self.hosts.iter().filter_map(|h| h.as_deref())
    }

    /// Version stamp bumped whenever a host is added or removed; used by
    /// queries to re-test matchers exactly once per topology change.
    pub fn hosts_version(&self) -> u64 {
        self.hosts_version
    }

    /// Registers a hook fired after each entity of archetype `E` is
    /// created.
    pub fn on_entity_created<E: EntityLayout>(&mut self, hook: impl FnMut(EntityRef) + 'static) {
        let id = self.ensure_host::<E>();
        self.hooks_of(id).on_created(hook);
    }

    /// Registers a hook fired as each entity of archetype `E` is
    /// released.
    pub fn on_entity_released<E: EntityLayout>(&mut self, hook: impl FnMut(EntityRef) + 'static) {
        let id = self.ensure_host::<E>();
        self.hooks_of(id).on_released(hook);
    }

    fn hooks_of(&self, id: HostId) -> HostHooks {
        self.hosts[id.0 as usize]
            .as_deref()
            .expect("host ensured above")
            .hooks()
    }

    /// Registers a hook fired when a host is removed from the world.
    pub fn on_host_removed(&mut self, hook: impl FnMut(HostId) + 'static) {
        self.host_removed_hooks.borrow_mut().push(Box::new(hook));
    }

    /// Registers a hook fired at the start of [`World::dispose`].
    pub fn on_disposed(&mut self, hook: impl FnMut(&mut World) + 'static) {
        self.disposed_hooks.push(Box::new(hook));
    }

    // ─── Entity lifecycle ────────────────────────────────────────────────

    /// Creates an entity from its archetype tuple value.
    ///
    /// The host is created on first demand. `on_created` hooks fire
    /// before the `world_events::Add` dispatch.
    pub fn add<E: EntityLayout>(&mut self, entity: E) -> EcsResult<EntityRef> {
        if self.disposed {
            return Err(EcsError::WorldDisposed);
        }
        let host_id = self.ensure_host::<E>();
        let slot = self
            .host_mut(host_id)
            .expect("host ensured above")
            .create_dyn(Box::new(entity));
        self.count += 1;
        let entity = EntityRef::new(host_id, slot);
        let dispatcher = self.dispatcher.clone();
        dispatcher.send(self, entity, &world_events::Add)?;
        Ok(entity)
    }

    /// Releases an entity.
    ///
    /// Delivers `world_events::Remove` first (components are still
    /// readable), then unregisters the entity's listeners, then fires
    /// `on_released`, then returns the slot to the storage.
    pub fn remove(&mut self, entity: EntityRef) -> EcsResult<()> {
        self.ensure_alive(entity)?;
        let dispatcher = self.dispatcher.clone();
        dispatcher.send(self, entity, &world_events::Remove)?;
        dispatcher.unlisten_all(entity);
        if !self.is_alive(entity) {
            // A listener already removed the entity.
            return Ok(());
        }
        self.host_mut(entity.host)?.release_slot(entity.slot)?;
        self.count -= 1;
        Ok(())
    }

    /// Executes `command` against `entity`, then delivers the command
    /// value as an event to the same target, then reclaims the command.
    pub fn modify<C: Command>(&mut self, entity: EntityRef, mut command: C) -> EcsResult<()> {
        command.execute(self, entity)?;
        if self.is_alive(entity) {
            let dispatcher = self.dispatcher.clone();
            dispatcher.send(self, entity, &command)?;
        }
        C::reclaim(command, self);
        Ok(())
    }

    pub(crate) fn modify_boxed(
        &mut self,
        entity: EntityRef,
        mut command: Box<dyn Command + Send>,
    ) -> EcsResult<()> {
        command.execute(self, entity)?;
        if self.is_alive(entity) {
            let dispatcher = self.dispatcher.clone();
            let event: &dyn Event = command.as_ref();
            dispatcher.send(self, entity, event)?;
        }
        command.reclaim_boxed(self);
        Ok(())
    }

    /// Sends `event` to `entity`.
    ///
    /// Pre-checked against the world: the target must be alive.
    pub fn send<Ev: Event>(&mut self, entity: EntityRef, event: &Ev) -> EcsResult<()> {
        self.ensure_alive(entity)?;
        let dispatcher = self.dispatcher.clone();
        dispatcher.send(self, entity, event)
    }

    /// Returns `true` if `entity` names a live entity of this world.
    pub fn is_alive(&self, entity: EntityRef) -> bool {
        self.host(entity.host)
            .map_or(false, |host| host.is_valid(entity.slot))
    }

    fn ensure_alive(&self, entity: EntityRef) -> EcsResult<()> {
        let host = self.host(entity.host)?;
        if host.is_valid(entity.slot) {
            Ok(())
        } else {
            Err(EcsError::InvalidSlot {
                index: entity.slot.index,
                generation: entity.slot.generation,
            })
        }
    }

    // ─── Component access ────────────────────────────────────────────────

    /// Returns component `C` of `entity`.
    pub fn get<C: 'static>(&self, entity: EntityRef) -> EcsResult<&C> {
        let host = self.host(entity.host)?;
        let descriptor = host.descriptor();
        let record = descriptor
            .record_of(TypeId::of::<C>(), 0)
            .ok_or(EcsError::ComponentNotFound {
                component: type_name::<C>(),
                archetype: descriptor.type_name,
            })?;
        let base = host.payload_ptr(entity.slot)?;
        // The record offset came from offset_of! on the stored tuple, so
        // the cell holds a valid C for as long as the slot is valid.
        Ok(unsafe { &*(base.add(record.offset) as *const C) })
    }

    /// Mutable variant of [`World::get`].
    pub fn get_mut<C: 'static>(&mut self, entity: EntityRef) -> EcsResult<&mut C> {
        let host = self.host_mut(entity.host)?;
        let descriptor = host.descriptor();
        let record = descriptor
            .record_of(TypeId::of::<C>(), 0)
            .ok_or(EcsError::ComponentNotFound {
                component: type_name::<C>(),
                archetype: descriptor.type_name,
            })?;
        let base = host.payload_ptr_mut(entity.slot)?;
        Ok(unsafe { &mut *(base.add(record.offset) as *mut C) })
    }

    /// Returns component `C` of `entity`, or `None` when the entity is
    /// gone or its archetype lacks `C`.
    pub fn try_get<C: 'static>(&self, entity: EntityRef) -> Option<&C> {
        self.get::<C>(entity).ok()
    }

    /// Visits the components of `entity` in descriptor order, yielding
    /// each record and its raw bytes.
    ///
    /// The enumeration is stable and deterministic as long as the world
    /// is not mutated; it is the surface consumed by external
    /// serializers.
    pub fn visit_components(
        &self,
        entity: EntityRef,
        mut visit: impl FnMut(&ComponentRecord, &[u8]),
    ) -> EcsResult<()> {
        let host = self.host(entity.host)?;
        let base = host.payload_ptr(entity.slot)?;
        for record in &host.descriptor().records {
            let bytes = unsafe { std::slice::from_raw_parts(base.add(record.offset), record.size) };
            visit(record, bytes);
        }
        Ok(())
    }

    // ─── Addons ──────────────────────────────────────────────────────────

    /// Returns the addon of type `T`, creating it on first demand.
    pub fn acquire_addon<T: Default + 'static>(&mut self) -> &mut T {
        self.addons
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()))
            .downcast_mut::<T>()
            .expect("addon map entry holds its key type")
    }

    /// Returns the addon of type `T`, if present.
    pub fn get_addon<T: 'static>(&self) -> Option<&T> {
        self.addons
            .get(&TypeId::of::<T>())
            .and_then(|addon| addon.downcast_ref())
    }

    /// Mutable variant of [`World::get_addon`].
    pub fn get_addon_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.addons
            .get_mut(&TypeId::of::<T>())
            .and_then(|addon| addon.downcast_mut())
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// Builds a live query over the entities matching `matcher`.
    pub fn query(&self, matcher: Matcher) -> Query {
        Query::new(matcher)
    }

    // ─── Host reclamation and disposal ───────────────────────────────────

    /// Releases every remaining entity of host `id` (full remove
    /// protocol each), then drops the host and fires the host-removed
    /// hooks.
    pub fn release_host(&mut self, id: HostId) -> EcsResult<()> {
        let host = self.host(id)?;
        let archetype = host.archetype();
        let mut slots = Vec::with_capacity(host.count());
        host.collect_slots(&mut slots);
        for slot in slots {
            self.remove(EntityRef::new(id, slot))?;
        }
        self.hosts[id.0 as usize] = None;
        self.by_archetype.remove(&archetype);
        self.hosts_version += 1;
        debug!(host = ?id, "released entity host");
        let hooks = self.host_removed_hooks.clone();
        for hook in hooks.borrow_mut().iter_mut() {
            hook(id);
        }
        Ok(())
    }

    /// Disposes every host with zero entities, firing the host-removed
    /// hooks for each.
    ///
    /// This is the canonical way to reclaim memory for short-lived
    /// archetypes.
    pub fn clear_empty_hosts(&mut self) {
        let empty: Vec<HostId> = self
            .hosts()
            .filter(|host| host.count() == 0)
            .map(|host| host.id())
            .collect();
        for id in empty {
            self.release_host(id)
                .expect("empty host exists and releases no entities");
        }
    }

    /// Tears the world down: fires `on_disposed` hooks, releases every
    /// host (each entity going through the full remove protocol),
    /// unregisters all systems, and drops every listener.
    ///
    /// Idempotent; also invoked by `Drop`.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        debug!("disposing world");
        let mut hooks = std::mem::take(&mut self.disposed_hooks);
        for hook in hooks.iter_mut() {
            hook(self);
        }
        let live: Vec<HostId> = self.hosts().map(|host| host.id()).collect();
        for id in live {
            let _ = self.release_host(id);
        }
        if let Some(registry) = self.get_addon_mut::<SystemRegistry>() {
            registry.clear();
        }
        self.dispatcher.clear();
        self.disposed = true;
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.dispose();
    }
}
