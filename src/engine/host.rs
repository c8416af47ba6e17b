//! Entity hosts.
//!
//! A host owns every entity of one archetype: it pairs the archetype's
//! memoised [`EntityDescriptor`] with one [`Storage`] of whole-entity
//! tuples. The world talks to hosts through the object-safe [`AnyHost`]
//! seam so hosts of different archetypes (and different storage shapes)
//! live side by side in one registry.
//!
//! Hosts emit `on_created` / `on_released` hooks with the entity
//! reference; the surrounding world event protocol (`world_events::Add`
//! before listeners can react, `world_events::Remove` before the slot
//! dies) is driven by the world, which owns the dispatcher.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::engine::archetype::{descriptor_of, EntityDescriptor, EntityLayout};
use crate::engine::entity::EntityRef;
use crate::engine::error::EcsResult;
use crate::engine::storage::Storage;
use crate::engine::types::{HostId, Slot};

type HookList = Rc<RefCell<Vec<Box<dyn FnMut(EntityRef)>>>>;

/// Per-host lifecycle hooks.
///
/// Hooks receive only the entity reference; they cannot reach back into
/// the world, so firing them never conflicts with the mutation that
/// triggered them.
#[derive(Clone, Default)]
pub struct HostHooks {
    created: HookList,
    released: HookList,
}

impl HostHooks {
    /// Registers a hook fired after each entity creation.
    pub fn on_created(&self, hook: impl FnMut(EntityRef) + 'static) {
        self.created.borrow_mut().push(Box::new(hook));
    }

    /// Registers a hook fired as each entity is released, while its
    /// components are still readable.
    pub fn on_released(&self, hook: impl FnMut(EntityRef) + 'static) {
        self.released.borrow_mut().push(Box::new(hook));
    }

    pub(crate) fn fire_created(&self, entity: EntityRef) {
        for hook in self.created.borrow_mut().iter_mut() {
            hook(entity);
        }
    }

    pub(crate) fn fire_released(&self, entity: EntityRef) {
        for hook in self.released.borrow_mut().iter_mut() {
            hook(entity);
        }
    }
}

/// Container for all entities of archetype `E`, stored in `S`.
pub struct Host<E: EntityLayout, S: Storage<E>> {
    id: HostId,
    descriptor: &'static EntityDescriptor,
    storage: S,
    hooks: HostHooks,
    _entity: PhantomData<fn() -> E>,
}

impl<E: EntityLayout, S: Storage<E>> Host<E, S> {
    /// Creates a host over `storage`.
    ///
    /// The host id is assigned when the host is installed into a world.
    pub fn new(storage: S) -> Self {
        Self {
            id: HostId(u32::MAX),
            descriptor: descriptor_of::<E>(),
            storage,
            hooks: HostHooks::default(),
            _entity: PhantomData,
        }
    }

    /// Allocates a slot holding a default-initialised entity and fires
    /// `on_created`.
    pub fn create(&mut self) -> Slot
    where
        E: Default,
    {
        self.create_with(E::default())
    }

    /// Allocates a slot holding `value` and fires `on_created`.
    pub fn create_with(&mut self, value: E) -> Slot {
        let slot = self.storage.allocate_with(value);
        self.hooks.fire_created(EntityRef::new(self.id, slot));
        slot
    }

    /// The storage backing this host.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutable access to the backing storage.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}

/// Object-safe host seam used by the world registry.
pub trait AnyHost: Any {
    /// Descriptor of the archetype this host stores.
    fn descriptor(&self) -> &'static EntityDescriptor;

    /// Runtime identity of the archetype tuple type.
    fn archetype(&self) -> TypeId;

    /// Id of this host within its world.
    fn id(&self) -> HostId;

    /// Creates an entity from a type-erased tuple value.
    ///
    /// The value's concrete type must be the host's archetype tuple.
    fn create_dyn(&mut self, value: Box<dyn Any>) -> Slot;

    /// Fires `on_released` for `slot` and returns it to the storage.
    fn release_slot(&mut self, slot: Slot) -> EcsResult<()>;

    /// Read-only base pointer of the entity tuple stored at `slot`.
    fn payload_ptr(&self, slot: Slot) -> EcsResult<*const u8>;

    /// Mutable base pointer of the entity tuple stored at `slot`.
    fn payload_ptr_mut(&mut self, slot: Slot) -> EcsResult<*mut u8>;

    /// Returns `true` if `slot` is currently allocated.
    fn is_valid(&self, slot: Slot) -> bool;

    /// Number of live entities in this host.
    fn count(&self) -> usize;

    /// Appends every allocated slot to `out`.
    fn collect_slots(&self, out: &mut Vec<Slot>);

    /// The host's lifecycle hooks.
    fn hooks(&self) -> HostHooks;

    /// Assigns the host id. Called once when the host is installed into
    /// a world.
    fn set_id(&mut self, id: HostId);

    /// Upcast for typed downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: EntityLayout, S: Storage<E> + 'static> AnyHost for Host<E, S> {
    fn descriptor(&self) -> &'static EntityDescriptor {
        self.descriptor
    }

    fn archetype(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn id(&self) -> HostId {
        self.id
    }

    fn create_dyn(&mut self, value: Box<dyn Any>) -> Slot {
        let value = value
            .downcast::<E>()
            .expect("entity value type does not match the host archetype");
        self.create_with(*value)
    }

    fn release_slot(&mut self, slot: Slot) -> EcsResult<()> {
        self.hooks.fire_released(EntityRef::new(self.id, slot));
        self.storage.release(slot)?;
        Ok(())
    }

    fn payload_ptr(&self, slot: Slot) -> EcsResult<*const u8> {
        Ok(self.storage.get(slot)? as *const E as *const u8)
    }

    fn payload_ptr_mut(&mut self, slot: Slot) -> EcsResult<*mut u8> {
        Ok(self.storage.get_mut(slot)? as *mut E as *mut u8)
    }

    fn is_valid(&self, slot: Slot) -> bool {
        self.storage.is_valid(slot)
    }

    fn count(&self) -> usize {
        self.storage.count()
    }

    fn collect_slots(&self, out: &mut Vec<Slot>) {
        self.storage.collect_slots(out);
    }

    fn hooks(&self) -> HostHooks {
        self.hooks.clone()
    }

    fn set_id(&mut self, id: HostId) {
        self.id = id;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
