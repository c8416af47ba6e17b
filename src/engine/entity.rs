//! Entity references.
//!
//! An [`EntityRef`] is the universal reference to a live entity: the
//! host it lives in plus its slot within that host's storage. It is a
//! plain copyable value; holding one does not keep the entity alive,
//! and every accessor re-validates the slot against the storage.

use crate::engine::error::EcsResult;
use crate::engine::types::{HostId, Slot};
use crate::engine::world::World;

/// A `(host, slot)` pair identifying one entity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EntityRef {
    /// Host (archetype) the entity belongs to.
    pub host: HostId,
    /// Slot within the host's storage.
    pub slot: Slot,
}

impl EntityRef {
    /// Builds a reference from its parts.
    #[inline]
    pub fn new(host: HostId, slot: Slot) -> Self {
        Self { host, slot }
    }

    /// Returns a reference to component `C` of this entity.
    ///
    /// Fails with `ComponentNotFound` if the archetype lacks `C`, or
    /// with a slot/host error if the entity is no longer alive.
    #[inline]
    pub fn get<'w, C: 'static>(&self, world: &'w World) -> EcsResult<&'w C> {
        world.get::<C>(*self)
    }

    /// Mutable variant of [`EntityRef::get`].
    #[inline]
    pub fn get_mut<'w, C: 'static>(&self, world: &'w mut World) -> EcsResult<&'w mut C> {
        world.get_mut::<C>(*self)
    }

    /// Returns component `C` if the entity is alive and its archetype
    /// contains `C`, `None` otherwise.
    #[inline]
    pub fn try_get<'w, C: 'static>(&self, world: &'w World) -> Option<&'w C> {
        world.try_get::<C>(*self)
    }

    /// Returns `true` if this reference still names a live entity.
    #[inline]
    pub fn is_alive(&self, world: &World) -> bool {
        world.is_alive(*self)
    }
}
