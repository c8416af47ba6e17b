//! Event types and event-type sets.
//!
//! An event is any `'static` value; its runtime identity is the concrete
//! `TypeId`. Events live on the stack for the duration of a dispatch:
//! the dispatcher hands listeners a `&dyn Event` and listeners downcast
//! through [`Event::as_any`] when they need the payload.
//!
//! The built-in [`world_events`] family is emitted by entity hosts;
//! command values double as events when delivered through
//! `World::modify`.

use std::any::{type_name, Any, TypeId};

use crate::engine::archetype::TypeList;

/// Marker contract for event values.
///
/// Blanket-implemented for every `'static` type, matching the rule that
/// any value distinguishable at runtime can be sent. Listeners recover
/// the payload with [`Event::as_any`] and `downcast_ref`.
pub trait Event: Any {
    /// Upcasts to `Any` for payload downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> Event for T {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Events emitted by entity hosts.
pub mod world_events {
    use std::marker::PhantomData;

    /// Sent after an entity has been created, targeted at the new
    /// entity.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Add;

    /// Sent before an entity's slot is invalidated, targeted at the
    /// dying entity. Listeners can still read its components.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Remove;

    /// Sent when component `C` joins an entity during a host-program
    /// driven archetype split.
    ///
    /// The core never emits this itself; it completes the event contract
    /// for hosts built from sibling storages.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct ComponentAdded<C: 'static>(PhantomData<fn() -> C>);

    /// Counterpart of [`ComponentAdded`] for component removal.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct ComponentRemoved<C: 'static>(PhantomData<fn() -> C>);
}

/// A small set of event types, used for system triggers and filters.
///
/// Entries are kept sorted by `TypeId` so membership tests are a binary
/// search and set algebra stays deterministic.
#[derive(Clone, Debug, Default)]
pub struct EventSet {
    entries: Vec<(TypeId, &'static str)>,
}

impl EventSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from a type-list tuple, e.g.
    /// `EventSet::of::<(world_events::Add, SetPosition)>()`.
    pub fn of<L: TypeList>() -> Self {
        let mut entries = Vec::new();
        L::append(&mut entries);
        let mut set = Self { entries };
        set.normalize();
        set
    }

    /// Adds event type `E` to the set.
    pub fn with<E: 'static>(mut self) -> Self {
        self.entries.push((TypeId::of::<E>(), type_name::<E>()));
        self.normalize();
        self
    }

    fn normalize(&mut self) {
        self.entries.sort_by_key(|(id, _)| *id);
        self.entries.dedup_by_key(|(id, _)| *id);
    }

    /// Returns `true` if the set contains no event types.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of event types in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if event type `E` is a member.
    #[inline]
    pub fn contains<E: 'static>(&self) -> bool {
        self.contains_id(TypeId::of::<E>())
    }

    /// Returns `true` if the event type with `id` is a member.
    #[inline]
    pub fn contains_id(&self, id: TypeId) -> bool {
        self.entries.binary_search_by_key(&id, |(e, _)| *e).is_ok()
    }

    /// Returns the members of `self` that are not members of `other`.
    pub fn difference(&self, other: &EventSet) -> EventSet {
        EventSet {
            entries: self
                .entries
                .iter()
                .filter(|(id, _)| !other.contains_id(*id))
                .copied()
                .collect(),
        }
    }

    /// Iterates the `(type id, name)` members in id order.
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &'static str)> + '_ {
        self.entries.iter().copied()
    }
}
