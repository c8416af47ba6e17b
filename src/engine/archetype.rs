//! Archetype descriptors.
//!
//! An archetype is the fixed, ordered set of component types an entity
//! is composed of, expressed as a Rust tuple. [`EntityLayout`] is the
//! compile-time side of the contract (implemented for component tuples
//! up to arity 8); [`EntityDescriptor`] is the runtime side: a mapping
//! from component type to byte offset and size within the stored tuple,
//! built once per archetype and memoised for the lifetime of the
//! process.
//!
//! Offsets are taken from the compiler via `offset_of!`, so they always
//! match the platform's real layout for the tuple, and typed accessors
//! can add them to a payload base pointer without any layout
//! assumptions.
//!
//! ## Invariants
//! - A `(component type, type index)` pair appears at most once per
//!   descriptor; the `type_index` disambiguates repeated occurrences of
//!   the same component type so two instantiations of one generic
//!   component can coexist.
//! - Record offsets are stable for the descriptor's lifetime, which is
//!   the lifetime of the process.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::mem::{offset_of, size_of};
use std::sync::{OnceLock, RwLock};

/// One component column within an archetype tuple.
#[derive(Clone, Copy, Debug)]
pub struct ComponentRecord {
    /// Runtime identity of the component type.
    pub type_id: TypeId,
    /// Occurrence index among records with the same `type_id`.
    pub type_index: u32,
    /// Component type name, for diagnostics.
    pub name: &'static str,
    /// Byte offset of the component inside the stored tuple.
    pub offset: usize,
    /// Size of the component in bytes.
    pub size: usize,
}

/// Runtime description of an archetype: its component records in
/// declaration order plus the total stride of the stored tuple.
#[derive(Debug)]
pub struct EntityDescriptor {
    /// Component records in tuple declaration order.
    pub records: Vec<ComponentRecord>,
    /// Total size of the stored tuple in bytes.
    pub stride: usize,
    /// Name of the archetype tuple type, for diagnostics.
    pub type_name: &'static str,
}

impl EntityDescriptor {
    /// Returns the record for `(type_id, type_index)`, if present.
    pub fn record_of(&self, type_id: TypeId, type_index: u32) -> Option<&ComponentRecord> {
        self.records
            .iter()
            .find(|r| r.type_id == type_id && r.type_index == type_index)
    }

    /// Returns `true` if the archetype contains at least one component
    /// of type `type_id`.
    #[inline]
    pub fn has(&self, type_id: TypeId) -> bool {
        self.records.iter().any(|r| r.type_id == type_id)
    }
}

/// Compile-time contract of an archetype tuple.
///
/// Implemented for component tuples `(A,)` through `(A, .., H)`. The
/// runtime never calls [`EntityLayout::build_descriptor`] directly; use
/// [`descriptor_of`], which memoises the result per archetype.
pub trait EntityLayout: 'static {
    /// Builds the runtime descriptor for this archetype.
    fn build_descriptor() -> EntityDescriptor;
}

/// A compile-time list of types, used to construct matchers and event
/// sets from tuples.
pub trait TypeList {
    /// Appends `(type id, type name)` pairs in declaration order.
    fn append(out: &mut Vec<(TypeId, &'static str)>);
}

fn assign_type_indices(records: &mut [ComponentRecord]) {
    for i in 0..records.len() {
        let earlier = records[..i]
            .iter()
            .filter(|r| r.type_id == records[i].type_id)
            .count();
        records[i].type_index = earlier as u32;
    }
}

macro_rules! impl_entity_layout {
    ($($ty:ident => $idx:tt),+) => {
        impl<$($ty: 'static),+> EntityLayout for ($($ty,)+) {
            fn build_descriptor() -> EntityDescriptor {
                let mut records = vec![$(
                    ComponentRecord {
                        type_id: TypeId::of::<$ty>(),
                        type_index: 0,
                        name: type_name::<$ty>(),
                        offset: offset_of!(Self, $idx),
                        size: size_of::<$ty>(),
                    },
                )+];
                assign_type_indices(&mut records);
                EntityDescriptor {
                    records,
                    stride: size_of::<($($ty,)+)>(),
                    type_name: type_name::<($($ty,)+)>(),
                }
            }
        }

        impl<$($ty: 'static),+> TypeList for ($($ty,)+) {
            fn append(out: &mut Vec<(TypeId, &'static str)>) {
                $(out.push((TypeId::of::<$ty>(), type_name::<$ty>()));)+
            }
        }
    };
}

impl_entity_layout!(A => 0);
impl_entity_layout!(A => 0, B => 1);
impl_entity_layout!(A => 0, B => 1, C => 2);
impl_entity_layout!(A => 0, B => 1, C => 2, D => 3);
impl_entity_layout!(A => 0, B => 1, C => 2, D => 3, E => 4);
impl_entity_layout!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
impl_entity_layout!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6);
impl_entity_layout!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6, H => 7);

impl TypeList for () {
    fn append(_out: &mut Vec<(TypeId, &'static str)>) {}
}

/// Process-wide descriptor registry, keyed by archetype identity.
///
/// Descriptors are built on first use, leaked to `'static`, and never
/// destroyed, so every host of the same archetype shares one descriptor
/// and offset lookups never take the lock twice.
static DESCRIPTORS: OnceLock<RwLock<HashMap<TypeId, &'static EntityDescriptor>>> = OnceLock::new();

fn descriptor_registry() -> &'static RwLock<HashMap<TypeId, &'static EntityDescriptor>> {
    DESCRIPTORS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Returns the memoised descriptor for archetype `E`.
pub fn descriptor_of<E: EntityLayout>() -> &'static EntityDescriptor {
    let key = TypeId::of::<E>();
    let registry = descriptor_registry();
    if let Some(&descriptor) = registry
        .read()
        .expect("descriptor registry poisoned")
        .get(&key)
    {
        return descriptor;
    }

    let mut map = registry.write().expect("descriptor registry poisoned");
    *map.entry(key)
        .or_insert_with(|| Box::leak(Box::new(E::build_descriptor())))
}

/// Collects the `(type id, name)` pairs of a type list tuple.
pub fn type_list_of<L: TypeList>() -> Vec<(TypeId, &'static str)> {
    let mut out = Vec::new();
    L::append(&mut out);
    out
}
