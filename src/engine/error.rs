//! Error surface of the runtime.
//!
//! Every violation the engine detects is reported through [`EcsError`];
//! nothing is swallowed or retried. The operation that detects a
//! violation fails and leaves observable state unchanged, with two
//! documented exceptions: a listener or task error aborts the remainder
//! of the current dispatch or tick (earlier side effects remain), and a
//! command-buffer submit keeps already-executed entries executed.
//!
//! Variants carry enough structured context (component and archetype
//! names, slot coordinates, system names) to make failures actionable
//! from a log line without a debugger.

use thiserror::Error;

use crate::engine::types::{Generation, HostId, SlotIndex};

/// Convenient result alias used by all fallible engine operations.
pub type EcsResult<T> = Result<T, EcsError>;

/// Errors reported by the entity store, dispatcher, scheduler, and
/// system engine.
#[derive(Debug, Error)]
pub enum EcsError {
    /// A component type was requested from an archetype that does not
    /// contain it.
    #[error("component {component} not present in archetype {archetype}")]
    ComponentNotFound {
        /// Requested component type name.
        component: &'static str,
        /// Archetype the entity belongs to.
        archetype: &'static str,
    },

    /// A slot was invalid: never allocated, already released, or stale
    /// (recycled under a newer generation).
    #[error("slot {index}v{generation} is not allocated")]
    InvalidSlot {
        /// Index of the offending slot.
        index: SlotIndex,
        /// Generation carried by the offending slot.
        generation: Generation,
    },

    /// An entity referenced a host that does not exist in this world
    /// (never created, or reclaimed by `clear_empty_hosts`).
    #[error("entity host {0:?} does not exist in this world")]
    HostNotFound(HostId),

    /// An archetype was installed twice with `add_host`.
    #[error("a host for archetype {archetype} already exists")]
    HostAlreadyExists {
        /// Archetype whose host already exists.
        archetype: &'static str,
    },

    /// `fetch`/`write_back` were called with mismatched slot and value
    /// counts.
    #[error("slot/value length mismatch: {slots} slots, {values} values")]
    LengthMismatch {
        /// Number of slots supplied.
        slots: usize,
        /// Number of values supplied.
        values: usize,
    },

    /// A system was registered twice on the same `(world, scheduler)`
    /// pair.
    #[error("system {system} is already registered on this world and scheduler")]
    SystemAlreadyRegistered {
        /// Name of the offending system type.
        system: &'static str,
    },

    /// A declared dependency was not registered on the same
    /// `(world, scheduler)` pair.
    #[error("system {system} depends on {dependency}, which is not registered here")]
    InvalidSystemDependency {
        /// System whose registration failed.
        system: &'static str,
        /// The missing dependency.
        dependency: &'static str,
    },

    /// A child system failed to register; the parent registration was
    /// rolled back.
    #[error("child of system {system} failed to register: {source}")]
    InvalidSystemChild {
        /// Parent system.
        system: &'static str,
        /// The underlying registration failure.
        #[source]
        source: Box<EcsError>,
    },

    /// The system's declarative configuration is inconsistent (a filter
    /// set without a trigger set).
    #[error("system {system} declares filters without triggers")]
    InvalidSystemAttribute {
        /// The misconfigured system.
        system: &'static str,
    },

    /// A task removal was refused because other tasks still depend on
    /// it.
    #[error("task has live successors and cannot be removed")]
    TaskDepended,

    /// A task id did not name a live task in this scheduler.
    #[error("task does not exist in this scheduler")]
    TaskNotFound,

    /// Adding a dependency edge would have closed a cycle; the graph was
    /// left untouched.
    #[error("dependency edge would create a cycle in the task graph")]
    TaskCycle,

    /// A handle was used after being disposed.
    #[error("handle was already disposed")]
    ObjectDisposed,

    /// The world was used after `dispose`.
    #[error("world was already disposed")]
    WorldDisposed,
}
