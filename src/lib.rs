//! # pulse_ecs
//!
//! Reactive archetype ECS runtime, designed to be embedded in a host
//! program's tick loop.
//!
//! Three tightly coupled subsystems make up the core:
//! - **The entity store**: a [`World`] of entity hosts, each
//!   specialised for one compile-time component tuple ("archetype"),
//!   keeping its entities in slot-addressed storage.
//! - **The reactive dispatcher**: a per-world event bus fanning events
//!   out to per-entity, per-type, and global listeners with predictable
//!   ordering and safe mutation during dispatch.
//! - **The scheduler and system engine**: a dependency-ordered task
//!   graph whose nodes are systems declaring matchers, triggers,
//!   filters, dependencies, and children.
//!
//! ## Design Goals
//! - Tightly packed component tuples with stable slot handles
//! - Synchronous event delivery with single-pass listener safety
//! - Deterministic, dependency-ordered system execution
//! - Deferred parallel mutation through a thread-shard command buffer

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![deny(dead_code)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::world::World;

pub use engine::entity::EntityRef;

pub use engine::archetype::{
    descriptor_of,
    ComponentRecord,
    EntityDescriptor,
    EntityLayout,
    TypeList,
};

pub use engine::host::{AnyHost, Host, HostHooks};

pub use engine::storage::{ArrayStorage, SparseStorage, Storage};

pub use engine::events::{world_events, Event, EventSet};

pub use engine::dispatcher::{Dispatcher, Listener};

pub use engine::scheduler::{Scheduler, TaskFn, TaskId};

pub use engine::systems::{
    register_system,
    System,
    SystemHandle,
    SystemId,
    SystemNode,
    SystemRegistry,
};

pub use engine::query::{Matcher, Query};

pub use engine::commands::{Command, CommandBuffer, Pool, Reusable};

pub use engine::error::{EcsError, EcsResult};

pub use engine::types::{HostId, SchedulerId, Slot};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used runtime types.
///
/// Import with:
/// ```rust
/// use pulse_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        register_system,
        world_events,
        Command,
        CommandBuffer,
        EcsError,
        EcsResult,
        EntityRef,
        EventSet,
        Matcher,
        Scheduler,
        System,
        SystemHandle,
        SystemId,
        SystemNode,
        World,
    };
}
