//! System registration and execution.
//!
//! A system is an object with read-only configuration: an archetype
//! [`Matcher`] (which entities), trigger/filter [`EventSet`]s (which
//! events grow or shrink its pending group), dependencies (ordering
//! against other systems), and children (nested lifetime). Execution
//! methods take `&self`; a system that needs mutable state keeps it in
//! `Cell`/`RefCell`/atomics, which is what lets event listeners call
//! back into a system while its own `execute` is on the stack.
//!
//! Registration wires a system onto a `(world, scheduler)` pair and
//! returns a [`SystemHandle`] owning the registration. Three execution
//! modes exist:
//!
//! - **Passive**: matcher is `None`. The task has no thunk and only
//!   orders its children.
//! - **Query-driven**: matcher set, no triggers. Each tick runs
//!   `before_execute`, then `execute` per live matching entity, then
//!   `after_execute`.
//! - **Reactive**: triggers set. Per-entity listeners maintain a
//!   pending group at event time; each tick consumes and clears the
//!   group. The group tolerates reentrant additions by re-reading its
//!   length every iteration.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::debug;

use crate::engine::dispatcher::{Dispatcher, Listener};
use crate::engine::entity::EntityRef;
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::events::{world_events, Event, EventSet};
use crate::engine::query::{Matcher, Query};
use crate::engine::scheduler::{Scheduler, TaskFn, TaskId};
use crate::engine::types::SchedulerId;
use crate::engine::world::World;

/// Identity of a system type: its `TypeId` plus the type name for
/// diagnostics. Equality and hashing use the `TypeId` only.
#[derive(Clone, Copy, Debug)]
pub struct SystemId {
    type_id: TypeId,
    name: &'static str,
}

impl SystemId {
    /// Identity of system type `S`.
    pub fn of<S: System>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            name: type_name::<S>(),
        }
    }

    /// The system type name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for SystemId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for SystemId {}

impl std::hash::Hash for SystemId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

/// A unit of logic driven by the scheduler over a filtered entity view.
pub trait System: Any {
    /// Which archetypes this system operates on. `Matcher::None` makes
    /// the system passive.
    fn matcher(&self) -> Matcher {
        Matcher::None
    }

    /// Event types that add a matching entity to the pending group.
    fn triggers(&self) -> EventSet {
        EventSet::new()
    }

    /// Event types that remove an entity from the pending group.
    fn filters(&self) -> EventSet {
        EventSet::new()
    }

    /// Systems whose tasks must run before this one.
    fn dependencies(&self) -> Vec<SystemId> {
        Vec::new()
    }

    /// Nested systems registered with this system's task as an
    /// additional predecessor and disposed with this system's handle.
    fn children(&self) -> Vec<SystemNode> {
        Vec::new()
    }

    /// Called once when registration succeeds.
    fn initialize(&self, _world: &mut World) -> EcsResult<()> {
        Ok(())
    }

    /// Called once when the handle is disposed.
    fn uninitialize(&self, _world: &mut World) -> EcsResult<()> {
        Ok(())
    }

    /// Called at the start of each tick's execution of this system.
    fn before_execute(&self, _world: &mut World) -> EcsResult<()> {
        Ok(())
    }

    /// Called per entity of the live query (query-driven mode) or of the
    /// pending group (reactive mode).
    fn execute(&self, _world: &mut World, _entity: EntityRef) -> EcsResult<()> {
        Ok(())
    }

    /// Called after the per-entity sweep of each tick.
    fn after_execute(&self, _world: &mut World) -> EcsResult<()> {
        Ok(())
    }

    /// Acceptance hook for trigger events; returning `false` keeps the
    /// target out of the pending group.
    fn on_trigger_event(&self, _world: &World, _entity: EntityRef, _event: &dyn Event) -> bool {
        true
    }

    /// Acceptance hook for filter events; returning `false` keeps the
    /// target in the pending group.
    fn on_filter_event(&self, _world: &World, _entity: EntityRef, _event: &dyn Event) -> bool {
        true
    }
}

/// A system instance paired with its [`SystemId`], ready to register.
pub struct SystemNode {
    id: SystemId,
    system: Rc<dyn System>,
}

impl SystemNode {
    /// Wraps a concrete system, capturing its identity.
    pub fn of<S: System>(system: S) -> Self {
        Self {
            id: SystemId::of::<S>(),
            system: Rc::new(system),
        }
    }

    /// The wrapped system's identity.
    pub fn id(&self) -> SystemId {
        self.id
    }

    /// Registers the system onto `(world, scheduler)`.
    pub fn register(self, world: &mut World, scheduler: &mut Scheduler) -> EcsResult<SystemHandle> {
        register_inner(world, scheduler, self, &[])
    }
}

/// Registers `system` onto `(world, scheduler)`.
pub fn register_system<S: System>(
    world: &mut World,
    scheduler: &mut Scheduler,
    system: S,
) -> EcsResult<SystemHandle> {
    SystemNode::of(system).register(world, scheduler)
}

/// World addon mapping registered systems to their task nodes, keyed by
/// scheduler so one world can drive several schedulers without
/// collisions.
#[derive(Default)]
pub struct SystemRegistry {
    entries: HashMap<(SchedulerId, SystemId), TaskId>,
}

impl SystemRegistry {
    fn contains(&self, scheduler: SchedulerId, system: SystemId) -> bool {
        self.entries.contains_key(&(scheduler, system))
    }

    fn task_of(&self, scheduler: SchedulerId, system: SystemId) -> Option<TaskId> {
        self.entries.get(&(scheduler, system)).copied()
    }

    fn insert(&mut self, scheduler: SchedulerId, system: SystemId, task: TaskId) {
        self.entries.insert((scheduler, system), task);
    }

    fn remove(&mut self, scheduler: SchedulerId, system: SystemId) {
        self.entries.remove(&(scheduler, system));
    }

    /// Number of registered systems across all schedulers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no systems are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

// ─── Pending group ───────────────────────────────────────────────────────

// Ordered, deduplicated entity set. Removal swap-removes; consumers
// re-read the length every iteration, so additions during consumption
// are picked up in the same sweep.
#[derive(Default)]
struct PendingGroup {
    items: RefCell<Vec<EntityRef>>,
    index: RefCell<HashSet<EntityRef>>,
}

impl PendingGroup {
    fn add(&self, entity: EntityRef) {
        if self.index.borrow_mut().insert(entity) {
            self.items.borrow_mut().push(entity);
        }
    }

    fn remove(&self, entity: EntityRef) {
        if self.index.borrow_mut().remove(&entity) {
            let mut items = self.items.borrow_mut();
            if let Some(position) = items.iter().position(|&e| e == entity) {
                items.swap_remove(position);
            }
        }
    }

    fn get(&self, position: usize) -> Option<EntityRef> {
        self.items.borrow().get(position).copied()
    }

    fn clear(&self) {
        self.items.borrow_mut().clear();
        self.index.borrow_mut().clear();
    }
}

// ─── Reactive wiring ─────────────────────────────────────────────────────

struct ReactiveState {
    system: Rc<dyn System>,
    group: PendingGroup,
    triggers: EventSet,
    filters: EventSet,
    add_is_trigger: bool,
    remove_is_trigger: bool,
    entity_listeners: RefCell<HashMap<EntityRef, Listener>>,
    add_listener: RefCell<Option<Listener>>,
}

impl ReactiveState {
    fn new(system: Rc<dyn System>, triggers: EventSet, filters: EventSet) -> Rc<Self> {
        Rc::new(Self {
            system,
            group: PendingGroup::default(),
            add_is_trigger: triggers.contains::<world_events::Add>(),
            remove_is_trigger: triggers.contains::<world_events::Remove>(),
            triggers,
            filters,
            entity_listeners: RefCell::new(HashMap::new()),
            add_listener: RefCell::new(None),
        })
    }

    // Per-entity event protocol. Returns true when the listener must
    // self-remove (the entity is going away).
    fn handle_entity_event(&self, world: &mut World, target: EntityRef, event: &dyn Event) -> bool {
        let type_id = event.as_any().type_id();
        if type_id == TypeId::of::<world_events::Remove>() {
            if self.remove_is_trigger {
                if self.system.on_trigger_event(world, target, event) {
                    self.group.add(target);
                }
            } else {
                self.group.remove(target);
            }
            self.entity_listeners.borrow_mut().remove(&target);
            return true;
        }

        if self.triggers.contains_id(type_id) && !self.filters.contains_id(type_id) {
            if self.system.on_trigger_event(world, target, event) {
                self.group.add(target);
            }
        } else if self.filters.contains_id(type_id)
            && self.system.on_filter_event(world, target, event)
        {
            self.group.remove(target);
        }
        false
    }

    fn teardown(&self) {
        if let Some(listener) = self.add_listener.borrow_mut().take() {
            listener.cancel();
        }
        for (_, listener) in self.entity_listeners.borrow_mut().drain() {
            listener.cancel();
        }
        self.group.clear();
    }
}

fn attach_entity_listener(state: &Rc<ReactiveState>, dispatcher: &Dispatcher, entity: EntityRef) {
    if state.entity_listeners.borrow().contains_key(&entity) {
        return;
    }
    let st = state.clone();
    let listener = dispatcher.listen_entity(entity, move |world, target, event| {
        Ok(st.handle_entity_event(world, target, event))
    });
    state.entity_listeners.borrow_mut().insert(entity, listener);
}

fn wire_reactive(world: &mut World, matcher: &Matcher, state: &Rc<ReactiveState>) {
    let dispatcher = world.dispatcher();

    // Track entities that are already live at registration time, so
    // later events can reach the group; only events observed from now on
    // populate it.
    let mut slots = Vec::new();
    let mut existing = Vec::new();
    for host in world.hosts() {
        if matcher.matches(host.descriptor()) {
            slots.clear();
            host.collect_slots(&mut slots);
            existing.extend(slots.iter().map(|&slot| EntityRef::new(host.id(), slot)));
        }
    }
    for entity in existing {
        attach_entity_listener(state, &dispatcher, entity);
    }

    // New matching entities attach on Add; Add may itself be a trigger.
    let st = state.clone();
    let hook_matcher = matcher.clone();
    let hook_dispatcher = dispatcher.clone();
    let add_listener = dispatcher.listen_type::<world_events::Add>(move |world, target, event| {
        let matches = world
            .host(target.host)
            .map(|host| hook_matcher.matches(host.descriptor()))
            .unwrap_or(false);
        if matches {
            attach_entity_listener(&st, &hook_dispatcher, target);
            if st.add_is_trigger
                && !st.filters.contains::<world_events::Add>()
                && st.system.on_trigger_event(world, target, event)
            {
                st.group.add(target);
            }
        }
        Ok(false)
    });
    state.add_listener.replace(Some(add_listener));
}

// ─── Registration ────────────────────────────────────────────────────────

fn query_thunk(system: Rc<dyn System>, matcher: Matcher) -> TaskFn {
    let query = Query::new(matcher);
    let mut buffer: Vec<EntityRef> = Vec::new();
    Box::new(move |world| {
        system.before_execute(world)?;
        buffer.clear();
        query.collect(world, &mut buffer);
        for &entity in &buffer {
            // An earlier execute may have removed this entity.
            if world.is_alive(entity) {
                system.execute(world, entity)?;
            }
        }
        system.after_execute(world)?;
        Ok(false)
    })
}

fn reactive_thunk(state: Rc<ReactiveState>) -> TaskFn {
    Box::new(move |world| {
        state.system.before_execute(world)?;
        let mut position = 0;
        while let Some(entity) = state.group.get(position) {
            state.system.execute(world, entity)?;
            position += 1;
        }
        state.group.clear();
        state.system.after_execute(world)?;
        Ok(false)
    })
}

fn register_inner(
    world: &mut World,
    scheduler: &mut Scheduler,
    node: SystemNode,
    extra_predecessors: &[TaskId],
) -> EcsResult<SystemHandle> {
    let SystemNode { id, system } = node;
    let scheduler_id = scheduler.id();

    if world
        .acquire_addon::<SystemRegistry>()
        .contains(scheduler_id, id)
    {
        return Err(EcsError::SystemAlreadyRegistered { system: id.name() });
    }

    let dependencies = system.dependencies();
    let mut predecessors = Vec::with_capacity(dependencies.len() + extra_predecessors.len());
    {
        let registry = world.acquire_addon::<SystemRegistry>();
        for dependency in dependencies {
            let task = registry.task_of(scheduler_id, dependency).ok_or(
                EcsError::InvalidSystemDependency {
                    system: id.name(),
                    dependency: dependency.name(),
                },
            )?;
            predecessors.push(task);
        }
    }
    predecessors.extend_from_slice(extra_predecessors);

    let matcher = system.matcher();
    let triggers = system.triggers();
    let filters = system.filters();
    if triggers.is_empty() && !filters.is_empty() {
        return Err(EcsError::InvalidSystemAttribute { system: id.name() });
    }

    let mut reactive = None;
    let thunk: Option<TaskFn> = if matcher.is_none() {
        None
    } else if triggers.is_empty() {
        Some(query_thunk(system.clone(), matcher.clone()))
    } else {
        let state = ReactiveState::new(system.clone(), triggers, filters);
        let thunk = reactive_thunk(state.clone());
        reactive = Some(state);
        Some(thunk)
    };

    let task = scheduler.create_task(thunk, &predecessors)?;
    scheduler
        .set_task_data(task, Box::new(id.name()))
        .expect("task created above");
    world
        .acquire_addon::<SystemRegistry>()
        .insert(scheduler_id, id, task);

    if let Err(error) = system.initialize(world) {
        world
            .acquire_addon::<SystemRegistry>()
            .remove(scheduler_id, id);
        let _ = scheduler.remove_task(task);
        return Err(error);
    }

    if let Some(state) = &reactive {
        wire_reactive(world, &matcher, state);
    }

    let mut children = Vec::new();
    for child in system.children() {
        match register_inner(world, scheduler, child, &[task]) {
            Ok(handle) => children.push(handle),
            Err(error) => {
                for mut handle in children.drain(..).rev() {
                    let _ = handle.dispose(world, scheduler);
                }
                if let Some(state) = &reactive {
                    state.teardown();
                }
                let _ = system.uninitialize(world);
                world
                    .acquire_addon::<SystemRegistry>()
                    .remove(scheduler_id, id);
                let _ = scheduler.remove_task(task);
                return Err(EcsError::InvalidSystemChild {
                    system: id.name(),
                    source: Box::new(error),
                });
            }
        }
    }

    debug!(system = id.name(), task = ?task, "registered system");
    Ok(SystemHandle {
        id,
        scheduler_id,
        task,
        system,
        reactive,
        children,
        disposed: false,
    })
}

/// Owner of a system registration.
///
/// Disposal unregisters the system entry, tears down its listeners,
/// disposes children in reverse registration order, uninitialises the
/// system, and removes its task node.
pub struct SystemHandle {
    id: SystemId,
    scheduler_id: SchedulerId,
    task: TaskId,
    system: Rc<dyn System>,
    reactive: Option<Rc<ReactiveState>>,
    children: Vec<SystemHandle>,
    disposed: bool,
}

impl SystemHandle {
    /// Identity of the registered system.
    pub fn id(&self) -> SystemId {
        self.id
    }

    /// The system's task node.
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Handles of the system's registered children, in registration
    /// order.
    pub fn children(&self) -> &[SystemHandle] {
        &self.children
    }

    /// Returns `true` once the handle has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Tears the registration down.
    ///
    /// Fails with `ObjectDisposed` on a second call.
    pub fn dispose(&mut self, world: &mut World, scheduler: &mut Scheduler) -> EcsResult<()> {
        if self.disposed {
            return Err(EcsError::ObjectDisposed);
        }
        self.disposed = true;

        world
            .acquire_addon::<SystemRegistry>()
            .remove(self.scheduler_id, self.id);
        if let Some(state) = &self.reactive {
            state.teardown();
        }
        for child in self.children.iter_mut().rev() {
            child.dispose(world, scheduler)?;
        }
        self.system.uninitialize(world)?;
        match scheduler.remove_task(self.task) {
            // The world may have been disposed under us; a missing task
            // is not an error at teardown time.
            Err(EcsError::TaskNotFound) => {}
            other => other?,
        }
        debug!(system = self.id.name(), "disposed system");
        Ok(())
    }
}
