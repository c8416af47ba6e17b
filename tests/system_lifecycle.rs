use std::cell::Cell;
use std::rc::Rc;

use pulse_ecs::prelude::*;
use pulse_ecs::world_events::{Add, Remove};

#[derive(Clone, Copy, Default)]
struct Health(f32);

#[derive(Clone, Copy, Default)]
struct Transform {
    x: f32,
    y: f32,
}

struct NoopSystem;

impl System for NoopSystem {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Health,)>()
    }
}

#[test]
fn double_registration_is_refused() {
    let mut world = World::new();
    let mut scheduler = Scheduler::new();

    let mut handle = register_system(&mut world, &mut scheduler, NoopSystem).unwrap();
    let result = register_system(&mut world, &mut scheduler, NoopSystem);
    assert!(matches!(
        result,
        Err(EcsError::SystemAlreadyRegistered { .. })
    ));

    // The same system can live on a second scheduler.
    let mut other = Scheduler::new();
    let mut second = register_system(&mut world, &mut other, NoopSystem).unwrap();

    handle.dispose(&mut world, &mut scheduler).unwrap();
    second.dispose(&mut world, &mut other).unwrap();
}

struct DependentSystem;

impl System for DependentSystem {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Health,)>()
    }

    fn dependencies(&self) -> Vec<SystemId> {
        vec![SystemId::of::<NoopSystem>()]
    }
}

#[test]
fn missing_dependency_fails_and_leaves_the_scheduler_unchanged() {
    let mut world = World::new();
    let mut scheduler = Scheduler::new();

    let result = register_system(&mut world, &mut scheduler, DependentSystem);
    assert!(matches!(
        result,
        Err(EcsError::InvalidSystemDependency { .. })
    ));
    assert_eq!(scheduler.task_count(), 0);

    // With the dependency present, registration succeeds and the edge
    // orders execution.
    let mut dep = register_system(&mut world, &mut scheduler, NoopSystem).unwrap();
    let mut handle = register_system(&mut world, &mut scheduler, DependentSystem).unwrap();
    assert_eq!(scheduler.task_count(), 2);

    handle.dispose(&mut world, &mut scheduler).unwrap();
    dep.dispose(&mut world, &mut scheduler).unwrap();
    assert_eq!(scheduler.task_count(), 0);
}

struct FilterOnlySystem;

impl System for FilterOnlySystem {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Health,)>()
    }

    fn filters(&self) -> EventSet {
        EventSet::of::<(Remove,)>()
    }
}

#[test]
fn filters_without_triggers_are_an_invalid_attribute() {
    let mut world = World::new();
    let mut scheduler = Scheduler::new();

    let result = register_system(&mut world, &mut scheduler, FilterOnlySystem);
    assert!(matches!(
        result,
        Err(EcsError::InvalidSystemAttribute { .. })
    ));
    assert_eq!(scheduler.task_count(), 0);
}

struct ReactiveProbe;

impl System for ReactiveProbe {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Health,)>()
    }

    fn triggers(&self) -> EventSet {
        EventSet::of::<(Add,)>()
    }
}

#[test]
fn disposal_removes_the_task_and_every_listener_subscription() {
    let mut world = World::new();
    let mut scheduler = Scheduler::new();
    let dispatcher = world.dispatcher();

    let entity = world.add((Health(10.0),)).unwrap();

    let baseline_tasks = scheduler.task_count();
    let baseline_add = dispatcher.type_listener_count::<Add>();

    let mut handle = register_system(&mut world, &mut scheduler, ReactiveProbe).unwrap();
    assert_eq!(scheduler.task_count(), baseline_tasks + 1);
    assert_eq!(dispatcher.type_listener_count::<Add>(), baseline_add + 1);
    assert_eq!(
        dispatcher.entity_listener_count(entity),
        1,
        "existing matching entity is tracked"
    );

    let late = world.add((Health(5.0),)).unwrap();
    assert_eq!(dispatcher.entity_listener_count(late), 1);

    handle.dispose(&mut world, &mut scheduler).unwrap();
    assert_eq!(scheduler.task_count(), baseline_tasks);
    assert_eq!(dispatcher.type_listener_count::<Add>(), baseline_add);
    assert_eq!(dispatcher.entity_listener_count(entity), 0);
    assert_eq!(dispatcher.entity_listener_count(late), 0);

    assert!(matches!(
        handle.dispose(&mut world, &mut scheduler),
        Err(EcsError::ObjectDisposed)
    ));
}

// ─── Children ────────────────────────────────────────────────────────────

thread_local! {
    static LIFECYCLE: std::cell::RefCell<Vec<&'static str>> = std::cell::RefCell::new(Vec::new());
}

fn lifecycle_push(tag: &'static str) {
    LIFECYCLE.with(|log| log.borrow_mut().push(tag));
}

fn lifecycle_take() -> Vec<&'static str> {
    LIFECYCLE.with(|log| std::mem::take(&mut *log.borrow_mut()))
}

struct ChildA;

impl System for ChildA {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Health,)>()
    }

    fn initialize(&self, _world: &mut World) -> EcsResult<()> {
        lifecycle_push("init-a");
        Ok(())
    }

    fn uninitialize(&self, _world: &mut World) -> EcsResult<()> {
        lifecycle_push("fini-a");
        Ok(())
    }
}

struct ChildB;

impl System for ChildB {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Transform,)>()
    }

    fn initialize(&self, _world: &mut World) -> EcsResult<()> {
        lifecycle_push("init-b");
        Ok(())
    }

    fn uninitialize(&self, _world: &mut World) -> EcsResult<()> {
        lifecycle_push("fini-b");
        Ok(())
    }
}

struct PassiveParent;

impl System for PassiveParent {
    fn children(&self) -> Vec<SystemNode> {
        vec![SystemNode::of(ChildA), SystemNode::of(ChildB)]
    }
}

#[test]
fn passive_parent_orders_children_and_disposes_them_in_reverse() {
    let mut world = World::new();
    let mut scheduler = Scheduler::new();

    let mut handle = register_system(&mut world, &mut scheduler, PassiveParent).unwrap();
    assert_eq!(lifecycle_take(), ["init-a", "init-b"]);
    assert_eq!(scheduler.task_count(), 3, "parent barrier plus two children");
    assert_eq!(handle.children().len(), 2);

    // Parent task cannot be removed while children depend on it; the
    // handle tears everything down in the right order instead.
    assert!(matches!(
        scheduler.remove_task(handle.task()),
        Err(EcsError::TaskDepended)
    ));

    handle.dispose(&mut world, &mut scheduler).unwrap();
    assert_eq!(lifecycle_take(), ["fini-b", "fini-a"]);
    assert_eq!(scheduler.task_count(), 0);
}

struct BadChild;

impl System for BadChild {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Health,)>()
    }

    fn dependencies(&self) -> Vec<SystemId> {
        // Never registered, so the child always fails.
        vec![SystemId::of::<DependentSystem>()]
    }
}

struct FailingParent;

impl System for FailingParent {
    fn children(&self) -> Vec<SystemNode> {
        vec![SystemNode::of(ChildA), SystemNode::of(BadChild)]
    }
}

#[test]
fn child_failure_rolls_back_registered_children_in_reverse() {
    let mut world = World::new();
    let mut scheduler = Scheduler::new();

    let result = register_system(&mut world, &mut scheduler, FailingParent);
    assert!(matches!(result, Err(EcsError::InvalidSystemChild { .. })));

    assert_eq!(lifecycle_take(), ["init-a", "fini-a"]);
    assert_eq!(scheduler.task_count(), 0, "registration left no residue");

    // A fresh registration of the healthy sibling works afterwards.
    let mut handle = register_system(&mut world, &mut scheduler, ChildA).unwrap();
    handle.dispose(&mut world, &mut scheduler).unwrap();
}

struct TrackingSystem {
    executed: Rc<Cell<u32>>,
}

impl System for TrackingSystem {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Health,)>()
    }

    fn execute(&self, _world: &mut World, _entity: EntityRef) -> EcsResult<()> {
        self.executed.set(self.executed.get() + 1);
        Ok(())
    }
}

#[test]
fn disposed_system_stops_executing() {
    let mut world = World::new();
    let mut scheduler = Scheduler::new();
    let executed = Rc::new(Cell::new(0));

    world.add((Health(1.0),)).unwrap();
    let mut handle = register_system(
        &mut world,
        &mut scheduler,
        TrackingSystem {
            executed: executed.clone(),
        },
    )
    .unwrap();

    scheduler.tick(&mut world).unwrap();
    assert_eq!(executed.get(), 1);

    handle.dispose(&mut world, &mut scheduler).unwrap();
    scheduler.tick(&mut world).unwrap();
    assert_eq!(executed.get(), 1);
}
