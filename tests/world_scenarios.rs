use std::cell::RefCell;
use std::rc::Rc;

use pulse_ecs::prelude::*;
use pulse_ecs::world_events::Add;
use pulse_ecs::HostId;

#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct Health {
    value: f32,
    debuff: f32,
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct Transform {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Default)]
struct DeltaTime(f32);

// ─── Scenario: damage over time ──────────────────────────────────────────

struct HealthUpdate;

impl System for HealthUpdate {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Health,)>()
    }

    fn execute(&self, world: &mut World, entity: EntityRef) -> EcsResult<()> {
        let dt = world.get_addon::<DeltaTime>().map_or(0.0, |dt| dt.0);
        let health = world.get_mut::<Health>(entity)?;
        if health.debuff > 0.0 {
            health.value -= health.debuff * dt;
        }
        Ok(())
    }
}

struct Death;

impl System for Death {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Health,)>()
    }

    fn dependencies(&self) -> Vec<SystemId> {
        vec![SystemId::of::<HealthUpdate>()]
    }

    fn execute(&self, world: &mut World, entity: EntityRef) -> EcsResult<()> {
        if world.get::<Health>(entity)?.value <= 0.0 {
            world.remove(entity)?;
        }
        Ok(())
    }
}

#[test]
fn damage_over_time_runs_until_death_removes_the_entity() {
    let mut world = World::new();
    let mut scheduler = Scheduler::new();
    world.acquire_addon::<DeltaTime>().0 = 0.5;

    let mut update = register_system(&mut world, &mut scheduler, HealthUpdate).unwrap();
    let mut death = register_system(&mut world, &mut scheduler, Death).unwrap();

    let entity = world
        .add((Health {
            value: 200.0,
            debuff: 100.0,
        },))
        .unwrap();
    assert_eq!(world.count(), 1);

    scheduler.tick(&mut world).unwrap();
    assert_eq!(world.get::<Health>(entity).unwrap().value, 150.0);
    assert!(world.is_alive(entity));

    for _ in 0..3 {
        scheduler.tick(&mut world).unwrap();
    }
    assert!(!world.is_alive(entity), "death system removed the entity");
    assert_eq!(world.count(), 0);

    death.dispose(&mut world, &mut scheduler).unwrap();
    update.dispose(&mut world, &mut scheduler).unwrap();
}

// ─── Scenario: reactive trigger ──────────────────────────────────────────

struct SetPosition {
    x: f32,
    y: f32,
}

impl Command for SetPosition {
    fn execute(&mut self, world: &mut World, target: EntityRef) -> EcsResult<()> {
        let transform = world.get_mut::<Transform>(target)?;
        transform.x = self.x;
        transform.y = self.y;
        Ok(())
    }
}

struct LocationDamage;

impl System for LocationDamage {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Transform, Health)>()
    }

    fn triggers(&self) -> EventSet {
        EventSet::of::<(Add, SetPosition)>()
    }

    fn execute(&self, world: &mut World, entity: EntityRef) -> EcsResult<()> {
        let position = *world.get::<Transform>(entity)?;
        let health = world.get_mut::<Health>(entity)?;
        if position == (Transform { x: 1.0, y: 1.0 }) {
            health.value -= 10.0;
        } else if position == (Transform { x: 1.0, y: 2.0 }) {
            health.debuff = 100.0;
        }
        Ok(())
    }
}

#[test]
fn reactive_system_consumes_only_event_touched_entities() {
    let mut world = World::new();
    let mut scheduler = Scheduler::new();
    let mut handle = register_system(&mut world, &mut scheduler, LocationDamage).unwrap();

    let entity = world
        .add((
            Transform { x: 1.0, y: 1.0 },
            Health {
                value: 200.0,
                debuff: 0.0,
            },
        ))
        .unwrap();

    scheduler.tick(&mut world).unwrap();
    assert_eq!(world.get::<Health>(entity).unwrap().value, 190.0);

    world
        .modify(entity, SetPosition { x: 1.0, y: 2.0 })
        .unwrap();
    scheduler.tick(&mut world).unwrap();
    assert_eq!(world.get::<Health>(entity).unwrap().debuff, 100.0);
    assert_eq!(world.get::<Health>(entity).unwrap().value, 190.0);

    world
        .modify(entity, SetPosition { x: 1.0, y: 3.0 })
        .unwrap();
    scheduler.tick(&mut world).unwrap();
    assert_eq!(
        *world.get::<Health>(entity).unwrap(),
        Health {
            value: 190.0,
            debuff: 100.0
        },
        "no location rule applies at (1,3)"
    );

    // A tick without any triggering event executes nobody.
    scheduler.tick(&mut world).unwrap();
    assert_eq!(world.get::<Health>(entity).unwrap().value, 190.0);

    handle.dispose(&mut world, &mut scheduler).unwrap();
}

// ─── Scenario: component missing ─────────────────────────────────────────

#[derive(Clone, Copy)]
struct NotPresent;

#[test]
fn missing_component_fails_without_mutating_storage() {
    let mut world = World::new();
    let entity = world
        .add((Health {
            value: 50.0,
            debuff: 5.0,
        },))
        .unwrap();

    let result = world.get::<NotPresent>(entity);
    assert!(matches!(result, Err(EcsError::ComponentNotFound { .. })));
    assert!(world.try_get::<NotPresent>(entity).is_none());

    assert_eq!(
        *world.get::<Health>(entity).unwrap(),
        Health {
            value: 50.0,
            debuff: 5.0
        }
    );
    assert_eq!(world.count(), 1);
}

// ─── World surface ───────────────────────────────────────────────────────

#[test]
fn count_tracks_creations_and_releases_across_hosts() {
    let mut world = World::new();
    let a = world.add((Health::default(),)).unwrap();
    let b = world.add((Transform::default(),)).unwrap();
    let _c = world.add((Transform::default(), Health::default())).unwrap();
    assert_eq!(world.count(), 3);

    world.remove(a).unwrap();
    assert_eq!(world.count(), 2);
    assert!(!world.is_alive(a));
    assert!(world.is_alive(b));

    assert!(matches!(world.remove(a), Err(EcsError::InvalidSlot { .. })));
}

#[test]
fn remove_event_sees_components_and_precedes_unlisten() {
    let mut world = World::new();
    let dispatcher = world.dispatcher();
    let observed: Rc<RefCell<Vec<f32>>> = Rc::default();

    let entity = world
        .add((Health {
            value: 77.0,
            debuff: 0.0,
        },))
        .unwrap();

    let log = observed.clone();
    dispatcher.listen_entity(entity, move |world, target, _event| {
        // The Remove event is delivered before the slot dies.
        log.borrow_mut().push(world.get::<Health>(target)?.value);
        Ok(false)
    });

    world.remove(entity).unwrap();
    assert_eq!(*observed.borrow(), [77.0]);
    assert_eq!(
        dispatcher.entity_listener_count(entity),
        0,
        "listeners are dropped after the final Remove"
    );
}

#[test]
fn host_hooks_fire_on_create_and_release() {
    let mut world = World::new();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    let created = log.clone();
    world.on_entity_created::<(Health,)>(move |_| created.borrow_mut().push("created"));
    let released = log.clone();
    world.on_entity_released::<(Health,)>(move |_| released.borrow_mut().push("released"));

    let entity = world.add((Health::default(),)).unwrap();
    world.remove(entity).unwrap();
    assert_eq!(*log.borrow(), ["created", "released"]);
}

#[test]
fn clear_empty_hosts_reclaims_only_empty_archetypes() {
    let mut world = World::new();
    let removed: Rc<RefCell<Vec<HostId>>> = Rc::default();
    let log = removed.clone();
    world.on_host_removed(move |id| log.borrow_mut().push(id));

    let transient = world.add((Transform::default(),)).unwrap();
    let persistent = world.add((Health::default(),)).unwrap();
    let transient_host = transient.host;
    world.remove(transient).unwrap();

    world.clear_empty_hosts();
    assert_eq!(*removed.borrow(), [transient_host]);
    assert!(world.is_alive(persistent));
    assert!(matches!(
        world.host(transient_host),
        Err(EcsError::HostNotFound(_))
    ));

    // The archetype can come back later under a fresh host.
    let again = world.add((Transform::default(),)).unwrap();
    assert_ne!(again.host, transient_host);
}

#[test]
fn addons_are_created_on_demand_and_survive_lookups() {
    let mut world = World::new();
    assert!(world.get_addon::<DeltaTime>().is_none());

    world.acquire_addon::<DeltaTime>().0 = 0.25;
    assert_eq!(world.get_addon::<DeltaTime>().unwrap().0, 0.25);

    world.get_addon_mut::<DeltaTime>().unwrap().0 = 0.5;
    assert_eq!(world.get_addon::<DeltaTime>().unwrap().0, 0.5);
}

#[test]
fn modify_delivers_the_command_as_an_event_to_the_target() {
    let mut world = World::new();
    let dispatcher = world.dispatcher();
    let seen: Rc<RefCell<Vec<(f32, f32)>>> = Rc::default();

    let entity = world
        .add((Transform::default(), Health::default()))
        .unwrap();

    let log = seen.clone();
    dispatcher.listen_type::<SetPosition>(move |_world, _target, event| {
        let command = event
            .as_any()
            .downcast_ref::<SetPosition>()
            .expect("command-typed event");
        log.borrow_mut().push((command.x, command.y));
        Ok(false)
    });

    world.modify(entity, SetPosition { x: 3.0, y: 4.0 }).unwrap();
    assert_eq!(*seen.borrow(), [(3.0, 4.0)]);
    assert_eq!(*world.get::<Transform>(entity).unwrap(), Transform { x: 3.0, y: 4.0 });
}

#[test]
fn visit_components_walks_the_descriptor_in_declaration_order() {
    let mut world = World::new();
    let entity = world
        .add((
            Transform { x: 1.0, y: 2.0 },
            Health {
                value: 9.0,
                debuff: 1.0,
            },
        ))
        .unwrap();

    let mut names = Vec::new();
    let mut sizes = Vec::new();
    world
        .visit_components(entity, |record, bytes| {
            names.push(record.name);
            sizes.push(bytes.len());
            assert_eq!(record.size, bytes.len());
        })
        .unwrap();

    assert_eq!(names.len(), 2);
    assert!(names[0].contains("Transform"));
    assert!(names[1].contains("Health"));
    assert_eq!(sizes, [8, 8]);
}

#[test]
fn dispose_releases_entities_and_refuses_further_additions() {
    let mut world = World::new();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    let released = log.clone();
    world.on_entity_released::<(Health,)>(move |_| released.borrow_mut().push("released"));
    let disposed = log.clone();
    world.on_disposed(move |_| disposed.borrow_mut().push("disposed"));

    world.add((Health::default(),)).unwrap();
    world.add((Health::default(),)).unwrap();

    world.dispose();
    assert_eq!(*log.borrow(), ["disposed", "released", "released"]);
    assert_eq!(world.count(), 0);
    assert!(world.is_disposed());
    assert!(matches!(
        world.add((Health::default(),)),
        Err(EcsError::WorldDisposed)
    ));

    // Idempotent.
    world.dispose();
    assert_eq!(log.borrow().len(), 3);
}

#[test]
fn sparse_hosts_participate_like_array_hosts() {
    let mut world = World::new();
    world
        .add_host::<(Health,), _>(pulse_ecs::SparseStorage::new())
        .unwrap();
    assert!(matches!(
        world.add_host::<(Health,), _>(pulse_ecs::SparseStorage::new()),
        Err(EcsError::HostAlreadyExists { .. })
    ));

    let entity = world
        .add((Health {
            value: 5.0,
            debuff: 0.0,
        },))
        .unwrap();
    assert_eq!(world.get::<Health>(entity).unwrap().value, 5.0);
    world.get_mut::<Health>(entity).unwrap().value = 6.0;
    assert_eq!(world.get::<Health>(entity).unwrap().value, 6.0);

    world.remove(entity).unwrap();
    assert_eq!(world.count(), 0);
}
