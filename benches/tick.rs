use criterion::*;
use std::hint::black_box;

use pulse_ecs::prelude::*;

mod common;
use common::*;

struct Integrate;

impl System for Integrate {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Position, Velocity)>()
    }

    fn execute(&self, world: &mut World, entity: EntityRef) -> EcsResult<()> {
        let velocity = *world.get::<Velocity>(entity)?;
        let position = world.get_mut::<Position>(entity)?;
        position.x += velocity.dx;
        position.y += velocity.dy;
        Ok(())
    }
}

struct Decay;

impl System for Decay {
    fn matcher(&self) -> Matcher {
        Matcher::of::<(Wealth,)>()
    }

    fn dependencies(&self) -> Vec<SystemId> {
        vec![SystemId::of::<Integrate>()]
    }

    fn execute(&self, world: &mut World, entity: EntityRef) -> EcsResult<()> {
        world.get_mut::<Wealth>(entity)?.value *= 0.9999;
        Ok(())
    }
}

fn tick_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    group.bench_function("tick_2_systems_100k", |b| {
        b.iter_batched(
            || {
                let mut world = World::new();
                populate(&mut world, AGENTS_MED);

                let mut scheduler = Scheduler::new();
                register_system(&mut world, &mut scheduler, Integrate)
                    .expect("fresh registration");
                register_system(&mut world, &mut scheduler, Decay).expect("fresh registration");
                (world, scheduler)
            },
            |(mut world, mut scheduler)| {
                scheduler.tick(&mut world).expect("tick succeeds");
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, tick_benchmark);
criterion_main!(benches);
