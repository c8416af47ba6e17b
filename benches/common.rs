use pulse_ecs::prelude::*;

pub const AGENTS_SMALL: usize = 1_000;
pub const AGENTS_MED: usize = 100_000;

#[derive(Clone, Copy, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, Default)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

#[derive(Clone, Copy, Default)]
pub struct Wealth {
    pub value: f32,
}

pub fn populate(world: &mut World, agents: usize) {
    for i in 0..agents {
        let f = i as f32;
        world
            .add((
                Position { x: f, y: -f },
                Velocity { dx: 1.0, dy: 0.5 },
                Wealth { value: 100.0 },
            ))
            .expect("world accepts entities");
    }
}
