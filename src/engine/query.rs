//! Archetype matchers and live entity queries.
//!
//! A [`Matcher`] is a pure, cheap predicate over an archetype
//! descriptor. A [`Query`] binds a matcher to a world and yields the
//! entities whose archetypes satisfy it. The set of matching hosts is
//! cached and re-tested only when the world's host topology changes, so
//! each host's archetype is matched exactly once per topology version;
//! within a matching host the query simply tracks the storage's
//! allocated slots, which reflects entity creation and release with no
//! further bookkeeping.

use std::any::TypeId;
use std::cell::RefCell;

use crate::engine::archetype::{EntityDescriptor, TypeList};
use crate::engine::entity::EntityRef;
use crate::engine::types::HostId;
use crate::engine::world::World;

/// Pure predicate over an archetype.
#[derive(Clone, Debug, Default)]
pub enum Matcher {
    /// Matches no archetype.
    #[default]
    None,
    /// Matches every archetype.
    Any,
    /// Matches archetypes containing all listed component types.
    All(Vec<TypeId>),
    /// Conjunction.
    And(Box<Matcher>, Box<Matcher>),
    /// Disjunction.
    Or(Box<Matcher>, Box<Matcher>),
    /// Negation.
    Not(Box<Matcher>),
}

impl Matcher {
    /// Matcher requiring every component in the type-list tuple `L`,
    /// e.g. `Matcher::of::<(Transform, Health)>()`.
    pub fn of<L: TypeList>() -> Self {
        let mut entries = Vec::new();
        L::append(&mut entries);
        Matcher::All(entries.into_iter().map(|(id, _)| id).collect())
    }

    /// Conjunction with `other`.
    pub fn and(self, other: Matcher) -> Self {
        Matcher::And(Box::new(self), Box::new(other))
    }

    /// Disjunction with `other`.
    pub fn or(self, other: Matcher) -> Self {
        Matcher::Or(Box::new(self), Box::new(other))
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Matcher::Not(Box::new(self))
    }

    /// Returns `true` if an archetype with `descriptor` satisfies this
    /// matcher.
    pub fn matches(&self, descriptor: &EntityDescriptor) -> bool {
        match self {
            Matcher::None => false,
            Matcher::Any => true,
            Matcher::All(types) => types.iter().all(|&id| descriptor.has(id)),
            Matcher::And(a, b) => a.matches(descriptor) && b.matches(descriptor),
            Matcher::Or(a, b) => a.matches(descriptor) || b.matches(descriptor),
            Matcher::Not(inner) => !inner.matches(descriptor),
        }
    }

    /// Returns `true` if this matcher can never match (used to detect
    /// passive systems).
    pub fn is_none(&self) -> bool {
        matches!(self, Matcher::None)
    }
}

struct QueryCache {
    version: u64,
    hosts: Vec<HostId>,
}

/// Live view of the entities whose archetypes satisfy a matcher.
///
/// The query holds no entity list of its own: collecting walks the
/// allocated slots of the cached matching hosts, so results always
/// reflect the world's current population.
pub struct Query {
    matcher: Matcher,
    cache: RefCell<QueryCache>,
}

impl Query {
    /// Creates a query for `matcher`.
    pub fn new(matcher: Matcher) -> Self {
        Self {
            matcher,
            cache: RefCell::new(QueryCache {
                version: u64::MAX,
                hosts: Vec::new(),
            }),
        }
    }

    /// The query's matcher.
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    fn refresh(&self, world: &World) {
        let mut cache = self.cache.borrow_mut();
        let version = world.hosts_version();
        if cache.version == version {
            return;
        }
        cache.version = version;
        cache.hosts.clear();
        for host in world.hosts() {
            if self.matcher.matches(host.descriptor()) {
                cache.hosts.push(host.id());
            }
        }
    }

    /// Appends every matching entity to `out`.
    pub fn collect(&self, world: &World, out: &mut Vec<EntityRef>) {
        self.refresh(world);
        let cache = self.cache.borrow();
        let mut slots = Vec::new();
        for &host_id in &cache.hosts {
            let Ok(host) = world.host(host_id) else {
                continue;
            };
            slots.clear();
            host.collect_slots(&mut slots);
            out.extend(slots.iter().map(|&slot| EntityRef::new(host_id, slot)));
        }
    }

    /// Returns the matching entities as a fresh vector.
    pub fn entities(&self, world: &World) -> Vec<EntityRef> {
        let mut out = Vec::new();
        self.collect(world, &mut out);
        out
    }

    /// Number of matching entities.
    pub fn count(&self, world: &World) -> usize {
        self.refresh(world);
        let cache = self.cache.borrow();
        cache
            .hosts
            .iter()
            .filter_map(|&id| world.host(id).ok())
            .map(|host| host.count())
            .sum()
    }
}
