//! Dependency-ordered task scheduling.
//!
//! The scheduler is a directed acyclic task graph. Nodes carry an
//! optional thunk (nodes without one are pure synchronisation points),
//! predecessor and successor edge lists, and an opaque user-data slot.
//!
//! [`Scheduler::tick`] walks the nodes once in topological order,
//! running each thunk on the calling thread. The order is recomputed
//! lazily when the edge set changes and is immutable during a tick:
//! thunks receive only `&mut World`, so the borrow checker rules out
//! structural mutation of the running graph.
//!
//! A thunk returning `Ok(true)` removes its node at end of tick, which
//! is the only cancellation primitive. A thunk error interrupts the tick with
//! well-defined partial state: earlier nodes have executed (and their
//! requested self-removals are applied), later nodes have not.

use std::any::Any;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::debug_span;

use crate::engine::error::{EcsError, EcsResult};
use crate::engine::types::{Generation, SchedulerId};
use crate::engine::world::World;

/// Task thunk: runs against the world, returns `Ok(true)` to remove its
/// node at end of tick.
pub type TaskFn = Box<dyn FnMut(&mut World) -> EcsResult<bool>>;

/// Handle to a task node. Generation-guarded like storage slots.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId {
    index: u32,
    generation: Generation,
}

struct TaskNode {
    thunk: Option<TaskFn>,
    predecessors: Vec<TaskId>,
    successors: Vec<TaskId>,
    user_data: Option<Box<dyn Any>>,
    generation: Generation,
    live: bool,
}

/// Directed acyclic task graph executed in topological order.
pub struct Scheduler {
    id: SchedulerId,
    tasks: Vec<TaskNode>,
    free: Vec<u32>,
    order: Vec<TaskId>,
    dirty: bool,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self {
            id: SchedulerId::next(),
            tasks: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
            dirty: false,
        }
    }

    /// Process-unique identity of this scheduler instance.
    pub fn id(&self) -> SchedulerId {
        self.id
    }

    /// Number of live tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.iter().filter(|node| node.live).count()
    }

    /// Returns `true` if `id` names a live task.
    pub fn has_task(&self, id: TaskId) -> bool {
        self.node(id).is_some()
    }

    fn node(&self, id: TaskId) -> Option<&TaskNode> {
        self.tasks
            .get(id.index as usize)
            .filter(|node| node.live && node.generation == id.generation)
    }

    fn node_mut(&mut self, id: TaskId) -> Option<&mut TaskNode> {
        self.tasks
            .get_mut(id.index as usize)
            .filter(|node| node.live && node.generation == id.generation)
    }

    /// Adds a node with an optional thunk, drawing an edge from each
    /// predecessor.
    ///
    /// Fails with `TaskNotFound` if any predecessor is not in the graph;
    /// the graph is left unchanged. The new node sorts after all its
    /// predecessors in the next computed order.
    pub fn create_task(
        &mut self,
        thunk: Option<TaskFn>,
        predecessors: &[TaskId],
    ) -> EcsResult<TaskId> {
        for &pred in predecessors {
            if !self.has_task(pred) {
                return Err(EcsError::TaskNotFound);
            }
        }

        let id = match self.free.pop() {
            Some(index) => {
                let generation = self.tasks[index as usize].generation;
                let id = TaskId { index, generation };
                let node = &mut self.tasks[index as usize];
                node.thunk = thunk;
                node.predecessors = predecessors.to_vec();
                node.successors = Vec::new();
                node.user_data = None;
                node.live = true;
                id
            }
            None => {
                let index = self.tasks.len() as u32;
                self.tasks.push(TaskNode {
                    thunk,
                    predecessors: predecessors.to_vec(),
                    successors: Vec::new(),
                    user_data: None,
                    generation: 0,
                    live: true,
                });
                TaskId {
                    index,
                    generation: 0,
                }
            }
        };

        for &pred in predecessors {
            let node = self
                .node_mut(pred)
                .expect("predecessor existence checked above");
            node.successors.push(id);
        }
        self.dirty = true;
        Ok(id)
    }

    /// Adds a dependency edge making `task` run after `pred`.
    ///
    /// Fails with `TaskCycle` if the edge would close a cycle; the
    /// graph is left untouched.
    pub fn add_dependency(&mut self, task: TaskId, pred: TaskId) -> EcsResult<()> {
        if !self.has_task(task) || !self.has_task(pred) {
            return Err(EcsError::TaskNotFound);
        }
        if task == pred || self.reaches(task, pred) {
            return Err(EcsError::TaskCycle);
        }
        let node = self.node_mut(task).expect("checked above");
        if !node.predecessors.contains(&pred) {
            node.predecessors.push(pred);
            self.node_mut(pred)
                .expect("checked above")
                .successors
                .push(task);
            self.dirty = true;
        }
        Ok(())
    }

    // True if `to` is reachable from `from` along successor edges.
    fn reaches(&self, from: TaskId, to: TaskId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.tasks.len()];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if std::mem::replace(&mut seen[id.index as usize], true) {
                continue;
            }
            if let Some(node) = self.node(id) {
                stack.extend(node.successors.iter().copied());
            }
        }
        false
    }

    /// Removes a task with no successors, detaching it from its
    /// predecessors.
    ///
    /// Fails with `TaskDepended` while other tasks still depend on it.
    pub fn remove_task(&mut self, id: TaskId) -> EcsResult<()> {
        let node = self.node(id).ok_or(EcsError::TaskNotFound)?;
        if !node.successors.is_empty() {
            return Err(EcsError::TaskDepended);
        }
        self.detach(id);
        Ok(())
    }

    // Unconditional removal: detaches both edge directions. Used by
    // end-of-tick self-removal, where successors survive the node.
    fn detach(&mut self, id: TaskId) {
        let node = match self.node_mut(id) {
            Some(node) => node,
            None => return,
        };
        let predecessors = std::mem::take(&mut node.predecessors);
        let successors = std::mem::take(&mut node.successors);
        node.thunk = None;
        node.user_data = None;
        node.live = false;
        node.generation = node.generation.wrapping_add(1);

        for pred in predecessors {
            if let Some(node) = self.node_mut(pred) {
                node.successors.retain(|&succ| succ != id);
            }
        }
        for succ in successors {
            if let Some(node) = self.node_mut(succ) {
                node.predecessors.retain(|&pred| pred != id);
            }
        }
        self.free.push(id.index);
        self.dirty = true;
    }

    /// Stores opaque user data on a task node.
    pub fn set_task_data(&mut self, id: TaskId, data: Box<dyn Any>) -> EcsResult<()> {
        let node = self.node_mut(id).ok_or(EcsError::TaskNotFound)?;
        node.user_data = Some(data);
        Ok(())
    }

    /// Returns the user data stored on a task node, if any.
    pub fn task_data(&self, id: TaskId) -> Option<&dyn Any> {
        self.node(id).and_then(|node| node.user_data.as_deref())
    }

    fn rebuild_order(&mut self) {
        if !self.dirty {
            return;
        }
        self.order.clear();

        let mut indegree = vec![0usize; self.tasks.len()];
        let mut ready = BinaryHeap::new();
        for (index, node) in self.tasks.iter().enumerate() {
            if !node.live {
                continue;
            }
            indegree[index] = node.predecessors.len();
            if node.predecessors.is_empty() {
                ready.push(Reverse(index as u32));
            }
        }

        while let Some(Reverse(index)) = ready.pop() {
            let node = &self.tasks[index as usize];
            self.order.push(TaskId {
                index,
                generation: node.generation,
            });
            for succ in node.successors.clone() {
                let slot = &mut indegree[succ.index as usize];
                *slot -= 1;
                if *slot == 0 {
                    ready.push(Reverse(succ.index));
                }
            }
        }

        debug_assert_eq!(
            self.order.len(),
            self.task_count(),
            "task graph contains a cycle"
        );
        self.dirty = false;
    }

    /// Runs one tick: walks the tasks in topological order and executes
    /// each thunk.
    ///
    /// Thunks that returned `Ok(true)` are removed at end of tick. A
    /// thunk error aborts the walk after applying the self-removals of
    /// thunks that already ran, then propagates.
    pub fn tick(&mut self, world: &mut World) -> EcsResult<()> {
        let _span = debug_span!("scheduler_tick", tasks = self.task_count()).entered();
        self.rebuild_order();

        let order = self.order.clone();
        let mut finished = Vec::new();
        let mut failure = None;
        for id in order {
            if !self.has_task(id) {
                continue;
            }
            let result = match self.tasks[id.index as usize].thunk.as_mut() {
                Some(thunk) => thunk(world),
                None => Ok(false),
            };
            match result {
                Ok(true) => finished.push(id),
                Ok(false) => {}
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        for id in finished {
            self.detach(id);
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
