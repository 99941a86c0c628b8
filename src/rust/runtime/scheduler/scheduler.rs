// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Worker bookkeeping of the cooperative, single-core scheduler.
//!
//! Workers live in a slab. Every worker is in exactly one of the ready, periodic or unassigned queues, or is blocked
//! on a synchronization object, or is the one currently running. The scheduler loop that switches between workers is
//! implemented on [crate::runtime::SharedRuntime], because picking the next worker needs the task manager too.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::protocol_violation,
    scheduler::worker::{
        WorkerCoroutine,
        WorkerId,
        WorkerState,
    },
    types::CoreId,
    SharedObject,
};
use ::slab::Slab;
use ::std::{
    collections::VecDeque,
    ops::{
        Deref,
        DerefMut,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct WorkerSlot {
    state: WorkerState,
    // Taken out while the worker runs.
    coroutine: Option<Box<WorkerCoroutine>>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SchedulerStats {
    pub workers_spawned: u64,
    pub max_live_workers: usize,
    pub context_switches: u64,
}

/// Tasking Scheduler
pub struct TaskingScheduler {
    core: CoreId,
    workers: Slab<WorkerSlot>,
    ready: VecDeque<WorkerId>,
    periodic: VecDeque<WorkerId>,
    unassigned: VecDeque<WorkerId>,
    current: Option<WorkerId>,
    num_idle: usize,
    max_workers: usize,
    stats: SchedulerStats,
}

#[derive(Clone)]
pub struct SharedScheduler(SharedObject<TaskingScheduler>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TaskingScheduler {
    pub fn new(core: CoreId, max_workers: usize) -> Self {
        Self {
            core,
            workers: Slab::with_capacity(max_workers),
            ready: VecDeque::with_capacity(max_workers),
            periodic: VecDeque::new(),
            unassigned: VecDeque::with_capacity(max_workers),
            current: None,
            num_idle: 0,
            max_workers,
            stats: SchedulerStats::default(),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn num_idle(&self) -> usize {
        self.num_idle
    }

    pub fn can_spawn(&self) -> bool {
        self.workers.len() < self.max_workers
    }

    pub fn current(&self) -> Option<WorkerId> {
        self.current
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn state(&self, worker: WorkerId) -> Option<WorkerState> {
        self.workers.get(worker.into()).map(|slot| slot.state)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Reserves a slot for a new worker. The worker starts in the ready state but is not queued: the caller switches to
    /// it directly once its coroutine is attached.
    pub fn reserve(&mut self) -> WorkerId {
        let id: usize = self.workers.insert(WorkerSlot {
            state: WorkerState::Ready,
            coroutine: None,
        });
        self.stats.workers_spawned += 1;
        self.stats.max_live_workers = self.stats.max_live_workers.max(self.workers.len());
        WorkerId::from(id)
    }

    pub fn attach(&mut self, worker: WorkerId, coroutine: Box<WorkerCoroutine>) {
        match self.workers.get_mut(worker.into()) {
            Some(slot) => slot.coroutine = Some(coroutine),
            None => protocol_violation(&format!("attaching coroutine to unknown worker {:?}", worker)),
        }
    }

    /// Releases a worker slot. Used when the worker exits or could not be created.
    pub fn retire(&mut self, worker: WorkerId) {
        if self.current == Some(worker) {
            self.current = None;
        }
        if self.workers.try_remove(worker.into()).is_none() {
            protocol_violation(&format!("retiring unknown worker {:?}", worker));
        }
    }

    /// Puts `worker` at the tail of the ready queue.
    pub fn ready(&mut self, worker: WorkerId) {
        self.set_state(worker, WorkerState::Ready);
        self.ready.push_back(worker);
    }

    /// Puts `worker` at the tail of the periodic queue.
    pub fn periodic(&mut self, worker: WorkerId) {
        self.set_state(worker, WorkerState::Ready);
        self.periodic.push_back(worker);
    }

    pub fn block(&mut self, worker: WorkerId) {
        self.set_state(worker, WorkerState::Blocked);
    }

    /// Parks `worker` on the unassigned queue.
    pub fn idle(&mut self, worker: WorkerId) {
        self.set_state(worker, WorkerState::Unassigned);
        self.unassigned.push_back(worker);
        self.num_idle += 1;
    }

    /// Makes a blocked worker runnable again. Waking a worker that is not blocked is a protocol violation.
    pub fn thread_wake(&mut self, worker: WorkerId) {
        match self.state(worker) {
            Some(WorkerState::Blocked) => self.ready(worker),
            state => protocol_violation(&format!(
                "core {:?} woke worker {:?} in state {:?}",
                self.core, worker, state
            )),
        }
    }

    /// Moves every idle worker to the ready queue.
    pub fn wake_all_idle(&mut self) {
        while let Some(worker) = self.next_unassigned() {
            self.ready(worker);
        }
    }

    pub fn next_ready(&mut self) -> Option<WorkerId> {
        self.ready.pop_front()
    }

    pub fn next_periodic(&mut self) -> Option<WorkerId> {
        self.periodic.pop_front()
    }

    pub fn next_unassigned(&mut self) -> Option<WorkerId> {
        let worker: WorkerId = self.unassigned.pop_front()?;
        self.num_idle -= 1;
        Some(worker)
    }

    /// Marks `worker` as running and hands out its coroutine for the duration of the switch.
    pub fn begin_switch(&mut self, worker: WorkerId) -> Box<WorkerCoroutine> {
        if let Some(current) = self.current {
            protocol_violation(&format!("switching to {:?} while {:?} is running", worker, current));
        }
        let slot: &mut WorkerSlot = match self.workers.get_mut(worker.into()) {
            Some(slot) => slot,
            None => protocol_violation(&format!("switching to unknown worker {:?}", worker)),
        };
        let coroutine: Box<WorkerCoroutine> = match slot.coroutine.take() {
            Some(coroutine) => coroutine,
            None => protocol_violation(&format!("worker {:?} has no coroutine", worker)),
        };
        slot.state = WorkerState::Running;
        self.current = Some(worker);
        self.stats.context_switches += 1;
        coroutine
    }

    /// Returns the coroutine of a worker that suspended.
    pub fn end_switch(&mut self, worker: WorkerId, coroutine: Box<WorkerCoroutine>) {
        self.current = None;
        match self.workers.get_mut(worker.into()) {
            Some(slot) => {
                if slot.state == WorkerState::Running {
                    protocol_violation(&format!("worker {:?} suspended without leaving the running state", worker));
                }
                slot.coroutine = Some(coroutine);
            },
            None => protocol_violation(&format!("worker {:?} vanished while running", worker)),
        }
    }

    fn set_state(&mut self, worker: WorkerId, state: WorkerState) {
        match self.workers.get_mut(worker.into()) {
            Some(slot) => slot.state = state,
            None => protocol_violation(&format!("unknown worker {:?}", worker)),
        }
    }
}

impl SharedScheduler {
    pub fn new(core: CoreId, max_workers: usize) -> Self {
        Self(SharedObject::new(TaskingScheduler::new(core, max_workers)))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedScheduler {
    type Target = TaskingScheduler;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SharedScheduler {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
