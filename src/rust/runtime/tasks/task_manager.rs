// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    scheduler::{
        HandlerContext,
        TaskContext,
    },
    tasks::{
        steal_queue::SharedStealQueue,
        termination::SharedTermination,
        Task,
    },
    types::CoreId,
    RuntimeOptions,
    SharedObject,
    SharedRuntime,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
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

#[derive(Clone, Copy, Debug, Default)]
pub struct TaskManagerStats {
    pub private_spawns: u64,
    pub public_spawns: u64,
    pub remote_spawns: u64,
    pub private_pops: u64,
    pub public_pops: u64,
    pub steal_attempts: u64,
    pub steals_ok: u64,
    pub steals_failed: u64,
    pub tasks_stolen: u64,
    pub hints_sent: u64,
    pub hints_received: u64,
}

/// Task queues of a core and the policy that feeds its workers.
pub struct TaskManager {
    core: CoreId,
    /// Tasks only this core runs.
    private: VecDeque<Task>,
    /// Tasks any core may steal.
    public: SharedStealQueue<Task>,
    neighbors: Vec<CoreId>,
    rng: SmallRng,
    /// Core that recently announced stealable work.
    preferred_victim: Option<CoreId>,
    /// Set once the cluster has terminated.
    work_done: bool,
    /// Work may have arrived that the queues do not show yet.
    might_be_work: bool,
    ok_to_steal: bool,
    /// A worker of this core is stealing.
    do_steal: bool,
    active: bool,
    chunk_size: usize,
    steal_attempts: usize,
    cancel_interval: usize,
    pushes_since_hint: usize,
    stats: TaskManagerStats,
}

#[derive(Clone)]
pub struct SharedTaskManager(SharedObject<TaskManager>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedTaskManager {
    pub fn new(core: CoreId, options: &RuntimeOptions, public: SharedStealQueue<Task>) -> Self {
        Self(SharedObject::new(TaskManager {
            core,
            private: VecDeque::new(),
            public,
            neighbors: Vec::new(),
            rng: SmallRng::seed_from_u64(u64::from(core) + 1),
            preferred_victim: None,
            work_done: false,
            might_be_work: false,
            ok_to_steal: false,
            do_steal: false,
            active: false,
            chunk_size: options.chunk_size,
            steal_attempts: options.steal_attempts,
            cancel_interval: options.cancel_interval,
            pushes_since_hint: options.cancel_interval,
            stats: TaskManagerStats::default(),
        }))
    }

    /// Records the cores this core may steal from.
    pub fn init(&mut self, neighbors: Vec<CoreId>) {
        self.ok_to_steal = !neighbors.is_empty();
        self.neighbors = neighbors;
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Closes the task manager and returns its counters.
    pub fn finish(&mut self) -> TaskManagerStats {
        self.active = false;
        let stats: TaskManagerStats = self.stats;
        info!(
            "finish(): core={:?} spawns(private={} public={} remote={}) pops(private={} public={}) steals(attempts={} \
             ok={} failed={} tasks={}) hints(sent={} received={})",
            self.core,
            stats.private_spawns,
            stats.public_spawns,
            stats.remote_spawns,
            stats.private_pops,
            stats.public_pops,
            stats.steal_attempts,
            stats.steals_ok,
            stats.steals_failed,
            stats.tasks_stolen,
            stats.hints_sent,
            stats.hints_received
        );
        stats
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a worker should be handed to the task manager.
    pub fn available(&self) -> bool {
        !self.work_done && (self.has_local_work() || self.might_be_work)
    }

    pub fn has_local_work(&self) -> bool {
        !self.private.is_empty() || !self.public.is_empty()
    }

    pub fn work_done(&self) -> bool {
        self.work_done
    }

    pub fn set_work_done(&mut self) {
        self.work_done = true;
        self.might_be_work = false;
    }

    pub fn is_stealing(&self) -> bool {
        self.do_steal
    }

    pub fn stats(&self) -> TaskManagerStats {
        self.stats
    }

    /// Takes the next local task: private tasks first, then the top of the public queue.
    pub fn take_local(&mut self) -> Option<Task> {
        if let Some(task) = self.private.pop_front() {
            self.stats.private_pops += 1;
            return Some(task);
        }
        if !self.public.is_empty() {
            self.stats.public_pops += 1;
            return Some(self.public.pop());
        }
        None
    }

    pub fn push_private_front(&mut self, task: Task) {
        self.stats.private_spawns += 1;
        self.private.push_front(task);
    }

    pub fn push_private_back(&mut self, task: Task) {
        self.stats.remote_spawns += 1;
        self.private.push_back(task);
    }

    /// Pushes a stealable task. Returns true when the other cores should hear about the new work.
    pub fn push_public(&mut self, task: Task) -> bool {
        self.stats.public_spawns += 1;
        self.public.push(task);
        self.pushes_since_hint += 1;
        if self.ok_to_steal && self.public.depth() >= 2 && self.pushes_since_hint >= self.cancel_interval {
            self.pushes_since_hint = 0;
            self.stats.hints_sent += 1;
            true
        } else {
            false
        }
    }

    /// Picks the victim of the next steal attempt: the core that last announced work if any, a random neighbor
    /// otherwise.
    fn choose_victim(&mut self) -> Option<CoreId> {
        if let Some(victim) = self.preferred_victim.take() {
            return Some(victim);
        }
        if self.neighbors.is_empty() {
            return None;
        }
        let len: usize = self.neighbors.len();
        let index: usize = self.rng.gen_range(0..len);
        Some(self.neighbors[index])
    }

    fn record_steal(&mut self, victim: CoreId, stolen: usize) {
        self.stats.steal_attempts += 1;
        if stolen > 0 {
            self.stats.steals_ok += 1;
            self.stats.tasks_stolen += stolen as u64;
        } else {
            self.stats.steals_failed += 1;
            if self.preferred_victim == Some(victim) {
                self.preferred_victim = None;
            }
        }
    }

    fn note_hint(&mut self, origin: CoreId) {
        self.stats.hints_received += 1;
        if !self.work_done && origin != self.core {
            self.preferred_victim = Some(origin);
            self.might_be_work = true;
        }
    }

    fn may_steal(&self, work_stealing: bool) -> bool {
        work_stealing && self.ok_to_steal && !self.do_steal
    }
}

/// Spawn operations of a core.
impl SharedRuntime {
    /// Pushes a stealable task. Valid from tasks and from handlers.
    pub fn spawn_public(&mut self, task: Task) {
        let hint: bool = self.task_manager().push_public(task);
        self.notify_work();
        if hint {
            let origin: CoreId = self.core();
            trace!("spawn_public(): {:?} announces work", origin);
            for core in 0..self.num_cores() as u32 {
                let core: CoreId = CoreId::from(core);
                if core != origin {
                    self.send_control(core, move |hcx: &mut HandlerContext| {
                        hcx.runtime().on_work_hint(origin);
                    });
                }
            }
        }
    }

    /// Pushes a task at the front of the private queue. Task context only.
    pub fn spawn_local_private(&mut self, task: Task) {
        self.task_manager().push_private_front(task);
    }

    /// Appends a task to the private queue. The only spawn that handlers may use for private work.
    pub fn spawn_remote_private(&mut self, task: Task) {
        let mut task_manager: SharedTaskManager = self.task_manager();
        task_manager.push_private_back(task);
        task_manager.might_be_work = true;
        self.notify_work();
    }

    fn on_work_hint(&mut self, origin: CoreId) {
        self.task_manager().note_hint(origin);
        self.notify_work();
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Returns the next task for the calling worker, blocking while none is available. Returns `None` only once the cluster
/// has terminated.
pub(crate) fn get_work(cx: &mut TaskContext<'_>) -> Option<Task> {
    let work_stealing: bool = cx.runtime().options().work_stealing;
    let mut task_manager: SharedTaskManager = cx.runtime().task_manager();
    loop {
        if task_manager.work_done() {
            return None;
        }
        if let Some(task) = task_manager.take_local() {
            return Some(task);
        }

        if task_manager.may_steal(work_stealing) && try_steal(cx, &mut task_manager) {
            continue;
        }
        task_manager.might_be_work = false;

        if cx.idle() {
            continue;
        }

        // Last worker of the core that is not idle.
        let mut termination: SharedTermination = cx.runtime().termination();
        if termination.wait(cx) {
            task_manager.set_work_done();
            return None;
        }
        task_manager.might_be_work = true;
    }
}

/// Tries to steal a chunk of public tasks from up to `steal_attempts` victims. Returns true once a steal succeeded.
fn try_steal(cx: &mut TaskContext<'_>, task_manager: &mut SharedTaskManager) -> bool {
    task_manager.do_steal = true;
    let mut public: SharedStealQueue<Task> = task_manager.public.clone();
    let mut stolen: usize = 0;
    for _ in 0..task_manager.steal_attempts {
        let victim: CoreId = match task_manager.choose_victim() {
            Some(victim) => victim,
            None => break,
        };
        let chunk_size: usize = task_manager.chunk_size;
        stolen = public.steal_locally(cx, victim, chunk_size);
        task_manager.record_steal(victim, stolen);
        if stolen > 0 || task_manager.work_done() {
            break;
        }
    }
    task_manager.do_steal = false;
    stolen > 0
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedTaskManager {
    type Target = TaskManager;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SharedTaskManager {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::runtime::{
        scheduler::TaskContext,
        tasks::{
            steal_queue::SharedStealQueue,
            task_manager::SharedTaskManager,
            Task,
        },
        types::CoreId,
        RuntimeOptions,
    };
    use ::anyhow::Result;

    fn noop(_: &mut TaskContext<'_>, _: u64, _: u64, _: u64) {}

    fn task(tag: u64) -> Task {
        Task::new(noop, tag, 0, 0)
    }

    fn tag_of(task: Option<Task>) -> String {
        format!("{:?}", task)
    }

    fn task_manager(cancel_interval: usize) -> SharedTaskManager {
        let options: RuntimeOptions = RuntimeOptions {
            num_cores: 2,
            cancel_interval,
            ..Default::default()
        };
        let public: SharedStealQueue<Task> = SharedStealQueue::new(CoreId::new(0), 64);
        let mut task_manager: SharedTaskManager = SharedTaskManager::new(CoreId::new(0), &options, public);
        task_manager.init(vec![CoreId::new(1)]);
        task_manager.activate();
        task_manager
    }

    #[test]
    fn private_tasks_run_before_public_ones() -> Result<()> {
        let mut tm: SharedTaskManager = task_manager(32);
        crate::ensure_eq!(tm.available(), false);
        tm.push_public(task(2));
        tm.push_private_front(task(1));
        crate::ensure_eq!(tm.available(), true);

        crate::ensure_eq!(tag_of(tm.take_local()), tag_of(Some(task(1))));
        crate::ensure_eq!(tag_of(tm.take_local()), tag_of(Some(task(2))));
        crate::ensure_eq!(tm.take_local().is_none(), true);
        crate::ensure_eq!(tm.stats().private_pops, 1);
        crate::ensure_eq!(tm.stats().public_pops, 1);
        Ok(())
    }

    #[test]
    fn local_private_spawns_are_lifo_and_remote_ones_fifo() -> Result<()> {
        let mut tm: SharedTaskManager = task_manager(32);
        tm.push_private_back(task(1));
        tm.push_private_back(task(2));
        crate::ensure_eq!(tag_of(tm.take_local()), tag_of(Some(task(1))));

        tm.push_private_front(task(1));
        crate::ensure_eq!(tag_of(tm.take_local()), tag_of(Some(task(1))));
        crate::ensure_eq!(tag_of(tm.take_local()), tag_of(Some(task(2))));
        Ok(())
    }

    #[test]
    fn hints_need_two_stealable_tasks_and_are_rate_limited() -> Result<()> {
        let mut tm: SharedTaskManager = task_manager(3);
        crate::ensure_eq!(tm.push_public(task(1)), false);
        crate::ensure_eq!(tm.push_public(task(1)), true);
        crate::ensure_eq!(tm.push_public(task(1)), false);
        crate::ensure_eq!(tm.push_public(task(1)), false);
        crate::ensure_eq!(tm.push_public(task(1)), true);
        crate::ensure_eq!(tm.stats().hints_sent, 2);
        Ok(())
    }

    #[test]
    fn hint_makes_the_origin_the_next_victim() -> Result<()> {
        let mut tm: SharedTaskManager = task_manager(32);
        tm.note_hint(CoreId::new(1));
        crate::ensure_eq!(tm.available(), true);
        crate::ensure_eq!(tm.choose_victim(), Some(CoreId::new(1)));
        // Without a hint, victims are neighbors.
        crate::ensure_eq!(tm.choose_victim(), Some(CoreId::new(1)));
        Ok(())
    }

    #[test]
    fn random_victims_are_always_neighbors() -> Result<()> {
        let options: RuntimeOptions = RuntimeOptions {
            num_cores: 5,
            ..Default::default()
        };
        let public: SharedStealQueue<Task> = SharedStealQueue::new(CoreId::new(2), 8);
        let mut tm: SharedTaskManager = SharedTaskManager::new(CoreId::new(2), &options, public);
        let neighbors: Vec<CoreId> = vec![CoreId::new(0), CoreId::new(1), CoreId::new(3), CoreId::new(4)];
        tm.init(neighbors.clone());
        let mut seen: Vec<CoreId> = Vec::new();
        for _ in 0..200 {
            let victim: CoreId = match tm.choose_victim() {
                Some(victim) => victim,
                None => anyhow::bail!("no victim among {} neighbors", neighbors.len()),
            };
            crate::ensure_eq!(neighbors.contains(&victim), true);
            if !seen.contains(&victim) {
                seen.push(victim);
            }
        }
        // A seeded generator spreads 200 draws over every neighbor.
        crate::ensure_eq!(seen.len(), neighbors.len());
        Ok(())
    }

    #[test]
    fn work_done_closes_the_task_manager() -> Result<()> {
        let mut tm: SharedTaskManager = task_manager(32);
        tm.note_hint(CoreId::new(1));
        tm.set_work_done();
        crate::ensure_eq!(tm.available(), false);
        crate::ensure_eq!(tm.work_done(), true);
        Ok(())
    }

    #[test]
    fn a_lone_core_never_steals() -> Result<()> {
        let options: RuntimeOptions = RuntimeOptions {
            num_cores: 1,
            ..Default::default()
        };
        let public: SharedStealQueue<Task> = SharedStealQueue::new(CoreId::new(0), 8);
        let mut tm: SharedTaskManager = SharedTaskManager::new(CoreId::new(0), &options, public);
        tm.init(Vec::new());
        crate::ensure_eq!(tm.may_steal(true), false);
        crate::ensure_eq!(tm.choose_victim(), None);
        Ok(())
    }
}
