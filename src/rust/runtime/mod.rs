// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod fail;
pub mod limits;
pub mod logging;
pub mod network;
pub mod scheduler;
pub mod sync;
pub mod tasks;
pub mod types;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::{
        protocol_violation,
        Fail,
    },
    network::{
        handlers::HandlerTable,
        transport::Transport,
        Messenger,
    },
    scheduler::{
        SharedScheduler,
        TaskContext,
    },
    sync::{
        ReplyId,
        ReplySlots,
        SharedBarrier,
    },
    tasks::{
        steal_queue::{
            SharedStealQueue,
            WireCopy,
        },
        task_manager::SharedTaskManager,
        termination::SharedTermination,
        Task,
    },
    types::CoreId,
};
use ::std::{
    any::{
        Any,
        TypeId,
    },
    collections::HashMap,
    ops::{
        Deref,
        DerefMut,
    },
    rc::Rc,
    thread,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Tunables of a core runtime. Built and validated from the configuration file before any core starts.
#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    pub num_cores: usize,
    pub max_workers: usize,
    pub stack_size: usize,
    pub periodic_poll_ticks: u64,
    pub steal_queue_capacity: usize,
    pub chunk_size: usize,
    pub steal_attempts: usize,
    pub work_stealing: bool,
    pub cancel_interval: usize,
    pub flush_threshold: usize,
    pub flush_ticks: u64,
    pub probe_interval: u64,
}

/// First task of a run. Only core 0 carries one.
pub type InitialTask = Box<dyn FnOnce(&mut TaskContext<'_>) + Send>;

/// Per-core runtime. Owns the scheduler, the task manager, the steal queues and the messaging layer of one core.
pub struct Runtime {
    core: CoreId,
    options: RuntimeOptions,
    scheduler: SharedScheduler,
    task_manager: SharedTaskManager,
    termination: SharedTermination,
    barrier: SharedBarrier,
    messenger: Messenger,
    replies: ReplySlots,
    /// Steal queues keyed by element type.
    steal_queues: HashMap<TypeId, Box<dyn Any>>,
    initial_task: Option<InitialTask>,
    /// Iterations of the scheduler loop.
    ticks: u64,
    last_periodic_tick: u64,
}

#[derive(Clone)]
pub struct SharedRuntime(SharedObject<Runtime>);

/// The SharedObject wraps an object that will be shared across workers of the same core.
pub struct SharedObject<T>(Rc<T>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedRuntime {
    pub fn new(options: &RuntimeOptions, transport: Box<dyn Transport>, handlers: HandlerTable) -> Result<Self, Fail> {
        let core: CoreId = transport.local_core();
        if transport.num_cores() != options.num_cores {
            let cause: String = format!(
                "transport spans {} cores but {} were configured",
                transport.num_cores(),
                options.num_cores
            );
            error!("new(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        let public: SharedStealQueue<Task> = SharedStealQueue::new(core, options.steal_queue_capacity);
        let mut steal_queues: HashMap<TypeId, Box<dyn Any>> = HashMap::new();
        steal_queues.insert(TypeId::of::<Task>(), Box::new(public.clone()));

        let mut task_manager: SharedTaskManager = SharedTaskManager::new(core, options, public);
        let neighbors: Vec<CoreId> = (0..options.num_cores as u32)
            .map(CoreId::from)
            .filter(|other| *other != core)
            .collect();
        task_manager.init(neighbors);

        Ok(Self(SharedObject::new(Runtime {
            core,
            options: options.clone(),
            scheduler: SharedScheduler::new(core, options.max_workers),
            task_manager,
            termination: SharedTermination::new(core, options.num_cores, options.probe_interval),
            barrier: SharedBarrier::default(),
            messenger: Messenger::new(transport, handlers, options.flush_threshold, options.flush_ticks),
            replies: ReplySlots::default(),
            steal_queues,
            initial_task: None,
            ticks: 0,
            last_periodic_tick: 0,
        })))
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn num_cores(&self) -> usize {
        self.options.num_cores
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn scheduler(&self) -> SharedScheduler {
        self.scheduler.clone()
    }

    pub fn task_manager(&self) -> SharedTaskManager {
        self.task_manager.clone()
    }

    pub fn termination(&self) -> SharedTermination {
        self.termination.clone()
    }

    pub fn barrier(&self) -> SharedBarrier {
        self.barrier.clone()
    }

    pub fn messenger(&mut self) -> &mut Messenger {
        &mut self.messenger
    }

    pub fn replies(&mut self) -> &mut ReplySlots {
        &mut self.replies
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Returns this core's steal queue for elements of type `T`, creating it on first use.
    pub fn steal_queue<T: WireCopy>(&mut self) -> SharedStealQueue<T> {
        let core: CoreId = self.core;
        let capacity: usize = self.options.steal_queue_capacity;
        let entry: &mut Box<dyn Any> = self
            .steal_queues
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(SharedStealQueue::<T>::new(core, capacity)));
        match entry.downcast_ref::<SharedStealQueue<T>>() {
            Some(queue) => queue.clone(),
            None => protocol_violation("steal queue registry holds a queue of another element type"),
        }
    }

    /// Returns the public queue of the task manager.
    pub fn public_queue(&mut self) -> SharedStealQueue<Task> {
        self.steal_queue::<Task>()
    }

    /// Delivers the result of a remote operation to the task waiting on `slot`.
    pub fn fill_reply<T: Copy + 'static>(&mut self, slot: ReplyId, value: T) {
        if let Err(e) = self.replies.fill(slot, value) {
            protocol_violation(&format!("cannot deliver reply {:?}: {}", slot, e.cause));
        }
    }

    pub fn set_initial_task(&mut self, task: InitialTask) {
        self.initial_task = Some(task);
    }

    pub fn take_initial_task(&mut self) -> Option<InitialTask> {
        self.initial_task.take()
    }

    /// Opens the task manager for work. On the core that carries the initial task, that task becomes the first private
    /// task of the cluster.
    pub fn activate(&mut self) {
        self.task_manager.activate();
        if self.initial_task.is_some() {
            self.task_manager.push_private_back(Task::new(run_initial_task, 0, 0, 0));
        }
        info!("activate(): core={:?} workers<={}", self.core, self.options.max_workers);
    }

    pub fn is_aborted(&self) -> bool {
        self.messenger.is_aborted()
    }

    /// Advances the scheduler clock.
    fn tick(&mut self) -> u64 {
        self.ticks += 1;
        self.ticks
    }

    /// Checks whether periodic workers are due, and restarts their period if so.
    fn periodic_due(&mut self) -> bool {
        if self.ticks - self.last_periodic_tick >= self.options.periodic_poll_ticks {
            self.last_periodic_tick = self.ticks;
            true
        } else {
            false
        }
    }

    /// Cluster-wide barrier entered from the core thread itself, outside of any worker.
    pub fn master_barrier(&mut self) -> Result<(), Fail> {
        self.messenger.transport().barrier_notify();
        loop {
            self.poll_master()?;
            if self.messenger.transport().barrier_try() {
                return Ok(());
            }
            thread::yield_now();
        }
    }

    /// Cluster-wide sum entered from the core thread itself, outside of any worker.
    pub fn master_allreduce(&mut self, value: u64) -> Result<u64, Fail> {
        self.messenger.transport().allreduce_notify(value);
        loop {
            self.poll_master()?;
            if let Some(sum) = self.messenger.transport().allreduce_try() {
                return Ok(sum);
            }
            thread::yield_now();
        }
    }

    fn poll_master(&mut self) -> Result<(), Fail> {
        if self.is_aborted() {
            return Err(Fail::new(libc::ECANCELED, "cluster aborted"));
        }
        self.poll_network();
        self.flush_all();
        Ok(())
    }
}

impl<T> SharedObject<T> {
    pub fn new(object: T) -> Self {
        Self(Rc::new(object))
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn run_initial_task(cx: &mut TaskContext<'_>, _: u64, _: u64, _: u64) {
    if let Some(task) = cx.runtime().take_initial_task() {
        task(cx);
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            num_cores: limits::DEFAULT_NUM_CORES,
            max_workers: limits::DEFAULT_MAX_WORKERS,
            stack_size: limits::DEFAULT_STACK_SIZE,
            periodic_poll_ticks: limits::DEFAULT_PERIODIC_POLL_TICKS,
            steal_queue_capacity: limits::DEFAULT_STEAL_QUEUE_CAPACITY,
            chunk_size: limits::DEFAULT_CHUNK_SIZE,
            steal_attempts: limits::DEFAULT_STEAL_ATTEMPTS,
            work_stealing: true,
            cancel_interval: limits::DEFAULT_CANCEL_INTERVAL,
            flush_threshold: limits::DEFAULT_FLUSH_THRESHOLD,
            flush_ticks: limits::DEFAULT_FLUSH_TICKS,
            probe_interval: limits::DEFAULT_PROBE_INTERVAL,
        }
    }
}

impl Deref for SharedRuntime {
    type Target = Runtime;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedRuntime {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

/// Dereferences a shared object for use.
impl<T> Deref for SharedObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

/// Dereferences a mutable reference to a shared object for use. This breaks Rust's ownership model because it allows
/// more than one mutable dereference of a shared object at a time. Workers of a core hold such references at the same
/// time, but only one of them runs at any moment and none of them runs while the scheduler loop does. Shared objects
/// may therefore change whenever a worker suspends.
impl<T> DerefMut for SharedObject<T> {
    fn deref_mut<'a>(&'a mut self) -> &'a mut Self::Target {
        let ptr: *mut T = Rc::as_ptr(&self.0) as *mut T;
        unsafe { &mut *ptr }
    }
}

impl<T> Clone for SharedObject<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Default> Default for SharedObject<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
