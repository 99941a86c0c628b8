// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod context;
mod scheduler;
pub mod worker;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    context::{
        HandlerContext,
        TaskContext,
        WakeHandle,
    },
    scheduler::{
        SchedulerStats,
        SharedScheduler,
        TaskingScheduler,
    },
    worker::{
        WorkerExit,
        WorkerId,
        WorkerState,
    },
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::worker::WorkerCoroutine,
    SharedRuntime,
};
use ::corosensei::CoroutineResult;
use ::std::thread;

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Scheduler loop of a core.
impl SharedRuntime {
    /// Runs workers until the cluster terminates and every worker of this core has exited. Returns the number of tasks
    /// executed on this core.
    pub fn run(&mut self) -> Result<u64, Fail> {
        let mut tasks_executed: u64 = 0;
        while let Some(exit) = self.thread_wait()? {
            trace!("run(): worker {:?} exited", exit.worker);
            tasks_executed += exit.tasks_executed;
        }
        info!("run(): core={:?} executed {} tasks", self.core(), tasks_executed);
        Ok(tasks_executed)
    }

    /// Switches between workers until one of them exits. Returns `None` once the task manager is done and no worker
    /// is left.
    pub fn thread_wait(&mut self) -> Result<Option<WorkerExit>, Fail> {
        loop {
            let worker: WorkerId = match self.next_coroutine()? {
                Some(worker) => worker,
                None => return Ok(None),
            };
            if let Some(exit) = self.switch_to(worker) {
                return Ok(Some(exit));
            }
        }
    }

    /// Picks the next worker to run. Polls the network on every iteration and does the idle housekeeping when there
    /// is nothing to run.
    fn next_coroutine(&mut self) -> Result<Option<WorkerId>, Fail> {
        loop {
            if self.is_aborted() {
                warn!("next_coroutine(): core={:?} observed cluster abort", self.core());
                return Err(Fail::new(libc::ECANCELED, "cluster aborted"));
            }
            let now: u64 = self.tick();
            self.poll_network();
            self.flush_stale(now);

            let mut scheduler: SharedScheduler = self.scheduler();
            if self.periodic_due() {
                if let Some(worker) = scheduler.next_periodic() {
                    return Ok(Some(worker));
                }
            }
            if let Some(worker) = scheduler.next_ready() {
                return Ok(Some(worker));
            }
            if let Some(worker) = self.get_worker()? {
                return Ok(Some(worker));
            }
            if self.task_manager().work_done() && scheduler.num_workers() == 0 {
                return Ok(None);
            }

            self.flush_all();
            self.poll_termination();
            thread::yield_now();
        }
    }

    /// Returns an idle worker if the task manager may have work for it, spawning a new worker when none is idle. A
    /// core always keeps one worker alive until termination, so that it can steal and take part in termination.
    fn get_worker(&mut self) -> Result<Option<WorkerId>, Fail> {
        let mut scheduler: SharedScheduler = self.scheduler();
        if self.task_manager().available() {
            if let Some(worker) = scheduler.next_unassigned() {
                return Ok(Some(worker));
            }
            if scheduler.can_spawn() {
                return self.spawn_worker().map(Some);
            }
            return Ok(None);
        }
        if scheduler.num_workers() == 0 && !self.task_manager().work_done() {
            return self.spawn_worker().map(Some);
        }
        Ok(None)
    }

    fn spawn_worker(&mut self) -> Result<WorkerId, Fail> {
        let mut scheduler: SharedScheduler = self.scheduler();
        let worker: WorkerId = scheduler.reserve();
        match worker::spawn(self.clone(), worker, self.options().stack_size) {
            Ok(coroutine) => {
                scheduler.attach(worker, Box::new(coroutine));
                debug!("spawn_worker(): core={:?} worker={:?}", self.core(), worker);
                Ok(worker)
            },
            Err(e) => {
                scheduler.retire(worker);
                error!("spawn_worker(): cannot allocate worker stack ({:?})", e);
                Err(e)
            },
        }
    }

    /// Runs `worker` until it suspends or exits.
    fn switch_to(&mut self, worker: WorkerId) -> Option<WorkerExit> {
        let mut scheduler: SharedScheduler = self.scheduler();
        let mut coroutine: Box<WorkerCoroutine> = scheduler.begin_switch(worker);
        match coroutine.resume(()) {
            CoroutineResult::Yield(()) => {
                scheduler.end_switch(worker, coroutine);
                None
            },
            CoroutineResult::Return(exit) => {
                scheduler.retire(worker);
                Some(exit)
            },
        }
    }
}
