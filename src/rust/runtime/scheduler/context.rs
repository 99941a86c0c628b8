// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    network::GlobalAddress,
    scheduler::{
        worker::WorkerId,
        SharedScheduler,
    },
    tasks::Task,
    types::CoreId,
    SharedRuntime,
};
use ::corosensei::Yielder;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Execution context of a task. Only code holding a task context may block, since blocking suspends the worker that
/// owns this context.
pub struct TaskContext<'a> {
    runtime: SharedRuntime,
    worker: WorkerId,
    yielder: &'a Yielder<(), ()>,
}

/// Execution context of a message handler. Handlers run on the polling path of the scheduler and must never block, so
/// this context offers no blocking operation.
pub struct HandlerContext {
    runtime: SharedRuntime,
    source: CoreId,
}

/// Handle used by synchronization objects to make a blocked worker runnable again.
#[derive(Clone)]
pub struct WakeHandle {
    scheduler: SharedScheduler,
    worker: WorkerId,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<'a> TaskContext<'a> {
    pub(crate) fn new(runtime: SharedRuntime, worker: WorkerId, yielder: &'a Yielder<(), ()>) -> Self {
        Self {
            runtime,
            worker,
            yielder,
        }
    }

    pub fn core(&self) -> CoreId {
        self.runtime.core()
    }

    pub fn num_cores(&self) -> usize {
        self.runtime.num_cores()
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn runtime(&mut self) -> &mut SharedRuntime {
        &mut self.runtime
    }

    /// Builds a handler context on this core, for running non-blocking code inline.
    pub fn handler_context(&self) -> HandlerContext {
        HandlerContext::new(self.runtime.clone(), self.runtime.core())
    }

    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle {
            scheduler: self.runtime.scheduler(),
            worker: self.worker,
        }
    }

    /// Spawns a task that any core may steal.
    pub fn spawn_public(&mut self, task: Task) {
        self.runtime.spawn_public(task);
    }

    /// Spawns a task that only this core will run.
    pub fn spawn_private(&mut self, task: Task) {
        self.runtime.spawn_local_private(task);
    }

    /// Lets every other ready worker run before this one continues.
    pub fn yield_now(&mut self) {
        self.runtime.scheduler().ready(self.worker);
        self.suspend();
    }

    /// Suspends this worker on the periodic queue, which the scheduler only visits every few iterations.
    pub fn yield_periodic(&mut self) {
        self.runtime.scheduler().periodic(self.worker);
        self.suspend();
    }

    /// Suspends this worker until a [WakeHandle] for it is woken.
    pub(crate) fn block(&mut self) {
        self.runtime.scheduler().block(self.worker);
        self.suspend();
    }

    /// Parks this worker on the unassigned queue. Returns false, without suspending, when this is the last worker of
    /// the core that is not idle.
    pub(crate) fn idle(&mut self) -> bool {
        let mut scheduler: SharedScheduler = self.runtime.scheduler();
        if scheduler.num_idle() + 1 >= scheduler.num_workers() {
            return false;
        }
        scheduler.idle(self.worker);
        self.suspend();
        true
    }

    fn suspend(&mut self) {
        self.yielder.suspend(());
    }

    /// Cluster-wide barrier.
    pub fn barrier(&mut self) {
        let mut barrier = self.runtime.barrier();
        barrier.wait(self);
    }

    /// Cluster-wide sum of `value`.
    pub fn allreduce_sum(&mut self, value: u64) -> u64 {
        let mut barrier = self.runtime.barrier();
        barrier.allreduce_sum(self, value)
    }

    pub fn send<F>(&mut self, dest: CoreId, handler: F)
    where
        F: FnOnce(&mut HandlerContext) + Copy + Send + 'static,
    {
        self.runtime.send(dest, handler);
    }

    pub fn send_with_payload<F>(&mut self, dest: CoreId, payload: &[u8], handler: F)
    where
        F: FnOnce(&mut HandlerContext, &[u8]) + Copy + Send + 'static,
    {
        self.runtime.send_with_payload(dest, payload, handler);
    }

    pub fn send_to<F>(&mut self, target: GlobalAddress, handler: F)
    where
        F: FnOnce(&mut HandlerContext, u64) + Copy + Send + 'static,
    {
        self.runtime.send_to(target, handler);
    }

    pub fn send_to_with_payload<F>(&mut self, target: GlobalAddress, payload: &[u8], handler: F)
    where
        F: FnOnce(&mut HandlerContext, u64, &[u8]) + Copy + Send + 'static,
    {
        self.runtime.send_to_with_payload(target, payload, handler);
    }
}

impl HandlerContext {
    pub(crate) fn new(runtime: SharedRuntime, source: CoreId) -> Self {
        Self { runtime, source }
    }

    pub fn core(&self) -> CoreId {
        self.runtime.core()
    }

    pub fn num_cores(&self) -> usize {
        self.runtime.num_cores()
    }

    /// Core that sent the message being handled.
    pub fn source(&self) -> CoreId {
        self.source
    }

    pub fn runtime(&mut self) -> &mut SharedRuntime {
        &mut self.runtime
    }

    /// Spawns a task that any core may steal.
    pub fn spawn_public(&mut self, task: Task) {
        self.runtime.spawn_public(task);
    }

    /// Spawns a task that only this core will run.
    pub fn spawn_remote_private(&mut self, task: Task) {
        self.runtime.spawn_remote_private(task);
    }

    pub fn send<F>(&mut self, dest: CoreId, handler: F)
    where
        F: FnOnce(&mut HandlerContext) + Copy + Send + 'static,
    {
        self.runtime.send(dest, handler);
    }

    pub fn send_with_payload<F>(&mut self, dest: CoreId, payload: &[u8], handler: F)
    where
        F: FnOnce(&mut HandlerContext, &[u8]) + Copy + Send + 'static,
    {
        self.runtime.send_with_payload(dest, payload, handler);
    }

    pub fn send_to<F>(&mut self, target: GlobalAddress, handler: F)
    where
        F: FnOnce(&mut HandlerContext, u64) + Copy + Send + 'static,
    {
        self.runtime.send_to(target, handler);
    }

    pub fn send_to_with_payload<F>(&mut self, target: GlobalAddress, payload: &[u8], handler: F)
    where
        F: FnOnce(&mut HandlerContext, u64, &[u8]) + Copy + Send + 'static,
    {
        self.runtime.send_to_with_payload(target, payload, handler);
    }
}

impl WakeHandle {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn wake(&mut self) {
        self.scheduler.thread_wake(self.worker);
    }
}
