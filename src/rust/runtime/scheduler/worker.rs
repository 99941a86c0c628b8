// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::TaskContext,
    tasks::task_manager,
    SharedRuntime,
};
use ::corosensei::{
    stack::DefaultStack,
    Coroutine,
    Yielder,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Stackful coroutine backing a worker. Workers are resumed with `()`, suspend with `()` and return their exit record.
pub type WorkerCoroutine = Coroutine<(), (), WorkerExit, DefaultStack>;

/// Slot of a worker in the scheduler of its core.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct WorkerId(usize);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState {
    /// Idle, parked on the unassigned queue until work shows up.
    Unassigned,
    /// Runnable, sitting on the ready or periodic queue.
    Ready,
    Running,
    /// Waiting on a wake-up from a synchronization object.
    Blocked,
}

/// What a worker reports when it exits.
#[derive(Clone, Copy, Debug)]
pub struct WorkerExit {
    pub worker: WorkerId,
    pub tasks_executed: u64,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Creates the coroutine of worker `id` on a fresh stack of `stack_size` bytes.
pub fn spawn(runtime: SharedRuntime, id: WorkerId, stack_size: usize) -> Result<WorkerCoroutine, Fail> {
    let stack: DefaultStack = DefaultStack::new(stack_size)?;
    Ok(Coroutine::with_stack(stack, move |yielder: &Yielder<(), ()>, ()| {
        let mut cx: TaskContext = TaskContext::new(runtime, id, yielder);
        worker_main(&mut cx)
    }))
}

/// Runs tasks until the task manager reports global termination.
fn worker_main(cx: &mut TaskContext<'_>) -> WorkerExit {
    trace!("worker_main(): core={:?} worker={:?} started", cx.core(), cx.worker());
    let mut tasks_executed: u64 = 0;
    while let Some(task) = task_manager::get_work(cx) {
        task.execute(cx);
        tasks_executed += 1;
        cx.yield_now();
    }
    trace!(
        "worker_main(): core={:?} worker={:?} exiting after {} tasks",
        cx.core(),
        cx.worker(),
        tasks_executed
    );
    WorkerExit {
        worker: cx.worker(),
        tasks_executed,
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<usize> for WorkerId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<WorkerId> for usize {
    fn from(value: WorkerId) -> Self {
        value.0
    }
}
