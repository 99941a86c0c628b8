// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::protocol_violation,
    network::transport::Transport,
    scheduler::TaskContext,
    sync::condition_variable::SharedConditionVariable,
    SharedObject,
};
use ::std::ops::{
    Deref,
    DerefMut,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Task-level collectives of a core. A task announces its arrival through the transport and blocks; the polling loop
/// of the scheduler completes the collective and wakes it.
#[derive(Default)]
pub struct Barrier {
    barrier_pending: bool,
    reduce_pending: bool,
    reduce_result: Option<u64>,
    waiters: SharedConditionVariable,
}

#[derive(Clone, Default)]
pub struct SharedBarrier(SharedObject<Barrier>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedBarrier {
    /// Blocks until every core of the cluster has entered the barrier. One task per core takes part.
    pub fn wait(&mut self, cx: &mut TaskContext<'_>) {
        if self.barrier_pending {
            protocol_violation("two tasks of the same core entered the barrier");
        }
        self.barrier_pending = true;
        cx.runtime().messenger().transport().barrier_notify();
        while self.barrier_pending {
            let mut waiters: SharedConditionVariable = self.waiters.clone();
            waiters.wait(cx);
        }
    }

    /// Blocks until every core has contributed its `value`, then returns the sum over the cluster.
    pub fn allreduce_sum(&mut self, cx: &mut TaskContext<'_>, value: u64) -> u64 {
        if self.reduce_pending {
            protocol_violation("two tasks of the same core entered an allreduce");
        }
        self.reduce_pending = true;
        cx.runtime().messenger().transport().allreduce_notify(value);
        loop {
            if let Some(sum) = self.reduce_result.take() {
                return sum;
            }
            let mut waiters: SharedConditionVariable = self.waiters.clone();
            waiters.wait(cx);
        }
    }

    /// Completes pending collectives. Called from the polling loop.
    pub fn poll(&mut self, transport: &mut dyn Transport) {
        let mut completed: bool = false;
        if self.barrier_pending && transport.barrier_try() {
            self.barrier_pending = false;
            completed = true;
        }
        if self.reduce_pending {
            if let Some(sum) = transport.allreduce_try() {
                self.reduce_pending = false;
                self.reduce_result = Some(sum);
                completed = true;
            }
        }
        if completed {
            self.waiters.broadcast();
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedBarrier {
    type Target = Barrier;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SharedBarrier {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
