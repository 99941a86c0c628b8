// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    scheduler::{
        TaskContext,
        WakeHandle,
    },
    SharedObject,
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

/// List of workers waiting on some condition, hooked into the scheduler of the core. Waiting blocks the calling worker
/// until another context signals the condition. Waiters must re-check their condition after waking.
#[derive(Default)]
pub struct ConditionVariable {
    waiters: VecDeque<WakeHandle>,
}

#[derive(Clone, Default)]
pub struct SharedConditionVariable(SharedObject<ConditionVariable>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedConditionVariable {
    /// Wake the next waiting worker.
    pub fn signal(&mut self) {
        if let Some(mut waiter) = self.waiters.pop_front() {
            waiter.wake();
        }
    }

    /// Wake all waiting workers.
    pub fn broadcast(&mut self) {
        while let Some(mut waiter) = self.waiters.pop_front() {
            waiter.wake();
        }
    }

    /// Forget all waiting workers. This function should be used CAREFULLY as the waiting workers will never wake.
    pub fn cancel(&mut self) {
        self.waiters.clear();
    }

    /// Block until signaled.
    pub fn wait(&mut self, cx: &mut TaskContext<'_>) {
        self.waiters.push_back(cx.wake_handle());
        cx.block();
    }

    pub fn num_waiters(&self) -> usize {
        self.waiters.len()
    }
}

//======================================================================================================================
// Trait Implementation
//======================================================================================================================

impl Deref for SharedConditionVariable {
    type Target = ConditionVariable;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SharedConditionVariable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
