// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Full/empty cells.
//!
//! A cell is either empty or full. Blocking accessors suspend the calling worker until the cell reaches the state
//! they expect; non-blocking accessors are safe from message handlers. Every state change wakes all waiters, which then
//! re-check the state, so a wake-up is never lost between two waiters that expect different states.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::protocol_violation,
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

pub struct FullEmpty<T: Copy> {
    full: bool,
    value: Option<T>,
    waiters: SharedConditionVariable,
}

/// Shared handle to a full/empty cell. Clones refer to the same cell.
pub struct SharedFullEmpty<T: Copy>(SharedObject<FullEmpty<T>>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T: Copy> SharedFullEmpty<T> {
    /// Creates an empty cell.
    pub fn new() -> Self {
        Self(SharedObject::new(FullEmpty {
            full: false,
            value: None,
            waiters: SharedConditionVariable::default(),
        }))
    }

    /// Creates a cell that is already full with `value`.
    pub fn full(value: T) -> Self {
        Self(SharedObject::new(FullEmpty {
            full: true,
            value: Some(value),
            waiters: SharedConditionVariable::default(),
        }))
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn is_empty(&self) -> bool {
        !self.full
    }

    pub fn num_waiters(&self) -> usize {
        self.waiters.num_waiters()
    }

    /// Empties the cell. Resetting a cell that has waiters is a protocol violation.
    pub fn reset(&mut self) {
        if self.waiters.num_waiters() > 0 {
            protocol_violation(&format!(
                "resetting a full/empty cell with {} waiters",
                self.waiters.num_waiters()
            ));
        }
        self.full = false;
    }

    /// Stores `value` and marks the cell full, whatever its state. Never blocks.
    pub fn write_xf(&mut self, value: T) {
        self.value = Some(value);
        self.full = true;
        self.waiters.broadcast();
    }

    /// Waits for the cell to be empty, then stores `value` and marks the cell full.
    pub fn write_ef(&mut self, cx: &mut TaskContext<'_>, value: T) {
        self.block_until(cx, false);
        self.write_xf(value);
    }

    /// Waits for the cell to be full, then replaces its value. The cell stays full.
    pub fn write_ff(&mut self, cx: &mut TaskContext<'_>, value: T) {
        self.block_until(cx, true);
        self.write_xf(value);
    }

    /// Returns the last value stored, whatever the state of the cell. Never blocks.
    pub fn read_xx(&self) -> Option<T> {
        self.value
    }

    /// Waits for the cell to be full and returns its value. The cell stays full.
    pub fn read_ff(&mut self, cx: &mut TaskContext<'_>) -> T {
        self.block_until(cx, true);
        let value: T = self.stored();
        self.waiters.broadcast();
        value
    }

    /// Waits for the cell to be full, returns its value and marks the cell empty.
    pub fn read_fe(&mut self, cx: &mut TaskContext<'_>) -> T {
        self.block_until(cx, true);
        let value: T = self.stored();
        self.full = false;
        self.waiters.broadcast();
        value
    }

    fn block_until(&mut self, cx: &mut TaskContext<'_>, full: bool) {
        while self.full != full {
            let mut waiters: SharedConditionVariable = self.waiters.clone();
            waiters.wait(cx);
        }
    }

    fn stored(&self) -> T {
        match self.value {
            Some(value) => value,
            None => protocol_violation("full/empty cell is full but holds no value"),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T: Copy> Clone for SharedFullEmpty<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Copy> Default for SharedFullEmpty<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> Deref for SharedFullEmpty<T> {
    type Target = FullEmpty<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: Copy> DerefMut for SharedFullEmpty<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
