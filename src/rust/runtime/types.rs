// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::fmt;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifies a core (one OS thread with its own scheduler) of the cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
pub struct CoreId(u32);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl CoreId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Position of this core in per-core tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u32> for CoreId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<CoreId> for u32 {
    fn from(value: CoreId) -> Self {
        value.0
    }
}

impl From<CoreId> for u64 {
    fn from(value: CoreId) -> Self {
        value.0 as u64
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}
