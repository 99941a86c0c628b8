// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod steal_queue;
mod task;
pub mod task_manager;
pub mod termination;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::task::{
    Task,
    TaskFn,
};
