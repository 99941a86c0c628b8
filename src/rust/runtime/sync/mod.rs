// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod barrier;
mod condition_variable;
mod full_empty;
mod reply;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    barrier::{
        Barrier,
        SharedBarrier,
    },
    condition_variable::{
        ConditionVariable,
        SharedConditionVariable,
    },
    full_empty::{
        FullEmpty,
        SharedFullEmpty,
    },
    reply::{
        ReplyId,
        ReplySlots,
    },
};
