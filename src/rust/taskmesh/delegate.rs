// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Delegate operations.
//!
//! A delegate runs a closure in handler context on the core that owns some state and hands its result back to the
//! calling task, which blocks until the result arrives. Calls that target the calling core run inline.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    network::GlobalAddress,
    scheduler::{
        HandlerContext,
        TaskContext,
    },
    sync::{
        ReplyId,
        SharedFullEmpty,
    },
    types::CoreId,
};

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Runs `f` on `core` and returns its result.
pub fn call<F, R>(cx: &mut TaskContext<'_>, core: CoreId, f: F) -> R
where
    F: FnOnce(&mut HandlerContext) -> R + Copy + Send + 'static,
    R: Copy + Send + 'static,
{
    if core == cx.core() {
        return f(&mut cx.handler_context());
    }

    let origin: CoreId = cx.core();
    let (slot, mut reply): (ReplyId, SharedFullEmpty<R>) = cx.runtime().replies().alloc::<R>();
    trace!("call(): {:?} delegates to {:?}", origin, core);
    cx.send(core, move |hcx: &mut HandlerContext| {
        let result: R = f(hcx);
        hcx.send(origin, move |hcx: &mut HandlerContext| hcx.runtime().fill_reply(slot, result));
    });
    let result: R = reply.read_fe(cx);
    cx.runtime().replies().release(slot);
    result
}

/// Runs `f` on the core that owns `target`, passing it the offset of `target`, and returns its result.
pub fn call_address<F, R>(cx: &mut TaskContext<'_>, target: GlobalAddress, f: F) -> R
where
    F: FnOnce(&mut HandlerContext, u64) -> R + Copy + Send + 'static,
    R: Copy + Send + 'static,
{
    if target.core() == cx.core() {
        return f(&mut cx.handler_context(), target.offset());
    }

    let origin: CoreId = cx.core();
    let (slot, mut reply): (ReplyId, SharedFullEmpty<R>) = cx.runtime().replies().alloc::<R>();
    cx.send_to(target, move |hcx: &mut HandlerContext, offset: u64| {
        let result: R = f(hcx, offset);
        hcx.send(origin, move |hcx: &mut HandlerContext| hcx.runtime().fill_reply(slot, result));
    });
    let result: R = reply.read_fe(cx);
    cx.runtime().replies().release(slot);
    result
}
