// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::std::sync::{
    atomic::{
        AtomicU64,
        Ordering,
    },
    Mutex,
};
use ::taskmesh::{
    delegate,
    Cluster,
    CoreId,
    GlobalAddress,
    HandlerContext,
    RunReport,
    TaskContext,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const NUM_MESSAGES: u64 = 100;

//======================================================================================================================
// Static Variables
//======================================================================================================================

#[allow(clippy::declare_interior_mutable_const)]
const UNSET: AtomicU64 = AtomicU64::new(u64::MAX);

static CALL_RESULTS: [AtomicU64; 3] = [UNSET; 3];
static ADDRESS_RESULTS: [AtomicU64; 3] = [UNSET; 3];

/// Offsets seen by the addressed handler, in delivery order.
static OFFSETS: Mutex<Vec<u64>> = Mutex::new(Vec::new());

/// Payloads seen by the payload handlers, in delivery order.
static PAYLOADS: Mutex<Vec<(u64, Vec<u8>)>> = Mutex::new(Vec::new());

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[test]
fn delegate_calls_return_results_of_every_core() -> Result<()> {
    let mut cluster: Cluster = common::cluster(3)?;
    let report: RunReport = cluster.run(|cx: &mut TaskContext<'_>| {
        for core in 0..cx.num_cores() as u32 {
            let value: u64 = delegate::call(cx, CoreId::new(core), |hcx: &mut HandlerContext| {
                u32::from(hcx.core()) as u64 * 10
            });
            CALL_RESULTS[core as usize].store(value, Ordering::SeqCst);

            let target: GlobalAddress = match GlobalAddress::new(CoreId::new(core), 7) {
                Ok(target) => target,
                Err(_) => return,
            };
            let value: u64 = delegate::call_address(cx, target, |hcx: &mut HandlerContext, offset: u64| {
                offset * 100 + u32::from(hcx.core()) as u64
            });
            ADDRESS_RESULTS[core as usize].store(value, Ordering::SeqCst);
        }
    })?;

    for core in 0..3 {
        taskmesh::ensure_eq!(CALL_RESULTS[core].load(Ordering::SeqCst), core as u64 * 10);
        taskmesh::ensure_eq!(ADDRESS_RESULTS[core].load(Ordering::SeqCst), 700 + core as u64);
    }
    // Only the main task ran.
    taskmesh::ensure_eq!(report.total_tasks_executed, 1);
    Ok(())
}

#[test]
fn addressed_messages_arrive_in_order() -> Result<()> {
    let mut cluster: Cluster = common::cluster(2)?;
    let report: RunReport = cluster.run(|cx: &mut TaskContext<'_>| {
        for offset in 0..NUM_MESSAGES {
            let target: GlobalAddress = match GlobalAddress::new(CoreId::new(1), offset) {
                Ok(target) => target,
                Err(_) => return,
            };
            cx.send_to(target, |hcx: &mut HandlerContext, offset: u64| {
                if hcx.core() == CoreId::new(1) {
                    if let Ok(mut offsets) = OFFSETS.lock() {
                        offsets.push(offset);
                    }
                }
            });
        }
    })?;

    let offsets: Vec<u64> = match OFFSETS.lock() {
        Ok(offsets) => offsets.clone(),
        Err(_) => anyhow::bail!("offsets lock poisoned"),
    };
    taskmesh::ensure_eq!(offsets, (0..NUM_MESSAGES).collect::<Vec<u64>>());
    // Combined invocations share packets.
    taskmesh::ensure_eq!(report.cores[1].messages_received >= NUM_MESSAGES, true);
    Ok(())
}

#[test]
fn payloads_travel_with_their_handlers() -> Result<()> {
    let mut cluster: Cluster = common::cluster(3)?;
    cluster.run(|cx: &mut TaskContext<'_>| {
        cx.send_with_payload(CoreId::new(2), b"hello", |hcx: &mut HandlerContext, payload: &[u8]| {
            if let Ok(mut payloads) = PAYLOADS.lock() {
                payloads.push((u32::from(hcx.source()) as u64, payload.to_vec()));
            }
        });
        cx.send_with_payload(CoreId::new(2), &[], |hcx: &mut HandlerContext, payload: &[u8]| {
            if let Ok(mut payloads) = PAYLOADS.lock() {
                payloads.push((u32::from(hcx.source()) as u64, payload.to_vec()));
            }
        });
        let target: GlobalAddress = match GlobalAddress::new(CoreId::new(2), 42) {
            Ok(target) => target,
            Err(_) => return,
        };
        cx.send_to_with_payload(target, &[1, 2, 3], |_: &mut HandlerContext, offset: u64, payload: &[u8]| {
            if let Ok(mut payloads) = PAYLOADS.lock() {
                payloads.push((offset, payload.to_vec()));
            }
        });
    })?;

    let payloads: Vec<(u64, Vec<u8>)> = match PAYLOADS.lock() {
        Ok(payloads) => payloads.clone(),
        Err(_) => anyhow::bail!("payloads lock poisoned"),
    };
    taskmesh::ensure_eq!(payloads.len(), 3);
    taskmesh::ensure_eq!(payloads[0], (0, b"hello".to_vec()));
    taskmesh::ensure_eq!(payloads[1], (0, Vec::<u8>::new()));
    taskmesh::ensure_eq!(payloads[2], (42, vec![1, 2, 3]));
    Ok(())
}
