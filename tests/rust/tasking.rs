// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::std::{
    cell::RefCell,
    sync::atomic::{
        AtomicU64,
        AtomicU8,
        Ordering,
    },
};
use ::taskmesh::{
    Cluster,
    CoreId,
    HandlerContext,
    RunReport,
    SharedFullEmpty,
    Task,
    TaskContext,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const NUM_TASKS: usize = 1000;

//======================================================================================================================
// Static Variables
//======================================================================================================================

#[allow(clippy::declare_interior_mutable_const)]
const UNRUN: AtomicU8 = AtomicU8::new(0);

/// How many times each public task ran.
static RUNS: [AtomicU8; NUM_TASKS] = [UNRUN; NUM_TASKS];

/// How many times each task ran when stealing is disabled, and on which core.
static LOCAL_RUNS: [AtomicU8; NUM_TASKS] = [UNRUN; NUM_TASKS];

static RENDEZVOUS_SUM: AtomicU64 = AtomicU64::new(0);

#[allow(clippy::declare_interior_mutable_const)]
const UNSET: AtomicU64 = AtomicU64::new(u64::MAX);

/// Sum seen by the collective task of each core.
static ALLREDUCE: [AtomicU64; 3] = [UNSET; 3];

/// Values read through the full-to-full and full-to-empty operations, in order.
static CELL_READS: [AtomicU64; 3] = [UNSET; 3];

/// Whether the cell was full after each non-consuming read and empty after the consuming one.
static CELL_STATES: [AtomicU8; 3] = [UNRUN; 3];

thread_local! {
    static CELL: RefCell<Option<SharedFullEmpty<u64>>> = RefCell::new(None);
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn mark_public(_: &mut TaskContext<'_>, index: u64, _: u64, _: u64) {
    RUNS[index as usize].fetch_add(1, Ordering::SeqCst);
}

fn mark_local(cx: &mut TaskContext<'_>, index: u64, _: u64, _: u64) {
    // Encode the core in the upper bits so that the test can tell where the task ran.
    let core: u8 = u32::from(cx.core()) as u8;
    LOCAL_RUNS[index as usize].fetch_add(1 + (core << 4), Ordering::SeqCst);
}

fn cell() -> SharedFullEmpty<u64> {
    CELL.with(|cell| cell.borrow_mut().get_or_insert_with(SharedFullEmpty::new).clone())
}

fn producer(cx: &mut TaskContext<'_>, count: u64, _: u64, _: u64) {
    let mut cell: SharedFullEmpty<u64> = cell();
    for value in 1..=count {
        cell.write_ef(cx, value);
    }
}

fn fill(_: &mut TaskContext<'_>, value: u64, _: u64, _: u64) {
    cell().write_xf(value);
}

fn blocked_reader(cx: &mut TaskContext<'_>, _: u64, _: u64, _: u64) {
    cell().read_fe(cx);
}

fn resetter(_: &mut TaskContext<'_>, _: u64, _: u64, _: u64) {
    cell().reset();
}

fn collective(cx: &mut TaskContext<'_>, _: u64, _: u64, _: u64) {
    cx.barrier();
    let core: u32 = u32::from(cx.core());
    let sum: u64 = cx.allreduce_sum(core as u64 + 1);
    ALLREDUCE[core as usize].store(sum, Ordering::SeqCst);
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[test]
fn public_tasks_run_exactly_once() -> Result<()> {
    let mut cluster: Cluster = common::cluster(4)?;
    let report: RunReport = cluster.run(|cx: &mut TaskContext<'_>| {
        for index in 0..NUM_TASKS as u64 {
            cx.spawn_public(Task::new(mark_public, index, 0, 0));
        }
    })?;
    cluster.finalize();

    for (index, runs) in RUNS.iter().enumerate() {
        if runs.load(Ordering::SeqCst) != 1 {
            anyhow::bail!("task {} ran {} times", index, runs.load(Ordering::SeqCst));
        }
    }
    taskmesh::ensure_eq!(report.cores.len(), 4);
    taskmesh::ensure_eq!(report.total_tasks_executed, NUM_TASKS as u64 + 1);
    for core in &report.cores {
        taskmesh::ensure_eq!(core.work_done, true);
        taskmesh::ensure_eq!(core.cluster_tasks_executed, NUM_TASKS as u64 + 1);
    }
    let sent: u64 = report.cores.iter().map(|core| core.messages_sent).sum();
    let received: u64 = report.cores.iter().map(|core| core.messages_received).sum();
    taskmesh::ensure_eq!(sent, received);
    Ok(())
}

#[test]
fn tasks_stay_home_without_work_stealing() -> Result<()> {
    let mut cluster: Cluster = Cluster::init(common::config(3, "tasks:\n  work_stealing: false\n")?)?;
    let report: RunReport = cluster.run(|cx: &mut TaskContext<'_>| {
        for index in 0..NUM_TASKS as u64 {
            cx.spawn_public(Task::new(mark_local, index, 0, 0));
        }
    })?;

    for runs in LOCAL_RUNS.iter() {
        // Ran once, on core 0.
        taskmesh::ensure_eq!(runs.load(Ordering::SeqCst), 1);
    }
    taskmesh::ensure_eq!(report.cores[0].tasks_executed, NUM_TASKS as u64 + 1);
    taskmesh::ensure_eq!(report.cores[1].tasks_executed, 0);
    taskmesh::ensure_eq!(report.cores[2].tasks_executed, 0);
    taskmesh::ensure_eq!(report.cores[1].task_stats.steal_attempts, 0);
    Ok(())
}

#[test]
fn full_empty_cells_hand_values_between_tasks() -> Result<()> {
    let mut cluster: Cluster = common::cluster(1)?;
    cluster.run(|cx: &mut TaskContext<'_>| {
        let mut cell: SharedFullEmpty<u64> = cell();
        cx.spawn_private(Task::new(producer, 5, 0, 0));
        let mut sum: u64 = 0;
        for _ in 0..5 {
            sum += cell.read_fe(cx);
        }
        RENDEZVOUS_SUM.store(sum, Ordering::SeqCst);
    })?;
    taskmesh::ensure_eq!(RENDEZVOUS_SUM.load(Ordering::SeqCst), 15);
    Ok(())
}

#[test]
fn full_to_full_operations_leave_the_cell_full() -> Result<()> {
    let mut cluster: Cluster = common::cluster(1)?;
    cluster.run(|cx: &mut TaskContext<'_>| {
        let mut cell: SharedFullEmpty<u64> = cell();
        cell.write_xf(5);
        CELL_READS[0].store(cell.read_ff(cx), Ordering::SeqCst);
        CELL_STATES[0].store(cell.is_full() as u8, Ordering::SeqCst);

        cell.write_ff(cx, 9);
        CELL_READS[1].store(cell.read_fe(cx), Ordering::SeqCst);
        CELL_STATES[1].store(cell.is_empty() as u8, Ordering::SeqCst);

        // Blocks until the filler runs, then leaves the value in place.
        cx.spawn_private(Task::new(fill, 11, 0, 0));
        CELL_READS[2].store(cell.read_ff(cx), Ordering::SeqCst);
        CELL_STATES[2].store(cell.is_full() as u8, Ordering::SeqCst);
    })?;

    taskmesh::ensure_eq!(CELL_READS[0].load(Ordering::SeqCst), 5);
    taskmesh::ensure_eq!(CELL_READS[1].load(Ordering::SeqCst), 9);
    taskmesh::ensure_eq!(CELL_READS[2].load(Ordering::SeqCst), 11);
    for state in CELL_STATES.iter() {
        taskmesh::ensure_eq!(state.load(Ordering::SeqCst), 1);
    }
    Ok(())
}

#[test]
fn resetting_a_cell_with_waiters_aborts_the_cluster() -> Result<()> {
    let mut cluster: Cluster = common::cluster(1)?;
    let outcome = cluster.run(|cx: &mut TaskContext<'_>| {
        // Private spawns are LIFO: the reader blocks on the empty cell before the reset runs.
        cx.spawn_private(Task::new(resetter, 0, 0, 0));
        cx.spawn_private(Task::new(blocked_reader, 0, 0, 0));
    });
    match outcome {
        Ok(report) => anyhow::bail!("reset of a waited-on cell went unnoticed: {:?}", report),
        Err(e) => taskmesh::ensure_eq!(e.errno, libc::ECANCELED),
    }
    Ok(())
}

#[test]
fn barrier_and_allreduce_span_every_core() -> Result<()> {
    let mut cluster: Cluster = common::cluster(3)?;
    let report: RunReport = cluster.run(|cx: &mut TaskContext<'_>| {
        for core in 0..cx.num_cores() as u32 {
            cx.send(CoreId::new(core), |hcx: &mut HandlerContext| {
                hcx.spawn_remote_private(Task::new(collective, 0, 0, 0));
            });
        }
    })?;
    for sum in ALLREDUCE.iter() {
        taskmesh::ensure_eq!(sum.load(Ordering::SeqCst), 6);
    }
    taskmesh::ensure_eq!(report.total_tasks_executed, 4);
    Ok(())
}

#[test]
fn invalid_core_count_is_rejected_before_start() -> Result<()> {
    taskmesh::ensure_eq!(Cluster::init(common::config(0, "")?).is_err(), true);
    taskmesh::ensure_eq!(
        Cluster::init(common::config(2, "tasks:\n  chunk_size: 1000000\n")?).is_err(),
        true
    );
    Ok(())
}
