// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::std::sync::atomic::{
    AtomicU64,
    AtomicUsize,
    Ordering,
};
use ::taskmesh::{
    delegate,
    Cluster,
    CoreId,
    HandlerContext,
    RunReport,
    Task,
    TaskContext,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const VICTIM: CoreId = CoreId::new(0);
const THIEF: CoreId = CoreId::new(1);

const TREE_DEPTH: u64 = 10;

//======================================================================================================================
// Static Variables
//======================================================================================================================

static STOLEN: AtomicUsize = AtomicUsize::new(0);
static THIEF_DEPTH: AtomicUsize = AtomicUsize::new(0);
static THIEF_TOP: AtomicU64 = AtomicU64::new(0);
static VICTIM_DEPTH: AtomicUsize = AtomicUsize::new(0);
static VICTIM_TOP: AtomicU64 = AtomicU64::new(0);
static SECOND_STEAL: AtomicUsize = AtomicUsize::new(usize::MAX);

static TREE_NODES: AtomicU64 = AtomicU64::new(0);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn thief(cx: &mut TaskContext<'_>, max_steal: u64, _: u64, _: u64) {
    let mut queue = cx.runtime().steal_queue::<u64>();
    let stolen: usize = queue.steal_locally(cx, VICTIM, max_steal as usize);
    STOLEN.store(stolen, Ordering::SeqCst);
    THIEF_DEPTH.store(queue.depth(), Ordering::SeqCst);
    THIEF_TOP.store(queue.peek(), Ordering::SeqCst);

    let (depth, top): (usize, u64) = delegate::call(cx, VICTIM, |hcx: &mut HandlerContext| {
        let queue = hcx.runtime().steal_queue::<u64>();
        (queue.depth(), queue.peek())
    });
    VICTIM_DEPTH.store(depth, Ordering::SeqCst);
    VICTIM_TOP.store(top, Ordering::SeqCst);
}

fn drain_then_steal(cx: &mut TaskContext<'_>, _: u64, _: u64, _: u64) {
    let mut queue = cx.runtime().steal_queue::<u64>();
    // The victim gives half of what it has left, and nothing once a single element remains.
    let mut total: usize = 0;
    loop {
        let stolen: usize = queue.steal_locally(cx, VICTIM, 64);
        if stolen == 0 {
            break;
        }
        total += stolen;
    }
    SECOND_STEAL.store(total, Ordering::SeqCst);
}

fn visit(cx: &mut TaskContext<'_>, depth: u64, _: u64, _: u64) {
    TREE_NODES.fetch_add(1, Ordering::SeqCst);
    if depth < TREE_DEPTH {
        cx.spawn_public(Task::new(visit, depth + 1, 0, 0));
        cx.spawn_public(Task::new(visit, depth + 1, 0, 0));
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[test]
fn steal_takes_half_of_the_victim() -> Result<()> {
    let mut cluster: Cluster = common::cluster(2)?;
    cluster.run(|cx: &mut TaskContext<'_>| {
        let mut queue = cx.runtime().steal_queue::<u64>();
        for value in 0..100 {
            queue.push(value);
        }
        cx.send(THIEF, |hcx: &mut HandlerContext| {
            hcx.spawn_remote_private(Task::new(thief, 64, 0, 0));
        });
    })?;

    taskmesh::ensure_eq!(STOLEN.load(Ordering::SeqCst), 50);
    taskmesh::ensure_eq!(THIEF_DEPTH.load(Ordering::SeqCst), 50);
    // The bottom half moved, in order.
    taskmesh::ensure_eq!(THIEF_TOP.load(Ordering::SeqCst), 49);
    taskmesh::ensure_eq!(VICTIM_DEPTH.load(Ordering::SeqCst), 50);
    taskmesh::ensure_eq!(VICTIM_TOP.load(Ordering::SeqCst), 99);
    Ok(())
}

#[test]
fn repeated_steals_stop_at_one_element() -> Result<()> {
    let mut cluster: Cluster = common::cluster(2)?;
    cluster.run(|cx: &mut TaskContext<'_>| {
        let mut queue = cx.runtime().steal_queue::<u64>();
        for value in 0..16 {
            queue.push(value);
        }
        cx.send(THIEF, |hcx: &mut HandlerContext| {
            hcx.spawn_remote_private(Task::new(drain_then_steal, 0, 0, 0));
        });
    })?;
    // 8 + 4 + 2 + 1 out of 16.
    taskmesh::ensure_eq!(SECOND_STEAL.load(Ordering::SeqCst), 15);
    Ok(())
}

#[test]
fn spawned_tree_is_fully_visited() -> Result<()> {
    let mut cluster: Cluster = Cluster::init(common::config(4, "tasks:\n  chunk_size: 8\n")?)?;
    let report: RunReport = cluster.run(|cx: &mut TaskContext<'_>| {
        cx.spawn_public(Task::new(visit, 0, 0, 0));
    })?;

    let nodes: u64 = (1 << (TREE_DEPTH + 1)) - 1;
    taskmesh::ensure_eq!(TREE_NODES.load(Ordering::SeqCst), nodes);
    taskmesh::ensure_eq!(report.total_tasks_executed, nodes + 1);
    let stolen: u64 = report.cores.iter().map(|core| core.task_stats.tasks_stolen).sum();
    let executed_elsewhere: u64 = report.cores[1..].iter().map(|core| core.tasks_executed).sum();
    // Only stolen tasks, and the tasks they spawned, run away from core 0.
    taskmesh::ensure_eq!(stolen == 0 && executed_elsewhere > 0, false);
    Ok(())
}
