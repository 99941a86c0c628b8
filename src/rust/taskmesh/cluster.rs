// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Lifecycle of an in-process cluster.
//!
//! Every core runs on its own OS thread with its own [SharedRuntime]. Cores talk only through their transports, so a
//! core that fails raises the abort flag of the cluster and every other core stops at its next poll.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::{
        fail::Fail,
        logging,
        network::{
            channel::{
                AbortHandle,
                ChannelNetwork,
                ChannelTransport,
            },
            handlers::HandlerTable,
        },
        scheduler::{
            SchedulerStats,
            TaskContext,
        },
        tasks::task_manager::TaskManagerStats,
        types::CoreId,
        InitialTask,
        RuntimeOptions,
        SharedRuntime,
    },
    taskmesh::config::Config,
};
use ::std::{
    any::Any,
    panic::{
        self,
        AssertUnwindSafe,
    },
    thread::{
        self,
        JoinHandle,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A configured cluster, ready to run.
pub struct Cluster {
    config: Config,
    options: RuntimeOptions,
}

/// What one core did during a run.
#[derive(Clone, Debug)]
pub struct CoreReport {
    pub core: CoreId,
    pub work_done: bool,
    pub tasks_executed: u64,
    /// Tasks executed by the whole cluster, as seen by this core.
    pub cluster_tasks_executed: u64,
    pub task_stats: TaskManagerStats,
    pub scheduler_stats: SchedulerStats,
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Outcome of a run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Reports of every core, in core order.
    pub cores: Vec<CoreReport>,
    pub total_tasks_executed: u64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Cluster {
    /// Validates `config` and prepares a cluster. Nothing runs yet.
    pub fn init(config: Config) -> Result<Self, Fail> {
        logging::initialize();
        let options: RuntimeOptions = match config.runtime_options() {
            Ok(options) => options,
            Err(e) => {
                error!("init(): invalid configuration ({:?})", e);
                return Err(e);
            },
        };
        info!(
            "init(): cores={} workers={} chunk={} stealing={}",
            options.num_cores, options.max_workers, options.chunk_size, options.work_stealing
        );
        Ok(Self { config, options })
    }

    pub fn num_cores(&self) -> usize {
        self.options.num_cores
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs `main` as the first task of core 0 and returns once the whole cluster is quiescent.
    pub fn run<F>(&mut self, main: F) -> Result<RunReport, Fail>
    where
        F: FnOnce(&mut TaskContext<'_>) + Send + 'static,
    {
        let transports: Vec<ChannelTransport> = ChannelNetwork::new(self.options.num_cores);
        let abort: Option<AbortHandle> = transports.first().map(ChannelTransport::abort_handle);
        let handlers: HandlerTable = HandlerTable::new();
        let mut initial_task: Option<InitialTask> = Some(Box::new(main));

        let mut threads: Vec<JoinHandle<Result<CoreReport, Fail>>> = Vec::with_capacity(self.options.num_cores);
        let mut spawn_error: Option<Fail> = None;
        for (index, transport) in transports.into_iter().enumerate() {
            let options: RuntimeOptions = self.options.clone();
            let handlers: HandlerTable = handlers.clone();
            let initial_task: Option<InitialTask> = if index == 0 { initial_task.take() } else { None };
            let builder: thread::Builder = thread::Builder::new().name(format!("core-{}", index));
            match builder.spawn(move || run_core(options, transport, handlers, initial_task)) {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    error!("run(): cannot start core {} ({:?})", index, e);
                    spawn_error = Some(Fail::from(e));
                    break;
                },
            }
        }
        if spawn_error.is_some() {
            if let Some(abort) = abort.as_ref() {
                abort.abort();
            }
        }

        let mut cores: Vec<CoreReport> = Vec::with_capacity(threads.len());
        let mut first_error: Option<Fail> = spawn_error;
        for handle in threads {
            let outcome: Result<CoreReport, Fail> = match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => Err(Fail::new(libc::ECANCELED, "core thread panicked")),
            };
            match outcome {
                Ok(report) => cores.push(report),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                },
            }
        }
        if let Some(e) = first_error {
            error!("run(): cluster failed ({:?})", e);
            return Err(e);
        }

        cores.sort_by_key(|report| report.core);
        let total_tasks_executed: u64 = cores.iter().map(|report| report.tasks_executed).sum();
        info!("run(): {} cores executed {} tasks", cores.len(), total_tasks_executed);
        Ok(RunReport {
            cores,
            total_tasks_executed,
        })
    }

    /// Shuts the cluster down. Every [`Cluster::run`] already joins its core threads and drops the transports it
    /// created, so nothing is left running here; consuming the cluster only rules out further runs.
    pub fn finalize(self) {
        info!("finalize(): {} cores", self.options.num_cores);
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Body of a core thread. Any failure, including a panic, aborts the whole cluster.
fn run_core(
    options: RuntimeOptions,
    transport: ChannelTransport,
    handlers: HandlerTable,
    initial_task: Option<InitialTask>,
) -> Result<CoreReport, Fail> {
    let abort: AbortHandle = transport.abort_handle();
    let outcome: Result<Result<CoreReport, Fail>, Box<dyn Any + Send>> =
        panic::catch_unwind(AssertUnwindSafe(move || drive_core(&options, transport, handlers, initial_task)));
    match outcome {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(e)) => {
            abort.abort();
            Err(e)
        },
        Err(cause) => {
            abort.abort();
            let message: String = match cause.downcast_ref::<String>() {
                Some(message) => message.clone(),
                None => match cause.downcast_ref::<&str>() {
                    Some(message) => message.to_string(),
                    None => "core panicked".to_string(),
                },
            };
            Err(Fail::new(libc::ECANCELED, &message))
        },
    }
}

fn drive_core(
    options: &RuntimeOptions,
    transport: ChannelTransport,
    handlers: HandlerTable,
    initial_task: Option<InitialTask>,
) -> Result<CoreReport, Fail> {
    let mut runtime: SharedRuntime = SharedRuntime::new(options, Box::new(transport), handlers)?;
    if let Some(task) = initial_task {
        runtime.set_initial_task(task);
    }
    runtime.activate();
    let tasks_executed: u64 = runtime.run()?;
    let cluster_tasks_executed: u64 = runtime.master_allreduce(tasks_executed)?;
    let task_stats: TaskManagerStats = runtime.task_manager().finish();
    // No core may drop its endpoint while others still deliver to it.
    runtime.master_barrier()?;

    Ok(CoreReport {
        core: runtime.core(),
        work_done: runtime.task_manager().work_done(),
        tasks_executed,
        cluster_tasks_executed,
        task_stats,
        scheduler_stats: runtime.scheduler().stats(),
        messages_sent: runtime.messenger().sent_counted(),
        messages_received: runtime.messenger().received_counted(),
    })
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::{
        runtime::scheduler::TaskContext,
        taskmesh::{
            cluster::{
                Cluster,
                RunReport,
            },
            config::Config,
        },
    };
    use ::anyhow::Result;

    fn cluster(num_cores: usize) -> Result<Cluster> {
        let config: Config = format!("taskmesh:\n  num_cores: {}\n", num_cores).parse()?;
        Ok(Cluster::init(config)?)
    }

    #[test]
    fn empty_main_terminates() -> Result<()> {
        let mut cluster: Cluster = cluster(2)?;
        let report: RunReport = cluster.run(|_: &mut TaskContext<'_>| {})?;
        crate::ensure_eq!(report.cores.len(), 2);
        crate::ensure_eq!(report.total_tasks_executed, 1);
        for core in &report.cores {
            crate::ensure_eq!(core.work_done, true);
            crate::ensure_eq!(core.cluster_tasks_executed, 1);
        }
        cluster.finalize();
        Ok(())
    }

    #[test]
    fn each_run_releases_its_cores_before_returning() -> Result<()> {
        let mut cluster: Cluster = cluster(2)?;
        for _ in 0..2 {
            let report: RunReport = cluster.run(|_: &mut TaskContext<'_>| {})?;
            crate::ensure_eq!(report.cores.len(), 2);
            crate::ensure_eq!(report.total_tasks_executed, 1);
        }
        cluster.finalize();
        Ok(())
    }

    #[test]
    fn panicking_task_aborts_the_cluster() -> Result<()> {
        let mut cluster: Cluster = cluster(3)?;
        let outcome = cluster.run(|_: &mut TaskContext<'_>| panic!("task failed"));
        match outcome {
            Ok(report) => anyhow::bail!("cluster survived a panicking task: {:?}", report),
            Err(e) => crate::ensure_eq!(e.errno, libc::ECANCELED),
        }
        Ok(())
    }

    #[test]
    fn init_rejects_invalid_configuration() -> Result<()> {
        let config: Config = "scheduler:\n  max_workers: 0\n".parse()?;
        crate::ensure_eq!(Cluster::init(config).is_err(), true);
        Ok(())
    }
}
