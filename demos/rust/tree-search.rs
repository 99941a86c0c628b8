// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![deny(clippy::all)]

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::clap::{Arg, ArgMatches, Command};
use ::rand::{rngs::SmallRng, Rng, SeedableRng};
use ::std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use ::taskmesh::{Cluster, Config, RunReport, Task, TaskContext};

//======================================================================================================================
// Static Variables
//======================================================================================================================

static NODES: AtomicU64 = AtomicU64::new(0);
static LEAVES: AtomicU64 = AtomicU64::new(0);

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Debug)]
pub struct ProgramArguments {
    config_path: Option<String>,
    num_cores: Option<usize>,
    max_depth: u64,
    max_children: u64,
    seed: u64,
}

impl ProgramArguments {
    const DEFAULT_MAX_DEPTH: u64 = 12;
    const DEFAULT_MAX_CHILDREN: u64 = 4;
    const DEFAULT_SEED: u64 = 19;

    pub fn new() -> Result<Self> {
        let matches: ArgMatches = Command::new("tree-search")
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("PATH")
                    .help("Sets the configuration file"),
            )
            .arg(
                Arg::new("cores")
                    .long("cores")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .value_name("N")
                    .help("Sets the number of cores"),
            )
            .arg(
                Arg::new("depth")
                    .long("depth")
                    .value_parser(clap::value_parser!(u64))
                    .required(false)
                    .value_name("N")
                    .help("Sets the depth of the tree"),
            )
            .arg(
                Arg::new("children")
                    .long("children")
                    .value_parser(clap::value_parser!(u64))
                    .required(false)
                    .value_name("N")
                    .help("Sets the largest number of children of a node"),
            )
            .arg(
                Arg::new("seed")
                    .long("seed")
                    .value_parser(clap::value_parser!(u64))
                    .required(false)
                    .value_name("N")
                    .help("Sets the seed of the root node"),
            )
            .get_matches();

        Ok(Self {
            config_path: matches.get_one::<String>("config").cloned(),
            num_cores: matches.get_one::<usize>("cores").copied(),
            max_depth: matches.get_one::<u64>("depth").copied().unwrap_or(Self::DEFAULT_MAX_DEPTH),
            max_children: matches
                .get_one::<u64>("children")
                .copied()
                .unwrap_or(Self::DEFAULT_MAX_CHILDREN),
            seed: matches.get_one::<u64>("seed").copied().unwrap_or(Self::DEFAULT_SEED),
        })
    }

    fn config(&self) -> Result<Config> {
        let mut config: Config = match &self.config_path {
            Some(path) => Config::new(path)?,
            None => Config::default(),
        };
        if let Some(num_cores) = self.num_cores {
            let yaml: String = format!("taskmesh:\n  num_cores: {}\n", num_cores);
            let cores: Config = yaml.parse()?;
            if let (Some(target), Some(source)) = (config.0.as_hash().cloned(), cores.0.as_hash()) {
                let mut merged = target;
                for (key, value) in source.iter() {
                    merged.insert(key.clone(), value.clone());
                }
                config = Config(::yaml_rust::Yaml::Hash(merged));
            }
        }
        Ok(config)
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Visits one node of an unbalanced tree. The number of children of a node is drawn from a generator seeded by the
/// node itself, so every run builds the same tree no matter which core visits which node.
fn visit(cx: &mut TaskContext<'_>, state: u64, depth: u64, limits: u64) {
    NODES.fetch_add(1, Ordering::Relaxed);
    let max_depth: u64 = limits >> 32;
    let max_children: u64 = limits & 0xffff_ffff;
    if depth >= max_depth {
        LEAVES.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let mut rng: SmallRng = SmallRng::seed_from_u64(state);
    let children: u64 = rng.gen_range(0..=max_children);
    if children == 0 {
        LEAVES.fetch_add(1, Ordering::Relaxed);
    }
    for _ in 0..children {
        cx.spawn_public(Task::new(visit, rng.gen::<u64>(), depth + 1, limits));
    }
}

fn main() -> Result<()> {
    let args: ProgramArguments = ProgramArguments::new()?;
    let mut cluster: Cluster = match Cluster::init(args.config()?) {
        Ok(cluster) => cluster,
        Err(e) => anyhow::bail!("failed to initialize cluster: {:?}", e),
    };

    let seed: u64 = args.seed;
    let limits: u64 = (args.max_depth << 32) | (args.max_children & 0xffff_ffff);
    let start: Instant = Instant::now();
    let report: RunReport = match cluster.run(move |cx: &mut TaskContext<'_>| {
        cx.spawn_public(Task::new(visit, seed, 0, limits));
    }) {
        Ok(report) => report,
        Err(e) => anyhow::bail!("tree search failed: {:?}", e),
    };
    let elapsed: Duration = start.elapsed();

    println!(
        "{} nodes, {} leaves in {:?} on {} cores",
        NODES.load(Ordering::Relaxed),
        LEAVES.load(Ordering::Relaxed),
        elapsed,
        report.cores.len()
    );
    for core in &report.cores {
        println!(
            "{}: {} tasks, {} stolen in {} steals ({} failed)",
            core.core,
            core.tasks_executed,
            core.task_stats.tasks_stolen,
            core.task_stats.steals_ok,
            core.task_stats.steals_failed
        );
    }
    cluster.finalize();
    Ok(())
}
