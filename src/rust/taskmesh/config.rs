// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
    tasks::Task,
    RuntimeOptions,
};
use ::std::{
    fs::File,
    io::Read,
    mem,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    yaml::Hash,
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Cluster options.
mod cluster_config {
    pub const SECTION_NAME: &str = "taskmesh";
    pub const NUM_CORES: &str = "num_cores";
}

// Worker pool of every core.
mod scheduler_config {
    pub const SECTION_NAME: &str = "scheduler";
    pub const MAX_WORKERS: &str = "max_workers";
    pub const STACK_SIZE: &str = "stack_size";
    pub const PERIODIC_POLL_TICKS: &str = "periodic_poll_ticks";
}

// Task queues and work stealing.
mod tasks_config {
    pub const SECTION_NAME: &str = "tasks";
    pub const STEAL_QUEUE_CAPACITY: &str = "steal_queue_capacity";
    pub const CHUNK_SIZE: &str = "chunk_size";
    pub const STEAL_ATTEMPTS: &str = "steal_attempts";
    pub const WORK_STEALING: &str = "work_stealing";
    pub const CANCEL_INTERVAL: &str = "cancel_interval";
}

// Message aggregation.
mod aggregator_config {
    pub const SECTION_NAME: &str = "aggregator";
    pub const FLUSH_THRESHOLD: &str = "flush_threshold";
    pub const FLUSH_TICKS: &str = "flush_ticks";
}

mod termination_config {
    pub const SECTION_NAME: &str = "termination";
    pub const PROBE_INTERVAL: &str = "probe_interval";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Cluster configuration. Every option may be overridden by an environment variable named after the upper-cased option
/// and falls back to a default when absent from both.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        config_s.parse()
    }

    pub fn num_cores(&self) -> Result<usize, Fail> {
        self.get_int_option_or(
            cluster_config::SECTION_NAME,
            cluster_config::NUM_CORES,
            limits::DEFAULT_NUM_CORES,
        )
    }

    pub fn max_workers(&self) -> Result<usize, Fail> {
        self.get_int_option_or(
            scheduler_config::SECTION_NAME,
            scheduler_config::MAX_WORKERS,
            limits::DEFAULT_MAX_WORKERS,
        )
    }

    pub fn stack_size(&self) -> Result<usize, Fail> {
        self.get_int_option_or(
            scheduler_config::SECTION_NAME,
            scheduler_config::STACK_SIZE,
            limits::DEFAULT_STACK_SIZE,
        )
    }

    pub fn periodic_poll_ticks(&self) -> Result<u64, Fail> {
        self.get_int_option_or(
            scheduler_config::SECTION_NAME,
            scheduler_config::PERIODIC_POLL_TICKS,
            limits::DEFAULT_PERIODIC_POLL_TICKS,
        )
    }

    pub fn steal_queue_capacity(&self) -> Result<usize, Fail> {
        self.get_int_option_or(
            tasks_config::SECTION_NAME,
            tasks_config::STEAL_QUEUE_CAPACITY,
            limits::DEFAULT_STEAL_QUEUE_CAPACITY,
        )
    }

    pub fn chunk_size(&self) -> Result<usize, Fail> {
        self.get_int_option_or(
            tasks_config::SECTION_NAME,
            tasks_config::CHUNK_SIZE,
            limits::DEFAULT_CHUNK_SIZE,
        )
    }

    pub fn steal_attempts(&self) -> Result<usize, Fail> {
        self.get_int_option_or(
            tasks_config::SECTION_NAME,
            tasks_config::STEAL_ATTEMPTS,
            limits::DEFAULT_STEAL_ATTEMPTS,
        )
    }

    pub fn work_stealing(&self) -> Result<bool, Fail> {
        if let Some(enabled) = Self::get_typed_env_option(tasks_config::WORK_STEALING)? {
            return Ok(enabled);
        }
        match self.get_present_option(tasks_config::SECTION_NAME, tasks_config::WORK_STEALING)? {
            Some(section) => Self::get_bool_option(section, tasks_config::WORK_STEALING),
            None => Ok(true),
        }
    }

    pub fn cancel_interval(&self) -> Result<usize, Fail> {
        self.get_int_option_or(
            tasks_config::SECTION_NAME,
            tasks_config::CANCEL_INTERVAL,
            limits::DEFAULT_CANCEL_INTERVAL,
        )
    }

    pub fn flush_threshold(&self) -> Result<usize, Fail> {
        self.get_int_option_or(
            aggregator_config::SECTION_NAME,
            aggregator_config::FLUSH_THRESHOLD,
            limits::DEFAULT_FLUSH_THRESHOLD,
        )
    }

    pub fn flush_ticks(&self) -> Result<u64, Fail> {
        self.get_int_option_or(
            aggregator_config::SECTION_NAME,
            aggregator_config::FLUSH_TICKS,
            limits::DEFAULT_FLUSH_TICKS,
        )
    }

    pub fn probe_interval(&self) -> Result<u64, Fail> {
        self.get_int_option_or(
            termination_config::SECTION_NAME,
            termination_config::PROBE_INTERVAL,
            limits::DEFAULT_PROBE_INTERVAL,
        )
    }

    /// Reads and validates every runtime option.
    pub fn runtime_options(&self) -> Result<RuntimeOptions, Fail> {
        let options: RuntimeOptions = RuntimeOptions {
            num_cores: self.num_cores()?,
            max_workers: self.max_workers()?,
            stack_size: self.stack_size()?,
            periodic_poll_ticks: self.periodic_poll_ticks()?,
            steal_queue_capacity: self.steal_queue_capacity()?,
            chunk_size: self.chunk_size()?,
            steal_attempts: self.steal_attempts()?,
            work_stealing: self.work_stealing()?,
            cancel_interval: self.cancel_interval()?,
            flush_threshold: self.flush_threshold()?,
            flush_ticks: self.flush_ticks()?,
            probe_interval: self.probe_interval()?,
        };
        Self::validate(&options)?;
        Ok(options)
    }

    fn validate(options: &RuntimeOptions) -> Result<(), Fail> {
        let chunk_bytes: usize = options.chunk_size.saturating_mul(mem::size_of::<Task>());
        let message: Option<String> = if options.num_cores == 0 || options.num_cores > limits::MAX_CORES {
            Some(format!("{} cores do not fit in 1..={}", options.num_cores, limits::MAX_CORES))
        } else if options.max_workers == 0 {
            Some("a core needs at least one worker".to_string())
        } else if options.stack_size < limits::MIN_STACK_SIZE {
            Some(format!(
                "worker stacks of {} bytes are below {} bytes",
                options.stack_size,
                limits::MIN_STACK_SIZE
            ))
        } else if options.steal_queue_capacity == 0 {
            Some("steal queues need room for at least one element".to_string())
        } else if options.chunk_size == 0 || chunk_bytes + limits::STEAL_REPLY_RESERVE > limits::MAX_MESSAGE_SIZE {
            Some(format!(
                "a steal chunk of {} tasks does not fit in one message",
                options.chunk_size
            ))
        } else if options.steal_attempts == 0 {
            Some("steal attempts must be positive".to_string())
        } else {
            None
        };
        match message {
            Some(message) => Err(Fail::new(libc::EINVAL, &message)),
            None => Ok(()),
        }
    }

    //======================================================================================================================
    // Static Functions
    //======================================================================================================================

    /// Reads an integer option: the environment first, then `section`, then `default`.
    fn get_int_option_or<T>(&self, section: &str, index: &str, default: T) -> Result<T, Fail>
    where
        T: TryFrom<i64> + FromStr,
    {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(value);
        }
        match self.get_present_option(section, index)? {
            Some(section) => Self::get_int_option(section, index),
            None => Ok(default),
        }
    }

    /// Returns `section` if it holds `index`, or `None` when the option is absent.
    fn get_present_option(&self, section: &str, index: &str) -> Result<Option<&Yaml>, Fail> {
        if self.0.index(section).is_badvalue() {
            return Ok(None);
        }
        let section: &Yaml = Self::get_subsection(&self.0, section)?;
        if section.index(index).is_badvalue() {
            return Ok(None);
        }
        Ok(Some(section))
    }

    /// Similar to `get_typed_option` using `Yaml::as_hash` receiver. This method returns a `&Yaml` instead of
    /// yaml::Hash, and Yaml is more natural for indexing.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it exists and that the receiver returns Some(_).
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = Self::get_option(yaml, index)?;
        match receiver(option) {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Similar to `get_typed_option` using `Yaml::as_i64` as the receiver, but additionally verifies that the
    /// destination type may hold the i64 value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = Self::get_typed_option(yaml, index, &Yaml::as_i64)?;
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    /// Same as `Self::get_typed_option` using `Yaml::as_bool` as the receiver.
    fn get_bool_option(yaml: &Yaml, index: &str) -> Result<bool, Fail> {
        Self::get_typed_option(yaml, index, &Yaml::as_bool)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FromStr for Config {
    type Err = Fail;

    fn from_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let message: String = format!("malformed configuration ({})", e);
                return Err(Fail::new(libc::EINVAL, &message));
            },
        };
        match &config[..] {
            [] => Ok(Self::default()),
            [c] => Ok(Self(c.clone())),
            _ => Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        }
    }
}

/// Configuration with every option at its default.
impl Default for Config {
    fn default() -> Self {
        Self(Yaml::Hash(Hash::new()))
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::{
        runtime::{
            limits,
            RuntimeOptions,
        },
        taskmesh::config::Config,
    };
    use ::anyhow::Result;

    #[test]
    fn sections_override_defaults() -> Result<()> {
        let config: Config = "
taskmesh:
  num_cores: 3
scheduler:
  max_workers: 5
tasks:
  chunk_size: 16
  work_stealing: false
aggregator:
  flush_ticks: 4
"
        .parse()?;
        let options: RuntimeOptions = config.runtime_options()?;
        crate::ensure_eq!(options.num_cores, 3);
        crate::ensure_eq!(options.max_workers, 5);
        crate::ensure_eq!(options.chunk_size, 16);
        crate::ensure_eq!(options.work_stealing, false);
        crate::ensure_eq!(options.flush_ticks, 4);
        crate::ensure_eq!(options.stack_size, limits::DEFAULT_STACK_SIZE);
        crate::ensure_eq!(options.probe_interval, limits::DEFAULT_PROBE_INTERVAL);
        Ok(())
    }

    #[test]
    fn empty_configuration_uses_defaults() -> Result<()> {
        let options: RuntimeOptions = Config::default().runtime_options()?;
        crate::ensure_eq!(options.steal_queue_capacity, limits::DEFAULT_STEAL_QUEUE_CAPACITY);
        crate::ensure_eq!(options.work_stealing, true);
        let parsed: Config = "".parse()?;
        crate::ensure_eq!(parsed.flush_threshold()?, limits::DEFAULT_FLUSH_THRESHOLD);
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() -> Result<()> {
        for yaml in [
            "taskmesh:\n  num_cores: 0\n",
            "taskmesh:\n  num_cores: 2000000\n",
            "scheduler:\n  max_workers: 0\n",
            "scheduler:\n  stack_size: 1024\n",
            "tasks:\n  chunk_size: 100000\n",
            "tasks:\n  steal_attempts: 0\n",
            "tasks:\n  steal_queue_capacity: -1\n",
            "tasks: 7\n",
            "tasks:\n  work_stealing: maybe\n",
        ] {
            let config: Config = yaml.parse()?;
            crate::ensure_eq!(config.runtime_options().is_err(), true);
        }
        Ok(())
    }

    #[test]
    fn malformed_yaml_is_rejected() -> Result<()> {
        crate::ensure_eq!("taskmesh: [".parse::<Config>().is_err(), true);
        crate::ensure_eq!(Config::new("/nonexistent/taskmesh.yaml").is_err(), true);
        Ok(())
    }
}
