// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
};
use ::std::{
    fs::File,
    io::Read,
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

/// Prefix of the environment variables that override the configuration file.
const ENV_PREFIX: &str = "HYPERION_";

// Scheduler options.
mod scheduler_config {
    pub const SECTION_NAME: &str = "scheduler";
    // Number of cores, each driven by its own executor.
    pub const CORES: &str = "cores";
    // Size of each task stack in bytes.
    pub const STACK_SIZE: &str = "stack_size";
    // Total bytes available to task stacks.
    pub const STACK_BUDGET: &str = "stack_budget";
    // Maximum number of live tasks.
    pub const MAX_TASKS: &str = "max_tasks";
}

// Inter-process communication options.
mod ipc_config {
    pub const SECTION_NAME: &str = "ipc";
    pub const PIPE_CAPACITY: &str = "pipe_capacity";
}

// Logging options.
mod logging_config {
    pub const SECTION_NAME: &str = "logging";
    pub const LEVEL: &str = "level";
    pub const DEFAULT_LEVEL: &str = "info";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Hyperion configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Common associated functions for Hyperion configuration object.
impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        Self::parse(&config_s)
    }

    /// Parses a YAML document into a [Config] object.
    pub fn parse(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration ({})", e);
                error!("parse(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        match &config[..] {
            [] => Ok(Self::default()),
            [c] => Ok(Self(c.clone())),
            _ => Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        }
    }

    /// Scheduler config: number of cores.
    pub fn cores(&self) -> Result<usize, Fail> {
        let cores: usize = self.get_usize(
            scheduler_config::SECTION_NAME,
            scheduler_config::CORES,
            limits::DEFAULT_CORES,
        )?;
        if cores == 0 || cores > limits::MAX_CORES {
            let cause: String = format!("invalid number of cores (cores={:?})", cores);
            error!("cores(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(cores)
    }

    /// Scheduler config: size of a task stack in bytes.
    pub fn stack_size(&self) -> Result<usize, Fail> {
        self.get_nonzero_usize(
            scheduler_config::SECTION_NAME,
            scheduler_config::STACK_SIZE,
            limits::DEFAULT_STACK_SIZE,
        )
    }

    /// Scheduler config: total bytes the stack allocator may hand out.
    pub fn stack_budget(&self) -> Result<usize, Fail> {
        self.get_nonzero_usize(
            scheduler_config::SECTION_NAME,
            scheduler_config::STACK_BUDGET,
            limits::DEFAULT_STACK_BUDGET,
        )
    }

    /// Scheduler config: maximum number of live tasks.
    pub fn max_tasks(&self) -> Result<usize, Fail> {
        self.get_nonzero_usize(
            scheduler_config::SECTION_NAME,
            scheduler_config::MAX_TASKS,
            limits::DEFAULT_MAX_TASKS,
        )
    }

    /// IPC config: capacity of a byte pipe.
    pub fn pipe_capacity(&self) -> Result<usize, Fail> {
        self.get_nonzero_usize(
            ipc_config::SECTION_NAME,
            ipc_config::PIPE_CAPACITY,
            limits::DEFAULT_PIPE_CAPACITY,
        )
    }

    /// Logging config: default log specification, used when `RUST_LOG` is not set.
    pub fn log_level(&self) -> Result<String, Fail> {
        if let Some(level) = Self::get_typed_env_option::<String>(logging_config::LEVEL)? {
            return Ok(level);
        }
        match Self::get_option(&self.0, logging_config::SECTION_NAME, logging_config::LEVEL) {
            None => Ok(logging_config::DEFAULT_LEVEL.to_string()),
            Some(value) => match value.as_str() {
                Some(level) => Ok(level.to_string()),
                None => {
                    let cause: String = format!("parameter \"{}\" has unexpected type", logging_config::LEVEL);
                    Err(Fail::new(libc::EINVAL, &cause))
                },
            },
        }
    }

    /// Reads a positive integer option.
    fn get_nonzero_usize(&self, section: &str, index: &str, default: usize) -> Result<usize, Fail> {
        match self.get_usize(section, index, default)? {
            0 => {
                let cause: String = format!("parameter \"{}\" must be greater than zero", index);
                error!("get_nonzero_usize(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
            value => Ok(value),
        }
    }

    /// Reads an integer option from the environment first, then from the configuration file, then falls back to
    /// `default`.
    fn get_usize(&self, section: &str, index: &str, default: usize) -> Result<usize, Fail> {
        if let Some(value) = Self::get_typed_env_option::<usize>(index)? {
            return Ok(value);
        }
        match Self::get_option(&self.0, section, index) {
            None => Ok(default),
            Some(value) => match value.as_i64().map(usize::try_from) {
                Some(Ok(value)) => Ok(value),
                Some(Err(_)) => {
                    let cause: String = format!("parameter \"{}\" is out of range", index);
                    Err(Fail::new(libc::ERANGE, &cause))
                },
                None => {
                    let cause: String = format!("parameter \"{}\" has unexpected type", index);
                    Err(Fail::new(libc::EINVAL, &cause))
                },
            },
        }
    }

    /// Index `yaml` to find `section.index`. Missing sections and options are not an error.
    fn get_option<'a>(yaml: &'a Yaml, section: &str, index: &str) -> Option<&'a Yaml> {
        match yaml.index(section) {
            Yaml::Hash(_) => match yaml.index(section).index(index) {
                Yaml::BadValue | Yaml::Null => None,
                value => Some(value),
            },
            _ => None,
        }
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        let name: String = format!("{}{}", ENV_PREFIX, index.to_uppercase());
        if let Ok(var) = ::std::env::var(&name) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", name);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for Config {
    fn default() -> Self {
        Self(Yaml::Hash(Hash::new()))
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
