use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::simulation::error::SimError;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommandLineArgs {
    #[arg(long, short)]
    pub config_path: String,
    #[arg(long, short)]
    pub num_parts: Option<u32>,
}

/// Configuration assembled from independent modules. Each module is stored under its own key and
/// tagged with its type, so that a yaml file only has to list the modules it wants to change.
#[derive(Serialize, Deserialize, Default)]
pub struct Config {
    modules: RefCell<HashMap<String, Box<dyn ConfigModule>>>,
}

impl Config {
    pub fn from_file(args: &CommandLineArgs) -> Result<Self, SimError> {
        let file = File::open(&args.config_path).map_err(|e| {
            SimError::Config(format!(
                "Failed to open config file at {}. Original error was {e}",
                args.config_path
            ))
        })?;
        let mut config: Config = serde_yaml::from_reader(BufReader::new(file)).map_err(|e| {
            SimError::Config(format!(
                "Failed to parse config at {}. Original error was: {e}",
                args.config_path
            ))
        })?;

        // replace the partitioning if we get it from the outside. This is interesting for testing
        if let Some(num_parts) = args.num_parts {
            config.set_partitioning(Partitioning {
                num_parts,
                method: config.partitioning().method,
            });
            let output = config.output();
            config.set_output(Output {
                output_dir: format!("{}-{num_parts}", output.output_dir),
                ..output
            });
        }
        Ok(config)
    }

    pub fn partitioning(&self) -> Partitioning {
        self.module_or_default("partitioning")
    }

    pub fn set_partitioning(&mut self, partitioning: Partitioning) {
        self.set_module("partitioning", partitioning);
    }

    pub fn output(&self) -> Output {
        self.module_or_default("output")
    }

    pub fn set_output(&mut self, output: Output) {
        self.set_module("output", output);
    }

    pub fn simulation(&self) -> Simulation {
        self.module_or_default("simulation")
    }

    pub fn set_simulation(&mut self, simulation: Simulation) {
        self.set_module("simulation", simulation);
    }

    pub fn world(&self) -> Option<WorldFile> {
        self.module::<WorldFile>("world")
    }

    pub fn set_world(&mut self, world: WorldFile) {
        self.set_module("world", world);
    }

    fn set_module<T: ConfigModule + 'static>(&mut self, key: &str, module: T) {
        self.modules
            .get_mut()
            .insert(key.to_string(), Box::new(module));
    }

    fn module_or_default<T: ConfigModule + Clone + Default + 'static>(&self, key: &str) -> T {
        if let Some(module) = self.module::<T>(key) {
            module
        } else {
            let default = T::default();
            self.modules
                .borrow_mut()
                .insert(key.to_string(), Box::new(default.clone()));
            default
        }
    }

    fn module<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.modules.borrow().get(key).map(|boxed| {
            boxed
                .as_ref()
                .as_any()
                .downcast_ref::<T>()
                .unwrap_or_else(|| panic!("Config module '{key}' has an unexpected type"))
                .clone()
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Partitioning {
    pub num_parts: u32,
    #[serde(default)]
    pub method: PartitionMethod,
}

impl Default for Partitioning {
    fn default() -> Self {
        Partitioning {
            num_parts: 1,
            method: PartitionMethod::None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Output {
    pub output_dir: String,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub write_events: WriteEvents,
    /// Write the state of every link and agent of a partition after the run.
    #[serde(default)]
    pub dump_state: bool,
}

impl Default for Output {
    fn default() -> Self {
        Output {
            output_dir: "./".to_string(),
            logging: Logging::default(),
            write_events: WriteEvents::None,
            dump_state: false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Simulation {
    pub start_time: u32,
    pub end_time: u32,
    /// Seconds added to every link traversal.
    #[serde(default)]
    pub link_advance_delay: u32,
    /// Minimum wall clock duration of one simulated second. 0 runs as fast as possible.
    #[serde(default)]
    pub tick_duration_ms: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            start_time: 0,
            end_time: 86400,
            link_advance_delay: 0,
            tick_duration_ms: 0,
        }
    }
}

/// Path of the world snapshot. Relative paths are resolved against the config file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WorldFile {
    pub path: String,
}

#[typetag::serde(tag = "type")]
pub trait ConfigModule {
    fn as_any(&self) -> &dyn Any;
}

#[typetag::serde]
impl ConfigModule for Partitioning {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[typetag::serde]
impl ConfigModule for Output {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[typetag::serde]
impl ConfigModule for Simulation {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[typetag::serde]
impl ConfigModule for WorldFile {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(PartialEq, Debug, ValueEnum, Clone, Copy, Serialize, Deserialize, Default)]
pub enum PartitionMethod {
    /// Everything goes into partition 0.
    #[default]
    None,
    /// Link `i` goes into partition `i % num_parts`.
    Modulo,
    /// Keep the partitions stored with the links of the world.
    Precomputed,
}

/// Have this extra layer of log level enum, as tracing subscriber has no
/// off/none option by default. At least it can't be parsed
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
pub enum Logging {
    #[default]
    None,
    Info,
    Debug,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
pub enum WriteEvents {
    #[default]
    None,
    /// One text line per event.
    Text,
    /// One gzip compressed text line per event.
    Gzip,
}
