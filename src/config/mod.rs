//! Configuration Management Module
//!
//! Agent executables, server supervision timings and installer locations,
//! loaded from an optional JSON file on top of built-in defaults.

pub mod storage;
pub mod types;

pub use storage::{config_dir, config_file, load_config, ConfigError};
pub use types::{
    AgentConfig, FallbackAgentConfig, InstallerConfig, PrimaryAgentConfig, RunnerConfig,
    ServerConfig, DEFAULT_REPOSITORY_LABEL, MAX_START_TIMEOUT,
};
