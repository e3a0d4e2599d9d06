//! Configuration module for Server Warden.
//!
//! This module handles parsing, validation, and access to configuration
//! settings for the supervised server. It supports loading configurations
//! from JSON or YAML files, environment overrides, and validation of the
//! user-supplied strings (memory sizes, names, console commands) that end up
//! on a command line or in a path.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use server_warden::config::Config;
//!
//! let mut config = Config::from_file("warden.json").unwrap();
//! config.apply_env_overrides();
//! println!("Server lives in {}", config.server_dir.display());
//! ```
//!
//! Creating a configuration programmatically:
//!
//! ```
//! use server_warden::config::{Config, LaunchConfig, validate_config};
//! use std::collections::HashMap;
//!
//! let config = Config {
//!     server_dir: "/srv/game".into(),
//!     launch: LaunchConfig {
//!         command: "java".to_string(),
//!         args: vec!["-Xmx{memory}".to_string(), "-jar".to_string(), "{binary}".to_string()],
//!         env: HashMap::new(),
//!     },
//!     ..Config::default()
//! };
//! validate_config(&config).unwrap();
//! ```
mod parser;
pub mod validator;

pub use parser::{Config, LaunchConfig};
pub use validator::{validate_command, validate_config, validate_memory, validate_name};
