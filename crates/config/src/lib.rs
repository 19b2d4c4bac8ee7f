//! Configuration module for stream-warden
//!
//! Handles loading configuration from TOML files, environment variable overrides
//! and validation of the values the supervisor depends on.

pub mod config;

pub use config::*;
