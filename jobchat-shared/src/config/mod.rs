//! # Configuration
//!
//! Client-side configuration for the sync engine and the command-line client.

pub mod client;

pub use client::{
    Config, ConfigError, ConnectionConfig, LogFormat, LoggingConfig, ServerConfig, ViewportConfig,
};
