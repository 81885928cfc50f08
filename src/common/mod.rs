//! Common utilities shared across the dispatch engine

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, DispatchConfig, HotCodeReplaceConfig};
pub use error::{Error, Result};
