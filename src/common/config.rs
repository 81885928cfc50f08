//! Configuration file handling
//!
//! Process-wide debugger preferences (suspend-on-uncaught-exception, step
//! filters, etc.) are plain data injected into the dispatcher and the hot
//! code replace coordinator at construction time, never global state.

use serde::Deserialize;
use std::path::Path;

use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Event dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Hot code replace settings
    #[serde(default)]
    pub hot_code_replace: HotCodeReplaceConfig,
}

/// Event dispatch settings
#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Suspend the event thread when an uncaught exception is reported
    /// without a matching exception breakpoint
    #[serde(default = "default_suspend_on_uncaught")]
    pub suspend_on_uncaught_exceptions: bool,

    /// Class patterns whose method-entry events are resumed without voting
    /// (e.g. "java.*", "sun.*")
    #[serde(default)]
    pub step_filters: Vec<String>,

    /// Capacity of the per-target event-set channel
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            suspend_on_uncaught_exceptions: default_suspend_on_uncaught(),
            step_filters: Vec::new(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

fn default_suspend_on_uncaught() -> bool {
    true
}
fn default_event_queue_capacity() -> usize {
    256
}

/// Hot code replace settings
#[derive(Debug, Deserialize, Clone)]
pub struct HotCodeReplaceConfig {
    /// Drop obsolete frames and re-enter the redefined method after a
    /// successful replace
    #[serde(default = "default_drop_frames")]
    pub drop_frames: bool,
}

impl Default for HotCodeReplaceConfig {
    fn default() -> Self {
        Self {
            drop_frames: default_drop_frames(),
        }
    }
}

fn default_drop_frames() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&contents).map_err(|e| Error::ConfigParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.dispatch.suspend_on_uncaught_exceptions);
        assert!(config.dispatch.step_filters.is_empty());
        assert!(config.hot_code_replace.drop_frames);
    }

    #[test]
    fn test_parse_partial() {
        let config: Config = toml::from_str(
            r#"
            [dispatch]
            suspend_on_uncaught_exceptions = false
            step_filters = ["java.*", "sun.*"]
            "#,
        )
        .unwrap();
        assert!(!config.dispatch.suspend_on_uncaught_exceptions);
        assert_eq!(config.dispatch.step_filters.len(), 2);
        // Unspecified sections keep their defaults
        assert!(config.hot_code_replace.drop_frames);
        assert_eq!(config.dispatch.event_queue_capacity, 256);
    }
}
