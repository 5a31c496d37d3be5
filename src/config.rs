//! Engine configuration
//!
//! Consumed by the engine's constructors; the wire protocols themselves are
//! not configurable. Loaded from a TOML file, with every field optional and
//! defaulted, and overridable from the command line by the binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SliceLinkError};
use crate::volume::VolumeDims;

fn default_scanner_addr() -> String {
    "0.0.0.0:5555".to_string()
}

fn default_results_addr() -> String {
    "0.0.0.0:5556".to_string()
}

fn default_io_timeout_secs() -> u64 {
    5
}

fn default_analysis_warn_secs() -> u64 {
    1
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scanner-facing bind address
    #[serde(default = "default_scanner_addr")]
    pub scanner_addr: String,
    /// Results-endpoint bind address
    #[serde(default = "default_results_addr")]
    pub results_addr: String,
    /// Bound on every socket read/write once a message has started
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    /// Dispatches slower than this are logged as lag; aligns with the
    /// scan's repetition time
    #[serde(default = "default_analysis_warn_secs")]
    pub analysis_warn_secs: u64,
    /// When set, a handshake declaring different slice geometry is rejected
    #[serde(default)]
    pub expected_dims: Option<VolumeDims>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scanner_addr: default_scanner_addr(),
            results_addr: default_results_addr(),
            io_timeout_secs: default_io_timeout_secs(),
            analysis_warn_secs: default_analysis_warn_secs(),
            expected_dims: None,
        }
    }
}

impl Config {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            SliceLinkError::Config(format!("cannot read {}: {}", path.display(), err))
        })?;
        toml::from_str(&text)
            .map_err(|err| SliceLinkError::Config(format!("{}: {}", path.display(), err)))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn analysis_warn(&self) -> Duration {
        Duration::from_secs(self.analysis_warn_secs)
    }
}
