//! Runtime configuration for reaching GRASS and the bundled solver

use std::path::Path;

use serde::Deserialize;

use crate::core::error::{Error, Result};

/// Environment variable overriding [`GisConfig::launcher`]
pub const LAUNCHER_ENV: &str = "LCP_TOOLBOX_LAUNCHER";

/// Environment variable overriding [`GisConfig::circuitscape`]
pub const CIRCUITSCAPE_ENV: &str = "LCP_TOOLBOX_CIRCUITSCAPE";

/// How external modules are invoked
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GisConfig {
    /// Argument prefix placed before every module invocation, for example
    /// `["grass", "/data/grassdata/loc/PERMANENT", "--exec"]`. Empty when
    /// running inside a GRASS session where modules are on `PATH`.
    pub launcher: Vec<String>,

    /// Circuitscape batch executable
    pub circuitscape: String,

    /// Default number of concurrent lanes
    pub lanes: usize,

    /// Memory for `r.cost` segments, in MB
    pub memory_mb: u32,
}

impl Default for GisConfig {
    fn default() -> Self {
        Self {
            launcher: Vec::new(),
            circuitscape: "cs_run.exe".to_string(),
            lanes: 2,
            memory_mb: 300,
        }
    }
}

impl GisConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::InvalidInput(format!("config: {e}")))
    }

    /// Apply `LCP_TOOLBOX_*` environment overrides
    pub fn with_env(self) -> Self {
        self.with_overrides(
            std::env::var(LAUNCHER_ENV).ok(),
            std::env::var(CIRCUITSCAPE_ENV).ok(),
        )
    }

    fn with_overrides(mut self, launcher: Option<String>, circuitscape: Option<String>) -> Self {
        if let Some(launcher) = launcher {
            self.launcher = launcher.split_whitespace().map(str::to_string).collect();
        }
        if let Some(path) = circuitscape.filter(|p| !p.trim().is_empty()) {
            self.circuitscape = path.trim().to_string();
        }
        self
    }
}

/// Clamp a requested lane count to what the machine can usefully run
pub fn effective_lanes(requested: usize) -> usize {
    let cpu_count = num_cpus::get();
    requested.clamp(1, (cpu_count * 2).max(1))
}
