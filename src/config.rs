// src/config.rs
//
// =============================================================================
// SAXSFLOW: ENGINE CONFIGURATION (v 0.1 )
// =============================================================================
//
// Tunables for the managers and the run loop. Loaded from YAML, then
// overridden from the environment:
//   SAXSFLOW_WF_THREADS          -> n_wf_threads
//   SAXSFLOW_LAYER_PARALLELISM   -> layer_parallelism

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_WF_THREADS: &str = "SAXSFLOW_WF_THREADS";
pub const ENV_LAYER_PARALLELISM: &str = "SAXSFLOW_LAYER_PARALLELISM";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Worker slots of the WfManager.
    pub n_wf_threads: usize,
    /// Max operations running at once inside one layer.
    pub layer_parallelism: usize,
    /// Lines kept in each workflow's message log.
    pub log_capacity: usize,
    pub realtime_delay_ms: u64,
    pub realtime_max_idle_polls: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            n_wf_threads: cpus,
            layer_parallelism: cpus,
            log_capacity: 200,
            realtime_delay_ms: 1000,
            realtime_max_idle_polls: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(text)
            .context("Invalid engine config (allowed keys: n_wf_threads, layer_parallelism, log_capacity, realtime_delay_ms, realtime_max_idle_polls)")?;
        Ok(cfg.sanitized())
    }

    /// Reads `path` and applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml_str(&text)?.with_env_overrides()
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup(ENV_WF_THREADS) {
            self.n_wf_threads = v
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer, got '{}'", ENV_WF_THREADS, v))?;
        }
        if let Some(v) = lookup(ENV_LAYER_PARALLELISM) {
            self.layer_parallelism = v.trim().parse().with_context(|| {
                format!("{} must be a positive integer, got '{}'", ENV_LAYER_PARALLELISM, v)
            })?;
        }
        Ok(self.sanitized())
    }

    fn sanitized(mut self) -> Self {
        self.n_wf_threads = self.n_wf_threads.max(1);
        self.layer_parallelism = self.layer_parallelism.max(1);
        self.log_capacity = self.log_capacity.max(1);
        self
    }

    pub fn realtime_delay(&self) -> Duration {
        Duration::from_millis(self.realtime_delay_ms)
    }
}
