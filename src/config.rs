//! Configuration management for perfcore
//!
//! TOML-based configuration with defaults and validation.
//! Location: ~/.perfcore/config.toml

use crate::errors::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete configuration for the performance core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

/// Cache sizing and compression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_memory_bytes: usize,
    pub compression_enabled: bool,
    /// Payloads smaller than this are stored uncompressed
    pub compression_threshold: usize,
    pub default_ttl_ms: u64,
    pub sweep_interval_ms: u64,
}

/// Memory manager thresholds and pools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Fraction of `max_heap_bytes` that raises a warning
    pub warning_threshold: f64,
    /// Fraction of `max_heap_bytes` that forces an optimization pass
    pub critical_threshold: f64,
    pub max_heap_bytes: u64,
    pub gc_interval_ms: u64,
    pub check_interval_ms: u64,
    pub default_pool_size: usize,
    pub stale_object_age_ms: u64,
}

/// Background processor sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub max_workers: usize,
    pub default_timeout_ms: u64,
    /// Completed and failed tasks kept for statistics
    pub history_limit: usize,
}

/// Performance monitor thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub cpu_threshold_pct: f64,
    pub memory_threshold_bytes: u64,
    pub response_time_threshold_ms: f64,
    pub render_time_threshold_ms: f64,
    pub event_loop_lag_threshold_ms: f64,
    pub sample_interval_ms: u64,
    pub history_size: usize,
    pub recent_operations: usize,
    pub recent_renders: usize,
}

/// Optimization cycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub interval_ms: u64,
    pub history_size: usize,
    pub auto_apply_suggestions: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_memory_bytes: 50 * 1024 * 1024,
            compression_enabled: true,
            compression_threshold: 1024,
            default_ttl_ms: 60 * 60 * 1000,
            sweep_interval_ms: 60 * 1000,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 0.8,
            critical_threshold: 0.9,
            max_heap_bytes: 512 * 1024 * 1024,
            gc_interval_ms: 30_000,
            check_interval_ms: 5_000,
            default_pool_size: 50,
            stale_object_age_ms: 5 * 60 * 1000,
        }
    }
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            max_workers: (num_cpus::get() / 2).max(1),
            default_timeout_ms: 300_000,
            history_limit: 1000,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cpu_threshold_pct: 80.0,
            memory_threshold_bytes: 512 * 1024 * 1024,
            response_time_threshold_ms: 3000.0,
            render_time_threshold_ms: 100.0,
            event_loop_lag_threshold_ms: 100.0,
            sample_interval_ms: 5_000,
            history_size: 100,
            recent_operations: 50,
            recent_renders: 30,
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 300_000,
            history_size: 50,
            auto_apply_suggestions: false,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

impl MemoryConfig {
    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

impl BackgroundConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            Self::load_from_file(&config_path)
        } else {
            Self::load_default()
        }
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| CoreError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load default configuration from standard location or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(config_path) = Self::default_path() {
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(Config::default())
    }

    /// Standard configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".perfcore").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(CoreError::Config(
                "cache.max_entries must be greater than 0".to_string(),
            ));
        }

        if self.cache.max_memory_bytes == 0 {
            return Err(CoreError::Config(
                "cache.max_memory_bytes must be greater than 0".to_string(),
            ));
        }

        let m = &self.memory;
        if !(m.warning_threshold > 0.0
            && m.warning_threshold < m.critical_threshold
            && m.critical_threshold <= 1.0)
        {
            return Err(CoreError::Config(format!(
                "memory thresholds must satisfy 0 < warning ({}) < critical ({}) <= 1",
                m.warning_threshold, m.critical_threshold
            )));
        }

        if m.max_heap_bytes == 0 {
            return Err(CoreError::Config(
                "memory.max_heap_bytes must be greater than 0".to_string(),
            ));
        }

        if m.check_interval_ms == 0 || self.monitor.sample_interval_ms == 0 {
            return Err(CoreError::Config(
                "sampling intervals must be greater than 0".to_string(),
            ));
        }

        if self.background.max_workers == 0 {
            return Err(CoreError::Config(
                "background.max_workers must be at least 1".to_string(),
            ));
        }

        if self.background.default_timeout_ms == 0 {
            return Err(CoreError::Config(
                "background.default_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.monitor.cpu_threshold_pct <= 0.0 || self.monitor.cpu_threshold_pct > 100.0 {
            return Err(CoreError::Config(format!(
                "monitor.cpu_threshold_pct must be in (0, 100], got {}",
                self.monitor.cpu_threshold_pct
            )));
        }

        if self.optimizer.interval_ms == 0 {
            return Err(CoreError::Config(
                "optimizer.interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render as pretty TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path, contents)
            .map_err(|e| CoreError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }
}
