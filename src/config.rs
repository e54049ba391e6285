//! Host database configuration.
//!
//! Configurable parameters for scanning cadence, persistence, and host
//! selection. Default values match the behavior of a long-running client:
//! aggressive probing of hosts we know little about, relaxed probing of
//! established ones.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration for the host database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDbConfig {
    // === Scanning ===

    /// Number of concurrent probe workers
    pub scan_workers: usize,

    /// Deadline for a single probe (seconds)
    pub probe_timeout_secs: u64,

    /// How long after startup the initial-scan latch flips regardless of
    /// probe progress (seconds)
    pub initial_scan_timeout_secs: u64,

    /// Re-probe interval for new, changed, or failing hosts (seconds)
    pub active_scan_interval_secs: u64,

    /// Re-probe interval for established hosts (seconds)
    pub established_scan_interval_secs: u64,

    /// Successful probes after which a host counts as established
    pub established_scan_count: usize,

    /// How often the producer sweeps the host set for due probes (seconds)
    pub scan_sweep_interval_secs: u64,

    /// Probe outcomes retained per host
    pub max_scan_history: usize,

    // === Persistence ===

    /// Interval between background snapshot flushes (seconds)
    pub flush_interval_secs: u64,

    // === Selection ===

    /// Country codes users may restrict profiles to. Empty accepts any
    /// well-formed two-letter code.
    pub allowed_locations: Vec<String>,
}

impl Default for HostDbConfig {
    fn default() -> Self {
        Self {
            // Scanning
            scan_workers: 20,
            probe_timeout_secs: 5,
            initial_scan_timeout_secs: 1_800, // 30 minutes
            active_scan_interval_secs: 300,   // 5 minutes
            established_scan_interval_secs: 3_600, // 1 hour
            established_scan_count: 5,
            scan_sweep_interval_secs: 60,
            max_scan_history: 20,

            // Persistence
            flush_interval_secs: 120, // 2 minutes

            // Selection
            allowed_locations: vec![],
        }
    }
}

impl HostDbConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| Error::Persistence(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::Persistence(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for overrides

    pub fn with_scan_workers(mut self, workers: usize) -> Self {
        self.scan_workers = workers;
        self
    }

    pub fn with_probe_timeout(mut self, secs: u64) -> Self {
        self.probe_timeout_secs = secs;
        self
    }

    pub fn with_allowed_locations(mut self, locations: Vec<String>) -> Self {
        self.allowed_locations = locations;
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn initial_scan_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_scan_timeout_secs)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.scan_workers == 0 {
            return Err(Error::invalid("scan_workers must be at least 1"));
        }
        if self.max_scan_history < 2 {
            return Err(Error::invalid(
                "max_scan_history must be at least 2 to track host liveness",
            ));
        }
        if self.active_scan_interval_secs > self.established_scan_interval_secs {
            return Err(Error::invalid(format!(
                "active_scan_interval_secs ({}) must not exceed established_scan_interval_secs ({})",
                self.active_scan_interval_secs, self.established_scan_interval_secs
            )));
        }
        if self.probe_timeout_secs == 0 {
            return Err(Error::invalid("probe_timeout_secs must be at least 1"));
        }
        for location in &self.allowed_locations {
            let well_formed =
                location.len() == 2 && location.chars().all(|c| c.is_ascii_lowercase());
            if !well_formed {
                return Err(Error::invalid(format!(
                    "allowed location {location} is not a two-letter country code"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HostDbConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan_workers, 20);
        assert_eq!(config.probe_timeout_secs, 5);
        assert_eq!(config.initial_scan_timeout_secs, 1_800);
    }

    #[test]
    fn test_validation_rejects_inverted_intervals() {
        let mut config = HostDbConfig::default();
        config.active_scan_interval_secs = 7_200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_locations() {
        let config =
            HostDbConfig::default().with_allowed_locations(vec!["germany".to_string()]);
        assert!(config.validate().is_err());

        let config = HostDbConfig::default()
            .with_allowed_locations(vec!["de".to_string(), "us".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostdb.toml");

        let config = HostDbConfig::default().with_scan_workers(4);
        config.save(&path).unwrap();

        let loaded = HostDbConfig::load(&path).unwrap();
        assert_eq!(loaded.scan_workers, 4);
        assert_eq!(loaded.flush_interval_secs, config.flush_interval_secs);
    }
}
