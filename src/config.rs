//! Configuration module for persistent settings.
//!
//! This module handles loading, saving, and validating the staircase and
//! session configuration.

use crate::asymmetry::DEFAULT_ASYMMETRY_MARGIN_DB;
use crate::error::ConfigError;
use crate::model::Ear;
use crate::threshold::ThresholdRule;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Parameters of a single staircase run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StaircaseConfig {
    /// Level of the first stimulus
    pub start_level_db: f64,
    /// Lower clamp bound for the presentation level
    pub min_level_db: f64,
    /// Upper clamp bound for the presentation level
    pub max_level_db: f64,
    /// Step used until the first reversal
    pub large_step_db: f64,
    /// Step used from the first reversal on
    pub small_step_db: f64,
    pub max_trials: u32,
    /// Converge once this many reversals are recorded (None: trial cap only)
    pub reversals_target: Option<u32>,
    /// Consecutive misses at one level before the miss is taken as genuine
    pub max_retries: u32,
    pub catch_trial_probability: f64,
    /// Consecutive "heard" answers needed before stepping down (1 disables)
    pub consecutive_heard_required: u32,
    pub immediate_converge_on_heard: bool,
    pub wait_for_playback_completion: bool,
    /// Response window; None means wait indefinitely
    pub response_timeout_ms: Option<u64>,
    pub tone_duration_ms: u64,
    pub threshold_rule: ThresholdRule,
}

impl Default for StaircaseConfig {
    fn default() -> Self {
        Self {
            start_level_db: -10.0,
            min_level_db: -60.0,
            max_level_db: 0.0,
            large_step_db: 20.0,
            small_step_db: 10.0,
            max_trials: 10,
            reversals_target: None,
            max_retries: 2,
            catch_trial_probability: 0.03,
            consecutive_heard_required: 1,
            immediate_converge_on_heard: false,
            wait_for_playback_completion: true,
            response_timeout_ms: None,
            tone_duration_ms: 300,
            threshold_rule: ThresholdRule::ReversalMean,
        }
    }
}

impl StaircaseConfig {
    /// Quick screening: the first heard tone ends the run, and a level is
    /// presented three times before a miss counts.
    pub fn screening() -> Self {
        Self {
            max_retries: 3,
            immediate_converge_on_heard: true,
            ..Self::default()
        }
    }

    /// Full up-down staircase that runs to four reversals.
    pub fn adaptive() -> Self {
        Self {
            max_trials: 20,
            reversals_target: Some(4),
            ..Self::default()
        }
    }

    /// Validate configuration values.
    /// Returns Ok(()) if valid, Err with descriptive message if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let levels = [
            ("start_level_db", self.start_level_db),
            ("min_level_db", self.min_level_db),
            ("max_level_db", self.max_level_db),
        ];
        for (name, value) in levels {
            if !value.is_finite() {
                return Err(invalid(format!("{} ({}) must be finite", name, value)));
            }
        }

        if self.min_level_db >= self.max_level_db {
            return Err(invalid(format!(
                "min_level_db ({}) must be below max_level_db ({})",
                self.min_level_db, self.max_level_db
            )));
        }

        if self.start_level_db < self.min_level_db || self.start_level_db > self.max_level_db {
            return Err(invalid(format!(
                "start_level_db ({}) is outside [{}, {}]",
                self.start_level_db, self.min_level_db, self.max_level_db
            )));
        }

        for (name, step) in [
            ("large_step_db", self.large_step_db),
            ("small_step_db", self.small_step_db),
        ] {
            if !step.is_finite() || step <= 0.0 {
                return Err(invalid(format!("{} ({}) must be positive", name, step)));
            }
        }

        if self.small_step_db > self.large_step_db {
            return Err(invalid(format!(
                "small_step_db ({}) cannot be greater than large_step_db ({})",
                self.small_step_db, self.large_step_db
            )));
        }

        if self.max_trials == 0 {
            return Err(invalid("max_trials must be at least 1".to_string()));
        }

        if self.reversals_target == Some(0) {
            return Err(invalid(
                "reversals_target must be at least 1 when set".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.catch_trial_probability) {
            return Err(invalid(format!(
                "catch_trial_probability ({}) must be in [0, 1)",
                self.catch_trial_probability
            )));
        }

        if self.consecutive_heard_required == 0 {
            return Err(invalid(
                "consecutive_heard_required must be at least 1".to_string(),
            ));
        }

        if self.response_timeout_ms == Some(0) {
            return Err(invalid(
                "response_timeout_ms must be positive when set".to_string(),
            ));
        }

        if self.tone_duration_ms == 0 {
            return Err(invalid("tone_duration_ms must be positive".to_string()));
        }

        Ok(())
    }
}

/// Parameters of a full test session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub frequencies_hz: Vec<u32>,
    pub ears: Vec<Ear>,
    /// Shuffle the pair list once at session start
    pub shuffle: bool,
    /// Left/right difference at or above which asymmetry is flagged
    pub asymmetry_margin_db: f64,
    pub staircase: StaircaseConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frequencies_hz: vec![4000, 2000, 1000, 500, 250],
            ears: Ear::BOTH.to_vec(),
            shuffle: false,
            asymmetry_margin_db: DEFAULT_ASYMMETRY_MARGIN_DB,
            staircase: StaircaseConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Validate configuration values.
    /// Returns Ok(()) if valid, Err with descriptive message if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frequencies_hz.is_empty() {
            return Err(invalid("frequencies_hz cannot be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for &freq in &self.frequencies_hz {
            if freq == 0 {
                return Err(invalid("frequencies_hz must be positive".to_string()));
            }
            if !seen.insert(freq) {
                return Err(invalid(format!(
                    "frequency {}Hz is listed more than once",
                    freq
                )));
            }
        }

        if self.ears.is_empty() {
            return Err(invalid("ears cannot be empty".to_string()));
        }
        if self.ears.len() != self.ears.iter().collect::<HashSet<_>>().len() {
            return Err(invalid("ears cannot contain duplicates".to_string()));
        }

        if !self.asymmetry_margin_db.is_finite() || self.asymmetry_margin_db < 0.0 {
            return Err(invalid(format!(
                "asymmetry_margin_db ({}) must be a non-negative number",
                self.asymmetry_margin_db
            )));
        }

        self.staircase.validate()
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::ValidationError(msg)
}

/// Engine configuration as persisted on disk.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub session: SessionConfig,
    /// Seed for catch-trial draws and shuffling (None: seeded from the OS)
    pub seed: Option<u64>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()
    }
}

/// Configuration manager with file I/O.
pub struct ConfigManager {
    config: RwLock<EngineConfig>,
    path: PathBuf,
}

impl ConfigManager {
    /// Load configuration from file or use defaults.
    /// If the file doesn't exist, returns a manager with default config.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| {
                ConfigError::ParseError(format!("Failed to read config file: {}", e))
            })?;

            let config: EngineConfig = serde_json::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(format!("Invalid JSON: {}", e)))?;

            // Validate loaded config
            config.validate()?;
            config
        } else {
            EngineConfig::default()
        };

        Ok(Self {
            config: RwLock::new(config),
            path: path.to_path_buf(),
        })
    }

    /// Load configuration from a file that must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        Self::load_or_default(path)
    }

    /// Save configuration to file using atomic write.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config = self.config.read().map_err(|_| {
            ConfigError::ValidationError("Failed to acquire read lock".to_string())
        })?;

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Atomic write: write to temp file, then rename
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&*config)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {}", e)))?;

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Get current configuration.
    pub fn get(&self) -> EngineConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|_| EngineConfig::default())
    }

    /// Update configuration with validation.
    pub fn update(&self, config: EngineConfig) -> Result<(), ConfigError> {
        // Validate before updating
        config.validate()?;

        let mut current = self.config.write().map_err(|_| {
            ConfigError::ValidationError("Failed to acquire write lock".to_string())
        })?;

        *current = config;

        // Release lock before saving
        drop(current);

        // Persist to file
        self.save()
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the default config path (<config dir>/hearing-threshold/config.json).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("hearing-threshold")
            .join("config.json")
    }
}
