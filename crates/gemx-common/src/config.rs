//! Accelerator configuration.
//!
//! Loads [`AcceleratorConfig`] from a TOML file with environment variable
//! overrides via `GEMX_*` prefixed variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::quant::{BiasStage, QuantizationRule, RoundingMode};

/// Accelerator configuration loaded from TOML with environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Number of independent compute engines (PEs).
    /// Override: `GEMX_ENGINE_COUNT`
    pub engine_count: usize,

    /// Addressable device memory per engine, in bytes.
    /// Override: `GEMX_MEMORY_PER_ENGINE`
    pub memory_per_engine: usize,

    /// Kernel clock frequency in MHz.
    /// Override: `GEMX_CLOCK_MHZ`
    pub clock_mhz: f64,

    /// Device buffer alignment in bytes (power of two).
    /// Override: `GEMX_ALIGNMENT`
    pub alignment: usize,

    /// Multiply-accumulates retired per cycle at full efficiency.
    /// Override: `GEMX_MACS_PER_CYCLE`
    pub macs_per_cycle: u64,

    /// Right-shift rounding.
    /// Override: `GEMX_ROUNDING`
    pub rounding: RoundingMode,

    /// Where the bias joins the accumulator.
    /// Override: `GEMX_BIAS_STAGE`
    pub bias_stage: BiasStage,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            engine_count: 1,
            memory_per_engine: 256 * 1024 * 1024, // 256 MiB
            clock_mhz: 250.0,
            alignment: 64,
            macs_per_cycle: 32 * 32,
            rounding: RoundingMode::Floor,
            bias_stage: BiasStage::BeforeScale,
        }
    }
}

/// Errors that can occur when loading or validating an [`AcceleratorConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl AcceleratorConfig {
    /// Generate a default configuration TOML string.
    pub fn default_toml() -> String {
        let cfg = Self::default();
        toml::to_string_pretty(&cfg).expect("default config should serialize")
    }

    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields, then apply environment variable overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: AcceleratorConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The post-accumulation policy described by this configuration.
    pub fn quantization_rule(&self) -> QuantizationRule {
        QuantizationRule::new(self.rounding, self.bias_stage)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine_count == 0 {
            return Err(ConfigError::Validation("engine_count must be > 0".into()));
        }
        if self.engine_count > 64 {
            return Err(ConfigError::Validation(format!(
                "engine_count must be <= 64, got {}",
                self.engine_count
            )));
        }
        if self.alignment == 0 || !self.alignment.is_power_of_two() {
            return Err(ConfigError::Validation(format!(
                "alignment must be a power of two, got {}",
                self.alignment
            )));
        }
        if self.memory_per_engine < self.alignment {
            return Err(ConfigError::Validation(format!(
                "memory_per_engine ({}) must hold at least one aligned block ({})",
                self.memory_per_engine, self.alignment
            )));
        }
        if !(self.clock_mhz.is_finite() && self.clock_mhz > 0.0) {
            return Err(ConfigError::Validation(format!(
                "clock_mhz must be a positive number, got {}",
                self.clock_mhz
            )));
        }
        if self.macs_per_cycle == 0 {
            return Err(ConfigError::Validation("macs_per_cycle must be > 0".into()));
        }
        Ok(())
    }

    /// Apply `GEMX_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_parse::<usize>("GEMX_ENGINE_COUNT")? {
            self.engine_count = v;
        }
        if let Some(v) = env_parse::<usize>("GEMX_MEMORY_PER_ENGINE")? {
            self.memory_per_engine = v;
        }
        if let Some(v) = env_parse::<f64>("GEMX_CLOCK_MHZ")? {
            self.clock_mhz = v;
        }
        if let Some(v) = env_parse::<usize>("GEMX_ALIGNMENT")? {
            self.alignment = v;
        }
        if let Some(v) = env_parse::<u64>("GEMX_MACS_PER_CYCLE")? {
            self.macs_per_cycle = v;
        }
        if let Some(v) = env_parse::<RoundingMode>("GEMX_ROUNDING")? {
            self.rounding = v;
        }
        if let Some(v) = env_parse::<BiasStage>("GEMX_BIAS_STAGE")? {
            self.bias_stage = v;
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().map(Some).map_err(|e| ConfigError::EnvOverride {
            key: key.into(),
            value: val.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(None),
    }
}
