//! Pipeline configuration
//!
//! All timing constants used by the pipeline elements live in one explicit
//! [`PipelineConfig`] passed at construction; nothing reads global state.
//! Values are written in milliseconds in TOML and converted to jiffies by
//! the element-specific config types in `ohpipe-core`.
//!
//! # Config file resolution
//!
//! 1. Command-line argument (highest priority)
//! 2. `OHPIPE_CONFIG` environment variable
//! 3. Platform config dir: `<config_dir>/ohpipe/pipeline.toml`
//! 4. Built-in defaults (missing files are logged, never fatal)

use crate::ramp_curve::RampCurve;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "OHPIPE_CONFIG";

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Gain curve used to render every ramp
    pub ramp_curve: RampCurve,
    /// Ramper durations
    pub ramper: RamperSettings,
    /// VariableDelay settings (both instances)
    pub variable_delay: VariableDelaySettings,
    /// StarvationRamper settings
    pub starvation_ramper: StarvationRamperSettings,
    /// PhaseAdjuster settings
    pub phase_adjuster: PhaseAdjusterSettings,
    /// Message pool settings
    pub msg_pool: MsgPoolSettings,
    /// Event bus settings
    pub events: EventSettings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Ramp durations applied at stream discontinuities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RamperSettings {
    /// Ramp used when the mode prefers long pause/resume ramps
    pub long_ms: u64,
    /// Ramp used otherwise
    pub short_ms: u64,
}

impl Default for RamperSettings {
    fn default() -> Self {
        Self {
            long_ms: 500,
            short_ms: 50,
        }
    }
}

/// VariableDelay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableDelaySettings {
    /// Duration of the ramp down/up around a delay change
    pub ramp_ms: u64,
    /// Longest single silence message inserted while adjusting
    pub max_silence_ms: u64,
    /// Initial minimum delay owned by the right-hand instance
    pub min_delay_ms: u64,
}

impl Default for VariableDelaySettings {
    fn default() -> Self {
        Self {
            ramp_ms: 200,
            max_silence_ms: 5,
            min_delay_ms: 0,
        }
    }
}

/// StarvationRamper settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarvationRamperSettings {
    /// Reservoir capacity; the puller blocks above this
    pub max_ms: u64,
    /// Audio buffered before playback starts
    pub start_occupancy_ms: u64,
    /// Recent audio kept to train the flywheel
    pub training_ms: u64,
    /// Fade-to-silence duration on starvation
    pub ramp_down_ms: u64,
    /// Fade-in duration when audio resumes
    pub ramp_up_ms: u64,
    /// Prediction order of the flywheel extrapolator
    pub flywheel_order: usize,
    /// Reservoir level below which the flywheel continuation is kept ready
    pub flywheel_prepare_ms: u64,
    /// Silence message length emitted while starved
    pub halted_silence_ms: u64,
}

impl Default for StarvationRamperSettings {
    fn default() -> Self {
        Self {
            max_ms: 100,
            start_occupancy_ms: 10,
            training_ms: 20,
            ramp_down_ms: 20,
            ramp_up_ms: 20,
            flywheel_order: 32,
            flywheel_prepare_ms: 10,
            halted_silence_ms: 5,
        }
    }
}

/// PhaseAdjuster settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseAdjusterSettings {
    /// Ramp up after alignment
    pub ramp_ms: u64,
    /// Most leading audio that may be dropped to align
    pub max_drop_ms: u64,
    /// Clamp for each clock puller update
    pub max_clock_update_ms: u64,
    /// Longest single silence message inserted while aligning
    pub max_silence_ms: u64,
    /// Largest rate correction the clock puller may apply
    pub max_clock_ppm: u32,
}

impl Default for PhaseAdjusterSettings {
    fn default() -> Self {
        Self {
            ramp_ms: 50,
            max_drop_ms: 100,
            max_clock_update_ms: 1,
            max_silence_ms: 5,
            max_clock_ppm: 500,
        }
    }
}

/// Message pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MsgPoolSettings {
    /// Audio-bearing messages alive at once before allocation blocks
    pub capacity: usize,
}

impl Default for MsgPoolSettings {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Broadcast channel capacity
    pub capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl PipelineConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded pipeline configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the config file and load it, falling back to defaults
    ///
    /// A missing file is not an error: the pipeline starts on built-in
    /// defaults with a warning. A file that exists but fails to parse or
    /// validate is an error.
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                info!("No config file configured, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check ranges that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.ramper.short_ms == 0 || self.ramper.long_ms < self.ramper.short_ms {
            return Err(Error::Config(format!(
                "ramper durations invalid: long={}ms short={}ms",
                self.ramper.long_ms, self.ramper.short_ms
            )));
        }
        if self.variable_delay.max_silence_ms == 0 || self.phase_adjuster.max_silence_ms == 0 {
            return Err(Error::Config(
                "max_silence_ms must be greater than zero".to_string(),
            ));
        }
        let starvation = &self.starvation_ramper;
        if starvation.max_ms == 0 || starvation.start_occupancy_ms > starvation.max_ms {
            return Err(Error::Config(format!(
                "starvation ramper capacity invalid: max={}ms start_occupancy={}ms",
                starvation.max_ms, starvation.start_occupancy_ms
            )));
        }
        if starvation.flywheel_order == 0 || starvation.halted_silence_ms == 0 {
            return Err(Error::Config(
                "flywheel_order and halted_silence_ms must be greater than zero".to_string(),
            ));
        }
        if self.msg_pool.capacity < 2 {
            return Err(Error::Config(format!(
                "msg_pool capacity {} is too small",
                self.msg_pool.capacity
            )));
        }
        if self.events.capacity == 0 {
            return Err(Error::Config("events capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Resolve which config file to use (CLI > env > platform default)
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path()
}

/// Platform default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ohpipe").join("pipeline.toml"))
}
