//! Element configuration in jiffies
//!
//! Each element takes its own small config struct at construction. They are
//! derived from [`PipelineConfig`] (milliseconds) or built directly in tests.

use ohpipe_common::config::PipelineConfig;
use ohpipe_common::jiffies::ms_to_jiffies;
use ohpipe_common::RampCurve;

/// Ramper durations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamperConfig {
    pub long_jiffies: u64,
    pub short_jiffies: u64,
}

impl From<&PipelineConfig> for RamperConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            long_jiffies: ms_to_jiffies(config.ramper.long_ms),
            short_jiffies: ms_to_jiffies(config.ramper.short_ms),
        }
    }
}

impl Default for RamperConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// VariableDelay timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableDelayConfig {
    pub ramp_jiffies: u64,
    pub max_silence_jiffies: u64,
    /// Initial target of the right-hand instance
    pub min_delay_jiffies: u64,
}

impl From<&PipelineConfig> for VariableDelayConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            ramp_jiffies: ms_to_jiffies(config.variable_delay.ramp_ms),
            max_silence_jiffies: ms_to_jiffies(config.variable_delay.max_silence_ms),
            min_delay_jiffies: ms_to_jiffies(config.variable_delay.min_delay_ms),
        }
    }
}

impl Default for VariableDelayConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// StarvationRamper reservoir and flywheel settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarvationRamperConfig {
    pub max_jiffies: u64,
    pub start_occupancy_jiffies: u64,
    pub training_jiffies: u64,
    pub ramp_down_jiffies: u64,
    pub ramp_up_jiffies: u64,
    pub flywheel_order: usize,
    pub flywheel_prepare_jiffies: u64,
    pub halted_silence_jiffies: u64,
}

impl From<&PipelineConfig> for StarvationRamperConfig {
    fn from(config: &PipelineConfig) -> Self {
        let settings = &config.starvation_ramper;
        Self {
            max_jiffies: ms_to_jiffies(settings.max_ms),
            start_occupancy_jiffies: ms_to_jiffies(settings.start_occupancy_ms),
            training_jiffies: ms_to_jiffies(settings.training_ms),
            ramp_down_jiffies: ms_to_jiffies(settings.ramp_down_ms),
            ramp_up_jiffies: ms_to_jiffies(settings.ramp_up_ms),
            flywheel_order: settings.flywheel_order,
            flywheel_prepare_jiffies: ms_to_jiffies(settings.flywheel_prepare_ms),
            halted_silence_jiffies: ms_to_jiffies(settings.halted_silence_ms),
        }
    }
}

impl Default for StarvationRamperConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// PhaseAdjuster limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseAdjusterConfig {
    pub ramp_jiffies: u64,
    pub max_drop_jiffies: u64,
    pub max_clock_update_jiffies: u64,
    pub max_silence_jiffies: u64,
}

impl From<&PipelineConfig> for PhaseAdjusterConfig {
    fn from(config: &PipelineConfig) -> Self {
        let settings = &config.phase_adjuster;
        Self {
            ramp_jiffies: ms_to_jiffies(settings.ramp_ms),
            max_drop_jiffies: ms_to_jiffies(settings.max_drop_ms),
            max_clock_update_jiffies: ms_to_jiffies(settings.max_clock_update_ms),
            max_silence_jiffies: ms_to_jiffies(settings.max_silence_ms),
        }
    }
}

impl Default for PhaseAdjusterConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// Message pool and rendering settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoryConfig {
    pub capacity: usize,
    pub ramp_curve: RampCurve,
}

impl From<&PipelineConfig> for FactoryConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            capacity: config.msg_pool.capacity,
            ramp_curve: config.ramp_curve,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_in_jiffies() {
        let config = PipelineConfig::default();
        let ramper = RamperConfig::from(&config);
        assert_eq!(ramper.long_jiffies, 500 * 56_448);
        assert_eq!(ramper.short_jiffies, 50 * 56_448);

        let starvation = StarvationRamperConfig::from(&config);
        assert_eq!(starvation.max_jiffies, 100 * 56_448);
        assert_eq!(starvation.flywheel_prepare_jiffies, 10 * 56_448);

        let factory = FactoryConfig::from(&config);
        assert_eq!(factory.capacity, 4096);
        assert_eq!(factory.ramp_curve, RampCurve::SCurve);
    }

    #[test]
    fn test_overrides_flow_through() {
        let mut config = PipelineConfig::default();
        config.phase_adjuster.max_drop_ms = 20;
        config.variable_delay.min_delay_ms = 7;

        assert_eq!(
            PhaseAdjusterConfig::from(&config).max_drop_jiffies,
            20 * 56_448
        );
        assert_eq!(
            VariableDelayConfig::from(&config).min_delay_jiffies,
            7 * 56_448
        );
    }
}
