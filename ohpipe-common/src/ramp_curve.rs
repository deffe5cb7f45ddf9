//! Gain curves used when rendering ramps
//!
//! A ramp position runs from 0.0 (silent) to 1.0 (full gain). Ramps in both
//! directions map position to gain through the same curve, so a ramp down is
//! exactly the mirror image of a ramp up over the same positions. Every curve
//! is monotonic non-decreasing, which keeps ramp gains monotonic whatever
//! curve is configured.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Ramp gain curve
///
/// - Linear: constant rate of change
/// - Exponential: slow start, fast finish
/// - Logarithmic: fast start, slow finish
/// - SCurve: smooth acceleration and deceleration
/// - EqualPower: constant perceived loudness across the ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RampCurve {
    /// v(t) = t
    Linear,
    /// v(t) = t²
    Exponential,
    /// v(t) = √t
    Logarithmic,
    /// v(t) = 0.5 × (1 - cos(π × t))
    #[default]
    SCurve,
    /// v(t) = sin(t × π/2)
    EqualPower,
}

impl RampCurve {
    /// Gain multiplier (0.0 to 1.0) at a normalized ramp position
    pub fn gain(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            RampCurve::Linear => t,
            RampCurve::Exponential => t * t,
            RampCurve::Logarithmic => t.sqrt(),
            RampCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            RampCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Parse a curve name as written in configuration files
    ///
    /// Accepts the canonical snake_case names plus `cosine` / `s-curve`
    /// aliases for the S-curve.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(RampCurve::Linear),
            "exponential" => Some(RampCurve::Exponential),
            "logarithmic" => Some(RampCurve::Logarithmic),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Some(RampCurve::SCurve),
            "equal_power" | "equalpower" => Some(RampCurve::EqualPower),
            _ => None,
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            RampCurve::Linear => "Linear",
            RampCurve::Exponential => "Exponential",
            RampCurve::Logarithmic => "Logarithmic",
            RampCurve::SCurve => "S-Curve",
            RampCurve::EqualPower => "Equal Power",
        }
    }

    /// All available curves
    pub fn all_variants() -> &'static [RampCurve] {
        &[
            RampCurve::Linear,
            RampCurve::Exponential,
            RampCurve::Logarithmic,
            RampCurve::SCurve,
            RampCurve::EqualPower,
        ]
    }
}

impl std::fmt::Display for RampCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
