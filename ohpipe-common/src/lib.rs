//! # ohpipe common library
//!
//! Shared foundations for the audio delivery pipeline:
//! - Jiffies, the pipeline's fixed-point time base
//! - Ramp gain curves
//! - Error types
//! - Configuration loading (TOML + environment)
//! - Pipeline event types and the non-blocking EventBus

pub mod config;
pub mod error;
pub mod events;
pub mod jiffies;
pub mod ramp_curve;

pub use error::{Error, Result};
pub use ramp_curve::RampCurve;
