//! # ohpipe core
//!
//! Real-time audio delivery pipeline: a chain of pull-based elements that
//! carry [`msg::Msg`] values from a network source to an audio sink.
//!
//! - [`msg`]: the message model and its pooled factory
//! - [`element`]: the pull/push contract and the collaborator traits
//! - [`elements`]: Ramper, VariableDelay, Drainer, StarvationRamper,
//!   PhaseAdjuster and the supporting elements
//! - [`pipeline`]: the standard chain, assembled from configuration

pub mod clock_puller;
pub mod config;
pub mod element;
pub mod elements;
pub mod error;
pub mod msg;
pub mod pipeline;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
