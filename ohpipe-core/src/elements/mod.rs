//! Pipeline elements
//!
//! Listed roughly in the order they sit in the pipeline, head to tail.

pub mod supply;
pub mod drainer;
pub mod ramper;
pub mod stream_validator;
pub mod variable_delay;
pub mod starvation_ramper;
pub mod phase_adjuster;
pub mod tee;

pub use drainer::{Drainer, DrainerHandle};
pub use phase_adjuster::{PhaseAdjuster, PhaseAdjusterState};
pub use ramper::{Ramper, RamperState};
pub use starvation_ramper::{StarvationRamper, StarvationRamperHandle, StarvationRamperState};
pub use stream_validator::StreamValidator;
pub use supply::{Supply, SupplyHandle};
pub use tee::Tee;
pub use variable_delay::{DownstreamDelay, VariableDelay, VariableDelayHandle, VariableDelayState};
