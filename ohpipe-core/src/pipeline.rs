//! The standard element chain
//!
//! ```text
//! Supply -> DrainerLeft -> Ramper -> StreamValidator -> VariableDelayLeft
//!        -> StarvationRamper -> VariableDelayRight -> PhaseAdjuster
//!        -> DrainerRight -> (animator)
//! ```
//!
//! The animator pulls from the tail on its real-time thread. Everything
//! upstream of the StarvationRamper runs on the ramper's puller thread.

use crate::config::{
    FactoryConfig, PhaseAdjusterConfig, RamperConfig, StarvationRamperConfig,
    VariableDelayConfig,
};
use crate::element::{ClockPuller, PipelineAnimator, PipelineElementUpstream, Upstream};
use crate::elements::{
    DownstreamDelay, Drainer, DrainerHandle, PhaseAdjuster, Ramper, StarvationRamper,
    StarvationRamperHandle, StreamValidator, Supply, SupplyHandle, VariableDelay,
    VariableDelayHandle,
};
use crate::error::Result;
use crate::msg::{Msg, MsgFactory};
use ohpipe_common::config::PipelineConfig;
use ohpipe_common::events::EventBus;
use ohpipe_common::RampCurve;
use std::sync::Arc;
use tracing::info;

/// Messages the supply queues before producers block
const SUPPLY_CAPACITY: usize = 64;

pub struct Pipeline {
    supply: SupplyHandle,
    factory: Arc<MsgFactory>,
    events: Arc<EventBus>,
    starvation: StarvationRamperHandle,
    drainer: DrainerHandle,
    min_delay: VariableDelayHandle,
    ramp_curve: RampCurve,
    tail: Upstream,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        animator: Arc<dyn PipelineAnimator>,
        clock_puller: Option<Arc<dyn ClockPuller>>,
    ) -> Result<Self> {
        let factory_config = FactoryConfig::from(config);
        let factory = Arc::new(MsgFactory::new(factory_config.capacity));
        let events = Arc::new(EventBus::new(config.events.capacity));

        let (supply, head) = Supply::new(Arc::clone(&factory), SUPPLY_CAPACITY);
        let (drainer, drainer_left) =
            Drainer::left(Box::new(head), Arc::clone(&factory), Arc::clone(&events));
        let ramper = Ramper::new(Box::new(drainer_left), RamperConfig::from(config));
        let validator = StreamValidator::new(
            Box::new(ramper),
            Arc::clone(&animator),
            Arc::clone(&events),
        );

        let downstream_delay = Arc::new(DownstreamDelay::new());
        let delay_config = VariableDelayConfig::from(config);
        let delay_left = VariableDelay::left(
            Box::new(validator),
            Arc::clone(&factory),
            delay_config,
            Arc::clone(&events),
            Arc::clone(&downstream_delay),
        );
        let (starvation, starvation_ramper) = StarvationRamper::new(
            Box::new(delay_left),
            Arc::clone(&factory),
            StarvationRamperConfig::from(config),
            Arc::clone(&events),
        )?;
        let (min_delay, delay_right) = VariableDelay::right(
            Box::new(starvation_ramper),
            Arc::clone(&factory),
            delay_config,
            Arc::clone(&events),
        );
        let delay_right = delay_right.with_observer(downstream_delay);
        let phase_adjuster = PhaseAdjuster::new(
            Box::new(delay_right),
            Arc::clone(&factory),
            animator,
            clock_puller,
            PhaseAdjusterConfig::from(config),
            Arc::clone(&events),
        );
        let (_, drainer_right) =
            Drainer::right(Box::new(phase_adjuster), Arc::clone(&factory), Arc::clone(&events));

        info!(
            "Pipeline built (pool {} messages, ramp curve {:?})",
            factory_config.capacity, factory_config.ramp_curve
        );
        Ok(Self {
            supply,
            factory,
            events,
            starvation,
            drainer,
            min_delay,
            ramp_curve: factory_config.ramp_curve,
            tail: Box::new(drainer_right),
        })
    }

    /// Producer entry point
    pub fn supply(&self) -> &SupplyHandle {
        &self.supply
    }

    pub fn factory(&self) -> &Arc<MsgFactory> {
        &self.factory
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn starvation_ramper(&self) -> &StarvationRamperHandle {
        &self.starvation
    }

    pub fn drainer(&self) -> &DrainerHandle {
        &self.drainer
    }

    /// Minimum delay realized at the tail
    pub fn min_delay(&self) -> &VariableDelayHandle {
        &self.min_delay
    }

    /// Next message, with decoded audio rendered to `Playable`
    pub fn pull_playable(&mut self) -> Msg {
        self.tail.pull().into_playable(self.ramp_curve)
    }
}

impl PipelineElementUpstream for Pipeline {
    fn pull(&mut self) -> Msg {
        self.tail.pull()
    }
}
