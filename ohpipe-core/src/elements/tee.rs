//! Tee: copies every message into a monitoring branch

use crate::element::{Downstream, PipelineElementUpstream, Upstream};
use crate::msg::Msg;

/// Pass-through element that pushes a branch copy of each message
pub struct Tee {
    upstream: Upstream,
    branch: Downstream,
}

impl Tee {
    pub fn new(upstream: Upstream, branch: Downstream) -> Self {
        Self { upstream, branch }
    }
}

impl PipelineElementUpstream for Tee {
    fn pull(&mut self) -> Msg {
        let msg = self.upstream.pull();
        self.branch.push(msg.clone_for_branch());
        msg
    }
}
