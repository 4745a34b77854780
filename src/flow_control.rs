//! Per-consumer byte budget for buffered replication, selected by
//! `dcp_flow_control_policy`.
//!
//! Modeled as a small polymorphic capability set:
//! `should_buffer`, `on_ack`, `on_item_accepted`. `{None, Static, Dynamic,
//! Aggressive}` are the four named policies; callers hold a `Box<dyn
//! FlowControlPolicy>` chosen once from `dcp_flow_control_policy` at
//! connection-construction time.

use std::str::FromStr;

pub trait FlowControlPolicy {
    /// Returns `true` once the bytes already sent and not yet acked fill the
    /// outstanding buffer budget, so production should pause until a
    /// buffer-ack arrives. Reflects the policy's own `on_item_sent`/`on_ack`
    /// bookkeeping, not a value the caller has to track separately.
    fn should_buffer(&self) -> bool;

    /// Called when a `BufferAck` is received from the consumer, carrying
    /// the number of bytes it has freed up.
    fn on_ack(&mut self, bytes_acked: u32);

    /// Called whenever an item is actually sent, to track outstanding
    /// bytes.
    fn on_item_sent(&mut self, size: usize);

    fn window(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControlKind {
    None,
    Static,
    Dynamic,
    Aggressive,
}

impl FromStr for FlowControlKind {
    type Err = String;
    fn from_str(s: &str) -> Result<FlowControlKind, String> {
        match s {
            "none" => Ok(FlowControlKind::None),
            "static" => Ok(FlowControlKind::Static),
            "dynamic" => Ok(FlowControlKind::Dynamic),
            "aggressive" => Ok(FlowControlKind::Aggressive),
            other => Err(format!("unrecognized flow control policy: {}", other)),
        }
    }
}

/// No flow control: items are never buffered for budget reasons.
pub struct NoFlowControl;

impl FlowControlPolicy for NoFlowControl {
    fn should_buffer(&self) -> bool {
        false
    }
    fn on_ack(&mut self, _bytes_acked: u32) {}
    fn on_item_sent(&mut self, _size: usize) {}
    fn window(&self) -> usize {
        usize::max_value()
    }
}

/// A fixed per-consumer byte window, replenished by acks (/// "FlowControl").
pub struct StaticFlowControl {
    window: usize,
    outstanding: usize,
}

impl StaticFlowControl {
    pub fn new(window: usize) -> StaticFlowControl {
        StaticFlowControl { window, outstanding: 0 }
    }
}

impl FlowControlPolicy for StaticFlowControl {
    fn should_buffer(&self) -> bool {
        self.outstanding >= self.window
    }
    fn on_ack(&mut self, bytes_acked: u32) {
        self.outstanding = self.outstanding.saturating_sub(bytes_acked as usize);
    }
    fn on_item_sent(&mut self, size: usize) {
        self.outstanding += size;
    }
    fn window(&self) -> usize {
        self.window
    }
}

/// A window that grows and shrinks with observed throughput. Kept simple:
/// widens the window by 10% on every ack that frees at least half of it,
/// models the intent of "dynamic" sizing without depending on a live
/// throughput sampler that lives in the (out-of-scope) storage engine.
pub struct DynamicFlowControl {
    window: usize,
    min_window: usize,
    max_window: usize,
    outstanding: usize,
}

impl DynamicFlowControl {
    pub fn new(initial: usize, min: usize, max: usize) -> DynamicFlowControl {
        DynamicFlowControl { window: initial, min_window: min, max_window: max, outstanding: 0 }
    }
}

impl FlowControlPolicy for DynamicFlowControl {
    fn should_buffer(&self) -> bool {
        self.outstanding >= self.window
    }
    fn on_ack(&mut self, bytes_acked: u32) {
        let acked = bytes_acked as usize;
        if acked * 2 >= self.window {
            self.window = (self.window + self.window / 10).min(self.max_window);
        }
        self.outstanding = self.outstanding.saturating_sub(acked);
    }
    fn on_item_sent(&mut self, size: usize) {
        self.outstanding += size;
        if self.outstanding > self.window && self.window > self.min_window {
            self.window = self.max_window;
        }
    }
    fn window(&self) -> usize {
        self.window
    }
}

/// Buffers only once the window is fully saturated; otherwise lets items
/// through eagerly, trading memory for throughput.
pub struct AggressiveFlowControl {
    window: usize,
    outstanding: usize,
}

impl AggressiveFlowControl {
    pub fn new(window: usize) -> AggressiveFlowControl {
        AggressiveFlowControl { window, outstanding: 0 }
    }
}

impl FlowControlPolicy for AggressiveFlowControl {
    fn should_buffer(&self) -> bool {
        self.outstanding >= self.window
    }
    fn on_ack(&mut self, bytes_acked: u32) {
        self.outstanding = self.outstanding.saturating_sub(bytes_acked as usize);
    }
    fn on_item_sent(&mut self, size: usize) {
        self.outstanding += size;
    }
    fn window(&self) -> usize {
        self.window
    }
}

pub fn build(kind: FlowControlKind, window: usize) -> Box<dyn FlowControlPolicy> {
    match kind {
        FlowControlKind::None => Box::new(NoFlowControl),
        FlowControlKind::Static => Box::new(StaticFlowControl::new(window)),
        FlowControlKind::Dynamic => Box::new(DynamicFlowControl::new(window, window / 4, window * 4)),
        FlowControlKind::Aggressive => Box::new(AggressiveFlowControl::new(window)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_policy_buffers_past_window() {
        let mut fc = StaticFlowControl::new(100);
        fc.on_item_sent(90);
        fc.on_item_sent(20);
        assert!(fc.should_buffer());
        fc.on_ack(50);
        assert!(!fc.should_buffer());
    }

    #[test]
    fn none_policy_never_buffers() {
        let fc = NoFlowControl;
        assert!(!fc.should_buffer());
    }

    #[test]
    fn aggressive_only_buffers_at_saturation() {
        let mut fc = AggressiveFlowControl::new(10);
        fc.on_item_sent(5);
        assert!(!fc.should_buffer());
        fc.on_item_sent(5);
        assert!(fc.should_buffer());
    }
}
