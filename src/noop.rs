//! Periodic liveness probing for producer connections: a noop keepalive with
//! an idle-timeout disconnect.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoopOutcome {
    /// Nothing to do this tick.
    Idle,
    /// A noop should be sent now.
    Send,
    /// The idle timeout elapsed with an outstanding noop: disconnect.
    Disconnect,
}

pub struct NoopKeepalive {
    enabled: bool,
    interval: Duration,
    idle_timeout: Duration,
    pending_recv: bool,
    last_sent: Option<Instant>,
}

impl NoopKeepalive {
    pub fn new(interval: Duration, idle_timeout: Duration) -> NoopKeepalive {
        NoopKeepalive {
            enabled: false,
            interval,
            idle_timeout,
            pending_recv: false,
            last_sent: None,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Called whenever the connection receives a message (a noop response
    /// counts, but so does any other traffic) — clears the pending flag.
    pub fn on_receive(&mut self) {
        self.pending_recv = false;
    }

    pub fn on_noop_response(&mut self) {
        self.pending_recv = false;
    }

    /// Drives the keepalive state machine for one tick.
    ///
    /// If a noop should be emitted, the caller is responsible for actually
    /// writing it to the wire and then calling `record_sent`; if the wire
    /// reports the message is too big, the caller must *not* call
    /// `record_sent`, leaving state untouched.
    pub fn maybe_send(&self, last_receive_time: Instant) -> NoopOutcome {
        if !self.enabled {
            return NoopOutcome::Idle;
        }

        if self.pending_recv && last_receive_time.elapsed() >= self.idle_timeout {
            return NoopOutcome::Disconnect;
        }

        let due = match self.last_sent {
            None => true,
            Some(t) => t.elapsed() >= self.interval,
        };

        if due && !self.pending_recv {
            NoopOutcome::Send
        } else {
            NoopOutcome::Idle
        }
    }

    pub fn record_sent(&mut self, at: Instant) {
        self.pending_recv = true;
        self.last_sent = Some(at);
    }
}
