//! Ping/pong keepalive for dead connection detection.
//!
//! The timer is a pair of deadlines polled by the connection. After
//! `interval` with no inbound bytes a Ping is due; when dropping on timeout
//! is enabled a grace deadline is then armed, and if it passes with still
//! nothing received the connection is dropped. Any inbound bytes, not only
//! a Pong, call [`KeepaliveTimer::reset`] and clear both deadlines.

use std::time::{Duration, Instant};

/// What the connection should do after polling the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    Idle,
    SendPing,
    Drop,
}

#[derive(Debug)]
pub struct KeepaliveTimer {
    interval: Duration,
    grace_period: Duration,
    drop_on_timeout: bool,
    ping_deadline: Option<Instant>,
    grace_deadline: Option<Instant>,
}

impl KeepaliveTimer {
    /// Create a timer whose first Ping is due `interval` after `now`.
    pub fn new(interval: Duration, grace_period: Duration, drop_on_timeout: bool, now: Instant) -> Self {
        Self {
            interval,
            grace_period,
            drop_on_timeout,
            ping_deadline: Some(now + interval),
            grace_deadline: None,
        }
    }

    /// Inbound data arrived: restart the interval and forget any pending grace deadline.
    pub fn reset(&mut self, now: Instant) {
        self.ping_deadline = Some(now + self.interval);
        self.grace_deadline = None;
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.grace_deadline.is_some()
    }

    /// Check both deadlines against `now`.
    pub fn poll(&mut self, now: Instant) -> KeepaliveAction {
        if self.grace_deadline.is_some_and(|deadline| now >= deadline) {
            self.cancel();
            return KeepaliveAction::Drop;
        }
        if self.ping_deadline.is_some_and(|deadline| now >= deadline) {
            self.ping_deadline = None;
            if self.drop_on_timeout {
                self.grace_deadline = Some(now + self.grace_period);
            } else {
                self.ping_deadline = Some(now + self.interval);
            }
            return KeepaliveAction::SendPing;
        }
        KeepaliveAction::Idle
    }

    /// The earliest instant at which [`KeepaliveTimer::poll`] can return something other than `Idle`.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.ping_deadline, self.grace_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn cancel(&mut self) {
        self.ping_deadline = None;
        self.grace_deadline = None;
    }
}
