//! PINGREQ scheduling.

use std::time::Duration;

use tokio::time::Instant;

/// Decides when the next PINGREQ is due.
///
/// Any outbound packet pushes the deadline out by one interval. While a
/// PINGREQ is unanswered no further one is scheduled; the ping request's own
/// timeout closes the connection instead.
#[derive(Debug, Default)]
pub(crate) struct KeepAlive {
    interval: Option<Duration>,
    next_ping: Option<Instant>,
    outstanding: bool,
}

impl KeepAlive {
    /// Start a fresh schedule for a new connection. `seconds` of 0
    /// disables pings.
    pub fn start(&mut self, seconds: u16, now: Instant) {
        self.interval = (seconds > 0).then(|| Duration::from_secs(seconds as u64));
        self.outstanding = false;
        self.on_send(now);
    }

    pub fn stop(&mut self) {
        self.interval = None;
        self.next_ping = None;
        self.outstanding = false;
    }

    /// Outbound traffic was written.
    pub fn on_send(&mut self, now: Instant) {
        self.next_ping = self.interval.map(|interval| now + interval);
    }

    pub fn next_ping(&self) -> Option<Instant> {
        if self.outstanding {
            None
        } else {
            self.next_ping
        }
    }

    /// True when a PINGREQ should be sent now; marks it outstanding.
    pub fn poll_due(&mut self, now: Instant) -> bool {
        match self.next_ping() {
            Some(at) if at <= now => {
                self.outstanding = true;
                true
            }
            _ => false,
        }
    }

    /// PINGRESP arrived.
    pub fn on_pong(&mut self) {
        self.outstanding = false;
    }
}
