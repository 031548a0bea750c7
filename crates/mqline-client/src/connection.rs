//! Connection lifecycle state and reconnect backoff.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet connected.
    Idle,
    /// Dialing the transport or waiting for CONNACK.
    Connecting,
    /// CONNACK accepted; requests flow.
    Ready,
    /// Lost or failed to establish; a reconnect may be scheduled.
    TransientFailure,
    /// Closed by the user. Terminal.
    Shutdown,
}

/// Owns the connection state; the only place transitions happen.
#[derive(Debug)]
pub(crate) struct StateManager {
    state: ConnectionState,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is(&self, state: ConnectionState) -> bool {
        self.state == state
    }

    /// Move to `to`. Returns the new state if it changed; nothing leaves
    /// `Shutdown`.
    pub fn transition(&mut self, to: ConnectionState) -> Option<ConnectionState> {
        if self.state == ConnectionState::Shutdown {
            log::debug!("Ignoring transition to {:?} after shutdown", to);
            return None;
        }
        if self.state == to {
            return None;
        }
        log::info!("Connection state {:?} -> {:?}", self.state, to);
        self.state = to;
        Some(to)
    }
}

/// Capped exponential backoff between consecutive dial failures.
#[derive(Debug)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        let max = config.max_delay.max(config.min_delay);
        Self {
            min: config.min_delay,
            max,
            current: config.min_delay,
        }
    }

    /// Delay for the next attempt; doubles the following one up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the minimum after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Delay before redialing after a drop; does not advance the sequence.
    pub fn min(&self) -> Duration {
        self.min
    }
}
