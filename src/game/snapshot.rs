//! Full-state broadcast throttling

use std::time::Duration;

use tokio::time::Instant;

use crate::ws::protocol::ServerMsg;

use super::state::SimulationState;

/// Decides when the simulation loop may send another full snapshot
pub struct BroadcastThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl BroadcastThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Check if it's time to send a snapshot; records the send if so
    pub fn should_send(&mut self, now: Instant) -> bool {
        let due = self
            .last_sent
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if due {
            self.last_sent = Some(now);
        }
        due
    }

    /// Count an out-of-band snapshot (score, serve) toward the interval
    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }
}

/// Build the periodic `update` message
pub fn update_msg(state: &SimulationState) -> ServerMsg {
    ServerMsg::Update {
        game_state: state.clone(),
    }
}
