//! Time utilities for the room simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const PHYSICS_TPS: u32 = 60; // 60 physics steps per second
pub const BROADCAST_TPS: u32 = 20; // 20 full-state broadcasts per second

/// Longest real-time slice fed into the accumulator per iteration
pub const MAX_FRAME_SECS: f64 = 0.25;

/// Pause after a point before the ball is served again
pub const SCORE_PAUSE: Duration = Duration::from_secs(1);

/// Fixed physics step (in seconds)
pub fn fixed_dt() -> f64 {
    1.0 / PHYSICS_TPS as f64
}

/// Minimum spacing between two full-state broadcasts
pub fn broadcast_interval() -> Duration {
    Duration::from_micros(1_000_000 / BROADCAST_TPS as u64)
}
