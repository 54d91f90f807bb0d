//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::bot::BotController;
use crate::game::RoomRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            rooms: Arc::new(RoomRegistry::new(BotController::default())),
        }
    }
}
