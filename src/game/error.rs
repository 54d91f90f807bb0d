//! Rejections reported back to the originating connection

/// Room and match errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room not found")]
    NotFound,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("Room full ({} player{} max)", .max, plural(.max))]
    Full { max: usize },

    #[error("Room already exists")]
    AlreadyExists,

    #[error("Simulation fault: {0}")]
    TransientFault(String),
}

fn plural(count: &usize) -> &'static str {
    if *count == 1 {
        ""
    } else {
        "s"
    }
}

impl RoomError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Stable reason code sent with the wire `error` message
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::NotFound => "not_found",
            RoomError::Unauthorized(_) => "unauthorized",
            RoomError::InvalidState(_) => "invalid_state",
            RoomError::Full { .. } => "room_full",
            RoomError::AlreadyExists => "already_exists",
            RoomError::TransientFault(_) => "transient_fault",
        }
    }
}
