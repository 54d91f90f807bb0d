//! Game simulation modules

pub mod bot;
pub mod error;
pub mod r#match;
pub mod physics;
pub mod registry;
pub mod room;
pub mod simulation;
pub mod snapshot;
pub mod state;

pub use error::RoomError;
pub use registry::RoomRegistry;
