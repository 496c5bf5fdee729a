//! Game simulation modules

pub mod combat;
pub mod grid;
pub mod pause;
pub mod room;
pub mod runner;
pub mod scheduler;
pub mod snapshot;
pub mod spawn;

pub use runner::{RoomError, RoomHandle, RoomRegistry};
