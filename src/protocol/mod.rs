/// Wire command catalog and payload schemas
pub mod commands;

/// Link-layer frame codec
pub mod frame;

pub use commands::Command;
pub use frame::{Frame, FrameError};
