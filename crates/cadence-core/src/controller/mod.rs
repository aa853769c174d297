//! Latest-input task controllers

mod serial;

pub use serial::{ControllerResult, ControllerStats, SerialTaskController, Status};
