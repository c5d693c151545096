//! Logging for the cadre toolkit.

#[macro_use]
pub mod macros;

pub use log;
pub use log::{Level, LevelFilter, debug, error, info, trace, warn};
