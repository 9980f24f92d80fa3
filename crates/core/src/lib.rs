#![forbid(unsafe_code)]

pub mod grouping;
pub mod model;
pub mod time;
pub mod timer;

pub use grouping::group_passages;
pub use time::Clock;
pub use timer::{SessionTimer, TickOutcome, TimerHandle, TimerState};
