mod engine;
mod progress;
mod reporting;
mod ticker;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use engine::{EnginePhase, NextOutcome, SessionCriteria, SessionEngine, TickResult};
pub use progress::{NavigatorItem, SessionProgress, navigator};
pub use reporting::Notice;
pub use ticker::{Ticker, TimerTick};
