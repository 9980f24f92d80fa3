#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod sessions;

pub use prep_core::Clock;

pub use config::SessionSettings;
pub use error::{SessionError, SettingsError};

pub use sessions::{
    EnginePhase, NavigatorItem, NextOutcome, Notice, SessionCriteria, SessionEngine,
    SessionProgress, TickResult, TimerTick,
};
