//! Countdown state for the per-question timer.
//!
//! The timer itself never schedules anything. `start` hands out a `TimerHandle`; whoever
//! drives the one-second cadence passes that handle back into `tick`. Ticks carrying any
//! handle other than the live one are rejected, so a cancelled schedule can never mutate
//! the countdown of the question that replaced it.

/// Identity of one scheduled countdown. A new handle is issued on every successful `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Running,
    Expired,
    Stopped,
}

/// What a single tick did to the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick belonged to a cancelled or superseded schedule.
    Stale,
    Running { remaining: u32 },
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTimer {
    enabled: bool,
    duration: u32,
    remaining: u32,
    state: TimerState,
    live: Option<TimerHandle>,
    issued: u64,
}

impl SessionTimer {
    /// A timer counting down `duration_secs` per question when `enabled`.
    #[must_use]
    pub fn new(enabled: bool, duration_secs: u32) -> Self {
        Self {
            enabled,
            duration: duration_secs,
            remaining: duration_secs,
            state: TimerState::Idle,
            live: None,
            issued: 0,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(false, 0)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn duration(&self) -> u32 {
        self.duration
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    #[must_use]
    pub fn state(&self) -> TimerState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.live.is_some()
    }

    #[must_use]
    pub fn live_handle(&self) -> Option<TimerHandle> {
        self.live
    }

    /// Begin counting down.
    ///
    /// Returns `None` without side effects when already running, when timing is disabled,
    /// or when no time remains.
    pub fn start(&mut self) -> Option<TimerHandle> {
        if self.live.is_some() || !self.enabled || self.remaining == 0 {
            return None;
        }
        self.issued += 1;
        let handle = TimerHandle(self.issued);
        self.live = Some(handle);
        self.state = TimerState::Running;
        Some(handle)
    }

    /// Apply one elapsed second from the schedule identified by `handle`.
    pub fn tick(&mut self, handle: TimerHandle) -> TickOutcome {
        if self.live != Some(handle) {
            return TickOutcome::Stale;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.live = None;
            self.state = TimerState::Expired;
            return TickOutcome::Expired;
        }
        TickOutcome::Running {
            remaining: self.remaining,
        }
    }

    /// Cancel the live schedule, if any. Idempotent.
    ///
    /// Returns the handle that was cancelled so the caller can drop its scheduled task.
    pub fn stop(&mut self) -> Option<TimerHandle> {
        let cancelled = self.live.take();
        if cancelled.is_some() {
            self.state = TimerState::Stopped;
        }
        cancelled
    }

    /// Stop, then set the remaining time to `duration_secs`.
    pub fn reset(&mut self, duration_secs: u32) {
        self.stop();
        self.duration = duration_secs;
        self.remaining = duration_secs;
        self.state = TimerState::Idle;
    }

    /// Reset to the configured full duration and start again.
    pub fn restart(&mut self) -> Option<TimerHandle> {
        self.reset(self.duration);
        self.start()
    }
}
