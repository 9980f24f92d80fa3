use std::time::Duration;

use prep_core::model::SessionId;
use prep_core::timer::TimerHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// One elapsed second of the countdown identified by `handle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerTick {
    pub session_id: SessionId,
    pub handle: TimerHandle,
}

/// Owns the single background task that feeds `TimerTick`s into a channel.
///
/// Scheduling a new countdown aborts the previous task first, so at most one tick
/// source exists per ticker. Dropping the ticker aborts the live task.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    tx: mpsc::UnboundedSender<TimerTick>,
    live: Option<(TimerHandle, JoinHandle<()>)>,
}

impl Ticker {
    /// Create a ticker emitting every `period`, with the receiving end of its channel.
    #[must_use]
    pub fn new(period: Duration) -> (Self, mpsc::UnboundedReceiver<TimerTick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ticker = Self {
            period,
            tx,
            live: None,
        };
        (ticker, rx)
    }

    /// One tick per second.
    #[must_use]
    pub fn per_second() -> (Self, mpsc::UnboundedReceiver<TimerTick>) {
        Self::new(Duration::from_secs(1))
    }

    /// Replace the live task with one ticking for `handle`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&mut self, session_id: SessionId, handle: TimerHandle) {
        self.cancel();
        let tx = self.tx.clone();
        let period = self.period;
        let task = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let tick = TimerTick {
                    session_id: session_id.clone(),
                    handle,
                };
                if tx.send(tick).is_err() {
                    break;
                }
            }
        });
        debug!(?handle, "ticker scheduled");
        self.live = Some((handle, task));
    }

    /// Abort the live task, returning the handle it was ticking for.
    pub fn cancel(&mut self) -> Option<TimerHandle> {
        let (handle, task) = self.live.take()?;
        task.abort();
        debug!(?handle, "ticker cancelled");
        Some(handle)
    }

    #[must_use]
    pub fn live_handle(&self) -> Option<TimerHandle> {
        self.live.as_ref().map(|(handle, _)| *handle)
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel();
    }
}
