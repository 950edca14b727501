//! Cancelable periodic tasks.
//!
//! The recording duration ticker is owned through a [`ScheduledTask`] handle
//! so teardown can stop it explicitly. Dropping the handle cancels the task.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Whether a periodic callback wants to keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Stop,
}

/// Handle to a spawned background task.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `on_tick` every `period`, first firing one period from now.
    ///
    /// The task ends when `on_tick` returns [`TickFlow::Stop`] or the handle is
    /// cancelled/dropped. Must be called from within a tokio runtime.
    pub fn every<F>(name: &'static str, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> TickFlow + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = interval.tick() => {
                        if on_tick() == TickFlow::Stop {
                            log::debug!("Scheduler: '{}' finished", name);
                            break;
                        }
                    }
                }
            }
        });
        Self {
            name,
            token,
            handle,
        }
    }

    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            log::debug!("Scheduler: cancelling '{}'", self.name);
            self.token.cancel();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
