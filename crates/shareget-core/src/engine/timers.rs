//! Timer service - the idle-abort deadline and the progress tick of a run
//!
//! Each timer is a spawned task paired with a `CancellationToken`. Callbacks
//! receive the token so they can re-check it under the caller's lock: a timer
//! that was stopped while its callback was already running must do nothing.

use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Default)]
pub struct TimerService {
    idle: Option<CancellationToken>,
    tick: Option<CancellationToken>,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)arm the single-shot idle-abort timer
    pub fn arm_idle<F>(&mut self, after: Duration, on_fire: F)
    where
        F: FnOnce(&CancellationToken) + Send + 'static,
    {
        self.disarm_idle();

        let token = CancellationToken::new();
        let task_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    debug!("Idle-abort timer fired after {:?}", after);
                    on_fire(&task_token);
                }
            }
        });
        self.idle = Some(token);
    }

    pub fn disarm_idle(&mut self) {
        if let Some(token) = self.idle.take() {
            token.cancel();
        }
    }

    /// Start the recurring tick. The callback gets the whole seconds elapsed
    /// since the tick was started.
    pub fn start_tick<F>(&mut self, every: Duration, on_tick: F)
    where
        F: Fn(u64, &CancellationToken) + Send + 'static,
    {
        self.stop_tick();

        let token = CancellationToken::new();
        let task_token = token.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = interval_at(started + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => on_tick(started.elapsed().as_secs(), &task_token),
                }
            }
        });
        self.tick = Some(token);
    }

    pub fn stop_tick(&mut self) {
        if let Some(token) = self.tick.take() {
            token.cancel();
        }
    }

    /// Stop both timers. Calling this with nothing running is a no-op.
    pub fn stop_all(&mut self) {
        self.disarm_idle();
        self.stop_tick();
    }

    pub fn idle_armed(&self) -> bool {
        self.idle.is_some()
    }

    pub fn tick_running(&self) -> bool {
        self.tick.is_some()
    }
}
