//! Whole-second recording timer

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Called with the new elapsed value on every tick.
pub type TickCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Debug, Default)]
struct TimerState {
    running: bool,
    elapsed_secs: u64,
    /// Bumped on every start so a lingering task from a previous run can't tick.
    generation: u64,
}

/// Counts elapsed whole seconds while running.
///
/// The increment and the tick callback run under the same lock `stop()`
/// takes, so once `stop()` returns no further tick is delivered.
pub struct RecordingTimer {
    state: Arc<Mutex<TimerState>>,
    on_tick: TickCallback,
    cancel: Option<CancellationToken>,
}

fn lock(state: &Mutex<TimerState>) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingTimer {
    pub fn new(on_tick: TickCallback) -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState::default())),
            on_tick,
            cancel: None,
        }
    }

    /// Reset to zero and begin counting. Must be called inside a tokio runtime.
    pub fn start(&mut self) {
        self.stop();

        let generation = {
            let mut state = lock(&self.state);
            state.running = true;
            state.elapsed_secs = 0;
            state.generation += 1;
            state.generation
        };

        let token = CancellationToken::new();
        self.cancel = Some(token.clone());

        let state = self.state.clone();
        let on_tick = self.on_tick.clone();
        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break,

                    _ = ticks.tick() => {
                        let mut state = lock(&state);
                        if !state.running || state.generation != generation {
                            break;
                        }
                        state.elapsed_secs += 1;
                        on_tick(state.elapsed_secs);
                    }
                }
            }
            log::trace!("Recording timer task exited (generation {})", generation);
        });
    }

    /// Halt counting and return the final value. The value is kept until the
    /// next `start()`.
    pub fn stop(&mut self) -> u64 {
        let elapsed = {
            let mut state = lock(&self.state);
            state.running = false;
            state.elapsed_secs
        };
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        elapsed
    }

    pub fn current_value(&self) -> u64 {
        lock(&self.state).elapsed_secs
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }
}

impl Drop for RecordingTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
