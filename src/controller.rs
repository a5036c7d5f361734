//! Press-to-record controller
//!
//! The host forwards raw pointer input here. Host calls run synchronously
//! under the core lock; capture, finalize, upload and timer completions come
//! back over a channel drained by one state-loop task. Every transition goes
//! through [`reduce`], so the controller is the single writer of [`State`].

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::Microphone;
use crate::effects::{CaptureEffectRunner, EffectRunner};
use crate::gesture::{GestureTracker, PointerInput};
use crate::settings::RecorderSettings;
use crate::state_machine::{reduce, Effect, Event, State};
use crate::ui::{state_to_ui, UiEmitter, UiState};
use crate::upload::SendFn;

struct Core {
    state: State,
    tracker: GestureTracker,
    settings: RecorderSettings,
    runner: Arc<dyn EffectRunner>,
    emitter: Arc<dyn UiEmitter>,
    tx: mpsc::UnboundedSender<Event>,
}

impl Core {
    fn dispatch(&mut self, event: Event) {
        log::debug!("Received event: {:?}", event);

        let old_discriminant = std::mem::discriminant(&self.state);
        let (next, effects) = reduce(&self.state, event, &self.settings);
        let new_discriminant = std::mem::discriminant(&next);

        // Log state transitions
        if old_discriminant != new_discriminant {
            log::info!("State transition: {:?} -> {:?}", self.state, next);
        }

        self.state = next;

        for eff in effects {
            match eff {
                Effect::EmitUi => self.emit_ui_state(),
                Effect::Notify(status) => {
                    log::debug!("Status event: {:?}", status);
                    self.emitter.status(status);
                }
                other => self.runner.spawn(other, self.tx.clone()),
            }
        }
    }

    fn emit_ui_state(&self) {
        let ui_state = state_to_ui(&self.state);
        log::debug!("Emitting UI state: {:?}", serde_json::to_string(&ui_state));
        self.emitter.ui_state(ui_state);
    }
}

fn lock_core(core: &Mutex<Core>) -> MutexGuard<'_, Core> {
    core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drives one push-to-talk control.
///
/// Dropping the controller stops its state loop and cancels a recording in
/// progress. An upload already handed to the send function still completes.
pub struct RecordingController {
    core: Arc<Mutex<Core>>,
    state_loop: JoinHandle<()>,
}

impl RecordingController {
    /// Build a controller on the default effect runner.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        settings: RecorderSettings,
        microphone: Arc<dyn Microphone>,
        send: SendFn,
        emitter: Arc<dyn UiEmitter>,
    ) -> Self {
        let runner = CaptureEffectRunner::new(microphone, send, emitter.clone(), settings.clone());
        Self::with_runner(settings, runner, emitter)
    }

    /// Build a controller on a custom effect runner.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_runner(
        settings: RecorderSettings,
        runner: Arc<dyn EffectRunner>,
        emitter: Arc<dyn UiEmitter>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        let core = Arc::new(Mutex::new(Core {
            state: State::default(),
            tracker: GestureTracker::new(settings.cancel_threshold_px),
            settings,
            runner,
            emitter,
            tx,
        }));

        // Emit initial state
        lock_core(&core).emit_ui_state();

        let state_loop = tokio::spawn(run_state_loop(core.clone(), rx));
        log::info!("Recording controller started");

        Self { core, state_loop }
    }

    /// Pointer went down on the record control.
    ///
    /// Ignored while a session is between requesting and uploading.
    pub fn on_press_start(&self, input: impl Into<PointerInput>) {
        let input = input.into();
        let mut core = lock_core(&self.core);

        if !core.state.accepts_press() {
            log::debug!("Press ignored; session busy in {:?}", core.state);
            return;
        }
        let Some(latch) = core.tracker.begin(&input) else {
            log::debug!("Press ignored; input carried no pointer");
            return;
        };
        core.dispatch(Event::PressStart { latch });
    }

    /// Pointer moved while pressed.
    pub fn on_press_move(&self, input: impl Into<PointerInput>) {
        let input = input.into();
        let mut core = lock_core(&self.core);
        if core.tracker.move_to(&input) {
            core.dispatch(Event::CancelLatched);
        }
    }

    /// Pointer released. A cancel verdict tears the session down before
    /// this returns.
    pub fn on_press_end(&self) {
        let mut core = lock_core(&self.core);
        if !core.tracker.is_tracking() {
            log::debug!("Release without a tracked press; ignoring");
            return;
        }
        let verdict = core.tracker.end();
        core.dispatch(Event::PressEnd {
            cancel: verdict.cancel,
        });
    }

    /// Snapshot of what the control should currently show.
    pub fn ui_state(&self) -> UiState {
        state_to_ui(&lock_core(&self.core).state)
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        self.state_loop.abort();
        let mut core = lock_core(&self.core);
        if let Some(id) = core.state.session_id() {
            if matches!(
                core.state,
                State::Requesting { .. } | State::Recording { .. } | State::CancelPending { .. }
            ) {
                log::info!("Controller dropped mid-recording; cancelling {}", id);
                core.runner.spawn(Effect::CancelCapture { id }, core.tx.clone());
            }
        }
        core.state = State::Idle;
    }
}

/// Drain completion events into the reducer.
async fn run_state_loop(core: Arc<Mutex<Core>>, mut rx: mpsc::UnboundedReceiver<Event>) {
    log::info!("State loop started");
    while let Some(event) = rx.recv().await {
        lock_core(&core).dispatch(event);
    }
    log::info!("State loop ended");
}
