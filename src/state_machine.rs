//! State machine for the push-to-talk recorder
//!
//! This module implements the recording controller's state machine using a
//! single-writer pattern. All state transitions go through the `reduce()`
//! function, which returns a new state and a list of effects to execute.

use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::audio::{AudioBlob, CaptureError};
use crate::gesture::CancelLatch;
use crate::settings::RecorderSettings;
use crate::ui::StatusEvent;
use crate::upload::UploadError;

/// Internal state of one press-to-release recording session.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone)]
pub enum State {
    Idle,
    /// Waiting for the microphone grant
    Requesting {
        session_id: Uuid,
        cancel_latched: bool,
    },
    Recording {
        session_id: Uuid,
        started_at: Instant,
        elapsed_secs: u64,
    },
    /// Still recording, but the drag has armed cancel
    CancelPending {
        session_id: Uuid,
        started_at: Instant,
        elapsed_secs: u64,
    },
    Finalizing {
        session_id: Uuid,
    },
    Uploading {
        session_id: Uuid,
        duration_secs: u64,
    },
    Sent {
        session_id: Uuid,
    },
    /// Upload failure indicator; stays until the next press
    Error {
        message: String,
    },
}

impl Default for State {
    fn default() -> Self {
        State::Idle
    }
}

impl State {
    /// Id of the session this state belongs to, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            State::Idle | State::Error { .. } => None,
            State::Requesting { session_id, .. }
            | State::Recording { session_id, .. }
            | State::CancelPending { session_id, .. }
            | State::Finalizing { session_id }
            | State::Uploading { session_id, .. }
            | State::Sent { session_id } => Some(*session_id),
        }
    }

    /// Whether a press may start a new session. False while a session is
    /// anywhere from requesting through uploading.
    pub fn accepts_press(&self) -> bool {
        matches!(
            self,
            State::Idle | State::Sent { .. } | State::Error { .. }
        )
    }
}

/// Events that can trigger state transitions.
/// These come from the host's pointer input, the capture session, the timer
/// and the upload task.
#[derive(Debug, Clone)]
pub enum Event {
    /// Pointer went down; carries the fresh gesture's cancel latch
    PressStart { latch: CancelLatch },
    /// The gesture's drag crossed the cancel threshold
    CancelLatched,
    /// Pointer went up with the gesture's verdict
    PressEnd { cancel: bool },

    // Capture events
    CaptureStartOk {
        id: Uuid,
    },
    CaptureStartFail {
        id: Uuid,
        err: CaptureError,
    },
    /// Timer tick while recording (includes id to prevent stale ticks)
    RecordingTick {
        id: Uuid,
        elapsed_secs: u64,
    },
    /// The stream failed mid-recording
    CaptureFailed {
        id: Uuid,
        err: CaptureError,
    },
    FinalizeOk {
        id: Uuid,
        audio: AudioBlob,
    },
    FinalizeFail {
        id: Uuid,
        err: CaptureError,
    },

    // Upload events
    UploadOk {
        id: Uuid,
    },
    UploadFail {
        id: Uuid,
        err: UploadError,
    },
    /// Sent indicator display time elapsed (includes id to prevent stale timeouts)
    SentTimeout {
        id: Uuid,
    },
}

/// Effects to be executed after a state transition.
#[derive(Debug, Clone)]
pub enum Effect {
    StartCapture {
        id: Uuid,
        latch: CancelLatch,
    },
    /// Synchronous teardown; never waits on outstanding work
    CancelCapture {
        id: Uuid,
    },
    FinalizeCapture {
        id: Uuid,
    },
    Upload {
        id: Uuid,
        audio: AudioBlob,
        duration_secs: u64,
    },
    StartSentTimeout {
        id: Uuid,
        duration: Duration,
    },
    Notify(StatusEvent),
    /// Signal to emit UI state to the host
    EmitUi,
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events with stale session IDs
/// - Always emit EmitUi after state changes
pub fn reduce(state: &State, event: Event, settings: &RecorderSettings) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current_id = state.session_id();
    let is_current = |eid: Uuid| current_id == Some(eid);

    match (state, event) {
        // -----------------
        // New press
        // -----------------
        (Idle | Sent { .. } | Error { .. }, PressStart { latch }) => {
            let id = Uuid::new_v4();
            (
                Requesting {
                    session_id: id,
                    cancel_latched: latch.is_set(),
                },
                vec![StartCapture { id, latch }, EmitUi],
            )
        }
        // One session at a time
        (_, PressStart { .. }) => (state.clone(), vec![]),

        // -----------------
        // Requesting
        // -----------------
        (Requesting { session_id, .. }, CancelLatched) => (
            Requesting {
                session_id: *session_id,
                cancel_latched: true,
            },
            vec![],
        ),
        (
            Requesting {
                session_id,
                cancel_latched,
            },
            CaptureStartOk { id },
        ) if *session_id == id => {
            let started_at = Instant::now();
            let next = if *cancel_latched {
                CancelPending {
                    session_id: id,
                    started_at,
                    elapsed_secs: 0,
                }
            } else {
                Recording {
                    session_id: id,
                    started_at,
                    elapsed_secs: 0,
                }
            };
            (next, vec![Notify(StatusEvent::RecordingStarted), EmitUi])
        }
        (Requesting { session_id, .. }, CaptureStartFail { id, err }) if *session_id == id => (
            Idle,
            vec![
                Notify(StatusEvent::CaptureFailed {
                    reason: err.to_string(),
                }),
                EmitUi,
            ],
        ),
        // Released before the microphone was granted: abandon the press
        (Requesting { session_id, .. }, PressEnd { .. }) => (
            Idle,
            vec![CancelCapture { id: *session_id }, EmitUi],
        ),

        // -----------------
        // Recording / CancelPending
        // -----------------
        (
            Recording {
                session_id,
                started_at,
                elapsed_secs,
            },
            CancelLatched,
        ) => (
            CancelPending {
                session_id: *session_id,
                started_at: *started_at,
                elapsed_secs: *elapsed_secs,
            },
            vec![EmitUi],
        ),
        (
            Recording {
                session_id,
                ..
            }
            | CancelPending {
                session_id,
                ..
            },
            PressEnd { cancel },
        ) => {
            if cancel || matches!(state, CancelPending { .. }) {
                cancelled(*session_id)
            } else {
                (
                    Finalizing {
                        session_id: *session_id,
                    },
                    vec![FinalizeCapture { id: *session_id }, EmitUi],
                )
            }
        }
        (
            Recording {
                session_id,
                started_at,
                elapsed_secs,
            },
            RecordingTick {
                id,
                elapsed_secs: tick,
            },
        ) if *session_id == id => {
            let elapsed = tick.max(*elapsed_secs);
            if settings.max_recording_secs().is_some_and(|max| elapsed >= max) {
                log::warn!(
                    "Recording {} auto-stopped after {}s (max duration reached)",
                    session_id,
                    elapsed
                );
                (
                    Finalizing {
                        session_id: *session_id,
                    },
                    vec![FinalizeCapture { id: *session_id }, EmitUi],
                )
            } else {
                (
                    Recording {
                        session_id: *session_id,
                        started_at: *started_at,
                        elapsed_secs: elapsed,
                    },
                    vec![EmitUi],
                )
            }
        }
        (
            CancelPending {
                session_id,
                started_at,
                elapsed_secs,
            },
            RecordingTick {
                id,
                elapsed_secs: tick,
            },
        ) if *session_id == id => {
            let elapsed = tick.max(*elapsed_secs);
            if settings.max_recording_secs().is_some_and(|max| elapsed >= max) {
                log::warn!(
                    "Recording {} hit max duration with cancel armed; discarding",
                    session_id
                );
                cancelled(*session_id)
            } else {
                (
                    CancelPending {
                        session_id: *session_id,
                        started_at: *started_at,
                        elapsed_secs: elapsed,
                    },
                    vec![EmitUi],
                )
            }
        }
        // A stream can die before its start completion is processed; the
        // cancel effect then releases it as soon as the runner sees it
        (
            Requesting { session_id, .. }
            | Recording { session_id, .. }
            | CancelPending { session_id, .. },
            CaptureFailed { id, err },
        ) if *session_id == id => (
            Idle,
            vec![
                CancelCapture { id },
                Notify(StatusEvent::CaptureFailed {
                    reason: err.to_string(),
                }),
                EmitUi,
            ],
        ),

        // -----------------
        // Finalizing
        // -----------------
        (Finalizing { session_id }, FinalizeOk { id, audio }) if *session_id == id => {
            let duration_secs = audio.duration_secs;
            (
                Uploading {
                    session_id: id,
                    duration_secs,
                },
                vec![
                    Notify(StatusEvent::RecordingFinished { duration_secs }),
                    Upload {
                        id,
                        audio,
                        duration_secs,
                    },
                    Notify(StatusEvent::UploadStarted),
                    EmitUi,
                ],
            )
        }
        (Finalizing { session_id }, FinalizeFail { id, err }) if *session_id == id => (
            Idle,
            vec![
                Notify(StatusEvent::CaptureFailed {
                    reason: err.to_string(),
                }),
                EmitUi,
            ],
        ),

        // -----------------
        // Uploading
        // -----------------
        (Uploading { session_id, .. }, UploadOk { id }) if *session_id == id => (
            Sent { session_id: id },
            vec![
                Notify(StatusEvent::UploadSucceeded),
                StartSentTimeout {
                    id,
                    duration: settings.sent_display(),
                },
                EmitUi,
            ],
        ),
        (Uploading { session_id, .. }, UploadFail { id, err }) if *session_id == id => (
            Error {
                message: err.to_string(),
            },
            vec![
                Notify(StatusEvent::UploadFailed {
                    reason: err.to_string(),
                }),
                EmitUi,
            ],
        ),

        // -----------------
        // Sent
        // -----------------
        // Only handle SentTimeout if id matches current session (prevents stale timeouts)
        (Sent { session_id }, SentTimeout { id }) if *session_id == id => (Idle, vec![EmitUi]),

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, CaptureStartOk { id }) if !is_current(id) => {
            log::debug!("Dropping stale CaptureStartOk for {}", id);
            (state.clone(), vec![])
        }
        (_, FinalizeOk { id, .. }) if !is_current(id) => {
            log::debug!("Dropping stale FinalizeOk for {}", id);
            (state.clone(), vec![])
        }

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}

fn cancelled(id: Uuid) -> (State, Vec<Effect>) {
    (
        State::Idle,
        vec![
            Effect::CancelCapture { id },
            Effect::Notify(StatusEvent::RecordingCancelled),
            Effect::EmitUi,
        ],
    )
}
