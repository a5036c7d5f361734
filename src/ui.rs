//! Host-facing UI surface
//!
//! The recorder never renders anything itself. It pushes three kinds of
//! updates to the host through [`UiEmitter`]: state snapshots for the
//! button/label, discrete status events, and waveform frames.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::audio::WaveformFrame;
use crate::state_machine::State;

/// UI state sent to the host.
/// Uses tagged union format: { "status": "idle" } or { "status": "recording", "elapsedSecs": 5, ... }
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UiState {
    Idle,
    Requesting,
    Recording {
        #[serde(rename = "elapsedSecs")]
        elapsed_secs: u64,
        #[serde(rename = "cancelArmed")]
        cancel_armed: bool,
    },
    Finalizing,
    Uploading {
        #[serde(rename = "durationSecs")]
        duration_secs: u64,
    },
    Sent,
    Error {
        message: String,
    },
}

/// Discrete lifecycle notifications for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum StatusEvent {
    RecordingStarted,
    RecordingCancelled,
    RecordingFinished {
        #[serde(rename = "durationSecs")]
        duration_secs: u64,
    },
    UploadStarted,
    UploadSucceeded,
    UploadFailed {
        reason: String,
    },
    /// Microphone permission or device failure; the control is ready again.
    CaptureFailed {
        reason: String,
    },
}

/// Convert internal State to UiState for the host
pub fn state_to_ui(state: &State) -> UiState {
    match state {
        State::Idle => UiState::Idle,
        State::Requesting { .. } => UiState::Requesting,
        State::Recording { elapsed_secs, .. } => UiState::Recording {
            elapsed_secs: *elapsed_secs,
            cancel_armed: false,
        },
        State::CancelPending { elapsed_secs, .. } => UiState::Recording {
            elapsed_secs: *elapsed_secs,
            cancel_armed: true,
        },
        State::Finalizing { .. } => UiState::Finalizing,
        State::Uploading { duration_secs, .. } => UiState::Uploading {
            duration_secs: *duration_secs,
        },
        State::Sent { .. } => UiState::Sent,
        State::Error { message } => UiState::Error {
            message: message.clone(),
        },
    }
}

/// Sink for everything the recorder shows to the user.
///
/// Implementations must not block and must not call back into the recorder:
/// `waveform` runs while the renderer holds its frame lock.
pub trait UiEmitter: Send + Sync + 'static {
    fn ui_state(&self, state: UiState);
    fn status(&self, event: StatusEvent);
    fn waveform(&self, frame: WaveformFrame);
}

/// Update delivered by [`ChannelEmitter`].
#[derive(Debug, Clone)]
pub enum UiUpdate {
    State(UiState),
    Status(StatusEvent),
    Waveform(WaveformFrame),
}

/// [`UiEmitter`] that forwards every update into an unbounded channel.
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<UiUpdate>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, update: UiUpdate) {
        if self.tx.send(update).is_err() {
            log::trace!("UI receiver dropped; update discarded");
        }
    }
}

impl UiEmitter for ChannelEmitter {
    fn ui_state(&self, state: UiState) {
        self.forward(UiUpdate::State(state));
    }

    fn status(&self, event: StatusEvent) {
        self.forward(UiUpdate::Status(event));
    }

    fn waveform(&self, frame: WaveformFrame) {
        self.forward(UiUpdate::Waveform(frame));
    }
}
