//! Push-to-talk voice message recorder
//!
//! Press to record, drag left to cancel, release to send. The host forwards
//! pointer input to a [`RecordingController`] and renders what comes back
//! through its [`UiEmitter`].

pub mod audio;
mod controller;
mod effects;
pub mod gesture;
mod settings;
mod state_machine;
mod ui;
pub mod upload;

pub use controller::RecordingController;
pub use effects::{CaptureEffectRunner, EffectRunner};
pub use gesture::{PointerInput, TouchPoint};
pub use settings::{load_settings, RecorderSettings};
pub use state_machine::{reduce, Effect, Event, State};
pub use ui::{state_to_ui, ChannelEmitter, StatusEvent, UiEmitter, UiState, UiUpdate};
pub use upload::{send_fn, AudioFile, SendFn, UploadError};
