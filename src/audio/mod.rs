//! Audio capture module
//!
//! Microphone access, PCM buffering, the recording timer, and the live
//! waveform for a single push-to-talk session. Uses CPAL for capture and
//! hound for WAV encoding.

pub mod capture;
mod encoder;
pub mod microphone;
mod timer;
mod waveform;

pub use capture::{AudioCaptureSession, CaptureState, FailureCallback, MicGuard};
pub use encoder::{AudioBlob, ChunkBuffer, EncodeError, StreamFormat, AUDIO_MIME_TYPE};
pub use microphone::{
    CaptureError, CpalMicrophone, InputTracks, MicStream, Microphone, StreamEvent,
};
pub use timer::{RecordingTimer, TickCallback};
pub use waveform::{
    SampleTap, TraceColor, WaveformFrame, WaveformRenderer, DEFAULT_FRAME_INTERVAL, NUM_BARS,
};
