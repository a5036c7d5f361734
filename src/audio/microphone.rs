//! Microphone access
//!
//! [`Microphone`] is the seam between the capture session and the audio
//! hardware. [`CpalMicrophone`] opens the default input device with CPAL on a
//! dedicated thread, so the returned stream handle is `Send` on every
//! platform.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use super::encoder::{sample_to_i16, StreamFormat};

/// Errors that can occur while acquiring or running the microphone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The user or the OS refused microphone access
    PermissionDenied(String),
    /// The device is missing, failed to open, or failed mid-recording
    DeviceError(String),
    /// A lifecycle call arrived in a state that doesn't accept it
    InvalidState(&'static str),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::PermissionDenied(e) => write!(f, "Microphone permission denied: {}", e),
            CaptureError::DeviceError(e) => write!(f, "Audio device error: {}", e),
            CaptureError::InvalidState(e) => write!(f, "Invalid capture state: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

/// What an open input stream delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Interleaved samples from one hardware callback
    Samples(Vec<i16>),
    /// The stream stopped on its own (device unplugged, permission revoked)
    Ended { reason: String },
}

/// The hardware side of an open stream.
pub trait InputTracks: Send {
    /// Stop the underlying hardware tracks. Called at most once.
    fn stop(&mut self);
}

/// An open microphone stream.
pub struct MicStream {
    pub format: StreamFormat,
    pub tracks: Box<dyn InputTracks>,
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl MicStream {
    pub fn new(
        format: StreamFormat,
        tracks: Box<dyn InputTracks>,
        events: mpsc::UnboundedReceiver<StreamEvent>,
    ) -> Self {
        Self {
            format,
            tracks,
            events,
        }
    }
}

/// Source of microphone streams.
pub trait Microphone: Send + Sync + 'static {
    /// Request access and open a stream. Resolves once the stream is live.
    fn open(&self) -> BoxFuture<'static, Result<MicStream, CaptureError>>;
}

/// Map a backend error message onto the capture taxonomy.
fn classify(message: String) -> CaptureError {
    let lower = message.to_lowercase();
    let denied = ["permission", "denied", "not permitted", "unauthorized"]
        .iter()
        .any(|needle| lower.contains(needle));
    if denied {
        CaptureError::PermissionDenied(message)
    } else {
        CaptureError::DeviceError(message)
    }
}

/// Default input device via CPAL.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self) -> BoxFuture<'static, Result<MicStream, CaptureError>> {
        Box::pin(async move {
            let (ready_tx, ready_rx) = oneshot::channel();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

            let thread = std::thread::Builder::new()
                .name("mic-capture".to_string())
                .spawn(move || run_capture_thread(event_tx, stop_rx, ready_tx))
                .map_err(|e| CaptureError::DeviceError(e.to_string()))?;

            let format = match ready_rx.await {
                Ok(Ok(format)) => format,
                Ok(Err(e)) => {
                    let _ = thread.join();
                    return Err(e);
                }
                Err(_) => {
                    let _ = thread.join();
                    return Err(CaptureError::DeviceError(
                        "capture thread exited before the stream opened".to_string(),
                    ));
                }
            };

            let tracks = CpalTracks {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            };
            Ok(MicStream::new(format, Box::new(tracks), event_rx))
        })
    }
}

/// Owns the capture thread; stopping it drops the CPAL stream.
struct CpalTracks {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl InputTracks for CpalTracks {
    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Microphone capture thread panicked");
            }
        }
        log::info!("Microphone stream stopped");
    }
}

fn run_capture_thread(
    events: mpsc::UnboundedSender<StreamEvent>,
    stop_rx: std_mpsc::Receiver<()>,
    ready: oneshot::Sender<Result<StreamFormat, CaptureError>>,
) {
    let stream = match open_default_input(events) {
        Ok((stream, format)) => {
            if ready.send(Ok(format)).is_err() {
                log::debug!("Microphone open abandoned by caller");
                return;
            }
            stream
        }
        Err(e) => {
            log::error!("Failed to open microphone: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Block until stop is requested or the handle is dropped
    let _ = stop_rx.recv();
    drop(stream);
}

fn open_default_input(
    events: mpsc::UnboundedSender<StreamEvent>,
) -> Result<(Stream, StreamFormat), CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::DeviceError("No audio input device found".to_string()))?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported = device
        .default_input_config()
        .map_err(|e| classify(e.to_string()))?;

    log::info!(
        "Audio config: {} Hz, {} channels, {:?}",
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format()
    );

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let format = StreamFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    let stream = match sample_format {
        SampleFormat::I16 => build_stream::<i16>(&device, &config, events)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, events)?,
        SampleFormat::F32 => build_stream::<f32>(&device, &config, events)?,
        other => {
            return Err(CaptureError::DeviceError(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    };

    stream.play().map_err(|e| classify(e.to_string()))?;
    Ok((stream, format))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    events: mpsc::UnboundedSender<StreamEvent>,
) -> Result<Stream, CaptureError>
where
    T: cpal::Sample<Float = f32> + cpal::SizedSample + Send + 'static,
{
    let error_events = events.clone();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<i16> = data.iter().map(|&s| sample_to_i16(s)).collect();
                let _ = events.send(StreamEvent::Samples(samples));
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
                let _ = error_events.send(StreamEvent::Ended {
                    reason: err.to_string(),
                });
            },
            None,
        )
        .map_err(|e| classify(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_messages_classify_as_denied() {
        assert!(matches!(
            classify("Permission denied by system".to_string()),
            CaptureError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify("Operation not permitted".to_string()),
            CaptureError::PermissionDenied(_)
        ));
    }

    #[test]
    fn other_messages_classify_as_device_errors() {
        assert!(matches!(
            classify("The requested device is no longer available".to_string()),
            CaptureError::DeviceError(_)
        ));
    }

    #[test]
    fn error_display_names_the_cause() {
        let err = CaptureError::PermissionDenied("blocked".to_string());
        assert!(err.to_string().contains("permission"));
        assert!(err.to_string().contains("blocked"));
    }
}
