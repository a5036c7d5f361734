//! Hand-off of a finished recording to the caller's send function

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::audio::AudioBlob;

/// Errors that can occur while delivering a recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// Transport failure before a response arrived
    Network(String),
    /// The receiving end answered with an error
    Rejected { status: u16, message: String },
    /// The send function didn't settle within the upload timeout
    TimedOut(Duration),
    /// The payload couldn't be built
    Payload(String),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Network(e) => write!(f, "Network error: {}", e),
            UploadError::Rejected { status, message } => {
                write!(f, "Upload rejected ({}): {}", status, message)
            }
            UploadError::TimedOut(after) => write!(f, "Upload timed out after {:?}", after),
            UploadError::Payload(e) => write!(f, "Failed to build upload payload: {}", e),
        }
    }
}

impl std::error::Error for UploadError {}

/// File-like payload handed to the send function.
///
/// Duration travels alongside the audio rather than inside it.
#[derive(Clone)]
pub struct AudioFile {
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
    pub duration_secs: u64,
}

impl std::fmt::Debug for AudioFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFile")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .field("duration_secs", &self.duration_secs)
            .finish()
    }
}

/// Caller-supplied transport for finished recordings.
pub type SendFn = Arc<dyn Fn(AudioFile) -> BoxFuture<'static, Result<(), UploadError>> + Send + Sync>;

/// Wrap an async closure as a [`SendFn`].
pub fn send_fn<F, Fut>(f: F) -> SendFn
where
    F: Fn(AudioFile) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), UploadError>> + Send + 'static,
{
    Arc::new(move |file| Box::pin(f(file)))
}

/// File name for a recording: voice_<YYYYmmdd_HHMMSS>_<session id>.wav
pub fn file_name_for(session_id: Uuid) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    format!("voice_{}_{}.wav", timestamp, session_id)
}

/// Wraps finished audio into an [`AudioFile`] and drives one send attempt.
///
/// There is no retry: a failed send is reported and the audio dropped.
#[derive(Debug, Clone)]
pub struct UploadCoordinator {
    timeout: Duration,
}

impl UploadCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn wrap(session_id: Uuid, blob: AudioBlob, duration_secs: u64) -> AudioFile {
        AudioFile {
            file_name: file_name_for(session_id),
            mime_type: blob.mime_type,
            bytes: blob.bytes,
            duration_secs,
        }
    }

    pub async fn upload(
        &self,
        session_id: Uuid,
        blob: AudioBlob,
        duration_secs: u64,
        send: SendFn,
    ) -> Result<(), UploadError> {
        let file = Self::wrap(session_id, blob, duration_secs);
        log::info!(
            "Uploading {} ({} bytes, {}s)",
            file.file_name,
            file.bytes.len(),
            file.duration_secs
        );

        match tokio::time::timeout(self.timeout, send(file)).await {
            Ok(Ok(())) => {
                log::info!("Upload for session {} succeeded", session_id);
                Ok(())
            }
            Ok(Err(e)) => {
                log::error!("Upload for session {} failed: {}", session_id, e);
                Err(e)
            }
            Err(_) => {
                log::error!(
                    "Upload for session {} timed out after {:?}",
                    session_id,
                    self.timeout
                );
                Err(UploadError::TimedOut(self.timeout))
            }
        }
    }
}
