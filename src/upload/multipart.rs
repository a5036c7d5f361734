//! Multipart HTTP send function
//!
//! A ready-made [`SendFn`] that POSTs the recording as a multipart form. Hosts
//! with their own transport pass their own send function instead.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;

use super::coordinator::{send_fn, AudioFile, SendFn, UploadError};

/// Global HTTP client for reuse across requests (avoids TLS handshake overhead)
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Failed to build configured HTTP client ({}); using defaults", e);
                Client::new()
            })
    })
}

/// Build the form: the audio under `field`, plus a `duration` text field.
fn build_form(file: AudioFile, field: &str) -> Result<Form, UploadError> {
    let duration = file.duration_secs.to_string();
    let part = Part::bytes(file.bytes)
        .file_name(file.file_name)
        .mime_str(file.mime_type)
        .map_err(|e| UploadError::Payload(e.to_string()))?;

    Ok(Form::new()
        .part(field.to_string(), part)
        .text("duration", duration))
}

/// Send function that uploads to `endpoint` as `multipart/form-data`.
pub fn multipart_sender(endpoint: impl Into<String>, field: impl Into<String>) -> SendFn {
    let endpoint = endpoint.into();
    let field = field.into();

    send_fn(move |file: AudioFile| {
        let endpoint = endpoint.clone();
        let field = field.clone();
        async move {
            let form = build_form(file, &field)?;

            let response = http_client()
                .post(&endpoint)
                .multipart(form)
                .send()
                .await
                .map_err(|e| UploadError::Network(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            let message = response.text().await.unwrap_or_default();
            log::error!("Upload endpoint error ({}): {}", status.as_u16(), message);
            Err(UploadError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    })
}
