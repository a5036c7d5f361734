//! Upload module
//!
//! Wraps a finished recording into a file payload and hands it to the
//! caller's send function.

mod coordinator;
pub mod multipart;

pub use coordinator::{
    file_name_for, send_fn, AudioFile, SendFn, UploadCoordinator, UploadError,
};
pub use multipart::multipart_sender;
