use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::audio::DEFAULT_FRAME_INTERVAL;
use crate::gesture::DEFAULT_CANCEL_THRESHOLD_PX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// Leftward drag (device-independent px) that arms cancel.
    pub cancel_threshold_px: f32,

    /// How long the "sent" indicator stays up before clearing.
    pub sent_display_ms: u64,

    /// Recordings are finalized automatically once they reach this length.
    /// Zero disables the limit.
    pub max_recording_secs: u64,

    /// Upper bound on a single call to the send function.
    pub upload_timeout_secs: u64,

    /// Waveform frame interval.
    pub frame_interval_ms: u64,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            cancel_threshold_px: DEFAULT_CANCEL_THRESHOLD_PX,
            sent_display_ms: 2000,
            max_recording_secs: 120,
            upload_timeout_secs: 60,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL.as_millis() as u64,
        }
    }
}

impl RecorderSettings {
    pub fn sent_display(&self) -> Duration {
        Duration::from_millis(self.sent_display_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn frame_interval(&self) -> Duration {
        // A zero interval would make tokio's interval panic
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn max_recording_secs(&self) -> Option<u64> {
        (self.max_recording_secs > 0).then_some(self.max_recording_secs)
    }
}

/// Load settings from a JSON file, falling back to defaults.
pub fn load_settings(path: &Path) -> RecorderSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<RecorderSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                RecorderSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RecorderSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            RecorderSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_design_constants() {
        let s = RecorderSettings::default();
        assert_eq!(s.cancel_threshold_px, 100.0);
        assert_eq!(s.sent_display(), Duration::from_secs(2));
        assert_eq!(s.max_recording_secs(), Some(120));
        assert_eq!(s.upload_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "cancel_threshold_px": 80.0, "max_recording_secs": 0 }}"#).unwrap();

        let s = load_settings(file.path());
        assert_eq!(s.cancel_threshold_px, 80.0);
        assert_eq!(s.max_recording_secs(), None);
        assert_eq!(s.sent_display_ms, 2000);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings(&dir.path().join("nope.json"));
        assert_eq!(s, RecorderSettings::default());
    }

    #[test]
    fn garbage_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert_eq!(load_settings(file.path()), RecorderSettings::default());
    }

    #[test]
    fn zero_frame_interval_is_clamped() {
        let s = RecorderSettings {
            frame_interval_ms: 0,
            ..RecorderSettings::default()
        };
        assert_eq!(s.frame_interval(), Duration::from_millis(1));
    }
}
