//! Chunked PCM buffering and WAV assembly
//!
//! Audio callbacks append 16-bit little-endian PCM fragments while the
//! session is recording. Finalizing assembles them into one in-memory WAV
//! file using hound.

use std::io::Cursor;

use hound::{WavSpec, WavWriter};

/// MIME type of every finished recording.
pub const AUDIO_MIME_TYPE: &str = "audio/wav";

/// Errors that can occur while assembling the finished audio.
#[derive(Debug, Clone)]
pub enum EncodeError {
    /// The buffered audio was discarded by a cancel
    Discarded,
    WriteFailed(String),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::Discarded => write!(f, "Buffered audio was discarded"),
            EncodeError::WriteFailed(e) => write!(f, "Failed to assemble WAV data: {}", e),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Sample format of the input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}

/// Finished recording held in memory.
#[derive(Clone)]
pub struct AudioBlob {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub duration_secs: u64,
    pub format: StreamFormat,
}

impl std::fmt::Debug for AudioBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBlob")
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("duration_secs", &self.duration_secs)
            .field("format", &self.format)
            .finish()
    }
}

/// Ordered PCM fragments for one session.
///
/// Appends are accepted only while open; `close` and `discard` are one-way.
#[derive(Debug)]
pub struct ChunkBuffer {
    format: StreamFormat,
    chunks: Vec<Vec<u8>>,
    open: bool,
    discarded: bool,
}

impl ChunkBuffer {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            chunks: Vec::new(),
            open: true,
            discarded: false,
        }
    }

    /// Encode one callback's worth of samples as a fragment.
    /// Returns false if the buffer no longer accepts audio.
    pub fn append(&mut self, samples: &[i16]) -> bool {
        if !self.open {
            return false;
        }
        if samples.is_empty() {
            return true;
        }
        let mut fragment = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            fragment.extend_from_slice(&sample.to_le_bytes());
        }
        self.chunks.push(fragment);
        true
    }

    /// Stop accepting audio without discarding what was buffered.
    pub fn close(&mut self) {
        self.open = false;
    }

    /// Stop accepting audio and drop everything buffered.
    pub fn discard(&mut self) {
        self.open = false;
        self.discarded = true;
        self.chunks.clear();
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(|c| c.len() / 2).sum()
    }

    /// Assemble the buffered fragments into a contiguous WAV file, emptying
    /// the buffer.
    pub fn assemble(&mut self, duration_secs: u64) -> Result<AudioBlob, EncodeError> {
        if self.discarded {
            return Err(EncodeError::Discarded);
        }
        self.open = false;
        let chunks = std::mem::take(&mut self.chunks);

        let spec = WavSpec {
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec)
                .map_err(|e| EncodeError::WriteFailed(e.to_string()))?;
            for chunk in &chunks {
                for pair in chunk.chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                        .map_err(|e| EncodeError::WriteFailed(e.to_string()))?;
                }
            }
            writer
                .finalize()
                .map_err(|e| EncodeError::WriteFailed(e.to_string()))?;
        }

        Ok(AudioBlob {
            bytes: cursor.into_inner(),
            mime_type: AUDIO_MIME_TYPE,
            duration_secs,
            format: self.format,
        })
    }
}

/// Convert any sample type to i16.
pub fn sample_to_i16<T: cpal::Sample<Float = f32>>(sample: T) -> i16 {
    let f32_sample: f32 = sample.to_float_sample();
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_to_i16() {
        assert_eq!(sample_to_i16(0.0f32), 0);
        assert_eq!(sample_to_i16(1.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-1.0f32), -i16::MAX);

        // Clamping
        assert_eq!(sample_to_i16(2.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-2.0f32), -i16::MAX);
    }

    #[test]
    fn assembled_wav_contains_all_samples_in_order() {
        let mut buffer = ChunkBuffer::new(StreamFormat::mono(16_000));
        buffer.append(&[1, 2, 3]);
        buffer.append(&[-4, 5]);
        assert_eq!(buffer.chunk_count(), 2);
        assert_eq!(buffer.sample_count(), 5);

        let blob = buffer.assemble(1).unwrap();
        assert_eq!(blob.mime_type, "audio/wav");
        assert_eq!(blob.duration_secs, 1);

        let mut reader = hound::WavReader::new(Cursor::new(blob.bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, -4, 5]);
    }

    #[test]
    fn closed_buffer_rejects_appends() {
        let mut buffer = ChunkBuffer::new(StreamFormat::mono(48_000));
        buffer.append(&[10]);
        buffer.close();

        assert!(!buffer.append(&[20]));
        assert_eq!(buffer.sample_count(), 1, "close keeps buffered audio");
    }

    #[test]
    fn discard_drops_buffered_audio() {
        let mut buffer = ChunkBuffer::new(StreamFormat::mono(48_000));
        buffer.append(&[10, 20]);
        buffer.discard();

        assert!(!buffer.is_open());
        assert_eq!(buffer.chunk_count(), 0);
        assert!(!buffer.append(&[30]));
        assert!(matches!(buffer.assemble(1), Err(EncodeError::Discarded)));
    }

    #[test]
    fn empty_recording_is_still_a_valid_wav() {
        let mut buffer = ChunkBuffer::new(StreamFormat::mono(48_000));
        let blob = buffer.assemble(0).unwrap();
        let reader = hound::WavReader::new(Cursor::new(blob.bytes)).unwrap();
        assert_eq!(reader.len(), 0);
    }

    #[test]
    fn blob_debug_hides_payload() {
        let blob = AudioBlob {
            bytes: vec![0; 4096],
            mime_type: AUDIO_MIME_TYPE,
            duration_secs: 2,
            format: StreamFormat::mono(48_000),
        };
        let debug = format!("{:?}", blob);
        assert!(debug.contains("4096"));
        assert!(debug.len() < 200);
    }
}
