//! One microphone capture session
//!
//! `AudioCaptureSession` owns the microphone stream for exactly one press.
//! While recording it pumps samples into the chunk buffer and the waveform
//! tap, runs the whole-second timer, and keeps a renderer attached. It ends
//! either through `finalize()` (assemble the WAV) or `cancel()` (discard
//! everything). Both paths, and dropping the session, stop the hardware
//! tracks exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::encoder::{AudioBlob, ChunkBuffer, StreamFormat};
use super::microphone::{CaptureError, InputTracks, MicStream, Microphone, StreamEvent};
use super::timer::{RecordingTimer, TickCallback};
use super::waveform::{SampleTap, WaveformRenderer};
use crate::gesture::CancelLatch;
use crate::ui::UiEmitter;

/// Called when the stream fails while recording.
pub type FailureCallback = Arc<dyn Fn(CaptureError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Requesting,
    Recording,
    Cancelling,
    Stopping,
    Released,
}

/// Exclusive hold on the hardware tracks. Stops them at most once.
pub struct MicGuard {
    tracks: Option<Box<dyn InputTracks>>,
}

impl MicGuard {
    pub fn new(tracks: Box<dyn InputTracks>) -> Self {
        Self {
            tracks: Some(tracks),
        }
    }

    /// Stop the tracks. Returns false if they were already stopped.
    pub fn release(&mut self) -> bool {
        match self.tracks.take() {
            Some(mut tracks) => {
                tracks.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.tracks.is_some()
    }
}

impl Drop for MicGuard {
    fn drop(&mut self) {
        self.release();
    }
}

struct ActiveCapture {
    mic: MicGuard,
    chunks: Arc<Mutex<ChunkBuffer>>,
    tap: SampleTap,
    renderer: WaveformRenderer,
    pump: JoinHandle<Option<CaptureError>>,
    stopping: Arc<AtomicBool>,
    drain: CancellationToken,
}

pub struct AudioCaptureSession {
    id: Uuid,
    state: CaptureState,
    latch: CancelLatch,
    emitter: Arc<dyn UiEmitter>,
    frame_interval: Duration,
    timer: RecordingTimer,
    on_failure: FailureCallback,
    active: Option<ActiveCapture>,
}

fn lock_chunks(chunks: &Mutex<ChunkBuffer>) -> MutexGuard<'_, ChunkBuffer> {
    chunks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AudioCaptureSession {
    pub fn new(
        id: Uuid,
        latch: CancelLatch,
        emitter: Arc<dyn UiEmitter>,
        frame_interval: Duration,
        on_tick: TickCallback,
        on_failure: FailureCallback,
    ) -> Self {
        Self {
            id,
            state: CaptureState::Idle,
            latch,
            emitter,
            frame_interval,
            timer: RecordingTimer::new(on_tick),
            on_failure,
            active: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.timer.current_value()
    }

    pub fn holds_microphone(&self) -> bool {
        self.active.as_ref().map_or(false, |a| a.mic.is_held())
    }

    /// Request the microphone and begin recording.
    ///
    /// On failure the session returns to `Idle` holding nothing.
    pub async fn start(&mut self, microphone: &dyn Microphone) -> Result<(), CaptureError> {
        if self.state != CaptureState::Idle {
            return Err(CaptureError::InvalidState("start requires an idle session"));
        }
        self.state = CaptureState::Requesting;

        let stream = match microphone.open().await {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("Capture {}: microphone request failed: {}", self.id, e);
                self.state = CaptureState::Idle;
                return Err(e);
            }
        };

        let MicStream {
            format,
            tracks,
            events,
        } = stream;
        let mic = MicGuard::new(tracks);

        let chunks = Arc::new(Mutex::new(ChunkBuffer::new(format)));
        let tap = SampleTap::new();
        let stopping = Arc::new(AtomicBool::new(false));
        let drain = CancellationToken::new();

        let pump = tokio::spawn(run_sample_pump(
            self.id,
            events,
            chunks.clone(),
            tap.clone(),
            stopping.clone(),
            drain.clone(),
            self.on_failure.clone(),
        ));

        self.timer.start();
        let renderer = WaveformRenderer::attach(
            tap.clone(),
            self.latch.clone(),
            self.emitter.clone(),
            self.frame_interval,
        );

        self.active = Some(ActiveCapture {
            mic,
            chunks,
            tap,
            renderer,
            pump,
            stopping,
            drain,
        });
        self.state = CaptureState::Recording;
        log_started(self.id, format);
        Ok(())
    }

    /// Stop recording and assemble the buffered audio.
    pub async fn finalize(&mut self) -> Result<AudioBlob, CaptureError> {
        if self.state != CaptureState::Recording {
            return Err(CaptureError::InvalidState("finalize requires a recording session"));
        }
        let Some(mut active) = self.active.take() else {
            return Err(CaptureError::InvalidState("recording session has no stream"));
        };
        self.state = CaptureState::Stopping;

        let duration_secs = self.timer.stop();
        active.renderer.detach();
        active.stopping.store(true, Ordering::SeqCst);
        active.mic.release();
        active.tap.release();
        active.drain.cancel();

        let pump_result = match (&mut active.pump).await {
            Ok(failure) => failure,
            Err(e) => Some(CaptureError::DeviceError(format!("sample pump failed: {}", e))),
        };
        self.state = CaptureState::Released;

        if let Some(err) = pump_result {
            lock_chunks(&active.chunks).discard();
            log::error!("Capture {}: stream failed before finalize: {}", self.id, err);
            return Err(err);
        }

        let blob = lock_chunks(&active.chunks)
            .assemble(duration_secs)
            .map_err(|e| CaptureError::DeviceError(e.to_string()))?;

        log::info!(
            "Capture {} finalized: {}s, {} bytes",
            self.id,
            blob.duration_secs,
            blob.bytes.len()
        );
        Ok(blob)
    }

    /// Tear everything down and discard the audio. Synchronous and idempotent.
    pub fn cancel(&mut self) {
        let Some(mut active) = self.active.take() else {
            if self.state == CaptureState::Requesting || self.state == CaptureState::Idle {
                log::debug!("Capture {}: cancel with no stream held", self.id);
            }
            return;
        };
        self.state = CaptureState::Cancelling;

        self.timer.stop();
        active.renderer.detach();
        active.stopping.store(true, Ordering::SeqCst);
        lock_chunks(&active.chunks).discard();
        active.mic.release();
        active.tap.release();
        active.pump.abort();

        self.state = CaptureState::Released;
        log::info!("Capture {} cancelled; audio discarded", self.id);
    }
}

impl Drop for AudioCaptureSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn log_started(id: Uuid, format: StreamFormat) {
    log::info!(
        "Capture {} recording: {} Hz, {} channel(s)",
        id,
        format.sample_rate,
        format.channels
    );
}

/// Move stream events into the chunk buffer and the waveform tap.
///
/// Returns the failure that ended the stream, if any. After `drain` fires it
/// flushes whatever the stream already delivered and exits.
async fn run_sample_pump(
    id: Uuid,
    mut events: mpsc::UnboundedReceiver<StreamEvent>,
    chunks: Arc<Mutex<ChunkBuffer>>,
    tap: SampleTap,
    stopping: Arc<AtomicBool>,
    drain: CancellationToken,
    on_failure: FailureCallback,
) -> Option<CaptureError> {
    loop {
        tokio::select! {
            biased;

            _ = drain.cancelled() => {
                while let Ok(event) = events.try_recv() {
                    if let StreamEvent::Samples(samples) = event {
                        lock_chunks(&chunks).append(&samples);
                    }
                }
                return None;
            }

            event = events.recv() => match event {
                Some(StreamEvent::Samples(samples)) => {
                    if lock_chunks(&chunks).append(&samples) {
                        tap.push(&samples);
                    }
                }
                Some(StreamEvent::Ended { reason }) => {
                    if stopping.load(Ordering::SeqCst) {
                        continue;
                    }
                    return Some(stream_failed(id, &chunks, &on_failure, reason));
                }
                None => {
                    if stopping.load(Ordering::SeqCst) {
                        // Stream closed by our own release; wait for the drain signal
                        drain.cancelled().await;
                        return None;
                    }
                    return Some(stream_failed(
                        id,
                        &chunks,
                        &on_failure,
                        "input stream closed unexpectedly".to_string(),
                    ));
                }
            }
        }
    }
}

fn stream_failed(
    id: Uuid,
    chunks: &Mutex<ChunkBuffer>,
    on_failure: &FailureCallback,
    reason: String,
) -> CaptureError {
    lock_chunks(chunks).close();
    log::error!("Capture {}: input stream failed: {}", id, reason);
    let err = CaptureError::DeviceError(reason);
    on_failure(err.clone());
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::WaveformFrame;
    use crate::ui::{StatusEvent, UiState};
    use futures_util::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;

    struct NullEmitter;

    impl UiEmitter for NullEmitter {
        fn ui_state(&self, _: UiState) {}
        fn status(&self, _: StatusEvent) {}
        fn waveform(&self, _: WaveformFrame) {}
    }

    struct CountingTracks(Arc<AtomicUsize>);

    impl InputTracks for CountingTracks {
        fn stop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Grants immediately; hands the sample sender back through `feed`.
    struct TestMic {
        stops: Arc<AtomicUsize>,
        feed: Arc<Mutex<Option<mpsc::UnboundedSender<StreamEvent>>>>,
        deny: bool,
    }

    impl TestMic {
        fn new(deny: bool) -> Self {
            Self {
                stops: Arc::new(AtomicUsize::new(0)),
                feed: Arc::new(Mutex::new(None)),
                deny,
            }
        }

        fn send(&self, event: StreamEvent) {
            if let Some(tx) = self.feed.lock().unwrap().as_ref() {
                let _ = tx.send(event);
            }
        }
    }

    impl Microphone for TestMic {
        fn open(&self) -> BoxFuture<'static, Result<MicStream, CaptureError>> {
            let deny = self.deny;
            let stops = self.stops.clone();
            let feed = self.feed.clone();
            Box::pin(async move {
                if deny {
                    return Err(CaptureError::PermissionDenied("test".to_string()));
                }
                let (tx, rx) = mpsc::unbounded_channel();
                *feed.lock().unwrap() = Some(tx);
                Ok(MicStream::new(
                    StreamFormat::mono(8_000),
                    Box::new(CountingTracks(stops)),
                    rx,
                ))
            })
        }
    }

    fn session(failures: Arc<AtomicUsize>) -> AudioCaptureSession {
        AudioCaptureSession::new(
            Uuid::new_v4(),
            CancelLatch::new(),
            Arc::new(NullEmitter),
            Duration::from_millis(16),
            Arc::new(|_| {}),
            Arc::new(move |_| {
                failures.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn mic_guard_releases_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut guard = MicGuard::new(Box::new(CountingTracks(stops.clone())));
        assert!(guard.release());
        assert!(!guard.release());
        drop(guard);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_returns_buffered_audio() {
        let mic = TestMic::new(false);
        let mut capture = session(Arc::new(AtomicUsize::new(0)));

        capture.start(&mic).await.unwrap();
        assert_eq!(capture.state(), CaptureState::Recording);
        assert!(capture.holds_microphone());

        mic.send(StreamEvent::Samples(vec![100; 800]));
        tokio::time::sleep(Duration::from_millis(2100)).await;
        mic.send(StreamEvent::Samples(vec![200; 800]));

        let blob = capture.finalize().await.unwrap();
        assert_eq!(capture.state(), CaptureState::Released);
        assert_eq!(blob.duration_secs, 2);

        let reader = hound::WavReader::new(std::io::Cursor::new(blob.bytes)).unwrap();
        assert_eq!(reader.len(), 1600);
        assert_eq!(mic.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_releases_once_and_is_idempotent() {
        let mic = TestMic::new(false);
        let mut capture = session(Arc::new(AtomicUsize::new(0)));
        capture.start(&mic).await.unwrap();
        mic.send(StreamEvent::Samples(vec![1; 100]));

        capture.cancel();
        capture.cancel();
        drop(capture);

        assert_eq!(mic.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_after_cancel_is_rejected() {
        let mic = TestMic::new(false);
        let mut capture = session(Arc::new(AtomicUsize::new(0)));
        capture.start(&mic).await.unwrap();
        capture.cancel();

        assert!(matches!(
            capture.finalize().await,
            Err(CaptureError::InvalidState(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_start_returns_to_idle() {
        let mic = TestMic::new(true);
        let mut capture = session(Arc::new(AtomicUsize::new(0)));

        let result = capture.start(&mic).await;
        assert!(matches!(result, Err(CaptureError::PermissionDenied(_))));
        assert_eq!(capture.state(), CaptureState::Idle);
        assert!(!capture.holds_microphone());
        assert_eq!(capture.elapsed_secs(), 0);
        drop(capture);
        assert_eq!(mic.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_failure_reports_once_and_blocks_finalize() {
        let mic = TestMic::new(false);
        let failures = Arc::new(AtomicUsize::new(0));
        let mut capture = session(failures.clone());
        capture.start(&mic).await.unwrap();

        mic.send(StreamEvent::Samples(vec![5; 100]));
        mic.send(StreamEvent::Ended {
            reason: "device unplugged".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        let result = capture.finalize().await;
        assert!(matches!(result, Err(CaptureError::DeviceError(_))));
        assert_eq!(mic.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_rejected() {
        let mic = TestMic::new(false);
        let mut capture = session(Arc::new(AtomicUsize::new(0)));
        capture.start(&mic).await.unwrap();

        assert!(matches!(
            capture.start(&mic).await,
            Err(CaptureError::InvalidState(_))
        ));
        capture.cancel();
        assert_eq!(mic.stops.load(Ordering::SeqCst), 1);
    }
}
