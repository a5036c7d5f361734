//! Live waveform rendering
//!
//! The capture pump pushes PCM into a [`SampleTap`]; a [`WaveformRenderer`]
//! samples the tap on every display frame, reduces it to per-bar RMS levels
//! with EMA smoothing, and hands a [`WaveformFrame`] to the host. The trace
//! colour follows the gesture's cancel latch.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::gesture::CancelLatch;
use crate::ui::UiEmitter;

/// Number of visualization bars
pub const NUM_BARS: usize = 24;

/// Tap capacity (~200ms at 48kHz mono)
const TAP_CAPACITY: usize = 10_000;

/// EMA smoothing factor (0.3 = 30% new value, 70% previous)
const EMA_ALPHA: f32 = 0.3;

/// Default frame interval, roughly one display refresh at 60Hz
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TraceColor {
    Live,
    Cancel,
}

/// One rendered frame of the live trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveformFrame {
    pub seq: u64,
    pub bars: [f32; NUM_BARS],
    pub color: TraceColor,
}

struct TapState {
    samples: VecDeque<i16>,
    released: bool,
}

/// Live analysis tap over the most recent time-domain samples.
///
/// Owned by the capture session. Once released it accepts no samples and
/// yields no levels.
#[derive(Clone)]
pub struct SampleTap {
    state: Arc<Mutex<TapState>>,
}

impl SampleTap {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TapState {
                samples: VecDeque::with_capacity(TAP_CAPACITY),
                released: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TapState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append samples, evicting the oldest beyond capacity.
    pub fn push(&self, samples: &[i16]) {
        let mut state = self.lock();
        if state.released {
            return;
        }

        let len = samples.len();
        if len >= TAP_CAPACITY {
            state.samples.clear();
            state.samples.extend(&samples[len - TAP_CAPACITY..]);
            return;
        }

        let overflow = (state.samples.len() + len).saturating_sub(TAP_CAPACITY);
        if overflow > 0 {
            state.samples.drain(0..overflow);
        }
        state.samples.extend(samples);
    }

    /// Per-bar RMS levels in 0.0-1.0, or `None` once the tap is released.
    pub fn levels(&self) -> Option<[f32; NUM_BARS]> {
        let state = self.lock();
        if state.released {
            return None;
        }
        Some(rms_bars(&state.samples))
    }

    pub fn release(&self) {
        let mut state = self.lock();
        state.released = true;
        state.samples.clear();
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().samples.len()
    }
}

impl Default for SampleTap {
    fn default() -> Self {
        Self::new()
    }
}

/// Split the window into NUM_BARS segments and take the RMS of each.
fn rms_bars(samples: &VecDeque<i16>) -> [f32; NUM_BARS] {
    let mut bars = [0.0f32; NUM_BARS];
    if samples.is_empty() {
        return bars;
    }

    let per_bar = (samples.len() / NUM_BARS).max(1);
    for (idx, bar) in bars.iter_mut().enumerate() {
        let start = idx * per_bar;
        if start >= samples.len() {
            break;
        }
        let end = ((idx + 1) * per_bar).min(samples.len());

        let sum_squares: f64 = samples
            .range(start..end)
            .map(|&s| {
                let normalized = s as f64 / i16::MAX as f64;
                normalized * normalized
            })
            .sum();
        let rms = (sum_squares / (end - start) as f64).sqrt();
        *bar = (rms as f32).clamp(0.0, 1.0);
    }
    bars
}

/// smoothed[i] = alpha * current[i] + (1 - alpha) * previous[i]
struct Smoother {
    prev: Option<[f32; NUM_BARS]>,
}

impl Smoother {
    fn new() -> Self {
        Self { prev: None }
    }

    fn apply(&mut self, bars: &mut [f32; NUM_BARS]) {
        if let Some(prev) = self.prev {
            for (bar, old) in bars.iter_mut().zip(prev.iter()) {
                *bar = EMA_ALPHA * *bar + (1.0 - EMA_ALPHA) * old;
            }
        }
        self.prev = Some(*bars);
    }
}

struct LoopState {
    attached: bool,
    frames_emitted: u64,
}

/// Frame loop bound to one capture session.
///
/// A renderer is single-use: `attach` starts a sequence, `detach` ends it for
/// good. Frames are emitted while holding the loop lock and `detach` takes
/// that lock, so no frame reaches the host after `detach` returns.
pub struct WaveformRenderer {
    state: Arc<Mutex<LoopState>>,
    cancel: CancellationToken,
}

impl WaveformRenderer {
    /// Start rendering `tap`. Must be called inside a tokio runtime.
    pub fn attach(
        tap: SampleTap,
        latch: CancelLatch,
        emitter: Arc<dyn UiEmitter>,
        frame_interval: Duration,
    ) -> Self {
        let state = Arc::new(Mutex::new(LoopState {
            attached: true,
            frames_emitted: 0,
        }));
        let cancel = CancellationToken::new();

        let loop_state = state.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut smoother = Smoother::new();
            let mut frames = interval(frame_interval);
            frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

            log::debug!("Waveform renderer attached");
            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break,

                    _ = frames.tick() => {
                        let mut state = lock_loop(&loop_state);
                        if !state.attached {
                            break;
                        }
                        let Some(mut bars) = tap.levels() else {
                            log::debug!("Sample tap released under renderer; stopping");
                            state.attached = false;
                            break;
                        };
                        smoother.apply(&mut bars);

                        let color = if latch.is_set() {
                            TraceColor::Cancel
                        } else {
                            TraceColor::Live
                        };
                        let seq = state.frames_emitted;
                        state.frames_emitted += 1;
                        emitter.waveform(WaveformFrame { seq, bars, color });
                    }
                }
            }
            log::debug!("Waveform renderer loop ended");
        });

        Self { state, cancel }
    }

    /// Stop the frame loop. Synchronous and final; safe to call repeatedly.
    pub fn detach(&self) {
        let frames = {
            let mut state = lock_loop(&self.state);
            if !state.attached {
                return;
            }
            state.attached = false;
            state.frames_emitted
        };
        self.cancel.cancel();
        log::debug!("Waveform renderer detached after {} frames", frames);
    }

    pub fn is_attached(&self) -> bool {
        lock_loop(&self.state).attached
    }

    pub fn frames_emitted(&self) -> u64 {
        lock_loop(&self.state).frames_emitted
    }
}

impl Drop for WaveformRenderer {
    fn drop(&mut self) {
        self.detach();
    }
}

fn lock_loop(state: &Mutex<LoopState>) -> MutexGuard<'_, LoopState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::{GestureTracker, PointerInput};
    use crate::ui::{StatusEvent, UiState};

    #[derive(Default)]
    struct FrameLog {
        frames: Mutex<Vec<WaveformFrame>>,
    }

    impl FrameLog {
        fn frames(&self) -> Vec<WaveformFrame> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl UiEmitter for FrameLog {
        fn ui_state(&self, _: UiState) {}
        fn status(&self, _: StatusEvent) {}
        fn waveform(&self, frame: WaveformFrame) {
            self.frames.lock().unwrap().push(frame);
        }
    }

    #[test]
    fn tap_is_bounded() {
        let tap = SampleTap::new();
        let samples: Vec<i16> = (0..15_000).map(|i| (i % 1000) as i16).collect();
        tap.push(&samples);
        assert_eq!(tap.len(), TAP_CAPACITY);

        tap.push(&[1, 2, 3]);
        assert_eq!(tap.len(), TAP_CAPACITY);
    }

    #[test]
    fn levels_are_normalized() {
        let tap = SampleTap::new();
        let samples: Vec<i16> = (0..1000)
            .map(|i| ((i as f32 / 100.0).sin() * 16000.0) as i16)
            .collect();
        tap.push(&samples);

        let bars = tap.levels().unwrap();
        assert!(bars.iter().all(|&b| (0.0..=1.0).contains(&b)));
        assert!(bars.iter().any(|&b| b > 0.0));
    }

    #[test]
    fn full_scale_input_reaches_top() {
        let tap = SampleTap::new();
        tap.push(&vec![i16::MAX; 1000]);
        for bar in tap.levels().unwrap() {
            assert!(bar >= 0.99, "expected bar near 1.0, got {}", bar);
        }
    }

    #[test]
    fn released_tap_yields_nothing() {
        let tap = SampleTap::new();
        tap.push(&[100, 200, 300]);
        tap.release();

        assert!(tap.levels().is_none());
        tap.push(&[400]);
        assert_eq!(tap.len(), 0);
        assert!(tap.is_released());
    }

    #[test]
    fn smoothing_blends_frames() {
        let mut smoother = Smoother::new();

        let mut first = [0.5f32; NUM_BARS];
        smoother.apply(&mut first);
        assert_eq!(first[0], 0.5, "first frame passes through");

        let mut second = [1.0f32; NUM_BARS];
        smoother.apply(&mut second);
        let expected = EMA_ALPHA * 1.0 + (1.0 - EMA_ALPHA) * 0.5;
        assert!((second[0] - expected).abs() < 0.001);
    }

    #[tokio::test(start_paused = true)]
    async fn renders_until_detached() {
        let log = Arc::new(FrameLog::default());
        let tap = SampleTap::new();
        tap.push(&vec![8000; 2000]);

        let renderer = WaveformRenderer::attach(
            tap,
            CancelLatch::new(),
            log.clone(),
            Duration::from_millis(16),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        renderer.detach();

        let count = log.frames().len();
        assert!(count >= 5, "expected several frames, got {}", count);
        assert_eq!(renderer.frames_emitted() as usize, count);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(log.frames().len(), count, "no frame after detach");
        assert!(!renderer.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn latched_gesture_paints_cancel_colour() {
        let log = Arc::new(FrameLog::default());
        let mut tracker = GestureTracker::default();
        let latch = tracker.begin(&PointerInput::mouse(300.0)).unwrap();

        let renderer = WaveformRenderer::attach(
            SampleTap::new(),
            latch,
            log.clone(),
            Duration::from_millis(16),
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        tracker.move_to(&PointerInput::mouse(100.0));
        tokio::time::sleep(Duration::from_millis(40)).await;
        renderer.detach();

        let frames = log.frames();
        assert_eq!(frames.first().map(|f| f.color), Some(TraceColor::Live));
        assert_eq!(frames.last().map(|f| f.color), Some(TraceColor::Cancel));
    }

    #[tokio::test(start_paused = true)]
    async fn released_tap_stops_the_loop() {
        let log = Arc::new(FrameLog::default());
        let tap = SampleTap::new();
        let renderer = WaveformRenderer::attach(
            tap.clone(),
            CancelLatch::new(),
            log.clone(),
            Duration::from_millis(16),
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        tap.release();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let count = log.frames().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(log.frames().len(), count);
        assert!(!renderer.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_detaches() {
        let log = Arc::new(FrameLog::default());
        let renderer = WaveformRenderer::attach(
            SampleTap::new(),
            CancelLatch::new(),
            log.clone(),
            Duration::from_millis(16),
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        drop(renderer);

        let count = log.frames().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(log.frames().len(), count);
    }
}
