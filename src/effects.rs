//! Effect runner for the voice-message recorder
//!
//! This module handles executing effects produced by the state machine.
//! Capture sessions live in a slot behind a `std::sync::Mutex` so that a
//! cancel can tear the active session down before the caller returns.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::{AudioCaptureSession, CaptureError, Microphone};
use crate::gesture::CancelLatch;
use crate::settings::RecorderSettings;
use crate::state_machine::{Effect, Event};
use crate::ui::UiEmitter;
use crate::upload::{SendFn, UploadCoordinator};

/// Trait for running effects.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::UnboundedSender<Event>);
}

/// Where the runner keeps the session between effects.
#[derive(Default)]
struct SessionSlot {
    /// The session that owns the microphone right now
    active: Option<AudioCaptureSession>,
    /// Sessions cancelled while their microphone request was still pending
    abandoned: HashSet<Uuid>,
}

fn lock_slot(slot: &Mutex<SessionSlot>) -> MutexGuard<'_, SessionSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Effect runner backed by a real [`Microphone`] and the caller's send function.
pub struct CaptureEffectRunner {
    runtime: Handle,
    microphone: Arc<dyn Microphone>,
    send: SendFn,
    coordinator: UploadCoordinator,
    emitter: Arc<dyn UiEmitter>,
    settings: RecorderSettings,
    slot: Arc<Mutex<SessionSlot>>,
}

impl CaptureEffectRunner {
    /// Must be called from within a tokio runtime; tasks are spawned onto it.
    pub fn new(
        microphone: Arc<dyn Microphone>,
        send: SendFn,
        emitter: Arc<dyn UiEmitter>,
        settings: RecorderSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime: Handle::current(),
            microphone,
            send,
            coordinator: UploadCoordinator::new(settings.upload_timeout()),
            emitter,
            settings,
            slot: Arc::new(Mutex::new(SessionSlot::default())),
        })
    }

    /// Whether any capture session currently holds the microphone.
    pub fn holds_microphone(&self) -> bool {
        lock_slot(&self.slot)
            .active
            .as_ref()
            .map_or(false, |session| session.holds_microphone())
    }

    fn start_capture(&self, id: Uuid, latch: CancelLatch, tx: mpsc::UnboundedSender<Event>) {
        let microphone = self.microphone.clone();
        let slot = self.slot.clone();
        let emitter = self.emitter.clone();
        let frame_interval = self.settings.frame_interval();

        self.runtime.spawn(async move {
            let tick_tx = tx.clone();
            let failure_tx = tx.clone();
            let mut session = AudioCaptureSession::new(
                id,
                latch,
                emitter,
                frame_interval,
                Arc::new(move |elapsed_secs| {
                    log::debug!("Recording tick {}s for {}", elapsed_secs, id);
                    let _ = tick_tx.send(Event::RecordingTick { id, elapsed_secs });
                }),
                Arc::new(move |err| {
                    let _ = failure_tx.send(Event::CaptureFailed { id, err });
                }),
            );

            let result = session.start(microphone.as_ref()).await;

            let mut slot = lock_slot(&slot);
            if slot.abandoned.remove(&id) {
                // Press ended before the grant; release straight away
                log::info!("Capture {} granted after abandonment; releasing", id);
                session.cancel();
                return;
            }

            match result {
                Ok(()) => {
                    if let Some(mut previous) = slot.active.replace(session) {
                        log::warn!(
                            "Capture {} still active when {} started; cancelling it",
                            previous.id(),
                            id
                        );
                        previous.cancel();
                    }
                    drop(slot);
                    let _ = tx.send(Event::CaptureStartOk { id });
                }
                Err(err) => {
                    drop(slot);
                    let _ = tx.send(Event::CaptureStartFail { id, err });
                }
            }
        });
    }

    fn cancel_capture(&self, id: Uuid) {
        let mut slot = lock_slot(&self.slot);
        match slot.active.take() {
            Some(mut session) if session.id() == id => {
                session.cancel();
            }
            other => {
                slot.active = other;
                log::debug!("Capture {} not started yet; marking abandoned", id);
                slot.abandoned.insert(id);
            }
        }
    }

    fn finalize_capture(&self, id: Uuid, tx: mpsc::UnboundedSender<Event>) {
        let session = {
            let mut slot = lock_slot(&self.slot);
            match slot.active.take() {
                Some(session) if session.id() == id => Some(session),
                other => {
                    slot.active = other;
                    None
                }
            }
        };

        let Some(mut session) = session else {
            log::warn!("Finalize requested for {} but no such session is active", id);
            let _ = tx.send(Event::FinalizeFail {
                id,
                err: CaptureError::InvalidState("no active capture session"),
            });
            return;
        };

        self.runtime.spawn(async move {
            match session.finalize().await {
                Ok(audio) => {
                    let _ = tx.send(Event::FinalizeOk { id, audio });
                }
                Err(err) => {
                    log::error!("Finalize failed for {}: {}", id, err);
                    let _ = tx.send(Event::FinalizeFail { id, err });
                }
            }
        });
    }
}

impl EffectRunner for CaptureEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::UnboundedSender<Event>) {
        match effect {
            Effect::StartCapture { id, latch } => self.start_capture(id, latch, tx),

            Effect::CancelCapture { id } => self.cancel_capture(id),

            Effect::FinalizeCapture { id } => self.finalize_capture(id, tx),

            Effect::Upload {
                id,
                audio,
                duration_secs,
            } => {
                let coordinator = self.coordinator.clone();
                let send = self.send.clone();
                self.runtime.spawn(async move {
                    match coordinator.upload(id, audio, duration_secs, send).await {
                        Ok(()) => {
                            let _ = tx.send(Event::UploadOk { id });
                        }
                        Err(err) => {
                            let _ = tx.send(Event::UploadFail { id, err });
                        }
                    }
                });
            }

            Effect::StartSentTimeout { id, duration } => {
                self.runtime.spawn(async move {
                    tokio::time::sleep(duration).await;
                    log::debug!("Sent timeout elapsed for id={}", id);
                    let _ = tx.send(Event::SentTimeout { id });
                });
            }

            Effect::Notify(_) | Effect::EmitUi => {
                // Handled by the controller, not here
                log::warn!("UI effect reached the effect runner; ignoring");
            }
        }
    }
}
