//! Drag-to-cancel detection with a one-way latch

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{PointerId, PointerInput};

/// Horizontal drag (in device-independent pixels) that arms cancellation.
pub const DEFAULT_CANCEL_THRESHOLD_PX: f32 = 100.0;

/// Shared read handle on a gesture's cancel latch.
///
/// Once set it stays set. A fresh latch is created for every gesture, so a
/// handle held by a previous session never observes a later gesture.
#[derive(Debug, Clone, Default)]
pub struct CancelLatch(Arc<AtomicBool>);

impl CancelLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set the latch. Returns true if this call flipped it.
    fn set(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

/// Outcome of a finished gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureVerdict {
    pub cancel: bool,
}

#[derive(Debug)]
struct ActiveGesture {
    pointer: PointerId,
    origin_x: f32,
    latch: CancelLatch,
}

/// Converts press/move/release input into a latched cancel decision.
#[derive(Debug)]
pub struct GestureTracker {
    threshold_px: f32,
    active: Option<ActiveGesture>,
}

impl GestureTracker {
    pub fn new(threshold_px: f32) -> Self {
        Self {
            threshold_px,
            active: None,
        }
    }

    /// Start tracking a gesture at the primary pointer of `input`.
    ///
    /// Returns the latch for this gesture, or `None` if the input carried no
    /// usable pointer (e.g. an empty touch list).
    pub fn begin(&mut self, input: &PointerInput) -> Option<CancelLatch> {
        let (pointer, origin_x) = input.primary()?;
        let latch = CancelLatch::new();
        self.active = Some(ActiveGesture {
            pointer,
            origin_x,
            latch: latch.clone(),
        });
        Some(latch)
    }

    /// Feed a move. Returns true only on the move that sets the latch.
    pub fn move_to(&mut self, input: &PointerInput) -> bool {
        let Some(gesture) = self.active.as_ref() else {
            return false;
        };
        let Some(x) = input.position_of(gesture.pointer) else {
            return false;
        };

        let dragged = gesture.origin_x - x;
        if dragged > self.threshold_px && gesture.latch.set() {
            log::debug!(
                "Cancel latched after {:.0}px drag (threshold {:.0}px)",
                dragged,
                self.threshold_px
            );
            return true;
        }
        false
    }

    /// Finish the gesture and reset for the next one.
    pub fn end(&mut self) -> GestureVerdict {
        let cancel = self
            .active
            .take()
            .map_or(false, |gesture| gesture.latch.is_set());
        GestureVerdict { cancel }
    }

    pub fn is_tracking(&self) -> bool {
        self.active.is_some()
    }
}

impl Default for GestureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CANCEL_THRESHOLD_PX)
    }
}

#[cfg(test)]
mod tests {
    use super::super::TouchPoint;
    use super::*;

    #[test]
    fn small_drag_does_not_cancel() {
        let mut tracker = GestureTracker::default();
        tracker.begin(&PointerInput::mouse(300.0));
        assert!(!tracker.move_to(&PointerInput::mouse(250.0)));
        assert!(!tracker.move_to(&PointerInput::mouse(200.0)));
        assert_eq!(tracker.end(), GestureVerdict { cancel: false });
    }

    #[test]
    fn drag_past_threshold_latches_once() {
        let mut tracker = GestureTracker::default();
        let latch = tracker.begin(&PointerInput::mouse(300.0)).unwrap();

        assert!(tracker.move_to(&PointerInput::mouse(150.0)));
        // Already latched: further moves don't report a new latch
        assert!(!tracker.move_to(&PointerInput::mouse(100.0)));
        assert!(latch.is_set());
        assert!(tracker.end().cancel);
    }

    #[test]
    fn dragging_back_does_not_unlatch() {
        let mut tracker = GestureTracker::default();
        tracker.begin(&PointerInput::mouse(300.0));
        tracker.move_to(&PointerInput::mouse(150.0));
        tracker.move_to(&PointerInput::mouse(300.0));
        assert!(tracker.end().cancel);
    }

    #[test]
    fn rightward_drag_never_cancels() {
        let mut tracker = GestureTracker::default();
        tracker.begin(&PointerInput::mouse(100.0));
        tracker.move_to(&PointerInput::mouse(400.0));
        assert!(!tracker.end().cancel);
    }

    #[test]
    fn exactly_threshold_is_not_enough() {
        let mut tracker = GestureTracker::new(100.0);
        tracker.begin(&PointerInput::mouse(200.0));
        assert!(!tracker.move_to(&PointerInput::mouse(100.0)));
        assert!(!tracker.end().cancel);
    }

    #[test]
    fn end_resets_for_next_gesture() {
        let mut tracker = GestureTracker::default();
        let first = tracker.begin(&PointerInput::mouse(300.0)).unwrap();
        tracker.move_to(&PointerInput::mouse(0.0));
        assert!(tracker.end().cancel);
        assert!(!tracker.is_tracking());

        let second = tracker.begin(&PointerInput::mouse(300.0)).unwrap();
        assert!(!second.is_set());
        assert!(first.is_set());
        assert!(!tracker.end().cancel);
    }

    #[test]
    fn end_without_begin_is_not_cancel() {
        let mut tracker = GestureTracker::default();
        assert!(!tracker.end().cancel);
    }

    #[test]
    fn only_first_touch_point_is_tracked() {
        let mut tracker = GestureTracker::default();
        tracker.begin(&PointerInput::Touch {
            touches: vec![TouchPoint { id: 7, x: 300.0 }, TouchPoint { id: 9, x: 500.0 }],
        });

        // Second finger moves far left, first finger stays put
        let moved = tracker.move_to(&PointerInput::Touch {
            touches: vec![TouchPoint { id: 9, x: 0.0 }, TouchPoint { id: 7, x: 290.0 }],
        });
        assert!(!moved);

        // First finger drags past the threshold
        assert!(tracker.move_to(&PointerInput::touch(7, 150.0)));
        assert!(tracker.end().cancel);
    }

    #[test]
    fn mouse_moves_ignored_during_touch_gesture() {
        let mut tracker = GestureTracker::default();
        tracker.begin(&PointerInput::touch(1, 300.0));
        assert!(!tracker.move_to(&PointerInput::mouse(0.0)));
        assert!(!tracker.end().cancel);
    }

    #[test]
    fn empty_touch_list_does_not_begin() {
        let mut tracker = GestureTracker::default();
        assert!(tracker
            .begin(&PointerInput::Touch { touches: vec![] })
            .is_none());
        assert!(!tracker.is_tracking());
    }
}
