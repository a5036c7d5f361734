//! Press-and-drag gesture handling
//!
//! Mouse and touch input are folded into a single horizontal coordinate
//! stream. Dragging left past the cancel threshold latches cancellation for
//! the rest of the gesture.

mod tracker;

pub use tracker::{CancelLatch, GestureTracker, GestureVerdict, DEFAULT_CANCEL_THRESHOLD_PX};

/// A single touch contact reported by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub id: u64,
    pub x: f32,
}

/// Raw pointer input from the host UI, in device-independent pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum PointerInput {
    /// Primary mouse button
    Mouse { x: f32 },
    /// Active touch points, in the order the host reports them
    Touch { touches: Vec<TouchPoint> },
}

impl PointerInput {
    pub fn mouse(x: f32) -> Self {
        PointerInput::Mouse { x }
    }

    pub fn touch(id: u64, x: f32) -> Self {
        PointerInput::Touch {
            touches: vec![TouchPoint { id, x }],
        }
    }

    /// The pointer a new gesture should lock onto: the mouse, or the first touch.
    fn primary(&self) -> Option<(PointerId, f32)> {
        match self {
            PointerInput::Mouse { x } => Some((PointerId::Mouse, *x)),
            PointerInput::Touch { touches } => touches
                .first()
                .map(|t| (PointerId::Touch(t.id), t.x)),
        }
    }

    /// X coordinate of `pointer` within this input, if it is still present.
    fn position_of(&self, pointer: PointerId) -> Option<f32> {
        match (self, pointer) {
            (PointerInput::Mouse { x }, PointerId::Mouse) => Some(*x),
            (PointerInput::Touch { touches }, PointerId::Touch(id)) => {
                touches.iter().find(|t| t.id == id).map(|t| t.x)
            }
            _ => None,
        }
    }
}

impl From<f32> for PointerInput {
    fn from(x: f32) -> Self {
        PointerInput::Mouse { x }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointerId {
    Mouse,
    Touch(u64),
}
