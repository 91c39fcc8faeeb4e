//! Pointer tracking for the draggable card.
//!
//! Purely synchronous: the tracker turns pointer coordinates into an offset
//! from where the drag started and knows nothing about decisions or timing.

use std::ops::Sub;

/// Degrees of card rotation per pixel of horizontal drag.
pub const DEFAULT_ROTATION_PER_PX: f32 = 0.1;
/// Horizontal distance at which the card has fully faded out.
pub const DEFAULT_FADE_DISTANCE_PX: f32 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Offset {
    pub x: f32,
    pub y: f32,
}

impl Offset {
    pub const ZERO: Offset = Offset { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Linear interpolation towards `target`, `t` clamped to `[0, 1]`.
    pub fn lerp(self, target: Offset, t: f32) -> Offset {
        let t = t.clamp(0.0, 1.0);
        Offset {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
        }
    }
}

impl Sub for Point {
    type Output = Offset;

    fn sub(self, origin: Point) -> Offset {
        Offset {
            x: self.x - origin.x,
            y: self.y - origin.y,
        }
    }
}

/// The live part of a drag. Only exists while a pointer is down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureState {
    pub origin: Point,
    pub current: Point,
}

impl GestureState {
    pub fn offset(&self) -> Offset {
        self.current - self.origin
    }
}

#[derive(Debug, Default)]
pub struct GestureTracker {
    state: Option<GestureState>,
}

impl GestureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a drag at `point`. A second pointer going down mid-drag is
    /// ignored so the card cannot jump; returns whether a drag was started.
    pub fn begin(&mut self, point: Point) -> bool {
        if self.state.is_some() {
            return false;
        }
        self.state = Some(GestureState {
            origin: point,
            current: point,
        });
        true
    }

    /// Moves the drag. `None` when no drag is active.
    pub fn update(&mut self, point: Point) -> Option<Offset> {
        let state = self.state.as_mut()?;
        state.current = point;
        Some(state.offset())
    }

    /// Finishes the drag and yields the final offset, or `None` if nothing was
    /// being dragged.
    pub fn end(&mut self) -> Option<Offset> {
        self.state.take().map(|state| state.offset())
    }

    /// The pointer left the tracked surface; same as releasing it.
    pub fn leave(&mut self) -> Option<Offset> {
        self.end()
    }

    /// Drops the drag without reporting an offset.
    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&GestureState> {
        self.state.as_ref()
    }

    /// Current offset, `(0, 0)` at rest.
    pub fn offset(&self) -> Offset {
        self.state.map_or(Offset::ZERO, |state| state.offset())
    }
}

pub fn rotation_deg(offset_x: f32, per_px: f32) -> f32 {
    offset_x * per_px
}

pub fn fade(offset_x: f32, distance: f32) -> f32 {
    if distance <= 0.0 {
        return if offset_x == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - offset_x.abs() / distance).clamp(0.0, 1.0)
}
