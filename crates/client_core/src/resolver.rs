use shared::domain::Outcome;

use crate::gesture::Offset;

pub const DEFAULT_THRESHOLD_PX: f32 = 100.0;
/// Synthetic exit distance for button presses, wide enough to clear any screen.
pub const DEFAULT_BUTTON_EXIT_PX: f32 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// The card leaves the screen towards `exit_offset`.
    Decided { outcome: Outcome, exit_offset: Offset },
    /// Dead-zone release: the card springs back to `(0, 0)`.
    SnapBack,
}

impl Resolution {
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Resolution::Decided { outcome, .. } => Some(*outcome),
            Resolution::SnapBack => None,
        }
    }
}

/// Maps a finished drag onto a decision. Only strictly-beyond-threshold
/// horizontal travel counts.
pub fn resolve(offset: Offset, threshold: f32) -> Resolution {
    if offset.x > threshold {
        Resolution::Decided {
            outcome: Outcome::Accept,
            exit_offset: offset,
        }
    } else if offset.x < -threshold {
        Resolution::Decided {
            outcome: Outcome::Reject,
            exit_offset: offset,
        }
    } else {
        Resolution::SnapBack
    }
}

pub fn resolve_button(outcome: Outcome, exit_px: f32) -> Resolution {
    let x = match outcome {
        Outcome::Accept => exit_px.abs(),
        Outcome::Reject => -exit_px.abs(),
    };
    Resolution::Decided {
        outcome,
        exit_offset: Offset::new(x, 0.0),
    }
}
