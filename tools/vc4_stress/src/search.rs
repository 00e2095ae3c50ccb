// SPDX-License-Identifier: GPL-2.0

//! Hill-climb over overlay plane count and size.
//!
//! Load grows by adding overlay planes until the cap is reached, then by
//! doubling the overlay size. A rejected configuration first shrinks the
//! overlays down to a floor, then sheds planes. There is no convergence test,
//! the caller runs a fixed number of trials.

use std::fmt;

use kms_utils::Mode;
use serde::Serialize;

/// Overlays stop shrinking once they are no larger than mode / this.
pub const SHRINK_FLOOR_DIVISOR: u32 = 8;

/// The only state carried from one trial to the next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SearchState {
    pub overlay_count: u32,
    pub overlay_width: u32,
    pub overlay_height: u32,
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} overlay planes of {}x{}",
            self.overlay_count, self.overlay_width, self.overlay_height
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Adjustment {
    /// Halve both overlay dimensions.
    Shrink,
    /// Drop one overlay plane.
    DropPlane,
    /// Rejected at minimum load, nothing left to take away.
    Hold,
    /// Add one overlay plane.
    AddPlane,
    /// Double both overlay dimensions, clamped to the mode.
    Grow,
}

#[derive(Clone, Debug)]
pub struct Search {
    mode: Mode,
    overlay_planes_max: u32,
    state: SearchState,
}

impl Search {
    /// Start with one overlay (if the cap allows any) at half the mode size.
    pub fn new(mode: Mode, overlay_planes_max: u32) -> Self {
        let state = SearchState {
            overlay_count: 1.min(overlay_planes_max),
            overlay_width: (mode.width / 2).max(1),
            overlay_height: (mode.height / 2).max(1),
        };
        Self {
            mode,
            overlay_planes_max,
            state,
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn overlay_planes_max(&self) -> u32 {
        self.overlay_planes_max
    }

    /// Move to the next configuration after a trial. `limited` is true when
    /// the trial was rejected (and, equivalently, underran).
    pub fn advance(&mut self, limited: bool) -> Adjustment {
        let state = &mut self.state;

        if limited {
            let floor_w = self.mode.width / SHRINK_FLOOR_DIVISOR;
            let floor_h = self.mode.height / SHRINK_FLOOR_DIVISOR;
            if state.overlay_width > floor_w && state.overlay_height > floor_h {
                state.overlay_width = (state.overlay_width / 2).max(1);
                state.overlay_height = (state.overlay_height / 2).max(1);
                Adjustment::Shrink
            } else if state.overlay_count > 0 {
                state.overlay_count -= 1;
                Adjustment::DropPlane
            } else {
                Adjustment::Hold
            }
        } else if state.overlay_count < self.overlay_planes_max {
            state.overlay_count += 1;
            Adjustment::AddPlane
        } else {
            state.overlay_width = state.overlay_width.saturating_mul(2).min(self.mode.width);
            state.overlay_height = state
                .overlay_height
                .saturating_mul(2)
                .min(self.mode.height);
            Adjustment::Grow
        }
    }
}
