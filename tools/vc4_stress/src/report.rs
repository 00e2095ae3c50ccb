// SPDX-License-Identifier: GPL-2.0
use kms_utils::Mode;
use kms_utils::PipeId;
use log::info;
use serde::Serialize;

use crate::search::Adjustment;
use crate::search::SearchState;
use crate::select::SelectedOutput;

/// What one trial observed after its commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TrialOutcome {
    /// The atomic check refused the configuration with ENOSPC.
    pub admission_rejected: bool,
    /// The underrun debugfs entry read "Y" after the next vblank.
    pub hardware_underrun: bool,
}

impl TrialOutcome {
    pub fn is_consistent(&self) -> bool {
        self.admission_rejected == self.hardware_underrun
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrialRecord {
    pub iteration: u32,
    pub state: SearchState,
    /// Overlay surfaces actually bound, may be below the requested count when
    /// the pipe runs out of overlay slots.
    pub overlays_bound: u32,
    pub outcome: TrialOutcome,
    pub adjustment: Adjustment,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProbeReport {
    pub connector: String,
    pub pipe: PipeId,
    pub mode: Mode,
    pub overlay_planes_max: u32,
    pub trials: Vec<TrialRecord>,
}

impl ProbeReport {
    pub fn new(output: &SelectedOutput, overlay_planes_max: u32) -> Self {
        Self {
            connector: output.connector.clone(),
            pipe: output.pipe,
            mode: output.mode,
            overlay_planes_max,
            trials: Vec::new(),
        }
    }

    pub fn push(&mut self, record: TrialRecord) {
        self.trials.push(record);
    }

    pub fn rejected(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| t.outcome.admission_rejected)
            .count()
    }

    pub fn admitted(&self) -> usize {
        self.trials.len() - self.rejected()
    }

    /// Largest overlay load (planes x pixels) that was admitted.
    pub fn peak_admitted_load(&self) -> u64 {
        self.trials
            .iter()
            .filter(|t| !t.outcome.admission_rejected)
            .map(|t| {
                t.overlays_bound as u64 * t.state.overlay_width as u64 * t.state.overlay_height as u64
            })
            .max()
            .unwrap_or(0)
    }

    pub fn log_summary(&self) {
        info!(
            "{} on pipe {} ({}): {} trials, {} admitted, {} rejected, overlay cap {}",
            self.connector,
            self.pipe,
            self.mode,
            self.trials.len(),
            self.admitted(),
            self.rejected(),
            self.overlay_planes_max
        );
        info!(
            "Peak admitted overlay load: {} pixels",
            self.peak_admitted_load()
        );
    }
}
