// SPDX-License-Identifier: GPL-2.0

//! Bandwidth limit check.
//!
//! Each trial stages a full screen primary plus a set of overlays, commits
//! with the driver's load tracker armed, then turns the tracker off and
//! commits again so the configuration actually scans out. After one vblank
//! the driver's underrun flag must agree with whether the armed commit was
//! refused for lack of bandwidth.

use kms_utils::is_resource_exhausted;
use kms_utils::BufferHandle;
use kms_utils::DebugCounters;
use kms_utils::DisplayOps;
use kms_utils::PixelFormat;
use kms_utils::PlaneId;
use kms_utils::PlaneInfo;
use kms_utils::PlaneKind;
use log::debug;
use log::warn;

use crate::error::Error;
use crate::error::Result;
use crate::error::SkipReason;
use crate::error::TrialStep;
use crate::report::ProbeReport;
use crate::report::TrialOutcome;
use crate::report::TrialRecord;
use crate::search::Search;
use crate::select::SelectedOutput;
use crate::surfaces::TrialSurfaces;

pub const LOAD_TRACKER: &str = "load_tracker";
pub const UNDERRUN: &str = "underrun";

/// Cap on the number of overlay surfaces per trial.
///
/// This counts the slots that are *not* overlays (primary and cursor), which
/// reads as inverted. It is kept as is: the cap shapes how quickly the search
/// moves on to growing the overlays, and changing it needs checking against
/// real slot counts first.
pub fn overlay_planes_max(planes: &[PlaneInfo]) -> u32 {
    planes
        .iter()
        .filter(|plane| plane.kind != PlaneKind::Overlay)
        .count() as u32
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "Yes"
    } else {
        "No"
    }
}

/// Owns the display session and the debugfs counters for the length of a
/// run. Hand them back with [`BandwidthProber::into_inner`].
pub struct BandwidthProber<D: DisplayOps, C: DebugCounters> {
    display: D,
    counters: C,
}

struct Layout {
    primary: PlaneId,
    overlays: Vec<PlaneId>,
}

impl<D: DisplayOps, C: DebugCounters> BandwidthProber<D, C> {
    pub fn new(display: D, counters: C) -> Self {
        Self { display, counters }
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn counters(&self) -> &C {
        &self.counters
    }

    pub fn into_inner(self) -> (D, C) {
        (self.display, self.counters)
    }

    /// Run `max_trials + 1` trials on `output`.
    pub fn run(&mut self, output: &SelectedOutput, max_trials: u32) -> Result<ProbeReport> {
        if !self.display.is_atomic() {
            return Err(Error::Skip(SkipReason::NoAtomicSupport));
        }
        for name in [LOAD_TRACKER, UNDERRUN] {
            if self.counters.get(name)?.is_none() {
                return Err(Error::Skip(SkipReason::CounterMissing(name)));
            }
        }

        let planes = self.display.planes(output.pipe);
        let primary = planes
            .iter()
            .find(|plane| plane.kind == PlaneKind::Primary)
            .ok_or(Error::Skip(SkipReason::NoPrimaryPlane))?
            .id;
        let layout = Layout {
            primary,
            overlays: planes
                .iter()
                .filter(|plane| plane.kind == PlaneKind::Overlay)
                .map(|plane| plane.id)
                .collect(),
        };
        let cap = overlay_planes_max(&planes);
        debug!(
            "Pipe {}: {} planes, {} overlay slots, overlay cap {}",
            output.pipe,
            planes.len(),
            layout.overlays.len(),
            cap
        );

        let mode = output.mode;
        let primary_fb = self
            .display
            .create_pattern_buffer(mode.width, mode.height, PixelFormat::Xrgb8888)
            .map_err(|source| Error::Allocation {
                iteration: 0,
                width: mode.width,
                height: mode.height,
                source,
            })?;

        let mut search = Search::new(mode, cap);
        let mut report = ProbeReport::new(output, cap);
        let result = self.trials(output, &layout, primary_fb, &mut search, &mut report, max_trials);

        // The primary outlives every trial and goes on all exit paths.
        if let Err(e) = self.display.set_plane_buffer(layout.primary, None) {
            warn!("failed to detach primary plane: {:#}", e);
        }
        if let Err(e) = self.display.release_buffer(primary_fb) {
            warn!("failed to release primary surface: {:#}", e);
        }

        result.map(|()| report)
    }

    fn trials(
        &mut self,
        output: &SelectedOutput,
        layout: &Layout,
        primary_fb: BufferHandle,
        search: &mut Search,
        report: &mut ProbeReport,
        mut tries: u32,
    ) -> Result<()> {
        let mut iteration = 0;
        loop {
            let record = self.trial(output, layout, primary_fb, search, iteration, tries)?;
            report.push(record);
            iteration += 1;

            // Checked after the trial: a budget of N runs N + 1 trials.
            let exhausted = tries == 0;
            tries = tries.saturating_sub(1);
            if exhausted {
                break;
            }
        }
        Ok(())
    }

    fn trial(
        &mut self,
        output: &SelectedOutput,
        layout: &Layout,
        primary_fb: BufferHandle,
        search: &mut Search,
        iteration: u32,
        tries: u32,
    ) -> Result<TrialRecord> {
        let state = search.state();
        debug!(
            "Using {} overlay planes with resolution {}x{}",
            state.overlay_count, state.overlay_width, state.overlay_height
        );
        debug!("{} tries remaining", tries);

        let failed = |step: TrialStep| {
            move |source: anyhow::Error| Error::Step {
                iteration,
                state,
                step,
                source,
            }
        };

        self.display
            .set_plane_buffer(layout.primary, Some(primary_fb))
            .map_err(failed(TrialStep::StagePrimary))?;

        let wanted = state.overlay_count.min(search.overlay_planes_max()) as usize;
        let mut surfaces = TrialSurfaces::new(&mut self.display);
        for &plane in layout.overlays.iter().take(wanted) {
            surfaces
                .attach(plane, state.overlay_width, state.overlay_height)
                .map_err(|source| Error::Allocation {
                    iteration,
                    width: state.overlay_width,
                    height: state.overlay_height,
                    source,
                })?;
        }
        let overlays_bound = surfaces.len() as u32;

        self.counters
            .set(LOAD_TRACKER, "Y")
            .map_err(failed(TrialStep::ArmTracker))?;
        let admission_rejected = match surfaces.display().try_commit() {
            Ok(()) => false,
            Err(e) if is_resource_exhausted(&e) => true,
            Err(source) => {
                // Leave the tracker off before bailing.
                if let Err(e) = self.counters.set(LOAD_TRACKER, "N") {
                    warn!("failed to disarm the load tracker, it stays armed: {:#}", e);
                }
                return Err(Error::Commit {
                    iteration,
                    state,
                    source,
                });
            }
        };
        debug!("Bandwidth limitation exceeded: {}", yes_no(admission_rejected));

        self.counters
            .set(LOAD_TRACKER, "N")
            .map_err(failed(TrialStep::DisarmTracker))?;
        surfaces
            .display()
            .commit()
            .map_err(|source| Error::Restore {
                iteration,
                state,
                source,
            })?;

        // The underrun flag only means something once a full frame has been
        // scanned out with the new configuration.
        surfaces
            .display()
            .wait_for_vblank(output.pipe)
            .map_err(failed(TrialStep::Vblank))?;

        let underrun = self
            .counters
            .get(UNDERRUN)
            .map_err(failed(TrialStep::ReadUnderrun))?
            .ok_or(Error::CounterMissing {
                iteration,
                state,
                name: UNDERRUN,
            })?;
        let hardware_underrun = underrun.starts_with('Y');
        debug!("Underrun detected: {}", yes_no(hardware_underrun));

        let outcome = TrialOutcome {
            admission_rejected,
            hardware_underrun,
        };
        if !outcome.is_consistent() {
            return Err(Error::Consistency {
                iteration,
                state,
                admission_rejected,
                hardware_underrun,
            });
        }

        let adjustment = search.advance(admission_rejected);
        drop(surfaces);

        Ok(TrialRecord {
            iteration,
            state,
            overlays_bound,
            outcome,
            adjustment,
        })
    }
}
