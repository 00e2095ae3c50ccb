// SPDX-License-Identifier: GPL-2.0
use std::fmt;
use std::io;

use thiserror::Error;

use crate::search::SearchState;

pub type Result<T> = std::result::Result<T, Error>;

/// Why the check can't run on this machine. Not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoConnectedOutput,
    NoAtomicSupport,
    NoMode,
    NoPrimaryPlane,
    CounterMissing(&'static str),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoConnectedOutput => write!(f, "no connected output"),
            SkipReason::NoAtomicSupport => write!(f, "display lacks atomic modesetting"),
            SkipReason::NoMode => write!(f, "selected output reports no mode"),
            SkipReason::NoPrimaryPlane => write!(f, "selected pipe has no primary plane"),
            SkipReason::CounterMissing(name) => write!(f, "debugfs entry {} is absent", name),
        }
    }
}

/// Trial step that failed outside the admission and restore commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStep {
    StagePrimary,
    ArmTracker,
    DisarmTracker,
    Vblank,
    ReadUnderrun,
}

impl fmt::Display for TrialStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialStep::StagePrimary => write!(f, "staging the primary plane"),
            TrialStep::ArmTracker => write!(f, "arming the load tracker"),
            TrialStep::DisarmTracker => write!(f, "disarming the load tracker"),
            TrialStep::Vblank => write!(f, "waiting for vblank"),
            TrialStep::ReadUnderrun => write!(f, "reading the underrun flag"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("test requirement not met: {0}")]
    Skip(SkipReason),

    #[error(
        "trial {iteration}: admission rejected={admission_rejected} but hardware underrun={hardware_underrun} \
         with {state}"
    )]
    Consistency {
        iteration: u32,
        state: SearchState,
        admission_rejected: bool,
        hardware_underrun: bool,
    },

    #[error("trial {iteration}: unexpected commit failure with {state}: {source}")]
    Commit {
        iteration: u32,
        state: SearchState,
        #[source]
        source: io::Error,
    },

    #[error("trial {iteration}: restoring commit failed with {state}: {source:#}")]
    Restore {
        iteration: u32,
        state: SearchState,
        source: anyhow::Error,
    },

    #[error("trial {iteration}: failed to allocate {width}x{height} surface: {source:#}")]
    Allocation {
        iteration: u32,
        width: u32,
        height: u32,
        source: anyhow::Error,
    },

    #[error("trial {iteration}: {step} failed with {state}: {source:#}")]
    Step {
        iteration: u32,
        state: SearchState,
        step: TrialStep,
        source: anyhow::Error,
    },

    #[error("trial {iteration}: debugfs entry {name} disappeared with {state}")]
    CounterMissing {
        iteration: u32,
        state: SearchState,
        name: &'static str,
    },

    #[error("display error: {0:#}")]
    Display(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn is_skip(&self) -> bool {
        matches!(self, Error::Skip(_))
    }
}
