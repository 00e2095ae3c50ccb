// SPDX-License-Identifier: GPL-2.0

//! Display bandwidth limit check for the VC4 HVS.
//!
//! Drives the display pipeline through increasingly heavy overlay plane
//! configurations and checks that every configuration the driver's load
//! tracker refuses would in fact have underrun, and that every one it admits
//! does not.

mod error;
pub use error::Error;
pub use error::Result;
pub use error::SkipReason;
pub use error::TrialStep;

mod prober;
pub use prober::overlay_planes_max;
pub use prober::BandwidthProber;
pub use prober::LOAD_TRACKER;
pub use prober::UNDERRUN;

mod report;
pub use report::ProbeReport;
pub use report::TrialOutcome;
pub use report::TrialRecord;

mod search;
pub use search::Adjustment;
pub use search::Search;
pub use search::SearchState;

mod select;
pub use select::select_output;
pub use select::SelectedOutput;

mod surfaces;
pub use surfaces::TrialSurfaces;

#[cfg(test)]
mod mock;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use kms_utils::open_driver;
use kms_utils::Card;
use kms_utils::DebugfsDir;
use kms_utils::DrmDisplay;
use kms_utils::VtGraphicsMode;
use log::info;
use log::warn;

/// The one check this binary knows how to run.
pub const SUBTEST: &str = "bandwidth-limit-check";

/// Exit status telling the test runner the check did not apply here.
pub const SKIP_EXIT_CODE: i32 = 77;

/// vc4_stress: check that the VC4 driver's bandwidth admission matches what
/// the hardware can scan out.
///
/// Each trial commits a full screen primary plane plus overlay planes with the
/// driver's load tracker enabled, then scans the configuration out and reads
/// the underrun flag. A refused commit must coincide with an underrun, an
/// admitted one must not.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Opts {
    /// Number of configuration adjustments to make. One more trial than this
    /// is run.
    #[clap(short = 't', long, env = "VC4_STRESS_TRIES", default_value = "10")]
    pub tries: u32,

    /// DRM card node to use. Defaults to the first card driven by --driver.
    #[clap(long)]
    pub device: Option<PathBuf>,

    /// Kernel driver to look for when --device is not given.
    #[clap(long, default_value = "vc4")]
    pub driver: String,

    /// Debugfs directory of the card. Defaults to
    /// /sys/kernel/debug/dri/<minor>.
    #[clap(long)]
    pub debugfs: Option<PathBuf>,

    /// Leave the virtual terminal in text mode.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub no_vt_switch: bool,

    /// Print available subtests and exit.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub list_subtests: bool,

    /// Run only the named subtest.
    #[clap(long)]
    pub run_subtest: Option<String>,

    /// Print the run report as JSON on stdout.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,

    /// Enable verbose output, including per-trial details. Specify multiple
    /// times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn open_card(opts: &Opts) -> anyhow::Result<Card> {
    match &opts.device {
        Some(path) => {
            let card = Card::open(path)?;
            let driver = card.driver_name()?;
            if driver != opts.driver {
                warn!(
                    "{} is driven by {}, not {}",
                    path.display(),
                    driver,
                    opts.driver
                );
            }
            Ok(card)
        }
        None => {
            let (card, path) = open_driver(&opts.driver)?;
            info!("Using {} ({})", path.display(), opts.driver);
            Ok(card)
        }
    }
}

/// Run the bandwidth limit check against the real device.
pub fn run(opts: &Opts) -> Result<ProbeReport> {
    let card = open_card(opts)?;
    let debugfs = match &opts.debugfs {
        Some(path) => DebugfsDir::open(path)?,
        None => {
            let minor = card.minor()?;
            DebugfsDir::for_minor(minor).context("debugfs not mounted?")?
        }
    };
    let mut display = DrmDisplay::new(card)?;

    let _vt = if opts.no_vt_switch {
        None
    } else {
        Some(VtGraphicsMode::enter()?)
    };

    let output =
        select_output(&mut display)?.ok_or(Error::Skip(SkipReason::NoConnectedOutput))?;
    info!(
        "Testing connector {} on pipe {} at {}",
        output.connector, output.pipe, output.mode
    );

    let mut prober = BandwidthProber::new(display, debugfs);
    let report = prober.run(&output, opts.tries)?;
    report.log_summary();

    Ok(report)
}
