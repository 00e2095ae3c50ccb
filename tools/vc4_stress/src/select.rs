// SPDX-License-Identifier: GPL-2.0
use kms_utils::ConnectorState;
use kms_utils::DisplayOps;
use kms_utils::Mode;
use kms_utils::OutputId;
use kms_utils::PipeId;
use log::debug;

use crate::error::Error;
use crate::error::Result;
use crate::error::SkipReason;

/// An output bound to the pipe that will drive it for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedOutput {
    pub output: OutputId,
    pub pipe: PipeId,
    pub mode: Mode,
    pub connector: String,
}

/// Bind the first connected output of the first pipe able to drive one.
///
/// `Ok(None)` means there's nothing to test on, callers should skip.
pub fn select_output<D: DisplayOps>(display: &mut D) -> Result<Option<SelectedOutput>> {
    for pipe in display.pipes() {
        for output in display.outputs_for_pipe(pipe) {
            if display.connector_state(output) != ConnectorState::Connected {
                continue;
            }

            display.bind_output(output, pipe)?;

            let connector = display.connector_type_name(output);
            let mode = display
                .output_mode(output)
                .ok_or(Error::Skip(SkipReason::NoMode))?;
            debug!(
                "Selected connector {} on pipe {} ({})",
                connector, pipe, mode
            );

            return Ok(Some(SelectedOutput {
                output,
                pipe,
                mode,
                connector,
            }));
        }
    }

    Ok(None)
}
