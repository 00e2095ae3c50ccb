// SPDX-License-Identifier: GPL-2.0
use anyhow::Result;
use kms_utils::BufferHandle;
use kms_utils::DisplayOps;
use kms_utils::PixelFormat;
use kms_utils::PlaneId;
use log::warn;

/// Overlay surfaces of one trial.
///
/// Every surface attached through the guard is detached from its plane and
/// released when the guard goes away, whichever way the trial ends.
pub struct TrialSurfaces<'a, D: DisplayOps> {
    display: &'a mut D,
    attached: Vec<(PlaneId, BufferHandle)>,
}

impl<'a, D: DisplayOps> TrialSurfaces<'a, D> {
    pub fn new(display: &'a mut D) -> Self {
        Self {
            display,
            attached: Vec::new(),
        }
    }

    /// Allocate a `width` x `height` test pattern surface and stage it on
    /// `plane`.
    pub fn attach(&mut self, plane: PlaneId, width: u32, height: u32) -> Result<()> {
        let buffer = self
            .display
            .create_pattern_buffer(width, height, PixelFormat::Xrgb8888)?;
        if let Err(e) = self.display.set_plane_buffer(plane, Some(buffer)) {
            if let Err(e) = self.display.release_buffer(buffer) {
                warn!("failed to release unattached buffer {:?}: {:#}", buffer, e);
            }
            return Err(e);
        }
        self.attached.push((plane, buffer));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    pub fn display(&mut self) -> &mut D {
        &mut *self.display
    }
}

impl<D: DisplayOps> Drop for TrialSurfaces<'_, D> {
    fn drop(&mut self) {
        for (plane, buffer) in self.attached.drain(..) {
            if let Err(e) = self.display.set_plane_buffer(plane, None) {
                warn!("failed to detach plane {:?}: {:#}", plane, e);
            }
            if let Err(e) = self.display.release_buffer(buffer) {
                warn!("failed to release buffer {:?}: {:#}", buffer, e);
            }
        }
    }
}
