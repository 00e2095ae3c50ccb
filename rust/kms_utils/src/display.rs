// SPDX-License-Identifier: GPL-2.0
use std::fmt;
use std::io;

use anyhow::Result;
use serde::Serialize;

/// Index of a pipeline (CRTC) in the device's enumeration order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialOrd, PartialEq, Serialize)]
pub struct PipeId(pub u32);

/// Index of an output (connector) in the device's enumeration order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialOrd, PartialEq, Serialize)]
pub struct OutputId(pub u32);

/// Index of a plane slot in the device's enumeration order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialOrd, PartialEq, Serialize)]
pub struct PlaneId(pub u32);

/// Opaque handle of a pixel buffer owned by a [`DisplayOps`] session.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialOrd, PartialEq)]
pub struct BufferHandle(pub u32);

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Pipes are conventionally lettered: pipe A, pipe B, ...
        match u8::try_from(self.0) {
            Ok(idx) if idx < 26 => write!(f, "{}", char::from(b'A' + idx)),
            _ => write!(f, "{}", self.0),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum PlaneKind {
    Overlay,
    Primary,
    Cursor,
}

impl PlaneKind {
    /// Decode the value of the KMS "type" plane property.
    pub fn from_raw(value: u64) -> Option<Self> {
        match value {
            0 => Some(PlaneKind::Overlay),
            1 => Some(PlaneKind::Primary),
            2 => Some(PlaneKind::Cursor),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PlaneInfo {
    pub id: PlaneId,
    pub kind: PlaneKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectorState {
    Connected,
    Disconnected,
    Unknown,
}

/// Negotiated display mode of an output.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Mode {
    pub width: u32,
    pub height: u32,
    pub refresh: u32,
}

impl Mode {
    pub fn new(width: u32, height: u32, refresh: u32) -> Self {
        Self {
            width,
            height,
            refresh,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.refresh)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    Xrgb8888,
}

impl PixelFormat {
    pub fn bpp(&self) -> u32 {
        match self {
            PixelFormat::Xrgb8888 => 32,
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            PixelFormat::Xrgb8888 => 24,
        }
    }
}

/// A display-resource session.
///
/// Implementations stage plane state through [`DisplayOps::set_plane_buffer`]
/// and apply all of it at once with one of the commit calls. Everything is
/// synchronous: each call returns once the device has answered.
pub trait DisplayOps {
    /// Whether the device accepts atomic commits.
    fn is_atomic(&self) -> bool;

    fn pipes(&self) -> Vec<PipeId>;

    /// Outputs that `pipe` is able to drive, in enumeration order.
    fn outputs_for_pipe(&self, pipe: PipeId) -> Vec<OutputId>;

    fn connector_state(&self, output: OutputId) -> ConnectorState;

    fn connector_type_name(&self, output: OutputId) -> String;

    fn bind_output(&mut self, output: OutputId, pipe: PipeId) -> Result<()>;

    fn output_mode(&self, output: OutputId) -> Option<Mode>;

    /// Plane slots of `pipe` in a stable order: primary first, then overlays,
    /// cursor last.
    fn planes(&self, pipe: PipeId) -> Vec<PlaneInfo>;

    /// Allocate a buffer filled with the deterministic test pattern.
    fn create_pattern_buffer(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<BufferHandle>;

    fn release_buffer(&mut self, buffer: BufferHandle) -> Result<()>;

    /// Stage `buffer` on `plane`. `None` disables the plane on the next commit.
    fn set_plane_buffer(&mut self, plane: PlaneId, buffer: Option<BufferHandle>) -> Result<()>;

    /// Commit the staged state and hand the raw kernel error back to the
    /// caller. A configuration exceeding the display's capacity is refused
    /// with `ENOSPC`, see [`is_resource_exhausted`].
    fn try_commit(&mut self) -> io::Result<()>;

    /// Commit the staged state, used to restore a known-good configuration.
    fn commit(&mut self) -> Result<()>;

    /// Block until the next vertical blank on `pipe`.
    fn wait_for_vblank(&mut self, pipe: PipeId) -> Result<()>;
}

/// Whether a commit error is the kernel refusing a configuration for lack of
/// resources (memory bandwidth in particular).
pub fn is_resource_exhausted(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOSPC)
}
