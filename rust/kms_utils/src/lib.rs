// SPDX-License-Identifier: GPL-2.0

//! Display resource and diagnostic counter helpers shared by the KMS stress
//! tools.
//!
//! The two traits [`DisplayOps`] and [`DebugCounters`] are the seams the
//! tools are written against. [`DrmDisplay`] and [`DebugfsDir`] implement
//! them on top of a real DRM device.

mod debugfs;
pub use debugfs::DebugCounters;
pub use debugfs::DebugfsDir;
pub use debugfs::DEBUGFS_DRI_ROOT;

mod display;
pub use display::is_resource_exhausted;
pub use display::BufferHandle;
pub use display::ConnectorState;
pub use display::DisplayOps;
pub use display::Mode;
pub use display::OutputId;
pub use display::PipeId;
pub use display::PixelFormat;
pub use display::PlaneId;
pub use display::PlaneInfo;
pub use display::PlaneKind;

mod drm_display;
pub use drm_display::open_driver;
pub use drm_display::Card;
pub use drm_display::DrmDisplay;

pub mod pattern;

mod vt;
pub use vt::VtGraphicsMode;
