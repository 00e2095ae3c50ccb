// SPDX-License-Identifier: GPL-2.0
use std::fs;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::trace;

pub const DEBUGFS_DRI_ROOT: &str = "/sys/kernel/debug/dri";

/// Key/value access to a driver's diagnostic counters.
pub trait DebugCounters {
    /// Write `value` to the entry `name`. The entry must already exist.
    fn set(&mut self, name: &str, value: &str) -> Result<()>;

    /// Read the entry `name`, `None` when the driver doesn't expose it.
    fn get(&self, name: &str) -> Result<Option<String>>;
}

/// The debugfs directory of one DRM device, e.g. `/sys/kernel/debug/dri/0`.
#[derive(Debug, Clone)]
pub struct DebugfsDir {
    path: PathBuf,
}

impl DebugfsDir {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            bail!(
                "{} is not a directory, is debugfs mounted and are we root?",
                path.display()
            );
        }
        Ok(Self { path })
    }

    /// The directory debugfs creates for DRM minor `minor`.
    pub fn for_minor(minor: u32) -> Result<Self> {
        Self::open(Path::new(DEBUGFS_DRI_ROOT).join(minor.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DebugCounters for DebugfsDir {
    fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let path = self.path.join(name);
        trace!("debugfs: {} <- {}", path.display(), value);
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {} for writing", path.display()))?;
        file.write_all(value.as_bytes())
            .with_context(|| format!("failed to write {:?} to {}", value, path.display()))?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<String>> {
        let path = self.path.join(name);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                trace!("debugfs: {} -> {:?}", path.display(), contents);
                Ok(Some(contents))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }
}
