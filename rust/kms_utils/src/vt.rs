// SPDX-License-Identifier: GPL-2.0
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;

use anyhow::Context;
use anyhow::Result;
use log::debug;
use log::warn;

/// See linux/kd.h
const KDSETMODE: u64 = 0x4B3A;
const KD_TEXT: libc::c_int = 0x00;
const KD_GRAPHICS: libc::c_int = 0x01;

const TTY0: &str = "/dev/tty0";

/// Keeps the active virtual terminal in graphics mode so fbcon stays away
/// from the display while planes are being driven. Text mode is restored on
/// drop.
#[derive(Debug)]
pub struct VtGraphicsMode {
    tty: File,
}

impl VtGraphicsMode {
    pub fn enter() -> Result<Self> {
        let tty = OpenOptions::new()
            .read(true)
            .write(true)
            .open(TTY0)
            .with_context(|| format!("failed to open {}", TTY0))?;
        set_mode(&tty, KD_GRAPHICS).context("failed to switch the VT to graphics mode")?;
        debug!("VT switched to graphics mode");
        Ok(Self { tty })
    }
}

impl Drop for VtGraphicsMode {
    fn drop(&mut self) {
        match set_mode(&self.tty, KD_TEXT) {
            Ok(()) => debug!("VT restored to text mode"),
            Err(e) => warn!("failed to restore VT text mode: {}", e),
        }
    }
}

fn set_mode(tty: &File, mode: libc::c_int) -> io::Result<()> {
    // SAFETY: KDSETMODE takes its argument by value and the fd is owned by `tty`.
    let ret = unsafe { libc::ioctl(tty.as_raw_fd(), KDSETMODE as _, mode) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
