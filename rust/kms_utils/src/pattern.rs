// SPDX-License-Identifier: GPL-2.0

//! Deterministic test pattern for scanout buffers.
//!
//! Four horizontal bands (red, green, blue, white), each a left to right
//! gradient, inside a one pixel white frame. Corruption from a starved
//! pipeline shows up as broken gradients or a torn frame.

const BANDS: [u32; 4] = [0x00ff_0000, 0x0000_ff00, 0x0000_00ff, 0x00ff_ffff];

const FRAME: u32 = 0x00ff_ffff;

/// XRGB8888 value of the pattern at (`x`, `y`).
pub fn pixel(x: u32, y: u32, width: u32, height: u32) -> u32 {
    if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
        return FRAME;
    }

    let band = (y as u64 * BANDS.len() as u64 / height as u64) as usize;
    let mask = BANDS[band.min(BANDS.len() - 1)];
    let level = if width > 1 {
        (x as u64 * 0xff / (width as u64 - 1)) as u32
    } else {
        0xff
    };

    mask & (level * 0x0001_0101)
}

/// Fill a mapped XRGB8888 buffer of `width` x `height` pixels whose rows are
/// `pitch` bytes apart. Padding at the end of each row is left untouched.
pub fn fill_xrgb8888(buf: &mut [u8], width: u32, height: u32, pitch: u32) {
    let row_bytes = width as usize * 4;
    let pitch = pitch as usize;
    if pitch < row_bytes {
        return;
    }

    for (y, row) in buf.chunks_mut(pitch).take(height as usize).enumerate() {
        if row.len() < row_bytes {
            break;
        }
        for (x, px) in row[..row_bytes].chunks_exact_mut(4).enumerate() {
            let value = pixel(x as u32, y as u32, width, height);
            px.copy_from_slice(&value.to_le_bytes());
        }
    }
}
