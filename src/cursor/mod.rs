//! Cursor images
//!
//! Legacy cursors are realized into ARGB shared-memory buffers and shown on
//! the first pointer with the serial of its last enter. Cursors are either
//! a ready ARGB image or a 1-bit source/mask pair with two colours, which
//! is expanded here.

use crate::buffer::SharedMemory;
use crate::error::{BridgeError, Result};
use crate::input::InputBridge;
use crate::protocol::{BufferHandle, PixelFormat, Transport};
use crate::server::CursorId;
use log::{debug, warn};
use std::collections::HashMap;
use std::os::fd::AsFd;

/// 16-bit-per-channel colour as legacy cursors carry it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb16 {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

impl Rgb16 {
    pub fn new(red: u16, green: u16, blue: u16) -> Self {
        Self { red, green, blue }
    }

    /// Opaque ARGB, keeping the high byte of each channel
    pub fn to_argb(self) -> u32 {
        0xff00_0000
            | ((self.red as u32 & 0xff00) << 8)
            | (self.green as u32 & 0xff00)
            | (self.blue as u32 >> 8)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CursorPixels {
    /// Premultiplied ARGB, row-major, `width * height` entries
    Argb(Vec<u32>),
    /// LSB-first bitmaps padded to 32-bit rows
    Bitmap {
        source: Vec<u8>,
        mask: Vec<u8>,
        foreground: Rgb16,
        background: Rgb16,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorImage {
    pub width: u32,
    pub height: u32,
    pub hot_x: i32,
    pub hot_y: i32,
    pub pixels: CursorPixels,
}

/// Bytes per row of a padded 1-bit bitmap
pub fn bitmap_stride(width: u32) -> usize {
    width.div_ceil(32) as usize * 4
}

/// Expand a source/mask bitmap pair to ARGB
///
/// Pixels outside the mask are transparent; inside it they take the
/// foreground colour where the source bit is set and the background colour
/// elsewhere.
pub fn expand_bitmap(
    width: u32,
    height: u32,
    source: &[u8],
    mask: &[u8],
    foreground: Rgb16,
    background: Rgb16,
) -> Vec<u32> {
    let stride = bitmap_stride(width);
    let (fg, bg) = (foreground.to_argb(), background.to_argb());
    let bit = |bits: &[u8], x: u32, y: u32| {
        bits.get(y as usize * stride + x as usize / 8)
            .map_or(false, |byte| byte & (1 << (x % 8)) != 0)
    };

    let mut out = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            let px = match (bit(mask, x, y), bit(source, x, y)) {
                (false, _) => 0,
                (true, true) => fg,
                (true, false) => bg,
            };
            out.push(px);
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct RealizedCursor {
    buffer: BufferHandle,
    hot_x: i32,
    hot_y: i32,
}

#[derive(Debug, Default)]
pub struct CursorManager {
    cursors: HashMap<CursorId, RealizedCursor>,
}

impl CursorManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn is_realized(&self, cursor: CursorId) -> bool {
        self.cursors.contains_key(&cursor)
    }

    /// Upload a cursor image into its own shared-memory buffer
    pub fn realize<T: Transport>(
        &mut self,
        transport: &mut T,
        cursor: CursorId,
        image: &CursorImage,
    ) -> Result<()> {
        if image.width == 0 || image.height == 0 {
            debug!("Skipping empty cursor {:?}", cursor);
            return Ok(());
        }

        let pixels = match &image.pixels {
            CursorPixels::Argb(argb) => argb.clone(),
            CursorPixels::Bitmap {
                source,
                mask,
                foreground,
                background,
            } => expand_bitmap(image.width, image.height, source, mask, *foreground, *background),
        };

        let stride = image.width * 4;
        let mut shm = SharedMemory::create(stride as usize * image.height as usize)?;
        shm.write_pixels(&pixels);
        let fd = shm.into_fd();

        let buffer = transport
            .create_shm_buffer(fd.as_fd(), image.width, image.height, stride, PixelFormat::Argb8888)
            .ok_or(BridgeError::ProtocolObject("cursor buffer"))?;

        if let Some(old) = self.cursors.insert(
            cursor,
            RealizedCursor {
                buffer,
                hot_x: image.hot_x,
                hot_y: image.hot_y,
            },
        ) {
            transport.destroy_buffer(old.buffer);
        }
        Ok(())
    }

    pub fn unrealize<T: Transport>(&mut self, transport: &mut T, cursor: CursorId) -> bool {
        match self.cursors.remove(&cursor) {
            Some(realized) => {
                transport.destroy_buffer(realized.buffer);
                true
            }
            None => false,
        }
    }

    /// Show a cursor on the first pointer; `None` hides it
    pub fn set_cursor<T: Transport>(
        &self,
        transport: &mut T,
        input: &InputBridge,
        cursor: Option<CursorId>,
    ) -> bool {
        let Some((seat, serial)) = input.first_pointer() else {
            return false;
        };
        match cursor {
            None => transport.set_cursor(seat, serial, None, 0, 0),
            Some(id) => {
                let Some(realized) = self.cursors.get(&id) else {
                    warn!("Cursor {:?} was never realized", id);
                    return false;
                };
                transport.set_cursor(
                    seat,
                    serial,
                    Some(realized.buffer),
                    realized.hot_x,
                    realized.hot_y,
                );
            }
        }
        true
    }

    pub fn close<T: Transport>(&mut self, transport: &mut T) {
        for (_, realized) in self.cursors.drain() {
            transport.destroy_buffer(realized.buffer);
        }
    }
}
