//! Buffer providers
//!
//! A provider turns exported pixmap storage into a compositor buffer. The
//! DRM provider shares a GEM object by its flink name and needs an
//! authenticated connection; the shared-memory provider passes a file
//! descriptor. Both sit behind [`BufferProvider`] so the surface code never
//! cares which one is active.

use crate::config::BufferBackend;
use crate::error::BufferError;
use crate::protocol::{BufferHandle, PixelFormat, Transport};
use crate::server::Visual;
use log::{debug, warn};
use memmap2::MmapMut;
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, OwnedFd};

/// Exported pixmap storage
#[derive(Debug)]
pub enum PixelSource {
    /// DRM flink name of the pixmap's GEM object
    DrmName(u32),
    /// Shared-memory file holding the pixels, closed once the buffer exists
    Shm(OwnedFd),
}

impl PixelSource {
    pub fn kind(&self) -> &'static str {
        match self {
            PixelSource::DrmName(_) => "drm-name",
            PixelSource::Shm(_) => "shm-fd",
        }
    }
}

/// Pick the pixel format for a window's visual
///
/// Only a 32-plane visual with an alpha mask gets an alpha channel.
pub fn format_for_visual(visual: &Visual) -> PixelFormat {
    if visual.nplanes == 32 && visual.has_alpha {
        PixelFormat::Argb8888
    } else {
        PixelFormat::Xrgb8888
    }
}

/// Dimensions and layout of a buffer to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub width: u32,
    pub height: u32,
    /// Stride of the exported storage
    pub stride: u32,
    pub format: PixelFormat,
}

/// Creates compositor buffers from exported pixmap storage
pub trait BufferProvider<T: Transport> {
    fn backend(&self) -> BufferBackend;

    fn create_buffer(
        &self,
        transport: &mut T,
        source: PixelSource,
        layout: BufferLayout,
    ) -> Result<BufferHandle, BufferError>;
}

/// Zero-copy buffers named by DRM flink names
#[derive(Debug, Clone)]
pub struct DrmBufferProvider {
    authenticated: bool,
}

impl DrmBufferProvider {
    pub fn new(authenticated: bool) -> Self {
        Self { authenticated }
    }
}

impl<T: Transport> BufferProvider<T> for DrmBufferProvider {
    fn backend(&self) -> BufferBackend {
        BufferBackend::Drm
    }

    fn create_buffer(
        &self,
        transport: &mut T,
        source: PixelSource,
        layout: BufferLayout,
    ) -> Result<BufferHandle, BufferError> {
        if !self.authenticated {
            return Err(BufferError::NotAuthenticated);
        }
        let name = match source {
            PixelSource::DrmName(name) => name,
            other => {
                return Err(BufferError::UnsupportedSource {
                    backend: "drm",
                    source_kind: other.kind(),
                })
            }
        };

        debug!(
            "Creating drm buffer name={} {}x{} stride={} {:?}",
            name, layout.width, layout.height, layout.stride, layout.format
        );
        transport
            .create_drm_buffer(name, layout.width, layout.height, layout.stride, layout.format)
            .ok_or(BufferError::Rejected {
                backend: "drm",
                width: layout.width,
                height: layout.height,
            })
    }
}

/// Buffers backed by a shared-memory file
#[derive(Debug, Clone, Default)]
pub struct ShmBufferProvider;

impl<T: Transport> BufferProvider<T> for ShmBufferProvider {
    fn backend(&self) -> BufferBackend {
        BufferBackend::Shm
    }

    fn create_buffer(
        &self,
        transport: &mut T,
        source: PixelSource,
        layout: BufferLayout,
    ) -> Result<BufferHandle, BufferError> {
        let fd = match source {
            PixelSource::Shm(fd) => fd,
            other => {
                return Err(BufferError::UnsupportedSource {
                    backend: "shm",
                    source_kind: other.kind(),
                })
            }
        };

        // Shared-memory storage is always tightly packed.
        let stride = layout.width * layout.format.bytes_per_pixel();
        let buffer =
            transport.create_shm_buffer(fd.as_fd(), layout.width, layout.height, stride, layout.format);
        drop(fd);

        buffer.ok_or(BufferError::Rejected {
            backend: "shm",
            width: layout.width,
            height: layout.height,
        })
    }
}

/// Provider for the negotiated backend
pub fn provider_for<T: Transport>(
    backend: BufferBackend,
    authenticated: bool,
) -> Box<dyn BufferProvider<T>> {
    match backend {
        BufferBackend::Drm => {
            if !authenticated {
                warn!("DRM provider selected without authentication, buffers will fail");
            }
            Box::new(DrmBufferProvider::new(authenticated))
        }
        BufferBackend::Shm => Box::new(ShmBufferProvider),
    }
}

/// An anonymous, unlinked, mapped file
pub struct SharedMemory {
    file: File,
    map: MmapMut,
}

impl SharedMemory {
    pub fn create(len: usize) -> io::Result<Self> {
        let file = tempfile::tempfile()?;
        file.set_len(len as u64)?;
        // SAFETY: the file is private to this process until its fd is handed
        // out, and nothing truncates it while the mapping lives.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { file, map })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map[..]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map[..]
    }

    /// Write packed 32-bit pixels in native byte order
    pub fn write_pixels(&mut self, pixels: &[u32]) {
        for (chunk, px) in self.map.chunks_exact_mut(4).zip(pixels) {
            chunk.copy_from_slice(&px.to_ne_bytes());
        }
    }

    /// Unmap and keep only the descriptor
    pub fn into_fd(self) -> OwnedFd {
        drop(self.map);
        OwnedFd::from(self.file)
    }
}
