//! Compositor-side object model
//!
//! The bridge never touches the wire itself. Everything it needs from the
//! host compositor is expressed through the [`Transport`] trait (requests)
//! and the [`CompositorEvent`] enum (asynchronous events). Handles are plain
//! ids; the transport owns the real protocol objects behind them.
//!
//! # Overview
//!
//! ```text
//!  Bridge ──requests──► Transport ──wire──► compositor
//!    ▲                      │
//!    └──CompositorEvent─────┘ (roundtrip / read_events)
//! ```

use crate::damage::DamageRegion;
use crate::error::Result;
use crate::server::Geometry;
use bitflags::bitflags;
use std::os::fd::{BorrowedFd, RawFd};

/// Compositor surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceHandle(pub u32);

/// Compositor buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// Registry name of a seat global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeatId(pub u32);

/// Registry name of an output global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct OutputId(pub u32);

/// Round-trip epoch. The compositor answers sync requests in order, so a
/// completed token implies every smaller token completed as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncToken(pub u64);

/// Pixel layouts offered to the compositor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32 bpp with a premultiplied alpha channel
    Argb8888,
    /// 32 bpp, top byte ignored
    Xrgb8888,
}

impl PixelFormat {
    /// `wl_shm` format code
    pub fn shm_code(&self) -> u32 {
        match self {
            PixelFormat::Argb8888 => 0,
            PixelFormat::Xrgb8888 => 1,
        }
    }

    /// DRM fourcc code
    pub fn fourcc(&self) -> u32 {
        match self {
            PixelFormat::Argb8888 => u32::from_le_bytes(*b"AR24"),
            PixelFormat::Xrgb8888 => u32::from_le_bytes(*b"XR24"),
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        4
    }
}

/// What kind of host sits on the other end of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    /// A Wayland compositor: per-rectangle damage is meaningful
    Compositor,
    /// A plain X11 host: only a bounding box is forwarded
    X11,
}

bitflags! {
    /// Transport readiness as last reported by the transport
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Readiness: u32 {
        /// Incoming data is waiting to be read
        const READABLE = 0b01;
        /// Outgoing requests are still buffered; the socket is not drained
        const WRITE_PENDING = 0b10;
    }
}

bitflags! {
    /// Input capabilities advertised by a seat
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SeatCapabilities: u32 {
        const POINTER = 1;
        const KEYBOARD = 2;
        const TOUCH = 4;
    }
}

/// Whether a flush may block on the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    NonBlocking,
    Blocking,
}

/// A registry advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub name: u32,
    pub interface: String,
    pub version: u32,
}

/// Interfaces the bridge knows how to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    Compositor,
    Shm,
    Drm,
    Output,
    Seat,
    /// Private interface used to tell the compositor which legacy window a surface shows
    XServer,
}

impl Interface {
    /// Recognize an advertised interface name; unknown names are ignored by the caller
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "wl_compositor" => Some(Interface::Compositor),
            "wl_shm" => Some(Interface::Shm),
            "wl_drm" => Some(Interface::Drm),
            "wl_output" => Some(Interface::Output),
            "wl_seat" => Some(Interface::Seat),
            "xserver" => Some(Interface::XServer),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Interface::Compositor => "wl_compositor",
            Interface::Shm => "wl_shm",
            Interface::Drm => "wl_drm",
            Interface::Output => "wl_output",
            Interface::Seat => "wl_seat",
            Interface::XServer => "xserver",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subpixel {
    #[default]
    Unknown,
    None,
    HorizontalRgb,
    HorizontalBgr,
    VerticalRgb,
    VerticalBgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Vertical,
    Horizontal,
}

/// Events delivered by the compositor, already decoded by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum CompositorEvent {
    Global(Global),
    GlobalRemove { name: u32 },

    /// Path of the DRM device node the compositor renders with
    DrmDevice { path: String },
    /// Answer to the oldest outstanding authenticate request
    DrmAuthenticated,

    /// All sync requests up to and including this token have been processed
    SyncDone { token: SyncToken },

    OutputGeometry {
        output: OutputId,
        x: i32,
        y: i32,
        physical_width: i32,
        physical_height: i32,
        subpixel: Subpixel,
        make: String,
        model: String,
    },
    OutputMode {
        output: OutputId,
        width: i32,
        height: i32,
        /// mHz
        refresh: i32,
        current: bool,
    },

    SeatCapabilities { seat: SeatId, capabilities: SeatCapabilities },

    PointerEnter {
        seat: SeatId,
        serial: u32,
        surface: SurfaceHandle,
        x: f64,
        y: f64,
    },
    PointerLeave { seat: SeatId, serial: u32, surface: SurfaceHandle },
    PointerMotion { seat: SeatId, time: u32, x: f64, y: f64 },
    PointerButton {
        seat: SeatId,
        serial: u32,
        time: u32,
        button: u32,
        pressed: bool,
    },
    PointerAxis {
        seat: SeatId,
        time: u32,
        axis: Axis,
        value: f64,
        /// Wheel detents, when the device reports them
        discrete: Option<i32>,
    },

    KeyboardEnter {
        seat: SeatId,
        serial: u32,
        surface: SurfaceHandle,
        keys: Vec<u32>,
    },
    KeyboardLeave { seat: SeatId, serial: u32, surface: SurfaceHandle },
    KeyboardKey {
        seat: SeatId,
        serial: u32,
        time: u32,
        key: u32,
        pressed: bool,
    },
    KeyboardModifiers {
        seat: SeatId,
        serial: u32,
        depressed: u32,
        latched: u32,
        locked: u32,
        group: u32,
    },
}

/// Requests the bridge makes of the compositor connection.
///
/// Object creation returns `None` when the compositor (or a missing global)
/// makes the request impossible; the bridge treats that as a recoverable
/// failure of the current operation.
pub trait Transport {
    fn host_kind(&self) -> HostKind;

    /// File descriptor to poll for readability
    fn fd(&self) -> RawFd;

    fn readiness(&self) -> Readiness;

    /// Write buffered requests, returning the readiness afterwards
    fn flush(&mut self, mode: FlushMode) -> Result<Readiness>;

    /// Block until the compositor has processed everything sent so far
    fn roundtrip(&mut self) -> Result<Vec<CompositorEvent>>;

    /// Non-blocking read and decode of whatever has arrived
    fn read_events(&mut self) -> Result<Vec<CompositorEvent>>;

    fn bind(&mut self, global: &Global, interface: Interface) -> Result<()>;

    fn create_surface(&mut self) -> Option<SurfaceHandle>;
    fn destroy_surface(&mut self, surface: SurfaceHandle);

    /// Tell the compositor which legacy window the surface shows
    fn associate_window(&mut self, surface: SurfaceHandle, window: u32);

    /// (Re-)map the surface at the given screen geometry
    fn map_surface(&mut self, surface: SurfaceHandle, geometry: Geometry);

    fn attach(&mut self, surface: SurfaceHandle, buffer: Option<BufferHandle>);
    fn damage(&mut self, surface: SurfaceHandle, region: DamageRegion);
    fn commit(&mut self, surface: SurfaceHandle);

    fn create_drm_buffer(
        &mut self,
        name: u32,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> Option<BufferHandle>;

    /// The descriptor is only borrowed; the caller closes it
    fn create_shm_buffer(
        &mut self,
        fd: BorrowedFd<'_>,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> Option<BufferHandle>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Ask for `SyncDone { token }` once the compositor has caught up
    fn sync(&mut self, token: SyncToken);

    fn drm_authenticate(&mut self, magic: u32);

    /// Acquire (or drop) the pointer/keyboard objects of a seat
    fn bind_seat_devices(&mut self, seat: SeatId, capabilities: SeatCapabilities);

    fn set_cursor(
        &mut self,
        seat: SeatId,
        serial: u32,
        buffer: Option<BufferHandle>,
        hot_x: i32,
        hot_y: i32,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_names_roundtrip() {
        for iface in [
            Interface::Compositor,
            Interface::Shm,
            Interface::Drm,
            Interface::Output,
            Interface::Seat,
            Interface::XServer,
        ] {
            assert_eq!(Interface::from_name(iface.name()), Some(iface));
        }
        assert_eq!(Interface::from_name("xdg_wm_base"), None);
    }

    #[test]
    fn test_format_codes() {
        assert_eq!(PixelFormat::Argb8888.shm_code(), 0);
        assert_eq!(PixelFormat::Xrgb8888.shm_code(), 1);
        assert_eq!(PixelFormat::Argb8888.fourcc(), 0x3432_5241);
        assert_eq!(PixelFormat::Xrgb8888.fourcc(), 0x3432_5258);
    }
}
