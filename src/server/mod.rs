//! Legacy server collaborator interfaces
//!
//! The bridge does not own any legacy window, pixmap, region or device
//! structure. It borrows them through the traits in this module, which an
//! embedding server implements. Identity is always by id; the bridge keeps
//! its own side tables keyed by these ids.

pub mod hooks;

use crate::buffer::PixelSource;
use crate::config::BufferBackend;
use crate::damage::DamageRegion;
use crate::error::BufferError;
use crate::output::VirtualOutput;
use crate::protocol::OutputId;

macro_rules! server_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

server_id! {
    /// Legacy window (XID)
    WindowId,
    /// Legacy pixmap (XID)
    PixmapId,
    /// Legacy input device
    DeviceId,
    /// Legacy client connection
    ClientId,
    /// Damage-tracking record attached to a window
    DamageId,
    /// Legacy cursor
    CursorId,
}

/// Screen-space rectangle of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// The parts of a visual the bridge cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Visual {
    /// Significant bits per pixel
    pub nplanes: u32,
    /// Whether the visual carries an alpha mask
    pub has_alpha: bool,
}

impl Visual {
    pub const RGB24: Visual = Visual {
        nplanes: 24,
        has_alpha: false,
    };

    pub const ARGB32: Visual = Visual {
        nplanes: 32,
        has_alpha: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: WindowId,
    /// `None` for the root window
    pub parent: Option<WindowId>,
    pub geometry: Geometry,
    pub visual: Visual,
    /// Composite-redirected, i.e. rendered into its own pixmap
    pub redirected: bool,
}

impl WindowInfo {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixmapInfo {
    pub id: PixmapId,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the exported storage
    pub stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Pointer,
    Keyboard,
}

/// Windows and their backing pixmaps
pub trait WindowSystem {
    fn window(&self, id: WindowId) -> Option<WindowInfo>;

    /// Index of the screen the bridge drives
    fn screen_number(&self) -> u32;

    fn window_pixmap(&self, id: WindowId) -> Option<PixmapInfo>;

    /// Export pixmap storage in the form the given backend shares it
    fn export_pixmap(
        &mut self,
        pixmap: PixmapId,
        backend: BufferBackend,
    ) -> Result<PixelSource, BufferError>;

    /// Take a reference that keeps the pixmap alive
    fn reference_pixmap(&mut self, pixmap: PixmapId);

    /// Drop a reference taken with [`WindowSystem::reference_pixmap`]
    fn release_pixmap(&mut self, pixmap: PixmapId);

    /// Manually redirect the children of `window`
    fn redirect_subwindows(&mut self, window: WindowId) -> bool;

    /// Become owner of a selection on behalf of the server itself
    fn claim_selection(&mut self, name: &str) -> bool;
}

/// Per-window damage accumulation
pub trait DamageTracking {
    fn damage_create(&mut self, window: WindowId) -> Option<DamageId>;
    fn damage_destroy(&mut self, damage: DamageId);

    /// Accumulated rectangles, in the order the server stored them
    fn damage_region(&self, damage: DamageId) -> Vec<DamageRegion>;

    fn damage_empty(&mut self, damage: DamageId);
}

/// Input device creation and event injection
pub trait InputSink {
    fn add_input_device(&mut self, kind: DeviceKind, name: &str, buttons: u32) -> Option<DeviceId>;
    fn remove_input_device(&mut self, device: DeviceId);

    fn post_motion(&mut self, device: DeviceId, x: i32, y: i32);
    fn post_button(&mut self, device: DeviceId, button: u32, pressed: bool);
    fn post_key(&mut self, device: DeviceId, keycode: u32, pressed: bool);

    fn num_buttons(&self, device: DeviceId) -> u32;

    /// Buttons the server believes are held
    fn buttons_down(&self, device: DeviceId) -> Vec<u32>;

    /// Confine sprite events to a window; `None` means the root
    fn set_redirect_window(&mut self, device: DeviceId, window: Option<WindowId>);
}

/// Output/CRTC configuration
pub trait OutputSink {
    fn output_changed(&mut self, output: &VirtualOutput);
    fn output_removed(&mut self, output: OutputId);
    fn screen_resized(&mut self, width: u32, height: u32);
}

/// Scheduling of legacy clients
pub trait ClientControl {
    /// Stop servicing requests from the client
    fn ignore_client(&mut self, client: ClientId);
    fn attend_client(&mut self, client: ClientId);
}

/// Everything the bridge needs from the legacy server
pub trait LegacyServer: WindowSystem + DamageTracking + InputSink + OutputSink + ClientControl {}

impl<S> LegacyServer for S where S: WindowSystem + DamageTracking + InputSink + OutputSink + ClientControl {}
