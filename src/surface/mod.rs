//! Surface lifecycle
//!
//! One compositor surface per tracked legacy window. The manager owns the
//! window→surface directory and drives every surface through
//!
//! ```text
//! Unrealized ─realize─► Detached ─attach ok─► Attached ─unrealize─► Destroying ─► (gone)
//!                          ▲   └─attach failed─┘  │
//!                          └────attach failed─────┘
//! ```
//!
//! A surface holds at most one compositor buffer. Replacing it destroys the
//! old buffer right after the new one is attached; the legacy pixmap behind
//! the old buffer is only released once the compositor has round-tripped past
//! the replacement (see [`release::ReleaseQueue`]).

pub mod release;

use crate::buffer::{format_for_visual, BufferLayout, BufferProvider};
use crate::config::WindowMode;
use crate::connection::Connection;
use crate::damage::DamageRegion;
use crate::error::{BridgeError, BufferError, Result};
use crate::input::WindowOrigins;
use crate::protocol::{BufferHandle, Interface, PixelFormat, SurfaceHandle, SyncToken, Transport};
use crate::server::{DamageId, Geometry, LegacyServer, PixmapId, WindowId, WindowInfo};
use log::{debug, info, warn};
use release::ReleaseQueue;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    /// Realized, no buffer attached
    Detached,
    /// Realized with a live buffer
    Attached,
    /// Being torn down; not visible to lookups any more
    Destroying,
}

#[derive(Debug)]
pub struct Surface {
    pub window: WindowId,
    pub handle: SurfaceHandle,
    pub buffer: Option<BufferHandle>,
    /// Pixmap behind `buffer`, referenced while the buffer lives
    pub pixmap: Option<PixmapId>,
    pub format: PixelFormat,
    pub damage: DamageId,
    pub geometry: Geometry,
    pub state: SurfaceState,
}

impl Surface {
    pub fn is_live(&self) -> bool {
        self.state != SurfaceState::Destroying
    }
}

/// Window→surface directory plus the deferred pixmap releases
#[derive(Debug)]
pub struct SurfaceManager {
    mode: WindowMode,
    surfaces: HashMap<WindowId, Surface>,
    by_handle: HashMap<SurfaceHandle, WindowId>,
    releases: ReleaseQueue,
}

impl SurfaceManager {
    pub fn new(mode: WindowMode) -> Self {
        Self {
            mode,
            surfaces: HashMap::new(),
            by_handle: HashMap::new(),
            releases: ReleaseQueue::new(),
        }
    }

    pub fn mode(&self) -> WindowMode {
        self.mode
    }

    /// Whether the window gets a surface in the current mode
    pub fn wants(&self, info: &WindowInfo) -> bool {
        match self.mode {
            WindowMode::Rootless => !info.is_root() && info.redirected,
            WindowMode::Fullscreen => info.is_root(),
        }
    }

    pub fn get(&self, window: WindowId) -> Option<&Surface> {
        self.surfaces.get(&window).filter(|s| s.is_live())
    }

    /// Window shown by a compositor surface
    pub fn window_for(&self, handle: SurfaceHandle) -> Option<WindowId> {
        let window = *self.by_handle.get(&handle)?;
        self.get(window).map(|s| s.window)
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn windows(&self) -> impl Iterator<Item = WindowId> + '_ {
        self.surfaces.keys().copied()
    }

    pub fn pending_releases(&self) -> usize {
        self.releases.len()
    }

    /// Create the surface for a window that just became viewable
    ///
    /// Returns `Ok(false)` for windows the current mode ignores. Failing to
    /// create the buffer is not an error: the surface stays detached.
    pub fn realize<T: Transport, S: LegacyServer>(
        &mut self,
        conn: &mut Connection<T>,
        server: &mut S,
        provider: &dyn BufferProvider<T>,
        window: WindowId,
    ) -> Result<bool> {
        let Some(info) = server.window(window) else {
            warn!("Realize for unknown window {:?}", window);
            return Ok(false);
        };
        if !self.wants(&info) {
            return Ok(false);
        }
        if self.surfaces.contains_key(&window) {
            debug!("Window {:?} already has a surface", window);
            return Ok(true);
        }

        let handle = conn
            .transport_mut()
            .create_surface()
            .ok_or(BridgeError::ProtocolObject("wl_surface"))?;

        let Some(damage) = server.damage_create(window) else {
            conn.transport_mut().destroy_surface(handle);
            return Err(BridgeError::ProtocolObject("damage record"));
        };

        if conn.has_interface(Interface::XServer) {
            conn.transport_mut().associate_window(handle, window.0);
        }
        conn.transport_mut().map_surface(handle, info.geometry);

        info!(
            "Realized window {:?} as surface {:?} at {}x{}+{}+{}",
            window,
            handle,
            info.geometry.width,
            info.geometry.height,
            info.geometry.x,
            info.geometry.y
        );

        self.surfaces.insert(
            window,
            Surface {
                window,
                handle,
                buffer: None,
                pixmap: None,
                format: format_for_visual(&info.visual),
                damage,
                geometry: info.geometry,
                state: SurfaceState::Detached,
            },
        );
        self.by_handle.insert(handle, window);

        self.attach(conn, server, provider, window);
        Ok(true)
    }

    /// Attach a buffer for the window's current pixmap
    ///
    /// Returns whether the surface ended up with a buffer.
    pub fn attach<T: Transport, S: LegacyServer>(
        &mut self,
        conn: &mut Connection<T>,
        server: &mut S,
        provider: &dyn BufferProvider<T>,
        window: WindowId,
    ) -> bool {
        let Some(surface) = self.surfaces.get_mut(&window).filter(|s| s.is_live()) else {
            return false;
        };

        let created = server
            .window_pixmap(window)
            .ok_or_else(|| BufferError::Export(format!("{:?} has no pixmap", window)))
            .and_then(|pixmap| {
                let source = server.export_pixmap(pixmap.id, provider.backend())?;
                let layout = BufferLayout {
                    width: pixmap.width,
                    height: pixmap.height,
                    stride: pixmap.stride,
                    format: surface.format,
                };
                let buffer = provider.create_buffer(conn.transport_mut(), source, layout)?;
                Ok((pixmap, buffer))
            });

        let old_buffer = surface.buffer.take();
        let old_pixmap = surface.pixmap.take();

        let attached = match created {
            Ok((pixmap, buffer)) => {
                server.reference_pixmap(pixmap.id);
                let transport = conn.transport_mut();
                transport.attach(surface.handle, Some(buffer));
                transport.damage(
                    surface.handle,
                    DamageRegion::new(0, 0, pixmap.width, pixmap.height),
                );
                transport.commit(surface.handle);

                surface.buffer = Some(buffer);
                surface.pixmap = Some(pixmap.id);
                surface.state = SurfaceState::Attached;
                true
            }
            Err(err) => {
                warn!("No buffer for window {:?}: {}", window, err);
                if old_buffer.is_some() {
                    conn.transport_mut().attach(surface.handle, None);
                }
                surface.state = SurfaceState::Detached;
                false
            }
        };

        if let Some(buffer) = old_buffer {
            conn.transport_mut().destroy_buffer(buffer);
        }
        if let Some(pixmap) = old_pixmap {
            let token = conn.sync();
            self.releases.defer(token, pixmap);
        }
        attached
    }

    /// Re-map a surface at the window's new geometry
    pub fn move_window<T: Transport>(
        &mut self,
        conn: &mut Connection<T>,
        window: WindowId,
        geometry: Geometry,
    ) -> bool {
        let Some(surface) = self.surfaces.get_mut(&window).filter(|s| s.is_live()) else {
            return false;
        };
        if surface.geometry == geometry {
            return true;
        }
        surface.geometry = geometry;
        conn.transport_mut().map_surface(surface.handle, geometry);
        true
    }

    /// Mark a surface as going away; lookups stop returning it
    pub fn begin_destroy(&mut self, window: WindowId) -> bool {
        match self.surfaces.get_mut(&window) {
            Some(surface) if surface.is_live() => {
                surface.state = SurfaceState::Destroying;
                true
            }
            _ => false,
        }
    }

    /// Release every compositor and legacy resource of a surface
    ///
    /// Callers clear every reference to the window (input focus, pending
    /// damage) before calling this.
    pub fn destroy<T: Transport, S: LegacyServer>(
        &mut self,
        conn: &mut Connection<T>,
        server: &mut S,
        window: WindowId,
    ) -> bool {
        let Some(surface) = self.surfaces.remove(&window) else {
            return false;
        };
        self.by_handle.remove(&surface.handle);

        let transport = conn.transport_mut();
        if let Some(buffer) = surface.buffer {
            transport.destroy_buffer(buffer);
        }
        transport.destroy_surface(surface.handle);
        server.damage_destroy(surface.damage);

        if let Some(pixmap) = surface.pixmap {
            let token = conn.sync();
            self.releases.defer(token, pixmap);
        }

        info!("Destroyed surface {:?} of window {:?}", surface.handle, window);
        true
    }

    /// Release pixmaps whose replacement the compositor has caught up with
    pub fn sync_done<S: LegacyServer>(&mut self, server: &mut S, token: SyncToken) -> usize {
        let ready = self.releases.complete(token);
        for pixmap in &ready {
            server.release_pixmap(*pixmap);
        }
        ready.len()
    }

    /// Tear down every surface and release every deferred pixmap
    pub fn close<T: Transport, S: LegacyServer>(&mut self, conn: &mut Connection<T>, server: &mut S) {
        let windows: Vec<WindowId> = self.surfaces.keys().copied().collect();
        for window in windows {
            self.begin_destroy(window);
            self.destroy(conn, server, window);
        }
        for pixmap in self.releases.drain() {
            server.release_pixmap(pixmap);
        }
    }
}

impl WindowOrigins for SurfaceManager {
    fn origin(&self, window: WindowId) -> Option<(i32, i32)> {
        self.get(window).map(|s| (s.geometry.x, s.geometry.y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ShmBufferProvider;
    use crate::server::{Visual, WindowSystem};
    use crate::testing::{FakeServer, RecordingTransport};

    fn setup(mode: WindowMode) -> (SurfaceManager, Connection<RecordingTransport>, FakeServer) {
        let conn = Connection::new(RecordingTransport::new());
        (SurfaceManager::new(mode), conn, FakeServer::new())
    }

    #[test]
    fn test_mode_filter() {
        let (rootless, _, mut server) = setup(WindowMode::Rootless);
        let fullscreen = SurfaceManager::new(WindowMode::Fullscreen);

        let root = server.root_info();
        let top = server.add_toplevel(Geometry::new(0, 0, 10, 10), Visual::RGB24);
        let top_info = server.window(top).unwrap();
        server.set_redirected(top, false);
        let plain_info = server.window(top).unwrap();

        assert!(!rootless.wants(&root));
        assert!(rootless.wants(&top_info));
        assert!(!rootless.wants(&plain_info));
        assert!(fullscreen.wants(&root));
        assert!(!fullscreen.wants(&top_info));
    }

    #[test]
    fn test_realize_attaches_buffer() {
        let (mut surfaces, mut conn, mut server) = setup(WindowMode::Rootless);
        let window = server.add_toplevel(Geometry::new(5, 6, 100, 100), Visual::RGB24);

        assert!(surfaces.realize(&mut conn, &mut server, &ShmBufferProvider, window).unwrap());

        let surface = surfaces.get(window).unwrap();
        assert_eq!(surface.state, SurfaceState::Attached);
        assert_eq!(surface.format, PixelFormat::Xrgb8888);
        assert_eq!(surfaces.window_for(surface.handle), Some(window));
        assert_eq!(conn.transport().buffers_created(), 1);
        assert_eq!(server.pixmap_refs(server.pixmap_of(window).unwrap()), 1);
    }

    #[test]
    fn test_realize_without_buffer_stays_detached() {
        let (mut surfaces, mut conn, mut server) = setup(WindowMode::Rootless);
        let window = server.add_toplevel(Geometry::new(0, 0, 10, 10), Visual::ARGB32);
        conn.transport_mut().fail_buffers(true);

        assert!(surfaces.realize(&mut conn, &mut server, &ShmBufferProvider, window).unwrap());
        let surface = surfaces.get(window).unwrap();
        assert_eq!(surface.state, SurfaceState::Detached);
        assert_eq!(surface.buffer, None);
        assert_eq!(surface.format, PixelFormat::Argb8888);
    }

    #[test]
    fn test_realize_surface_failure_is_error() {
        let (mut surfaces, mut conn, mut server) = setup(WindowMode::Rootless);
        let window = server.add_toplevel(Geometry::new(0, 0, 10, 10), Visual::RGB24);
        conn.transport_mut().fail_surfaces(true);

        let err = surfaces
            .realize(&mut conn, &mut server, &ShmBufferProvider, window)
            .unwrap_err();
        assert!(matches!(err, BridgeError::ProtocolObject("wl_surface")));
        assert!(surfaces.is_empty());
    }

    #[test]
    fn test_reattach_defers_pixmap_release() {
        let (mut surfaces, mut conn, mut server) = setup(WindowMode::Rootless);
        let window = server.add_toplevel(Geometry::new(0, 0, 10, 10), Visual::RGB24);
        surfaces.realize(&mut conn, &mut server, &ShmBufferProvider, window).unwrap();
        let first = server.pixmap_of(window).unwrap();

        server.replace_pixmap(window, 20, 20);
        assert!(surfaces.attach(&mut conn, &mut server, &ShmBufferProvider, window));

        assert_eq!(conn.transport().live_buffers(), 1);
        assert_eq!(server.pixmap_refs(first), 1, "held until the compositor catches up");
        assert_eq!(surfaces.pending_releases(), 1);

        let token = conn.transport().last_sync().unwrap();
        assert_eq!(surfaces.sync_done(&mut server, token), 1);
        assert_eq!(server.pixmap_refs(first), 0);
    }

    #[test]
    fn test_move_remaps_only_on_change() {
        let (mut surfaces, mut conn, mut server) = setup(WindowMode::Rootless);
        let window = server.add_toplevel(Geometry::new(0, 0, 10, 10), Visual::RGB24);
        surfaces.realize(&mut conn, &mut server, &ShmBufferProvider, window).unwrap();
        let maps = conn.transport().map_count();

        assert!(surfaces.move_window(&mut conn, window, Geometry::new(0, 0, 10, 10)));
        assert_eq!(conn.transport().map_count(), maps);

        assert!(surfaces.move_window(&mut conn, window, Geometry::new(40, 50, 10, 10)));
        assert_eq!(conn.transport().map_count(), maps + 1);
        assert_eq!(surfaces.origin(window), Some((40, 50)));
    }

    #[test]
    fn test_destroying_surface_hidden_from_lookups() {
        let (mut surfaces, mut conn, mut server) = setup(WindowMode::Rootless);
        let window = server.add_toplevel(Geometry::new(0, 0, 10, 10), Visual::RGB24);
        surfaces.realize(&mut conn, &mut server, &ShmBufferProvider, window).unwrap();
        let handle = surfaces.get(window).unwrap().handle;

        assert!(surfaces.begin_destroy(window));
        assert!(surfaces.get(window).is_none());
        assert_eq!(surfaces.window_for(handle), None);
        assert!(!surfaces.attach(&mut conn, &mut server, &ShmBufferProvider, window));

        assert!(surfaces.destroy(&mut conn, &mut server, window));
        assert_eq!(conn.transport().live_buffers(), 0);
        assert_eq!(conn.transport().live_surfaces(), 0);
    }
}
