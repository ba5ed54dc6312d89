//! The bridge context
//!
//! [`Bridge`] owns every piece of bridge state and is threaded explicitly
//! through every callback: the screen hooks reach it through
//! [`BridgeContext`], the driver calls its entry points directly.
//!
//! # Overview
//!
//! ```text
//! pre_init ──► register globals ──► [DRM auth] ──► Ready
//! screen_init ──► install hooks, replay deferred events
//!
//! legacy hooks ──► surfaces ──► buffer provider ──► transport
//! damage reports ──► aggregator ──(post_damage)──► transport
//! transport events (wakeup) ──► input / outputs / sync / auth
//! ```

use crate::buffer::{self, BufferProvider};
use crate::config::{BridgeConfig, BufferBackend, WindowMode};
use crate::connection::auth::Requester;
use crate::connection::device::{self, AuthSource};
use crate::connection::{AuthStatus, Connection, ConnectionState};
use crate::cursor::{CursorImage, CursorManager};
use crate::damage::DamageAggregator;
use crate::error::{BridgeError, Result};
use crate::input::{InputBridge, XkbState};
use crate::output::OutputManager;
use crate::protocol::{CompositorEvent, Interface, OutputId, SeatId, Transport};
use crate::server::hooks::ScreenHooks;
use crate::server::{ClientId, CursorId, LegacyServer, WindowId};
use crate::surface::SurfaceManager;
use log::{debug, info, warn};
use std::os::fd::RawFd;

/// Name under which the bridge wraps screen hooks
pub const HOOK_NAME: &str = "xwl-bridge";

/// Access to the bridge and the legacy server from inside a screen hook
pub trait BridgeContext {
    type Transport: Transport;
    type Server: LegacyServer;

    fn parts(&mut self) -> (&mut Bridge<Self::Transport>, &mut Self::Server);
}

pub struct Bridge<T: Transport> {
    config: BridgeConfig,
    connection: Connection<T>,
    backend: BufferBackend,
    provider: Box<dyn BufferProvider<T>>,
    surfaces: SurfaceManager,
    damage: DamageAggregator,
    input: InputBridge,
    outputs: OutputManager,
    cursors: CursorManager,
    deferred: Vec<CompositorEvent>,
}

impl<T: Transport> Bridge<T> {
    /// Connect, discover globals and authenticate before the screen exists
    pub fn pre_init(config: BridgeConfig, transport: T) -> Result<Self> {
        Self::pre_init_with(config, transport, device::open_card)
    }

    /// [`Bridge::pre_init`] with a custom way of opening the DRM device
    pub fn pre_init_with<F>(config: BridgeConfig, transport: T, open: F) -> Result<Self>
    where
        F: FnOnce(&str) -> Result<Box<dyn AuthSource>>,
    {
        config
            .validate()
            .map_err(|e| BridgeError::Config(format!("{:#}", e)))?;

        let mut connection = Connection::new(transport);
        let mut deferred = connection.register()?;

        let mut backend = config.bridge.buffer_backend;
        if backend == BufferBackend::Drm {
            match connection.authenticate_bridge(open) {
                Ok(events) => deferred.extend(events),
                Err(err)
                    if config.bridge.shm_fallback && connection.has_interface(Interface::Shm) =>
                {
                    warn!("{}, falling back to shared memory", err);
                    backend = BufferBackend::Shm;
                }
                Err(err) => return Err(err),
            }
        }
        if backend == BufferBackend::Shm && !connection.has_interface(Interface::Shm) {
            return Err(BridgeError::Connection(
                "compositor does not advertise wl_shm".into(),
            ));
        }
        connection.mark_ready();

        info!(
            "Bridge ready: {:?} mode, {} buffers, {:?} host",
            config.bridge.mode,
            backend.as_str(),
            connection.host_kind()
        );

        let provider = buffer::provider_for(backend, connection.is_authenticated());
        Ok(Self {
            damage: DamageAggregator::new(config.damage.mode, connection.host_kind()),
            surfaces: SurfaceManager::new(config.bridge.mode),
            input: InputBridge::new(config.input.clone()),
            outputs: OutputManager::new(config.output.clone()),
            cursors: CursorManager::new(),
            config,
            connection,
            backend,
            provider,
            deferred,
        })
    }

    /// Install the window hooks and catch up on events seen during pre-init
    pub fn screen_init<C>(&mut self, server: &mut C::Server, hooks: &mut ScreenHooks<C>) -> Result<()>
    where
        C: BridgeContext<Transport = T> + 'static,
        T: 'static,
    {
        if self.connection.state() != ConnectionState::Ready {
            return Err(BridgeError::Connection(format!(
                "screen init on a {:?} connection",
                self.connection.state()
            )));
        }

        hooks.create_window.wrap(HOOK_NAME, |ctx: &mut C, window, created| {
            if created {
                let (bridge, server) = ctx.parts();
                bridge.window_created(server, window);
            }
            created
        });

        hooks.realize_window.wrap(HOOK_NAME, |ctx: &mut C, window, realized| {
            if !realized {
                return false;
            }
            let (bridge, server) = ctx.parts();
            match bridge.realize_window(server, window) {
                Ok(_) => true,
                Err(err) => {
                    warn!("Failed to realize {:?}: {}", window, err);
                    false
                }
            }
        });

        hooks.unrealize_window.wrap_around(
            HOOK_NAME,
            |ctx: &mut C, window| {
                let (bridge, server) = ctx.parts();
                bridge.detach_window(server, window);
            },
            |ctx: &mut C, window, result| {
                let (bridge, server) = ctx.parts();
                bridge.unrealize_window(server, window);
                result
            },
        );

        hooks
            .set_window_pixmap
            .wrap(HOOK_NAME, |ctx: &mut C, (window, _pixmap), ()| {
                let (bridge, server) = ctx.parts();
                bridge.window_pixmap_changed(server, window);
            });

        hooks.move_window.wrap(HOOK_NAME, |ctx: &mut C, window, ()| {
            let (bridge, server) = ctx.parts();
            bridge.window_moved(server, window);
        });

        for event in std::mem::take(&mut self.deferred) {
            self.process(server, event)?;
        }
        info!("Screen hooks installed");
        Ok(())
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection<T> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection<T> {
        &mut self.connection
    }

    pub fn backend(&self) -> BufferBackend {
        self.backend
    }

    pub fn surfaces(&self) -> &SurfaceManager {
        &self.surfaces
    }

    pub fn damage(&self) -> &DamageAggregator {
        &self.damage
    }

    pub fn input(&self) -> &InputBridge {
        &self.input
    }

    pub fn outputs(&self) -> &OutputManager {
        &self.outputs
    }

    pub fn cursors(&self) -> &CursorManager {
        &self.cursors
    }

    pub fn screen_size(&self) -> (u32, u32) {
        self.outputs.screen_size()
    }

    /// File descriptor the server should poll for compositor events
    pub fn transport_fd(&self) -> RawFd {
        self.connection.fd()
    }

    /// Create-window hook: in rootless mode the root window takes over
    /// compositing so that top-levels get redirected
    pub fn window_created<S: LegacyServer>(&mut self, server: &mut S, window: WindowId) {
        if self.surfaces.mode() != WindowMode::Rootless {
            return;
        }
        let Some(info) = server.window(window) else {
            return;
        };
        if !info.is_root() {
            return;
        }

        let selection = format!("_NET_WM_CM_S{}", server.screen_number());
        if !server.claim_selection(&selection) {
            warn!("Could not claim {}", selection);
        }
        if !server.redirect_subwindows(window) {
            warn!("Could not redirect subwindows of root {:?}", window);
        }
        debug!("Root {:?} claimed {} and redirected its children", window, selection);
    }

    pub fn realize_window<S: LegacyServer>(&mut self, server: &mut S, window: WindowId) -> Result<bool> {
        self.surfaces
            .realize(&mut self.connection, server, self.provider.as_ref(), window)
    }

    /// Drop every reference to a window's surface without freeing it
    pub fn detach_window<S: LegacyServer>(&mut self, server: &mut S, window: WindowId) {
        self.surfaces.begin_destroy(window);
        self.input.forget_window(server, window);
        self.damage.forget(window);
    }

    pub fn unrealize_window<S: LegacyServer>(&mut self, server: &mut S, window: WindowId) -> bool {
        self.detach_window(server, window);
        self.surfaces.destroy(&mut self.connection, server, window)
    }

    pub fn window_pixmap_changed<S: LegacyServer>(&mut self, server: &mut S, window: WindowId) -> bool {
        self.surfaces
            .attach(&mut self.connection, server, self.provider.as_ref(), window)
    }

    pub fn window_moved<S: LegacyServer>(&mut self, server: &mut S, window: WindowId) -> bool {
        let Some(info) = server.window(window) else {
            return false;
        };
        self.surfaces
            .move_window(&mut self.connection, window, info.geometry)
    }

    /// Damage report callback; returns whether the window was newly queued
    pub fn damage_report(&mut self, window: WindowId) -> bool {
        if self.surfaces.get(window).is_none() {
            return false;
        }
        self.damage.report(window)
    }

    /// Damage record destroyed by the server
    pub fn damage_destroyed(&mut self, window: WindowId) {
        self.damage.forget(window);
    }

    /// One synchronization tick, called after the driver submitted a frame
    pub fn post_damage<S: LegacyServer>(&mut self, server: &mut S) -> Result<usize> {
        self.damage.flush(&mut self.connection, server, &self.surfaces)
    }

    /// DRM authentication request from a legacy client
    pub fn authenticate<S: LegacyServer>(
        &mut self,
        server: &mut S,
        client: ClientId,
        magic: u32,
    ) -> Result<AuthStatus> {
        let status = self.connection.authenticate_client(client, magic)?;
        if status == AuthStatus::Deferred {
            server.ignore_client(client);
        }
        Ok(status)
    }

    /// Whether the server may resize its screen
    pub fn resize_screen(&self, width: u32, height: u32) -> bool {
        self.outputs.resize_allowed(width, height)
    }

    pub fn realize_cursor(&mut self, cursor: CursorId, image: &CursorImage) -> Result<()> {
        self.cursors
            .realize(self.connection.transport_mut(), cursor, image)
    }

    pub fn unrealize_cursor(&mut self, cursor: CursorId) -> bool {
        self.cursors
            .unrealize(self.connection.transport_mut(), cursor)
    }

    pub fn set_cursor(&mut self, cursor: Option<CursorId>) -> bool {
        self.cursors
            .set_cursor(self.connection.transport_mut(), &self.input, cursor)
    }

    /// Block handler: the only place that waits for the socket to drain
    pub fn block(&mut self) -> Result<()> {
        self.connection.block()
    }

    /// Wakeup handler: read and dispatch whatever the compositor sent
    pub fn wakeup<S: LegacyServer>(&mut self, server: &mut S, readable: bool) -> Result<usize> {
        let events = self.connection.wakeup(readable)?;
        let count = events.len();
        for event in events {
            self.process(server, event)?;
        }
        Ok(count)
    }

    /// Dispatch an event the connection has already seen
    fn process<S: LegacyServer>(&mut self, server: &mut S, event: CompositorEvent) -> Result<()> {
        match event {
            CompositorEvent::Global(global) => match Interface::from_name(&global.interface) {
                Some(Interface::Output) => self.outputs.add(server, OutputId(global.name)),
                Some(Interface::Seat) => debug!("Seat {} announced", global.name),
                _ => {}
            },
            CompositorEvent::GlobalRemove { name } => {
                if !self.outputs.remove(server, OutputId(name)) {
                    self.input.remove_seat(server, SeatId(name));
                }
            }
            CompositorEvent::DrmAuthenticated => {
                if let Some(done) = self.connection.complete_auth()? {
                    if let Requester::Client(client) = done.requester {
                        server.attend_client(client);
                    }
                }
            }
            CompositorEvent::SyncDone { token } => {
                self.surfaces.sync_done(server, token);
            }
            event @ (CompositorEvent::OutputGeometry { .. } | CompositorEvent::OutputMode { .. }) => {
                self.outputs.apply(server, &event);
            }
            CompositorEvent::SeatCapabilities { seat, capabilities } => {
                self.connection
                    .transport_mut()
                    .bind_seat_devices(seat, capabilities);
                self.input.set_capabilities(server, seat, capabilities);
            }
            CompositorEvent::PointerEnter {
                seat,
                serial,
                surface,
                x,
                y,
            } => match self.surfaces.window_for(surface) {
                Some(window) => {
                    self.input
                        .pointer_enter(server, &self.surfaces, seat, serial, window, x, y)
                }
                None => debug!("Pointer entered foreign surface {:?}", surface),
            },
            CompositorEvent::PointerLeave { seat, .. } => self.input.pointer_leave(server, seat),
            CompositorEvent::PointerMotion { seat, time, x, y } => {
                self.input
                    .pointer_motion(server, &self.surfaces, seat, time, x, y)
            }
            CompositorEvent::PointerButton {
                seat,
                time,
                button,
                pressed,
                ..
            } => self
                .input
                .pointer_button(server, seat, time, button, pressed),
            CompositorEvent::PointerAxis {
                seat,
                time,
                axis,
                value,
                discrete,
            } => self
                .input
                .pointer_axis(server, seat, time, axis, value, discrete),
            CompositorEvent::KeyboardEnter {
                seat,
                surface,
                keys,
                ..
            } => match self.surfaces.window_for(surface) {
                Some(window) => self.input.keyboard_enter(server, seat, window, &keys),
                None => debug!("Keyboard entered foreign surface {:?}", surface),
            },
            CompositorEvent::KeyboardLeave { seat, .. } => self.input.keyboard_leave(server, seat),
            CompositorEvent::KeyboardKey {
                seat,
                time,
                key,
                pressed,
                ..
            } => self.input.keyboard_key(server, seat, time, key, pressed),
            CompositorEvent::KeyboardModifiers {
                seat,
                depressed,
                latched,
                locked,
                group,
                ..
            } => self.input.keyboard_modifiers(
                seat,
                XkbState {
                    depressed,
                    latched,
                    locked,
                    group,
                },
            ),
            CompositorEvent::DrmDevice { .. } => {}
        }
        Ok(())
    }

    /// Tear everything down; the bridge is unusable afterwards
    pub fn close<S: LegacyServer>(&mut self, server: &mut S) {
        let windows: Vec<WindowId> = self.surfaces.windows().collect();
        for window in windows {
            self.input.forget_window(server, window);
        }
        self.input.close(server);
        self.surfaces.close(&mut self.connection, server);
        self.cursors.close(self.connection.transport_mut());
        self.outputs.close(server);
        self.damage = DamageAggregator::new(self.config.damage.mode, self.connection.host_kind());

        if let Err(err) = self.connection.block() {
            warn!("Final flush failed: {}", err);
        }
        for request in self.connection.close() {
            if let Requester::Client(client) = request.requester {
                server.attend_client(client);
            }
        }
        info!("Bridge closed");
    }
}
