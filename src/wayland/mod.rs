//! wayland-client transport
//!
//! Speaks the core protocol only: `wl_compositor`, `wl_shm`, `wl_output`
//! and `wl_seat`. Globals for anything else are not reported, so a DRM
//! backend request falls back to shared memory and surfaces are not
//! associated with legacy windows.

use crate::damage::DamageRegion;
use crate::error::{BridgeError, Result};
use crate::protocol::{
    self, BufferHandle, CompositorEvent, FlushMode, Global, HostKind, Interface, OutputId,
    PixelFormat, Readiness, SeatCapabilities, SeatId, Subpixel, SurfaceHandle, SyncToken,
    Transport,
};
use crate::server::Geometry;
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::fmt::Display;
use std::io::ErrorKind;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use wayland_client::backend::{ObjectId, WaylandError};
use wayland_client::protocol::{
    wl_buffer::WlBuffer,
    wl_callback::{self, WlCallback},
    wl_compositor::WlCompositor,
    wl_keyboard::{self, WlKeyboard},
    wl_output::{self, WlOutput},
    wl_pointer::{self, WlPointer},
    wl_registry::{self, WlRegistry},
    wl_seat::{self, WlSeat},
    wl_shm::{self, WlShm},
    wl_shm_pool::WlShmPool,
    wl_surface::WlSurface,
};
use wayland_client::{Connection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum};

fn lost<E: Display>(what: &'static str) -> impl FnOnce(E) -> BridgeError {
    move |err| BridgeError::Connection(format!("{}: {}", what, err))
}

#[derive(Default)]
struct SeatObjects {
    seat: Option<WlSeat>,
    pointer: Option<WlPointer>,
    keyboard: Option<WlKeyboard>,
    cursor_surface: Option<WlSurface>,
}

/// Protocol objects and the events decoded since the last read
struct State {
    events: Vec<CompositorEvent>,
    compositor: Option<WlCompositor>,
    shm: Option<WlShm>,
    outputs: HashMap<u32, WlOutput>,
    seats: HashMap<SeatId, SeatObjects>,
    surfaces: HashMap<SurfaceHandle, WlSurface>,
    surface_ids: HashMap<ObjectId, SurfaceHandle>,
    buffers: HashMap<BufferHandle, WlBuffer>,
    pending_discrete: HashMap<(SeatId, protocol::Axis), i32>,
}

impl State {
    fn surface_handle(&self, surface: &WlSurface) -> Option<SurfaceHandle> {
        self.surface_ids.get(&surface.id()).copied()
    }
}

pub struct WaylandTransport {
    conn: Connection,
    queue: EventQueue<State>,
    qh: QueueHandle<State>,
    registry: WlRegistry,
    state: State,
    readiness: Readiness,
    next_id: u32,
}

impl WaylandTransport {
    /// Connect to a named display, or to `$WAYLAND_DISPLAY`
    pub fn connect(display: Option<&str>) -> Result<Self> {
        let conn = match display {
            Some(name) => {
                let path = PathBuf::from(name);
                let path = if path.is_absolute() {
                    path
                } else {
                    let runtime = std::env::var_os("XDG_RUNTIME_DIR").ok_or_else(|| {
                        BridgeError::Connection("XDG_RUNTIME_DIR is unset".into())
                    })?;
                    PathBuf::from(runtime).join(path)
                };
                let stream = UnixStream::connect(&path)
                    .map_err(|e| BridgeError::Connection(format!("{}: {}", path.display(), e)))?;
                Connection::from_socket(stream).map_err(lost("connect"))?
            }
            None => Connection::connect_to_env().map_err(lost("connect_to_env"))?,
        };

        let queue = conn.new_event_queue();
        let qh = queue.handle();
        let registry = conn.display().get_registry(&qh, ());
        debug!("Connected to compositor");

        Ok(Self {
            conn,
            queue,
            qh,
            registry,
            state: State {
                events: Vec::new(),
                compositor: None,
                shm: None,
                outputs: HashMap::new(),
                seats: HashMap::new(),
                surfaces: HashMap::new(),
                surface_ids: HashMap::new(),
                buffers: HashMap::new(),
                pending_discrete: HashMap::new(),
            },
            readiness: Readiness::empty(),
            next_id: 1,
        })
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn try_flush(&mut self) -> Result<Readiness> {
        match self.conn.flush() {
            Ok(()) => Ok(Readiness::empty()),
            Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {
                Ok(Readiness::WRITE_PENDING)
            }
            Err(e) => Err(lost("flush")(e)),
        }
    }

    fn wait_writable(&self) -> Result<()> {
        let mut pfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLOUT,
            revents: 0,
        };
        // SAFETY: `pfd` is a live, initialized pollfd and the count is one.
        let rc = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, -1) };
        if rc < 0 {
            let e = std::io::Error::last_os_error();
            if e.kind() != ErrorKind::Interrupted {
                return Err(BridgeError::Io(e));
            }
        }
        Ok(())
    }
}

impl Transport for WaylandTransport {
    fn host_kind(&self) -> HostKind {
        HostKind::Compositor
    }

    fn fd(&self) -> RawFd {
        self.conn.backend().poll_fd().as_raw_fd()
    }

    fn readiness(&self) -> Readiness {
        self.readiness
    }

    fn flush(&mut self, mode: FlushMode) -> Result<Readiness> {
        self.readiness = self.try_flush()?;
        if mode == FlushMode::Blocking {
            while self.readiness.contains(Readiness::WRITE_PENDING) {
                self.wait_writable()?;
                self.readiness = self.try_flush()?;
            }
        }
        Ok(self.readiness)
    }

    fn roundtrip(&mut self) -> Result<Vec<CompositorEvent>> {
        self.queue
            .roundtrip(&mut self.state)
            .map_err(lost("roundtrip"))?;
        Ok(std::mem::take(&mut self.state.events))
    }

    fn read_events(&mut self) -> Result<Vec<CompositorEvent>> {
        if let Some(guard) = self.conn.prepare_read() {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(lost("read")(e)),
            }
        }
        self.queue
            .dispatch_pending(&mut self.state)
            .map_err(lost("dispatch"))?;
        Ok(std::mem::take(&mut self.state.events))
    }

    fn bind(&mut self, global: &Global, interface: Interface) -> Result<()> {
        let qh = &self.qh;
        match interface {
            Interface::Compositor => {
                let version = global.version.min(4);
                self.state.compositor =
                    Some(self.registry.bind::<WlCompositor, _, _>(global.name, version, qh, ()));
            }
            Interface::Shm => {
                self.state.shm = Some(self.registry.bind::<WlShm, _, _>(global.name, 1, qh, ()));
            }
            Interface::Output => {
                let version = global.version.min(2);
                let output = self.registry.bind::<WlOutput, _, _>(
                    global.name,
                    version,
                    qh,
                    OutputId(global.name),
                );
                self.state.outputs.insert(global.name, output);
            }
            Interface::Seat => {
                let version = global.version.min(5);
                let seat =
                    self.registry
                        .bind::<WlSeat, _, _>(global.name, version, qh, SeatId(global.name));
                self.state.seats.entry(SeatId(global.name)).or_default().seat = Some(seat);
            }
            Interface::Drm | Interface::XServer => {
                return Err(BridgeError::ProtocolObject(interface.name()));
            }
        }
        Ok(())
    }

    fn create_surface(&mut self) -> Option<SurfaceHandle> {
        let surface = self.state.compositor.as_ref()?.create_surface(&self.qh, ());
        let handle = SurfaceHandle(self.allocate());
        self.state.surface_ids.insert(surface.id(), handle);
        self.state.surfaces.insert(handle, surface);
        Some(handle)
    }

    fn destroy_surface(&mut self, surface: SurfaceHandle) {
        if let Some(wl) = self.state.surfaces.remove(&surface) {
            self.state.surface_ids.remove(&wl.id());
            wl.destroy();
        }
    }

    fn associate_window(&mut self, surface: SurfaceHandle, window: u32) {
        trace!("No xserver interface to associate {:?} with {}", surface, window);
    }

    fn map_surface(&mut self, surface: SurfaceHandle, geometry: Geometry) {
        trace!(
            "Surface {:?} at {}x{}+{}+{} has no shell role",
            surface,
            geometry.width,
            geometry.height,
            geometry.x,
            geometry.y
        );
    }

    fn attach(&mut self, surface: SurfaceHandle, buffer: Option<BufferHandle>) {
        let Some(wl) = self.state.surfaces.get(&surface) else {
            return;
        };
        let buffer = buffer.and_then(|b| self.state.buffers.get(&b));
        wl.attach(buffer, 0, 0);
    }

    fn damage(&mut self, surface: SurfaceHandle, region: DamageRegion) {
        if let Some(wl) = self.state.surfaces.get(&surface) {
            wl.damage(region.x, region.y, region.width as i32, region.height as i32);
        }
    }

    fn commit(&mut self, surface: SurfaceHandle) {
        if let Some(wl) = self.state.surfaces.get(&surface) {
            wl.commit();
        }
    }

    fn create_drm_buffer(
        &mut self,
        name: u32,
        _width: u32,
        _height: u32,
        _stride: u32,
        _format: PixelFormat,
    ) -> Option<BufferHandle> {
        debug!("Cannot share DRM name {} without wl_drm", name);
        None
    }

    fn create_shm_buffer(
        &mut self,
        fd: BorrowedFd<'_>,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> Option<BufferHandle> {
        let shm = self.state.shm.as_ref()?;
        let size = i32::try_from(stride as u64 * height as u64).ok()?;
        let format = match format {
            PixelFormat::Argb8888 => wl_shm::Format::Argb8888,
            PixelFormat::Xrgb8888 => wl_shm::Format::Xrgb8888,
        };

        let pool = shm.create_pool(fd, size, &self.qh, ());
        let buffer = pool.create_buffer(
            0,
            width as i32,
            height as i32,
            stride as i32,
            format,
            &self.qh,
            (),
        );
        pool.destroy();

        let handle = BufferHandle(self.allocate());
        self.state.buffers.insert(handle, buffer);
        Some(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(wl) = self.state.buffers.remove(&buffer) {
            wl.destroy();
        }
    }

    fn sync(&mut self, token: SyncToken) {
        self.conn.display().sync(&self.qh, token);
    }

    fn drm_authenticate(&mut self, magic: u32) {
        warn!("Dropping DRM authentication {} without wl_drm", magic);
    }

    fn bind_seat_devices(&mut self, seat: SeatId, capabilities: SeatCapabilities) {
        let qh = &self.qh;
        let Some(objects) = self.state.seats.get_mut(&seat) else {
            return;
        };
        let Some(wl_seat) = objects.seat.as_ref() else {
            return;
        };

        if capabilities.contains(SeatCapabilities::POINTER) {
            if objects.pointer.is_none() {
                objects.pointer = Some(wl_seat.get_pointer(qh, seat));
            }
        } else if let Some(pointer) = objects.pointer.take() {
            if pointer.version() >= 3 {
                pointer.release();
            }
        }

        if capabilities.contains(SeatCapabilities::KEYBOARD) {
            if objects.keyboard.is_none() {
                objects.keyboard = Some(wl_seat.get_keyboard(qh, seat));
            }
        } else if let Some(keyboard) = objects.keyboard.take() {
            if keyboard.version() >= 3 {
                keyboard.release();
            }
        }
    }

    fn set_cursor(
        &mut self,
        seat: SeatId,
        serial: u32,
        buffer: Option<BufferHandle>,
        hot_x: i32,
        hot_y: i32,
    ) {
        let State {
            compositor,
            seats,
            buffers,
            ..
        } = &mut self.state;
        let Some(objects) = seats.get_mut(&seat) else {
            return;
        };
        let Some(pointer) = objects.pointer.as_ref() else {
            return;
        };

        let Some(wl_buffer) = buffer.and_then(|b| buffers.get(&b)) else {
            pointer.set_cursor(serial, None, 0, 0);
            return;
        };
        if objects.cursor_surface.is_none() {
            objects.cursor_surface = compositor.as_ref().map(|c| c.create_surface(&self.qh, ()));
        }
        let Some(surface) = objects.cursor_surface.as_ref() else {
            return;
        };
        surface.attach(Some(wl_buffer), 0, 0);
        surface.damage(0, 0, i32::MAX, i32::MAX);
        surface.commit();
        pointer.set_cursor(serial, Some(surface), hot_x, hot_y);
    }
}

impl Dispatch<WlRegistry, ()> for State {
    fn event(
        state: &mut State,
        _proxy: &WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<State>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => match Interface::from_name(&interface) {
                Some(Interface::Drm | Interface::XServer) | None => {
                    trace!("Not reporting global {} v{}", interface, version)
                }
                Some(_) => state.events.push(CompositorEvent::Global(Global {
                    name,
                    interface,
                    version,
                })),
            },
            wl_registry::Event::GlobalRemove { name } => {
                state.outputs.remove(&name);
                state.seats.remove(&SeatId(name));
                state.events.push(CompositorEvent::GlobalRemove { name });
            }
            _ => {}
        }
    }
}

impl Dispatch<WlOutput, OutputId> for State {
    fn event(
        state: &mut State,
        _proxy: &WlOutput,
        event: wl_output::Event,
        data: &OutputId,
        _conn: &Connection,
        _qh: &QueueHandle<State>,
    ) {
        match event {
            wl_output::Event::Geometry {
                x,
                y,
                physical_width,
                physical_height,
                subpixel,
                make,
                model,
                ..
            } => {
                let subpixel = match subpixel {
                    WEnum::Value(wl_output::Subpixel::None) => Subpixel::None,
                    WEnum::Value(wl_output::Subpixel::HorizontalRgb) => Subpixel::HorizontalRgb,
                    WEnum::Value(wl_output::Subpixel::HorizontalBgr) => Subpixel::HorizontalBgr,
                    WEnum::Value(wl_output::Subpixel::VerticalRgb) => Subpixel::VerticalRgb,
                    WEnum::Value(wl_output::Subpixel::VerticalBgr) => Subpixel::VerticalBgr,
                    _ => Subpixel::Unknown,
                };
                state.events.push(CompositorEvent::OutputGeometry {
                    output: *data,
                    x,
                    y,
                    physical_width,
                    physical_height,
                    subpixel,
                    make,
                    model,
                });
            }
            wl_output::Event::Mode {
                flags,
                width,
                height,
                refresh,
            } => {
                let current =
                    matches!(flags, WEnum::Value(f) if f.contains(wl_output::Mode::Current));
                state.events.push(CompositorEvent::OutputMode {
                    output: *data,
                    width,
                    height,
                    refresh,
                    current,
                });
            }
            _ => {}
        }
    }
}

impl Dispatch<WlSeat, SeatId> for State {
    fn event(
        state: &mut State,
        _proxy: &WlSeat,
        event: wl_seat::Event,
        data: &SeatId,
        _conn: &Connection,
        _qh: &QueueHandle<State>,
    ) {
        if let wl_seat::Event::Capabilities {
            capabilities: WEnum::Value(caps),
        } = event
        {
            let mut capabilities = SeatCapabilities::empty();
            if caps.contains(wl_seat::Capability::Pointer) {
                capabilities |= SeatCapabilities::POINTER;
            }
            if caps.contains(wl_seat::Capability::Keyboard) {
                capabilities |= SeatCapabilities::KEYBOARD;
            }
            if caps.contains(wl_seat::Capability::Touch) {
                capabilities |= SeatCapabilities::TOUCH;
            }
            state.events.push(CompositorEvent::SeatCapabilities {
                seat: *data,
                capabilities,
            });
        }
    }
}

fn axis_of(axis: WEnum<wl_pointer::Axis>) -> Option<protocol::Axis> {
    match axis {
        WEnum::Value(wl_pointer::Axis::VerticalScroll) => Some(protocol::Axis::Vertical),
        WEnum::Value(wl_pointer::Axis::HorizontalScroll) => Some(protocol::Axis::Horizontal),
        _ => None,
    }
}

impl Dispatch<WlPointer, SeatId> for State {
    fn event(
        state: &mut State,
        _proxy: &WlPointer,
        event: wl_pointer::Event,
        data: &SeatId,
        _conn: &Connection,
        _qh: &QueueHandle<State>,
    ) {
        let seat = *data;
        let event = match event {
            wl_pointer::Event::Enter {
                serial,
                surface,
                surface_x,
                surface_y,
            } => {
                let Some(surface) = state.surface_handle(&surface) else {
                    return;
                };
                CompositorEvent::PointerEnter {
                    seat,
                    serial,
                    surface,
                    x: surface_x,
                    y: surface_y,
                }
            }
            wl_pointer::Event::Leave { serial, surface } => {
                let Some(surface) = state.surface_handle(&surface) else {
                    return;
                };
                CompositorEvent::PointerLeave {
                    seat,
                    serial,
                    surface,
                }
            }
            wl_pointer::Event::Motion {
                time,
                surface_x,
                surface_y,
            } => CompositorEvent::PointerMotion {
                seat,
                time,
                x: surface_x,
                y: surface_y,
            },
            wl_pointer::Event::Button {
                serial,
                time,
                button,
                state: button_state,
            } => CompositorEvent::PointerButton {
                seat,
                serial,
                time,
                button,
                pressed: button_state == WEnum::Value(wl_pointer::ButtonState::Pressed),
            },
            wl_pointer::Event::AxisDiscrete { axis, discrete } => {
                if let Some(axis) = axis_of(axis) {
                    state.pending_discrete.insert((seat, axis), discrete);
                }
                return;
            }
            wl_pointer::Event::Axis { time, axis, value } => {
                let Some(axis) = axis_of(axis) else {
                    return;
                };
                CompositorEvent::PointerAxis {
                    seat,
                    time,
                    axis,
                    value,
                    discrete: state.pending_discrete.remove(&(seat, axis)),
                }
            }
            _ => return,
        };
        state.events.push(event);
    }
}

impl Dispatch<WlKeyboard, SeatId> for State {
    fn event(
        state: &mut State,
        _proxy: &WlKeyboard,
        event: wl_keyboard::Event,
        data: &SeatId,
        _conn: &Connection,
        _qh: &QueueHandle<State>,
    ) {
        let seat = *data;
        let event = match event {
            wl_keyboard::Event::Enter {
                serial,
                surface,
                keys,
            } => {
                let Some(surface) = state.surface_handle(&surface) else {
                    return;
                };
                let keys = keys
                    .chunks_exact(4)
                    .map(|k| u32::from_ne_bytes([k[0], k[1], k[2], k[3]]))
                    .collect();
                CompositorEvent::KeyboardEnter {
                    seat,
                    serial,
                    surface,
                    keys,
                }
            }
            wl_keyboard::Event::Leave { serial, surface } => {
                let Some(surface) = state.surface_handle(&surface) else {
                    return;
                };
                CompositorEvent::KeyboardLeave {
                    seat,
                    serial,
                    surface,
                }
            }
            wl_keyboard::Event::Key {
                serial,
                time,
                key,
                state: key_state,
            } => CompositorEvent::KeyboardKey {
                seat,
                serial,
                time,
                key,
                pressed: key_state == WEnum::Value(wl_keyboard::KeyState::Pressed),
            },
            wl_keyboard::Event::Modifiers {
                serial,
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
            } => CompositorEvent::KeyboardModifiers {
                seat,
                serial,
                depressed: mods_depressed,
                latched: mods_latched,
                locked: mods_locked,
                group,
            },
            wl_keyboard::Event::Keymap { format, fd, size } => {
                // the legacy server compiles its own keymap
                trace!("Closing {:?} keymap of {} bytes for {:?}", format, size, seat);
                drop(fd);
                return;
            }
            _ => return,
        };
        state.events.push(event);
    }
}

impl Dispatch<WlCallback, SyncToken> for State {
    fn event(
        state: &mut State,
        _proxy: &WlCallback,
        event: wl_callback::Event,
        data: &SyncToken,
        _conn: &Connection,
        _qh: &QueueHandle<State>,
    ) {
        if let wl_callback::Event::Done { .. } = event {
            state.events.push(CompositorEvent::SyncDone { token: *data });
        }
    }
}

wayland_client::delegate_noop!(State: ignore WlCompositor);
wayland_client::delegate_noop!(State: ignore WlShm);
wayland_client::delegate_noop!(State: ignore WlShmPool);
wayland_client::delegate_noop!(State: ignore WlSurface);
wayland_client::delegate_noop!(State: ignore WlBuffer);
