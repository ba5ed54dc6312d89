//! In-memory collaborators
//!
//! [`RecordingTransport`] stands in for the compositor and logs every
//! request; [`FakeServer`] stands in for the legacy server and logs every
//! injected input event. [`Harness`] wires both to a [`Bridge`] through a
//! set of screen hooks, the way an embedding server would. Both doubles can
//! share a [`Journal`] when the relative order of requests and posts matters.

use crate::bridge::{Bridge, BridgeContext};
use crate::buffer::{PixelSource, SharedMemory};
use crate::config::{BridgeConfig, BufferBackend};
use crate::damage::DamageRegion;
use crate::error::{BridgeError, BufferError, Result};
use crate::output::VirtualOutput;
use crate::protocol::{
    BufferHandle, CompositorEvent, FlushMode, Global, HostKind, Interface, OutputId, PixelFormat,
    Readiness, SeatCapabilities, SeatId, SurfaceHandle, SyncToken, Transport,
};
use crate::server::hooks::{HookChain, ScreenHooks};
use crate::server::{
    ClientControl, ClientId, DamageId, DamageTracking, DeviceId, DeviceKind, Geometry, InputSink,
    OutputSink, PixmapId, PixmapInfo, Visual, WindowId, WindowInfo, WindowSystem,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::os::fd::{BorrowedFd, RawFd};
use std::rc::Rc;

/// Ordered log shared between a transport and a server
pub type Journal = Rc<RefCell<Vec<JournalEntry>>>;

pub fn new_journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    Request(Request),
    Posted(Posted),
}

/// A request as the transport received it
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Bind { interface: &'static str, name: u32 },
    CreateSurface { surface: SurfaceHandle },
    DestroySurface { surface: SurfaceHandle },
    AssociateWindow { surface: SurfaceHandle, window: u32 },
    MapSurface { surface: SurfaceHandle, geometry: Geometry },
    Attach { surface: SurfaceHandle, buffer: Option<BufferHandle> },
    Damage { surface: SurfaceHandle, region: DamageRegion },
    Commit { surface: SurfaceHandle },
    CreateBuffer {
        buffer: BufferHandle,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
        drm_name: Option<u32>,
    },
    DestroyBuffer { buffer: BufferHandle },
    Sync { token: SyncToken },
    DrmAuthenticate { magic: u32 },
    BindSeatDevices { seat: SeatId, capabilities: SeatCapabilities },
    SetCursor {
        seat: SeatId,
        serial: u32,
        buffer: Option<BufferHandle>,
        hot_x: i32,
        hot_y: i32,
    },
}

/// Compositor double that records requests and replays queued events
pub struct RecordingTransport {
    host: HostKind,
    connected: bool,
    incoming: VecDeque<CompositorEvent>,
    requests: Vec<Request>,
    journal: Option<Journal>,
    next_id: u32,
    surfaces: HashSet<SurfaceHandle>,
    buffers: HashMap<BufferHandle, (u32, u32, u32, PixelFormat)>,
    buffers_created: usize,
    last_buffer: Option<BufferHandle>,
    fail_buffers: bool,
    fail_surfaces: bool,
    auto_ack_auth: bool,
    auto_sync: bool,
    backpressure: usize,
    blocking_flushes: usize,
    map_count: usize,
    bound: Vec<&'static str>,
    auth_requests: Vec<u32>,
    last_sync: Option<SyncToken>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            host: HostKind::Compositor,
            connected: true,
            incoming: VecDeque::new(),
            requests: Vec::new(),
            journal: None,
            next_id: 1,
            surfaces: HashSet::new(),
            buffers: HashMap::new(),
            buffers_created: 0,
            last_buffer: None,
            fail_buffers: false,
            fail_surfaces: false,
            auto_ack_auth: false,
            auto_sync: false,
            backpressure: 0,
            blocking_flushes: 0,
            map_count: 0,
            bound: Vec::new(),
            auth_requests: Vec::new(),
            last_sync: None,
        }
    }

    /// Advertise globals on the first round-trip, named 1, 2, ... in order
    pub fn with_globals(interfaces: &[&str]) -> Self {
        let mut transport = Self::new();
        for (index, interface) in interfaces.iter().enumerate() {
            transport.queue_event(CompositorEvent::Global(Global {
                name: index as u32 + 1,
                interface: interface.to_string(),
                version: 1,
            }));
        }
        transport
    }

    /// A compositor with shared memory and a DRM device at `path`
    pub fn with_drm(path: &str) -> Self {
        let mut transport = Self::with_globals(&["wl_compositor", "wl_shm", "wl_drm"]);
        transport.queue_event(CompositorEvent::DrmDevice {
            path: path.to_string(),
        });
        transport
    }

    pub fn set_host(&mut self, host: HostKind) {
        self.host = host;
    }

    pub fn attach_journal(&mut self, journal: Journal) {
        self.journal = Some(journal);
    }

    pub fn fail_buffers(&mut self, fail: bool) {
        self.fail_buffers = fail;
    }

    pub fn fail_surfaces(&mut self, fail: bool) {
        self.fail_surfaces = fail;
    }

    /// Every later read, flush or round-trip fails
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Answer each authenticate request on the next read
    pub fn auto_ack_auth(&mut self, enabled: bool) {
        self.auto_ack_auth = enabled;
    }

    /// Answer each sync request on the next read
    pub fn auto_sync(&mut self, enabled: bool) {
        self.auto_sync = enabled;
    }

    /// Report pending writes until `flushes` blocking flushes have happened
    pub fn set_backpressure(&mut self, flushes: usize) {
        self.backpressure = flushes;
    }

    pub fn queue_event(&mut self, event: CompositorEvent) {
        self.incoming.push_back(event);
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    pub fn buffers_created(&self) -> usize {
        self.buffers_created
    }

    pub fn is_live_buffer(&self, buffer: BufferHandle) -> bool {
        self.buffers.contains_key(&buffer)
    }

    /// Width, height, stride and format of a live buffer
    pub fn buffer_layout(&self, buffer: BufferHandle) -> Option<(u32, u32, u32, PixelFormat)> {
        self.buffers.get(&buffer).copied()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn last_buffer(&self) -> Option<BufferHandle> {
        self.last_buffer
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    pub fn map_count(&self) -> usize {
        self.map_count
    }

    pub fn blocking_flushes(&self) -> usize {
        self.blocking_flushes
    }

    pub fn bound(&self) -> Vec<&'static str> {
        self.bound.clone()
    }

    pub fn auth_requests(&self) -> Vec<u32> {
        self.auth_requests.clone()
    }

    pub fn last_sync(&self) -> Option<SyncToken> {
        self.last_sync
    }

    /// Damage rectangles sent for a surface since the last clear
    pub fn damage_sent(&self, surface: SurfaceHandle) -> Vec<DamageRegion> {
        self.requests
            .iter()
            .filter_map(|r| match r {
                Request::Damage { surface: s, region } if *s == surface => Some(*region),
                _ => None,
            })
            .collect()
    }

    /// Commits sent for a surface since the last clear
    pub fn commits(&self, surface: SurfaceHandle) -> usize {
        self.requests
            .iter()
            .filter(|r| matches!(r, Request::Commit { surface: s } if *s == surface))
            .count()
    }

    fn record(&mut self, request: Request) {
        if let Some(journal) = &self.journal {
            journal.borrow_mut().push(JournalEntry::Request(request.clone()));
        }
        self.requests.push(request);
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(BridgeError::Connection("compositor connection lost".into()))
        }
    }

    fn new_buffer(
        &mut self,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
        drm_name: Option<u32>,
    ) -> Option<BufferHandle> {
        if self.fail_buffers {
            return None;
        }
        let buffer = BufferHandle(self.allocate());
        self.buffers.insert(buffer, (width, height, stride, format));
        self.buffers_created += 1;
        self.last_buffer = Some(buffer);
        self.record(Request::CreateBuffer {
            buffer,
            width,
            height,
            stride,
            format,
            drm_name,
        });
        Some(buffer)
    }
}

impl Transport for RecordingTransport {
    fn host_kind(&self) -> HostKind {
        self.host
    }

    fn fd(&self) -> RawFd {
        -1
    }

    fn readiness(&self) -> Readiness {
        let mut readiness = Readiness::empty();
        if !self.incoming.is_empty() {
            readiness |= Readiness::READABLE;
        }
        if self.backpressure > 0 {
            readiness |= Readiness::WRITE_PENDING;
        }
        readiness
    }

    fn flush(&mut self, mode: FlushMode) -> Result<Readiness> {
        self.check_connected()?;
        if mode == FlushMode::Blocking {
            self.blocking_flushes += 1;
            self.backpressure = self.backpressure.saturating_sub(1);
        }
        Ok(self.readiness())
    }

    fn roundtrip(&mut self) -> Result<Vec<CompositorEvent>> {
        self.check_connected()?;
        Ok(self.incoming.drain(..).collect())
    }

    fn read_events(&mut self) -> Result<Vec<CompositorEvent>> {
        self.check_connected()?;
        Ok(self.incoming.drain(..).collect())
    }

    fn bind(&mut self, global: &Global, interface: Interface) -> Result<()> {
        self.check_connected()?;
        self.bound.push(interface.name());
        self.record(Request::Bind {
            interface: interface.name(),
            name: global.name,
        });
        Ok(())
    }

    fn create_surface(&mut self) -> Option<SurfaceHandle> {
        if self.fail_surfaces {
            return None;
        }
        let surface = SurfaceHandle(self.allocate());
        self.surfaces.insert(surface);
        self.record(Request::CreateSurface { surface });
        Some(surface)
    }

    fn destroy_surface(&mut self, surface: SurfaceHandle) {
        self.surfaces.remove(&surface);
        self.record(Request::DestroySurface { surface });
    }

    fn associate_window(&mut self, surface: SurfaceHandle, window: u32) {
        self.record(Request::AssociateWindow { surface, window });
    }

    fn map_surface(&mut self, surface: SurfaceHandle, geometry: Geometry) {
        self.map_count += 1;
        self.record(Request::MapSurface { surface, geometry });
    }

    fn attach(&mut self, surface: SurfaceHandle, buffer: Option<BufferHandle>) {
        self.record(Request::Attach { surface, buffer });
    }

    fn damage(&mut self, surface: SurfaceHandle, region: DamageRegion) {
        self.record(Request::Damage { surface, region });
    }

    fn commit(&mut self, surface: SurfaceHandle) {
        self.record(Request::Commit { surface });
    }

    fn create_drm_buffer(
        &mut self,
        name: u32,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> Option<BufferHandle> {
        self.new_buffer(width, height, stride, format, Some(name))
    }

    fn create_shm_buffer(
        &mut self,
        _fd: BorrowedFd<'_>,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> Option<BufferHandle> {
        self.new_buffer(width, height, stride, format, None)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
        self.record(Request::DestroyBuffer { buffer });
    }

    fn sync(&mut self, token: SyncToken) {
        self.last_sync = Some(token);
        self.record(Request::Sync { token });
        if self.auto_sync {
            self.incoming.push_back(CompositorEvent::SyncDone { token });
        }
    }

    fn drm_authenticate(&mut self, magic: u32) {
        self.auth_requests.push(magic);
        self.record(Request::DrmAuthenticate { magic });
        if self.auto_ack_auth {
            self.incoming.push_back(CompositorEvent::DrmAuthenticated);
        }
    }

    fn bind_seat_devices(&mut self, seat: SeatId, capabilities: SeatCapabilities) {
        self.record(Request::BindSeatDevices { seat, capabilities });
    }

    fn set_cursor(
        &mut self,
        seat: SeatId,
        serial: u32,
        buffer: Option<BufferHandle>,
        hot_x: i32,
        hot_y: i32,
    ) {
        self.record(Request::SetCursor {
            seat,
            serial,
            buffer,
            hot_x,
            hot_y,
        });
    }
}

/// An input event or redirect as the legacy server received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Posted {
    Motion { device: DeviceId, x: i32, y: i32 },
    Button { device: DeviceId, button: u32, pressed: bool },
    Key { device: DeviceId, keycode: u32, pressed: bool },
    Redirect { device: DeviceId, window: Option<WindowId> },
}

struct FakeWindow {
    info: WindowInfo,
    pixmap: Option<PixmapInfo>,
}

struct FakeDevice {
    buttons: u32,
    down: BTreeSet<u32>,
}

/// Legacy server double
pub struct FakeServer {
    root: WindowId,
    next_xid: u32,
    windows: BTreeMap<WindowId, FakeWindow>,
    pixmap_refs: HashMap<PixmapId, u32>,
    damage: HashMap<WindowId, Vec<DamageRegion>>,
    damage_records: HashMap<DamageId, WindowId>,
    fail_damage: bool,
    fail_export: bool,
    devices: BTreeMap<DeviceId, FakeDevice>,
    posted: Vec<Posted>,
    outputs: BTreeMap<OutputId, VirtualOutput>,
    screen: Option<(u32, u32)>,
    ignored: BTreeSet<ClientId>,
    selections: Vec<String>,
    redirected_parents: Vec<WindowId>,
    base_calls: Vec<(&'static str, WindowId)>,
    journal: Option<Journal>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    /// A server with an 800x600 root window backed by its own pixmap
    pub fn new() -> Self {
        let root = WindowId(1);
        let mut server = Self {
            root,
            next_xid: 2,
            windows: BTreeMap::new(),
            pixmap_refs: HashMap::new(),
            damage: HashMap::new(),
            damage_records: HashMap::new(),
            fail_damage: false,
            fail_export: false,
            devices: BTreeMap::new(),
            posted: Vec::new(),
            outputs: BTreeMap::new(),
            screen: None,
            ignored: BTreeSet::new(),
            selections: Vec::new(),
            redirected_parents: Vec::new(),
            base_calls: Vec::new(),
            journal: None,
        };
        let geometry = Geometry::new(0, 0, 800, 600);
        let pixmap = server.new_pixmap(geometry.width, geometry.height);
        server.windows.insert(
            root,
            FakeWindow {
                info: WindowInfo {
                    id: root,
                    parent: None,
                    geometry,
                    visual: Visual::RGB24,
                    redirected: false,
                },
                pixmap: Some(pixmap),
            },
        );
        server
    }

    pub fn attach_journal(&mut self, journal: Journal) {
        self.journal = Some(journal);
    }

    pub fn root(&self) -> WindowId {
        self.root
    }

    pub fn root_info(&self) -> WindowInfo {
        self.windows[&self.root].info.clone()
    }

    /// A redirected child of the root with a pixmap of its own size
    pub fn add_toplevel(&mut self, geometry: Geometry, visual: Visual) -> WindowId {
        let id = WindowId(self.allocate());
        let pixmap = self.new_pixmap(geometry.width, geometry.height);
        self.windows.insert(
            id,
            FakeWindow {
                info: WindowInfo {
                    id,
                    parent: Some(self.root),
                    geometry,
                    visual,
                    redirected: true,
                },
                pixmap: Some(pixmap),
            },
        );
        id
    }

    pub fn set_redirected(&mut self, window: WindowId, redirected: bool) {
        if let Some(w) = self.windows.get_mut(&window) {
            w.info.redirected = redirected;
        }
    }

    pub fn set_geometry(&mut self, window: WindowId, geometry: Geometry) {
        if let Some(w) = self.windows.get_mut(&window) {
            w.info.geometry = geometry;
        }
    }

    pub fn pixmap_of(&self, window: WindowId) -> Option<PixmapId> {
        self.windows.get(&window)?.pixmap.map(|p| p.id)
    }

    pub fn pixmap_refs(&self, pixmap: PixmapId) -> u32 {
        self.pixmap_refs.get(&pixmap).copied().unwrap_or(0)
    }

    /// References held on every pixmap
    pub fn total_pixmap_refs(&self) -> u32 {
        self.pixmap_refs.values().sum()
    }

    /// Give a window a fresh pixmap, as a resize would
    pub fn replace_pixmap(&mut self, window: WindowId, width: u32, height: u32) -> Option<PixmapId> {
        let pixmap = self.new_pixmap(width, height);
        let w = self.windows.get_mut(&window)?;
        w.pixmap = Some(pixmap);
        Some(pixmap.id)
    }

    pub fn fail_damage(&mut self, fail: bool) {
        self.fail_damage = fail;
    }

    pub fn fail_export(&mut self, fail: bool) {
        self.fail_export = fail;
    }

    pub fn add_damage(&mut self, window: WindowId, region: DamageRegion) {
        self.damage.entry(window).or_default().push(region);
    }

    pub fn damage_of(&self, window: WindowId) -> Vec<DamageRegion> {
        self.damage.get(&window).cloned().unwrap_or_default()
    }

    pub fn damage_records(&self) -> usize {
        self.damage_records.len()
    }

    pub fn posted(&self) -> &[Posted] {
        &self.posted
    }

    pub fn clear_posted(&mut self) {
        self.posted.clear();
    }

    pub fn set_buttons_down(&mut self, device: DeviceId, buttons: Vec<u32>) {
        if let Some(dev) = self.devices.get_mut(&device) {
            dev.down = buttons.into_iter().collect();
        }
    }

    /// Buttons pressed on a device, in posting order
    pub fn clicks(&self, device: DeviceId) -> Vec<u32> {
        self.posted
            .iter()
            .filter_map(|p| match p {
                Posted::Button {
                    device: d,
                    button,
                    pressed: true,
                } if *d == device => Some(*button),
                _ => None,
            })
            .collect()
    }

    pub fn keys(&self, device: DeviceId) -> Vec<(u32, bool)> {
        self.posted
            .iter()
            .filter_map(|p| match p {
                Posted::Key {
                    device: d,
                    keycode,
                    pressed,
                } if *d == device => Some((*keycode, *pressed)),
                _ => None,
            })
            .collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn has_device(&self, device: DeviceId) -> bool {
        self.devices.contains_key(&device)
    }

    pub fn screen_size(&self) -> Option<(u32, u32)> {
        self.screen
    }

    pub fn output(&self, id: OutputId) -> Option<&VirtualOutput> {
        self.outputs.get(&id)
    }

    pub fn is_ignored(&self, client: ClientId) -> bool {
        self.ignored.contains(&client)
    }

    pub fn selections(&self) -> &[String] {
        &self.selections
    }

    pub fn redirected_parents(&self) -> &[WindowId] {
        &self.redirected_parents
    }

    /// Called by base hook handlers
    pub fn record_base_call(&mut self, hook: &'static str, window: WindowId) {
        self.base_calls.push((hook, window));
    }

    pub fn base_calls(&self) -> &[(&'static str, WindowId)] {
        &self.base_calls
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_xid;
        self.next_xid += 1;
        id
    }

    fn new_pixmap(&mut self, width: u32, height: u32) -> PixmapInfo {
        PixmapInfo {
            id: PixmapId(self.allocate()),
            width,
            height,
            stride: width * 4,
        }
    }

    fn find_pixmap(&self, pixmap: PixmapId) -> Option<PixmapInfo> {
        self.windows
            .values()
            .filter_map(|w| w.pixmap)
            .find(|p| p.id == pixmap)
    }

    fn post(&mut self, posted: Posted) {
        if let Some(journal) = &self.journal {
            journal.borrow_mut().push(JournalEntry::Posted(posted.clone()));
        }
        self.posted.push(posted);
    }
}

impl WindowSystem for FakeServer {
    fn window(&self, id: WindowId) -> Option<WindowInfo> {
        self.windows.get(&id).map(|w| w.info.clone())
    }

    fn screen_number(&self) -> u32 {
        0
    }

    fn window_pixmap(&self, id: WindowId) -> Option<PixmapInfo> {
        self.windows.get(&id)?.pixmap
    }

    fn export_pixmap(
        &mut self,
        pixmap: PixmapId,
        backend: BufferBackend,
    ) -> std::result::Result<PixelSource, BufferError> {
        if self.fail_export {
            return Err(BufferError::Export(format!("{:?} cannot be exported", pixmap)));
        }
        let info = self
            .find_pixmap(pixmap)
            .ok_or_else(|| BufferError::Export(format!("unknown pixmap {:?}", pixmap)))?;
        match backend {
            BufferBackend::Drm => Ok(PixelSource::DrmName(pixmap.0)),
            BufferBackend::Shm => {
                let len = info.stride as usize * info.height as usize;
                let shm = SharedMemory::create(len).map_err(|e| BufferError::Export(e.to_string()))?;
                Ok(PixelSource::Shm(shm.into_fd()))
            }
        }
    }

    fn reference_pixmap(&mut self, pixmap: PixmapId) {
        *self.pixmap_refs.entry(pixmap).or_default() += 1;
    }

    fn release_pixmap(&mut self, pixmap: PixmapId) {
        if let Some(refs) = self.pixmap_refs.get_mut(&pixmap) {
            *refs = refs.saturating_sub(1);
        }
    }

    fn redirect_subwindows(&mut self, window: WindowId) -> bool {
        self.redirected_parents.push(window);
        true
    }

    fn claim_selection(&mut self, name: &str) -> bool {
        self.selections.push(name.to_string());
        true
    }
}

impl DamageTracking for FakeServer {
    fn damage_create(&mut self, window: WindowId) -> Option<DamageId> {
        if self.fail_damage {
            return None;
        }
        let id = DamageId(self.allocate());
        self.damage_records.insert(id, window);
        Some(id)
    }

    fn damage_destroy(&mut self, damage: DamageId) {
        self.damage_records.remove(&damage);
    }

    fn damage_region(&self, damage: DamageId) -> Vec<DamageRegion> {
        self.damage_records
            .get(&damage)
            .map(|window| self.damage_of(*window))
            .unwrap_or_default()
    }

    fn damage_empty(&mut self, damage: DamageId) {
        if let Some(window) = self.damage_records.get(&damage) {
            self.damage.remove(window);
        }
    }
}

impl InputSink for FakeServer {
    fn add_input_device(&mut self, _kind: DeviceKind, _name: &str, buttons: u32) -> Option<DeviceId> {
        let id = DeviceId(self.allocate());
        self.devices.insert(
            id,
            FakeDevice {
                buttons,
                down: BTreeSet::new(),
            },
        );
        Some(id)
    }

    fn remove_input_device(&mut self, device: DeviceId) {
        self.devices.remove(&device);
    }

    fn post_motion(&mut self, device: DeviceId, x: i32, y: i32) {
        self.post(Posted::Motion { device, x, y });
    }

    fn post_button(&mut self, device: DeviceId, button: u32, pressed: bool) {
        if let Some(dev) = self.devices.get_mut(&device) {
            if pressed {
                dev.down.insert(button);
            } else {
                dev.down.remove(&button);
            }
        }
        self.post(Posted::Button {
            device,
            button,
            pressed,
        });
    }

    fn post_key(&mut self, device: DeviceId, keycode: u32, pressed: bool) {
        self.post(Posted::Key {
            device,
            keycode,
            pressed,
        });
    }

    fn num_buttons(&self, device: DeviceId) -> u32 {
        self.devices.get(&device).map_or(0, |d| d.buttons)
    }

    fn buttons_down(&self, device: DeviceId) -> Vec<u32> {
        self.devices
            .get(&device)
            .map(|d| d.down.iter().copied().collect())
            .unwrap_or_default()
    }

    fn set_redirect_window(&mut self, device: DeviceId, window: Option<WindowId>) {
        self.post(Posted::Redirect { device, window });
    }
}

impl OutputSink for FakeServer {
    fn output_changed(&mut self, output: &VirtualOutput) {
        self.outputs.insert(output.id, output.clone());
    }

    fn output_removed(&mut self, output: OutputId) {
        self.outputs.remove(&output);
    }

    fn screen_resized(&mut self, width: u32, height: u32) {
        self.screen = Some((width, height));
    }
}

impl ClientControl for FakeServer {
    fn ignore_client(&mut self, client: ClientId) {
        self.ignored.insert(client);
    }

    fn attend_client(&mut self, client: ClientId) {
        self.ignored.remove(&client);
    }
}

/// Bridge plus server, as the hooks see them
pub struct TestContext {
    pub bridge: Bridge<RecordingTransport>,
    pub server: FakeServer,
}

impl BridgeContext for TestContext {
    type Transport = RecordingTransport;
    type Server = FakeServer;

    fn parts(&mut self) -> (&mut Bridge<RecordingTransport>, &mut FakeServer) {
        (&mut self.bridge, &mut self.server)
    }
}

/// Base handlers that only note that they ran
pub fn recording_hooks() -> ScreenHooks<TestContext> {
    ScreenHooks {
        create_window: HookChain::new(|ctx: &mut TestContext, window| {
            ctx.server.record_base_call("create_window", window);
            true
        }),
        realize_window: HookChain::new(|ctx: &mut TestContext, window| {
            ctx.server.record_base_call("realize_window", window);
            true
        }),
        unrealize_window: HookChain::new(|ctx: &mut TestContext, window| {
            ctx.server.record_base_call("unrealize_window", window);
            true
        }),
        set_window_pixmap: HookChain::new(|ctx: &mut TestContext, (window, _)| {
            ctx.server.record_base_call("set_window_pixmap", window);
        }),
        move_window: HookChain::new(|ctx: &mut TestContext, window| {
            ctx.server.record_base_call("move_window", window);
        }),
    }
}

/// A bridge driven through screen hooks, as an embedding server drives it
pub struct Harness {
    pub ctx: TestContext,
    pub hooks: ScreenHooks<TestContext>,
}

impl Harness {
    /// Shared-memory bridge on a compositor with the given globals
    pub fn new(config: BridgeConfig, transport: RecordingTransport) -> Result<Self> {
        let bridge = Bridge::pre_init_with(config, transport, |path| {
            Err(BridgeError::Auth(format!("no DRM device {} in tests", path)))
        })?;
        Self::with_bridge(bridge, FakeServer::new())
    }

    pub fn with_bridge(bridge: Bridge<RecordingTransport>, server: FakeServer) -> Result<Self> {
        let mut ctx = TestContext { bridge, server };
        let mut hooks = recording_hooks();
        ctx.bridge.screen_init(&mut ctx.server, &mut hooks)?;
        Ok(Self { ctx, hooks })
    }

    pub fn bridge(&self) -> &Bridge<RecordingTransport> {
        &self.ctx.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut Bridge<RecordingTransport> {
        &mut self.ctx.bridge
    }

    pub fn server(&self) -> &FakeServer {
        &self.ctx.server
    }

    pub fn server_mut(&mut self) -> &mut FakeServer {
        &mut self.ctx.server
    }

    pub fn transport(&self) -> &RecordingTransport {
        self.ctx.bridge.connection().transport()
    }

    pub fn transport_mut(&mut self) -> &mut RecordingTransport {
        self.ctx.bridge.connection_mut().transport_mut()
    }

    pub fn create_window(&mut self, window: WindowId) -> bool {
        self.hooks.create_window.call(&mut self.ctx, window)
    }

    pub fn realize_window(&mut self, window: WindowId) -> bool {
        self.hooks.realize_window.call(&mut self.ctx, window)
    }

    pub fn unrealize_window(&mut self, window: WindowId) -> bool {
        self.hooks.unrealize_window.call(&mut self.ctx, window)
    }

    pub fn set_window_pixmap(&mut self, window: WindowId) {
        let pixmap = self.ctx.server.pixmap_of(window).unwrap_or(PixmapId(0));
        self.hooks.set_window_pixmap.call(&mut self.ctx, (window, pixmap));
    }

    pub fn move_window(&mut self, window: WindowId) {
        self.hooks.move_window.call(&mut self.ctx, window);
    }

    /// Create and realize a new top-level window
    pub fn map_toplevel(&mut self, geometry: Geometry, visual: Visual) -> WindowId {
        let window = self.ctx.server.add_toplevel(geometry, visual);
        self.create_window(window);
        self.realize_window(window);
        window
    }

    pub fn surface_of(&self, window: WindowId) -> Option<SurfaceHandle> {
        self.ctx.bridge.surfaces().get(window).map(|s| s.handle)
    }

    pub fn damage(&mut self, window: WindowId, region: DamageRegion) -> bool {
        self.ctx.server.add_damage(window, region);
        self.ctx.bridge.damage_report(window)
    }

    pub fn post_damage(&mut self) -> Result<usize> {
        self.ctx.bridge.post_damage(&mut self.ctx.server)
    }

    /// Deliver an event as if the compositor had just sent it
    pub fn deliver(&mut self, event: CompositorEvent) -> Result<usize> {
        self.transport_mut().queue_event(event);
        self.ctx.bridge.wakeup(&mut self.ctx.server, true)
    }

    pub fn wakeup(&mut self) -> Result<usize> {
        self.ctx.bridge.wakeup(&mut self.ctx.server, true)
    }

    pub fn block(&mut self) -> Result<()> {
        self.ctx.bridge.block()
    }

    pub fn close(&mut self) {
        self.ctx.bridge.close(&mut self.ctx.server);
    }
}
