//! Compositor connection
//!
//! Owns the transport and walks it through
//!
//! ```text
//! Connecting ─► Registering ─► [Authenticating] ─► Ready ─► Closed
//! ```
//!
//! Registration binds the globals the bridge understands and ignores the
//! rest. Authentication is only needed for DRM buffers. The connection also
//! carries the write-readiness mask: whenever requests are still buffered,
//! [`Connection::drain`] blocks until the socket takes them.

pub mod auth;
pub mod device;

use crate::error::{BridgeError, Result};
use crate::protocol::{
    CompositorEvent, FlushMode, Global, HostKind, Interface, Readiness, SyncToken, Transport,
};
use crate::server::ClientId;
use auth::{AuthQueue, AuthRequest, Requester};
use device::AuthSource;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::os::fd::RawFd;

/// Round-trips to wait for the bridge's own authentication before giving up
const AUTH_ROUNDTRIP_LIMIT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registering,
    Authenticating,
    Ready,
    Closed,
}

/// Answer to a client's authentication request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Already authenticated with this magic
    Success,
    /// Queued; the client is ignored until the compositor answers
    Deferred,
    /// No DRM path to authenticate against
    Error,
}

pub struct Connection<T: Transport> {
    transport: T,
    state: ConnectionState,
    globals: HashMap<u32, Interface>,
    readiness: Readiness,
    drm_device: Option<String>,
    _drm_card: Option<Box<dyn AuthSource>>,
    authenticated: bool,
    auth: AuthQueue,
    authorized: HashSet<(ClientId, u32)>,
    last_sync: u64,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        let readiness = transport.readiness();
        Self {
            transport,
            state: ConnectionState::Connecting,
            globals: HashMap::new(),
            readiness,
            drm_device: None,
            _drm_card: None,
            authenticated: false,
            auth: AuthQueue::new(),
            authorized: HashSet::new(),
            last_sync: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn host_kind(&self) -> HostKind {
        self.transport.host_kind()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn fd(&self) -> RawFd {
        self.transport.fd()
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn write_pending(&self) -> bool {
        self.readiness.contains(Readiness::WRITE_PENDING)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn drm_device(&self) -> Option<&str> {
        self.drm_device.as_deref()
    }

    pub fn has_interface(&self, interface: Interface) -> bool {
        self.globals.values().any(|i| *i == interface)
    }

    pub fn auth_queue(&self) -> &AuthQueue {
        &self.auth
    }

    /// Discover and bind globals
    ///
    /// Returns the events that are not connection business (outputs, seats)
    /// for the caller to replay once the screen exists.
    pub fn register(&mut self) -> Result<Vec<CompositorEvent>> {
        self.state = ConnectionState::Registering;

        let mut deferred = Vec::new();
        // The first round-trip delivers the globals, the second the initial
        // events of whatever got bound in response.
        for _ in 0..2 {
            for event in self.transport.roundtrip()? {
                if let Some(event) = self.handle_event(event)? {
                    deferred.push(event);
                }
            }
        }

        if !self.has_interface(Interface::Compositor) {
            return Err(BridgeError::Connection(
                "compositor does not advertise wl_compositor".into(),
            ));
        }

        info!(
            "Registered {} globals (shm={}, drm={}, xserver={})",
            self.globals.len(),
            self.has_interface(Interface::Shm),
            self.has_interface(Interface::Drm),
            self.has_interface(Interface::XServer)
        );
        Ok(deferred)
    }

    /// Handle connection-level events, handing everything else back
    ///
    /// Global announcements and removals for outputs and seats are both
    /// handled and handed back, so the caller can track those objects.
    pub fn handle_event(&mut self, event: CompositorEvent) -> Result<Option<CompositorEvent>> {
        match event {
            CompositorEvent::Global(ref global) => {
                let Some(interface) = self.bind_global(global)? else {
                    return Ok(None);
                };
                match interface {
                    Interface::Output | Interface::Seat => Ok(Some(event)),
                    _ => Ok(None),
                }
            }
            CompositorEvent::GlobalRemove { name } => match self.globals.remove(&name) {
                Some(Interface::Output | Interface::Seat) => Ok(Some(event)),
                Some(interface) => {
                    warn!("Compositor removed {} global {}", interface.name(), name);
                    Ok(None)
                }
                None => Ok(None),
            },
            CompositorEvent::DrmDevice { path } => {
                debug!("Compositor renders on {}", path);
                self.drm_device = Some(path);
                Ok(None)
            }
            other => Ok(Some(other)),
        }
    }

    fn bind_global(&mut self, global: &Global) -> Result<Option<Interface>> {
        let Some(interface) = Interface::from_name(&global.interface) else {
            debug!("Ignoring global {} v{}", global.interface, global.version);
            return Ok(None);
        };
        let singleton = !matches!(interface, Interface::Output | Interface::Seat);
        if singleton && self.has_interface(interface) {
            debug!("Ignoring duplicate {} global {}", interface.name(), global.name);
            return Ok(None);
        }

        self.transport.bind(global, interface)?;
        self.globals.insert(global.name, interface);
        debug!("Bound {} v{} as {}", interface.name(), global.version, global.name);
        Ok(Some(interface))
    }

    /// Authenticate the bridge's own DRM device, blocking until answered
    ///
    /// Failure is fatal to the DRM path only. Non-authentication events that
    /// arrive meanwhile are returned for later replay.
    pub fn authenticate_bridge<F>(&mut self, open: F) -> Result<Vec<CompositorEvent>>
    where
        F: FnOnce(&str) -> Result<Box<dyn AuthSource>>,
    {
        if !self.has_interface(Interface::Drm) {
            return Err(BridgeError::Auth("compositor does not advertise wl_drm".into()));
        }
        let path = self
            .drm_device
            .clone()
            .ok_or_else(|| BridgeError::Auth("compositor sent no DRM device".into()))?;

        let card = open(&path)?;
        let magic = card.magic()?;
        self._drm_card = Some(card);
        self.state = ConnectionState::Authenticating;
        self.enqueue(AuthRequest {
            requester: Requester::Bridge,
            magic,
        })?;

        let mut deferred = Vec::new();
        for _ in 0..AUTH_ROUNDTRIP_LIMIT {
            for event in self.transport.roundtrip()? {
                match event {
                    CompositorEvent::DrmAuthenticated => {
                        self.complete_auth()?;
                    }
                    other => {
                        if let Some(event) = self.handle_event(other)? {
                            deferred.push(event);
                        }
                    }
                }
            }
            if self.authenticated {
                info!("Authenticated on {}", path);
                self.state = ConnectionState::Ready;
                return Ok(deferred);
            }
        }

        self.auth.clear();
        self._drm_card = None;
        Err(BridgeError::Auth(format!(
            "no authentication acknowledgement for {}",
            path
        )))
    }

    /// Authentication entry point for legacy clients
    pub fn authenticate_client(&mut self, client: ClientId, magic: u32) -> Result<AuthStatus> {
        if self.state == ConnectionState::Closed || !self.has_interface(Interface::Drm) {
            return Ok(AuthStatus::Error);
        }
        if self.authorized.contains(&(client, magic)) {
            return Ok(AuthStatus::Success);
        }
        if self.auth.is_queued(Requester::Client(client)) {
            return Ok(AuthStatus::Deferred);
        }
        self.enqueue(AuthRequest {
            requester: Requester::Client(client),
            magic,
        })?;
        debug!("Queued authentication for {:?} ({} waiting)", client, self.auth.len());
        Ok(AuthStatus::Deferred)
    }

    /// Match an acknowledgement to the in-flight request and send the next
    pub fn complete_auth(&mut self) -> Result<Option<AuthRequest>> {
        let Some((done, next)) = self.auth.acknowledge() else {
            warn!("Authentication acknowledgement with nothing in flight");
            return Ok(None);
        };
        match done.requester {
            Requester::Bridge => self.authenticated = true,
            Requester::Client(client) => {
                self.authorized.insert((client, done.magic));
            }
        }
        if let Some(next) = next {
            self.transport.drm_authenticate(next.magic);
            self.drain()?;
        }
        Ok(Some(done))
    }

    fn enqueue(&mut self, request: AuthRequest) -> Result<()> {
        if let Some(head) = self.auth.push(request) {
            self.transport.drm_authenticate(head.magic);
            self.drain()?;
        }
        Ok(())
    }

    pub fn mark_ready(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Ready;
        }
    }

    /// Request a round-trip marker; completion arrives as `SyncDone`
    pub fn sync(&mut self) -> SyncToken {
        self.last_sync += 1;
        let token = SyncToken(self.last_sync);
        self.transport.sync(token);
        token
    }

    /// Block until every buffered request has been written
    pub fn drain(&mut self) -> Result<()> {
        self.readiness = self.transport.readiness();
        while self.readiness.contains(Readiness::WRITE_PENDING) {
            self.readiness = self.transport.flush(FlushMode::Blocking)?;
        }
        Ok(())
    }

    /// Called before the server sleeps: the only place allowed to block on writes
    pub fn block(&mut self) -> Result<()> {
        self.readiness = self.transport.flush(FlushMode::NonBlocking)?;
        self.drain()
    }

    /// Called after poll: read whatever arrived if the socket is readable
    pub fn wakeup(&mut self, readable: bool) -> Result<Vec<CompositorEvent>> {
        if !readable {
            return Ok(Vec::new());
        }
        let mut events = Vec::new();
        for event in self.transport.read_events()? {
            if let Some(event) = self.handle_event(event)? {
                events.push(event);
            }
        }
        self.readiness = self.transport.readiness();
        Ok(events)
    }

    /// Abandon pending authentication and drop the device
    pub fn close(&mut self) -> Vec<AuthRequest> {
        self.state = ConnectionState::Closed;
        self._drm_card = None;
        self.authenticated = false;
        self.auth.clear()
    }
}
