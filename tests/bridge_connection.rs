// Connection, authentication and shutdown tests for xwl-bridge

use xwl_bridge::config::{BridgeConfig, BufferBackend};
use xwl_bridge::connection::device::AuthSource;
use xwl_bridge::connection::{AuthStatus, ConnectionState};
use xwl_bridge::server::{ClientId, Geometry, Visual};
use xwl_bridge::testing::{FakeServer, Harness, RecordingTransport, Request};
use xwl_bridge::{Bridge, BridgeError, CompositorEvent};

const CARD: &str = "/dev/dri/card0";

struct FixedMagic(u32);

impl AuthSource for FixedMagic {
    fn magic(&self) -> xwl_bridge::Result<u32> {
        Ok(self.0)
    }
}

fn fixed_magic(_path: &str) -> xwl_bridge::Result<Box<dyn AuthSource>> {
    Ok(Box::new(FixedMagic(42)))
}

fn drm_config(shm_fallback: bool) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.bridge.buffer_backend = BufferBackend::Drm;
    config.bridge.shm_fallback = shm_fallback;
    config
}

fn expect_err(result: xwl_bridge::Result<Harness>) -> BridgeError {
    match result {
        Ok(_) => panic!("bridge came up"),
        Err(err) => err,
    }
}

#[test]
fn test_drm_bridge_authenticates_and_uses_names() {
    let mut transport = RecordingTransport::with_drm(CARD);
    transport.auto_ack_auth(true);
    let bridge = Bridge::pre_init_with(drm_config(true), transport, fixed_magic).unwrap();

    assert_eq!(bridge.backend(), BufferBackend::Drm);
    assert!(bridge.connection().is_authenticated());
    assert_eq!(bridge.connection().drm_device(), Some(CARD));
    assert_eq!(bridge.connection().transport().auth_requests(), vec![42]);

    let mut harness = Harness::with_bridge(bridge, FakeServer::new()).unwrap();
    let window = harness.map_toplevel(Geometry::new(0, 0, 16, 16), Visual::RGB24);
    let pixmap = harness.server().pixmap_of(window).unwrap();

    let names: Vec<Option<u32>> = harness
        .transport()
        .requests()
        .iter()
        .filter_map(|r| match r {
            Request::CreateBuffer { drm_name, .. } => Some(*drm_name),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec![Some(pixmap.0)]);
}

#[test]
fn test_unanswered_authentication_falls_back_to_shm() {
    let transport = RecordingTransport::with_drm(CARD);
    let bridge = Bridge::pre_init_with(drm_config(true), transport, fixed_magic).unwrap();

    assert_eq!(bridge.backend(), BufferBackend::Shm);
    assert!(!bridge.connection().is_authenticated());
    assert!(bridge.connection().auth_queue().is_empty());
    assert_eq!(bridge.connection().state(), ConnectionState::Ready);
}

#[test]
fn test_device_failure_without_fallback_is_fatal() {
    let err = expect_err(Harness::new(drm_config(false), RecordingTransport::with_drm(CARD)));
    assert!(matches!(err, BridgeError::Auth(_)));
}

#[test]
fn test_device_failure_with_fallback() {
    let harness = Harness::new(drm_config(true), RecordingTransport::with_drm(CARD)).unwrap();
    assert_eq!(harness.bridge().backend(), BufferBackend::Shm);
}

#[test]
fn test_missing_compositor_global() {
    let transport = RecordingTransport::with_globals(&["wl_shm"]);
    let err = expect_err(Harness::new(BridgeConfig::default(), transport));
    assert!(matches!(err, BridgeError::Connection(_)));
}

#[test]
fn test_shm_backend_needs_wl_shm() {
    let transport = RecordingTransport::with_globals(&["wl_compositor"]);
    let err = expect_err(Harness::new(BridgeConfig::default(), transport));
    assert!(matches!(err, BridgeError::Connection(_)));
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = BridgeConfig::default();
    config.input.scroll_step = 0.0;
    let transport = RecordingTransport::with_globals(&["wl_compositor", "wl_shm"]);
    let err = expect_err(Harness::new(config, transport));
    assert!(matches!(err, BridgeError::Config(_)));
}

#[test]
fn test_client_authentication_is_fifo() {
    let mut harness = Harness::new(drm_config(true), RecordingTransport::with_drm(CARD)).unwrap();
    let (first, second) = (ClientId(1), ClientId(2));

    let status = harness
        .ctx
        .bridge
        .authenticate(&mut harness.ctx.server, first, 11)
        .unwrap();
    assert_eq!(status, AuthStatus::Deferred);
    let status = harness
        .ctx
        .bridge
        .authenticate(&mut harness.ctx.server, second, 22)
        .unwrap();
    assert_eq!(status, AuthStatus::Deferred);

    // only one request on the wire at a time
    assert_eq!(harness.transport().auth_requests(), vec![11]);
    assert!(harness.server().is_ignored(first));
    assert!(harness.server().is_ignored(second));

    harness.deliver(CompositorEvent::DrmAuthenticated).unwrap();
    assert!(!harness.server().is_ignored(first));
    assert!(harness.server().is_ignored(second));
    assert_eq!(harness.transport().auth_requests(), vec![11, 22]);

    let status = harness
        .ctx
        .bridge
        .authenticate(&mut harness.ctx.server, first, 11)
        .unwrap();
    assert_eq!(status, AuthStatus::Success);

    harness.deliver(CompositorEvent::DrmAuthenticated).unwrap();
    assert!(!harness.server().is_ignored(second));
    assert!(harness.bridge().connection().auth_queue().is_empty());
}

#[test]
fn test_client_authentication_without_drm() {
    let transport = RecordingTransport::with_globals(&["wl_compositor", "wl_shm"]);
    let mut harness = Harness::new(BridgeConfig::default(), transport).unwrap();
    let status = harness
        .ctx
        .bridge
        .authenticate(&mut harness.ctx.server, ClientId(1), 5)
        .unwrap();
    assert_eq!(status, AuthStatus::Error);
    assert!(!harness.server().is_ignored(ClientId(1)));
}

#[test]
fn test_stray_acknowledgement_ignored() {
    let mut harness = Harness::new(drm_config(true), RecordingTransport::with_drm(CARD)).unwrap();
    assert!(harness.deliver(CompositorEvent::DrmAuthenticated).is_ok());
}

#[test]
fn test_close_attends_waiting_clients() {
    let mut harness = Harness::new(drm_config(true), RecordingTransport::with_drm(CARD)).unwrap();
    for (client, magic) in [(ClientId(1), 1), (ClientId(2), 2)] {
        harness
            .ctx
            .bridge
            .authenticate(&mut harness.ctx.server, client, magic)
            .unwrap();
    }
    harness.close();

    assert!(!harness.server().is_ignored(ClientId(1)));
    assert!(!harness.server().is_ignored(ClientId(2)));
    assert_eq!(harness.bridge().connection().state(), ConnectionState::Closed);

    let status = harness
        .ctx
        .bridge
        .authenticate(&mut harness.ctx.server, ClientId(3), 3)
        .unwrap();
    assert_eq!(status, AuthStatus::Error);
}

#[test]
fn test_disconnect_is_fatal_on_wakeup() {
    let mut harness = Harness::new(
        BridgeConfig::default(),
        RecordingTransport::with_globals(&["wl_compositor", "wl_shm"]),
    )
    .unwrap();
    harness.transport_mut().disconnect();

    // nothing is read until the socket polls readable
    assert_eq!(
        harness
            .ctx
            .bridge
            .wakeup(&mut harness.ctx.server, false)
            .unwrap(),
        0
    );
    assert!(matches!(harness.wakeup(), Err(BridgeError::Connection(_))));
    assert!(matches!(harness.block(), Err(BridgeError::Connection(_))));
}

#[test]
fn test_block_drains_pending_writes() {
    let mut harness = Harness::new(
        BridgeConfig::default(),
        RecordingTransport::with_globals(&["wl_compositor", "wl_shm"]),
    )
    .unwrap();
    harness.transport_mut().set_backpressure(3);

    harness.block().unwrap();
    assert_eq!(harness.transport().blocking_flushes(), 3);
    assert!(!harness.bridge().connection().write_pending());
}

#[test]
fn test_unknown_globals_not_bound() {
    let transport = RecordingTransport::with_globals(&[
        "wl_compositor",
        "wl_shm",
        "zwp_linux_dmabuf_v1",
        "wl_shm",
    ]);
    let harness = Harness::new(BridgeConfig::default(), transport).unwrap();
    assert_eq!(harness.transport().bound(), vec!["wl_compositor", "wl_shm"]);
}
