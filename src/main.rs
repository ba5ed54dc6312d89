//! # xwl-bridge
//!
//! Connects to the compositor, negotiates buffers and then runs the bridge
//! against a headless in-process legacy screen. Useful to check what a
//! compositor offers and to watch the event traffic with `--debug`.

use anyhow::{Context, Result};
use calloop::generic::{FdWrapper, Generic};
use calloop::{EventLoop, Interest, Mode, PostAction};
use clap::Parser;
use log::{error, info, trace};
use std::time::Duration;
use xwl_bridge::config::{BufferBackend, WindowMode};
use xwl_bridge::server::hooks::ScreenHooks;
use xwl_bridge::testing::FakeServer;
use xwl_bridge::wayland::WaylandTransport;
use xwl_bridge::{logging, Bridge, BridgeConfig, BridgeContext, BridgeError};

#[derive(Parser)]
#[command(name = "xwl-bridge")]
#[command(about = "Bridges legacy X11 windows onto a Wayland compositor")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/xwl-bridge/config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Compositor socket name or path (defaults to $WAYLAND_DISPLAY)
    #[arg(long)]
    display: Option<String>,

    /// Buffer backend: drm or shm
    #[arg(long, value_parser = ["drm", "shm"])]
    backend: Option<String>,

    /// Show the whole screen as one surface instead of one per window
    #[arg(long)]
    fullscreen: bool,
}

struct Headless {
    bridge: Bridge<WaylandTransport>,
    server: FakeServer,
    error: Option<BridgeError>,
}

impl BridgeContext for Headless {
    type Transport = WaylandTransport;
    type Server = FakeServer;

    fn parts(&mut self) -> (&mut Bridge<WaylandTransport>, &mut FakeServer) {
        (&mut self.bridge, &mut self.server)
    }
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = BridgeConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;

    if let Some(display) = &cli.display {
        config.bridge.display = Some(display.clone());
    }
    match cli.backend.as_deref() {
        Some("drm") => config.bridge.buffer_backend = BufferBackend::Drm,
        Some("shm") => config.bridge.buffer_backend = BufferBackend::Shm,
        _ => {}
    }
    if cli.fullscreen {
        config.bridge.mode = WindowMode::Fullscreen;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init(&config.logging, cli.debug)?;

    info!(
        "Starting xwl-bridge {} ({}, built {}, commit {})",
        xwl_bridge::VERSION,
        env!("TARGET_TRIPLE"),
        env!("BUILD_DATE"),
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    );

    let transport = WaylandTransport::connect(config.bridge.display.as_deref())
        .context("Failed to connect to the compositor")?;
    let bridge = Bridge::pre_init(config, transport).context("Bridge pre-init failed")?;

    let mut state = Headless {
        bridge,
        server: FakeServer::new(),
        error: None,
    };
    let mut hooks: ScreenHooks<Headless> = ScreenHooks::passthrough();
    state
        .bridge
        .screen_init(&mut state.server, &mut hooks)
        .context("Screen init failed")?;

    let root = state.server.root();
    hooks.create_window.call(&mut state, root);
    hooks.realize_window.call(&mut state, root);

    let mut event_loop: EventLoop<Headless> =
        EventLoop::try_new().context("Failed to create event loop")?;
    let fd = state.bridge.transport_fd();
    // SAFETY: the descriptor belongs to the transport, which outlives the loop.
    let source = Generic::new(unsafe { FdWrapper::new(fd) }, Interest::READ, Mode::Level);
    event_loop
        .handle()
        .insert_source(source, |readiness, _, state: &mut Headless| {
            match state.bridge.wakeup(&mut state.server, readiness.readable) {
                Ok(count) => trace!("Dispatched {} compositor events", count),
                Err(err) => state.error = Some(err),
            }
            Ok(PostAction::Continue)
        })
        .map_err(|e| anyhow::anyhow!("Failed to watch compositor socket: {}", e))?;

    info!("Bridge running, screen {:?}", state.bridge.screen_size());
    let result: Result<(), BridgeError> = loop {
        if let Err(err) = state.bridge.post_damage(&mut state.server) {
            break Err(err);
        }
        if let Err(err) = state.bridge.block() {
            break Err(err);
        }
        event_loop
            .dispatch(Some(Duration::from_millis(250)), &mut state)
            .context("Event loop dispatch failed")?;
        if let Some(err) = state.error.take() {
            break Err(err);
        }
    };

    state.bridge.close(&mut state.server);
    if let Err(err) = &result {
        error!("Bridge stopped: {}", err);
    }
    result.map_err(Into::into)
}
