//! # xwl-bridge
//!
//! Runs a legacy X server's windows on top of a Wayland compositor. Every
//! legacy window that should be visible gets a compositor surface whose
//! buffer is the window's pixmap; damage, pointer/keyboard input, outputs
//! and cursors are translated in both directions.
//!
//! ## Architecture
//!
//! - `connection`: globals, DRM authentication, write backpressure
//! - `surface`: window→surface directory and buffer replacement
//! - `buffer`: DRM-name and shared-memory buffer providers
//! - `damage`: per-tick damage aggregation
//! - `input`: seats, focus, button/key/axis translation
//! - `output`: virtual outputs and the screen size
//! - `cursor`: legacy cursor images
//! - `server`: the traits an embedding legacy server implements
//! - `bridge`: the context object that ties everything together
//! - `wayland`: a wayland-client transport (feature `wayland`)
//! - `testing`: recording transport and fake legacy server (feature `testing`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use xwl_bridge::testing::{FakeServer, RecordingTransport};
//! use xwl_bridge::{Bridge, BridgeConfig};
//!
//! fn main() -> xwl_bridge::Result<()> {
//!     let transport = RecordingTransport::with_globals(&["wl_compositor", "wl_shm"]);
//!     let mut bridge = Bridge::pre_init(BridgeConfig::default(), transport)?;
//!     let mut server = FakeServer::new();
//!     bridge.post_damage(&mut server)?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod damage;
pub mod error;
pub mod input;
pub mod logging;
pub mod output;
pub mod protocol;
pub mod server;
pub mod surface;

// In-memory doubles for tests and the headless demo binary
#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(feature = "wayland")]
pub mod wayland;

pub use bridge::{Bridge, BridgeContext};
pub use config::BridgeConfig;
pub use error::{BridgeError, BufferError, Result};
pub use protocol::{CompositorEvent, Transport};
pub use server::LegacyServer;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
