//! Error taxonomy for the bridge
//!
//! Connection and authentication errors are fatal to the bridge (or to the
//! DRM buffer path); buffer and protocol-object errors are recoverable at
//! the call site and only ever logged.

use std::io;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Top-level bridge error
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Transport failure or registry round-trip failure; fatal to the bridge
    #[error("compositor connection failed: {0}")]
    Connection(String),

    /// DRM device node, magic token or authentication failure; fatal to the DRM path only
    #[error("DRM authentication failed: {0}")]
    Auth(String),

    /// Per-surface buffer creation failure
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// A protocol object (surface, pool, device) could not be created
    #[error("failed to create {0}")]
    ProtocolObject(&'static str),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// Whether this error takes down the whole bridge
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Connection(_) | BridgeError::Io(_))
    }
}

/// Buffer creation errors, always recoverable
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("no authenticated DRM connection")]
    NotAuthenticated,

    #[error("{backend} provider cannot use a {source_kind} pixel source")]
    UnsupportedSource {
        backend: &'static str,
        source_kind: &'static str,
    },

    #[error("compositor rejected {backend} buffer {width}x{height}")]
    Rejected {
        backend: &'static str,
        width: u32,
        height: u32,
    },

    #[error("pixmap export failed: {0}")]
    Export(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(BridgeError::Connection("eof".into()).is_fatal());
        assert!(!BridgeError::Auth("no magic".into()).is_fatal());
        assert!(!BridgeError::Buffer(BufferError::NotAuthenticated).is_fatal());
        assert!(!BridgeError::ProtocolObject("wl_surface").is_fatal());
    }

    #[test]
    fn test_buffer_error_display() {
        let err = BufferError::Rejected {
            backend: "shm",
            width: 100,
            height: 50,
        };
        assert_eq!(err.to_string(), "compositor rejected shm buffer 100x50");
        let wrapped: BridgeError = err.into();
        assert_eq!(wrapped.to_string(), "compositor rejected shm buffer 100x50");
    }
}
