//! DRM device access for authentication

use crate::error::{BridgeError, Result};
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

/// Source of DRM magic tokens
pub trait AuthSource {
    fn magic(&self) -> Result<u32>;
}

/// An opened DRM device node
#[derive(Debug)]
pub struct DrmCard {
    file: File,
    path: PathBuf,
}

impl AsFd for DrmCard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl drm::Device for DrmCard {}

impl DrmCard {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| BridgeError::Auth(format!("cannot open {}: {}", path.display(), e)))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuthSource for DrmCard {
    fn magic(&self) -> Result<u32> {
        let token = drm::Device::generate_auth_token(self).map_err(|e| {
            BridgeError::Auth(format!("no magic from {}: {}", self.path.display(), e))
        })?;
        Ok(u32::from(token))
    }
}

/// Open a device node as a boxed [`AuthSource`]
pub fn open_card(path: &str) -> Result<Box<dyn AuthSource>> {
    Ok(Box::new(DrmCard::open(path)?))
}
