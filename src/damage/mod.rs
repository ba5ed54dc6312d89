//! Damage aggregation
//!
//! Damage reports from the legacy server only mark a window as pending.
//! Each synchronization tick ([`DamageAggregator::flush`]) walks the pending
//! windows once, forwards their accumulated rectangles, attaches the current
//! buffer and commits.
//!
//! # Overview
//!
//! ```text
//! report(w) ×N ──► pending {w}           (a window is queued at most once)
//! flush()      ──► damage × rects, attach, commit, empty region
//!              ──► drain writes          (blocks while the socket is backed up)
//! ```

mod region;

pub use region::DamageRegion;

use crate::config::DamageMode;
use crate::connection::Connection;
use crate::error::Result;
use crate::protocol::{HostKind, Transport};
use crate::server::{LegacyServer, WindowId};
use crate::surface::SurfaceManager;
use log::{debug, trace};
use std::collections::{HashSet, VecDeque};

#[derive(Debug)]
pub struct DamageAggregator {
    mode: DamageMode,
    order: VecDeque<WindowId>,
    members: HashSet<WindowId>,
}

impl DamageAggregator {
    /// Damage policy for a host; plain X11 hosts only take a bounding box
    pub fn new(mode: DamageMode, host: HostKind) -> Self {
        let mode = match host {
            HostKind::X11 => DamageMode::Bounding,
            HostKind::Compositor => mode,
        };
        Self {
            mode,
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    pub fn mode(&self) -> DamageMode {
        self.mode
    }

    /// Queue a window for the next tick; returns whether it was newly queued
    pub fn report(&mut self, window: WindowId) -> bool {
        if !self.members.insert(window) {
            return false;
        }
        self.order.push_back(window);
        true
    }

    /// Drop a window whose surface is going away
    pub fn forget(&mut self, window: WindowId) {
        if self.members.remove(&window) {
            self.order.retain(|w| *w != window);
        }
    }

    pub fn is_pending(&self, window: WindowId) -> bool {
        self.members.contains(&window)
    }

    pub fn pending(&self) -> usize {
        self.order.len()
    }

    /// Run one tick, returning the number of requests sent
    pub fn flush<T: Transport, S: LegacyServer>(
        &mut self,
        conn: &mut Connection<T>,
        server: &mut S,
        surfaces: &SurfaceManager,
    ) -> Result<usize> {
        if self.order.is_empty() {
            return Ok(0);
        }

        let mut sent = 0;
        while let Some(window) = self.order.pop_front() {
            self.members.remove(&window);

            let Some(surface) = surfaces.get(window) else {
                trace!("Dropping damage for vanished window {:?}", window);
                continue;
            };

            let rects = server.damage_region(surface.damage);
            let rects = match self.mode {
                DamageMode::PerRect => rects,
                DamageMode::Bounding => DamageRegion::bounding(&rects).into_iter().collect(),
            };

            let transport = conn.transport_mut();
            for rect in rects.iter().filter(|r| !r.is_empty()) {
                transport.damage(surface.handle, *rect);
                sent += 1;
            }
            if let Some(buffer) = surface.buffer {
                transport.attach(surface.handle, Some(buffer));
                sent += 1;
            }
            transport.commit(surface.handle);
            sent += 1;

            server.damage_empty(surface.damage);
        }

        debug!("Damage tick sent {} requests", sent);
        conn.drain()?;
        Ok(sent)
    }
}
