//! DRM authentication queue
//!
//! The compositor answers authenticate requests with a bare acknowledgement
//! that carries no identity, so only one request may be outstanding. Later
//! requests wait in FIFO order and the head is sent as soon as the previous
//! answer arrives.

use crate::server::ClientId;
use std::collections::VecDeque;

/// Who asked for authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requester {
    /// The bridge's own device, during startup
    Bridge,
    /// A legacy client, which stays ignored until answered
    Client(ClientId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthRequest {
    pub requester: Requester,
    pub magic: u32,
}

#[derive(Debug, Default)]
pub struct AuthQueue {
    queue: VecDeque<AuthRequest>,
    in_flight: bool,
}

impl AuthQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request; returns it back if it must be sent right away
    pub fn push(&mut self, request: AuthRequest) -> Option<AuthRequest> {
        self.queue.push_back(request);
        self.start_next()
    }

    /// Complete the in-flight request
    ///
    /// Returns the completed request and, if the queue is not empty, the
    /// next one to put on the wire.
    pub fn acknowledge(&mut self) -> Option<(AuthRequest, Option<AuthRequest>)> {
        if !self.in_flight {
            return None;
        }
        self.in_flight = false;
        let done = self.queue.pop_front()?;
        Some((done, self.start_next()))
    }

    pub fn in_flight(&self) -> Option<&AuthRequest> {
        if self.in_flight {
            self.queue.front()
        } else {
            None
        }
    }

    pub fn is_queued(&self, requester: Requester) -> bool {
        self.queue.iter().any(|r| r.requester == requester)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Abandon everything, returning what was waiting
    pub fn clear(&mut self) -> Vec<AuthRequest> {
        self.in_flight = false;
        self.queue.drain(..).collect()
    }

    fn start_next(&mut self) -> Option<AuthRequest> {
        if self.in_flight {
            return None;
        }
        let head = *self.queue.front()?;
        self.in_flight = true;
        Some(head)
    }
}
