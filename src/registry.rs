//! Correlation of inbound packets with the requests waiting for them.

use std::collections::HashMap;

use log::{debug, trace};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::RconError;
use crate::packet::Packet;

/// Outcome delivered to whoever waits on a request id.
pub type Resolution = Result<Packet, RconError>;

struct Pending {
    deadline: Instant,
    reply: oneshot::Sender<Resolution>,
}

/// Pending requests keyed by correlation id. Every entry is completed exactly
/// once, by [resolve](Registry::resolve) or by one of the expiry paths, and is
/// removed in the same step so a late packet for that id finds nothing.
#[derive(Default)]
pub struct Registry {
    pending: HashMap<i32, Pending>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: i32,
        deadline: Instant,
    ) -> Result<oneshot::Receiver<Resolution>, RconError> {
        if self.pending.contains_key(&id) {
            return Err(RconError::DuplicateRequestId(id));
        }

        let (reply, receiver) = oneshot::channel();
        self.pending.insert(id, Pending { deadline, reply });
        trace!("registered request {}", id);
        Ok(receiver)
    }

    /// Hands `packet` to the request waiting on its id. Returns `false` if
    /// nobody was waiting, in which case the packet is dropped.
    pub fn resolve(&mut self, packet: Packet) -> bool {
        match self.pending.remove(&packet.id()) {
            Some(pending) => {
                trace!("resolved request {}", packet.id());
                // the waiter may have given up already, nothing to do then
                let _ = pending.reply.send(Ok(packet));
                true
            }
            None => {
                debug!("discarding packet for unknown request {}", packet.id());
                false
            }
        }
    }

    /// Completes the entry for `id` with a timeout. No-op if it is gone.
    pub fn expire(&mut self, id: i32) -> bool {
        self.fail(id, RconError::Timeout)
    }

    /// Completes the entry for `id` with `error`. No-op if it is gone.
    pub fn fail(&mut self, id: i32, error: RconError) -> bool {
        match self.pending.remove(&id) {
            Some(pending) => {
                let _ = pending.reply.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Drops the entry for `id` without completing it.
    pub fn forget(&mut self, id: i32) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Expires every entry whose deadline is at or before `now`.
    pub fn expire_due(&mut self, now: Instant) -> usize {
        let due: Vec<i32> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &due {
            debug!("request {} timed out", id);
            self.expire(*id);
        }
        due.len()
    }

    /// Fails every pending entry, used when the connection goes away.
    pub fn fail_all<F>(&mut self, error: F) -> usize
    where
        F: Fn() -> RconError,
    {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(error()));
        }
        count
    }

    /// The earliest deadline among pending entries.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    pub fn contains(&self, id: i32) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
