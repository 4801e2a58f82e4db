//! Correlation of relayed queries with the clients waiting for them.
//!
//! A query forwarded upstream carries a synthetic id; the slot for that id remembers the client
//! address and the id the client used. Ids come from a counter starting at a random offset.
//! Allocation skips slots that are still pending, so two in-flight queries never share an id;
//! if every slot is taken, allocation fails instead of overwriting one.
//!
//! Upstream responses can be lost. Entries older than the relay timeout are released by
//! [`CorrelationTable::sweep_expired`], which the server runs periodically.

use crate::error::CorrelationError;
use crate::relay::metrics::{RELAY_EXPIRED_TOTAL, RELAY_IN_FLIGHT};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

const SLOTS: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub original_id: u16,
    pub client: SocketAddr,
    pub issued_at: Instant,
}

pub struct CorrelationTable {
    slots: Box<[Option<Pending>]>,
    next: u16,
    in_flight: usize,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::starting_at(rand::random())
    }

    /// A table whose first allocated id is `first` (when free).
    pub fn starting_at(first: u16) -> Self {
        Self { slots: vec![None; SLOTS].into_boxed_slice(), next: first, in_flight: 0 }
    }

    /// Next free id, advancing the counter past it. Does not reserve the slot; pair with
    /// [`CorrelationTable::record`], or use [`CorrelationTable::register`] to do both at once.
    pub fn allocate(&mut self) -> Result<u16, CorrelationError> {
        if self.in_flight >= SLOTS {
            return Err(CorrelationError::Exhausted);
        }
        loop {
            let id = self.next;
            self.next = self.next.wrapping_add(1);
            if self.slots[usize::from(id)].is_none() {
                return Ok(id);
            }
        }
    }

    pub fn record(&mut self, id: u16, original_id: u16, client: SocketAddr, now: Instant) {
        let slot = &mut self.slots[usize::from(id)];
        if slot.is_none() {
            self.in_flight += 1;
        }
        *slot = Some(Pending { original_id, client, issued_at: now });
        RELAY_IN_FLIGHT.set(self.in_flight as i64);
    }

    /// Allocates an id and records the pending query under it.
    pub fn register(
        &mut self,
        original_id: u16,
        client: SocketAddr,
        now: Instant,
    ) -> Result<u16, CorrelationError> {
        let id = self.allocate()?;
        self.record(id, original_id, client, now);
        Ok(id)
    }

    pub fn original_message_id(&self, id: u16) -> Option<u16> {
        self.get(id).map(|p| p.original_id)
    }

    pub fn client_address(&self, id: u16) -> Option<SocketAddr> {
        self.get(id).map(|p| p.client)
    }

    pub fn get(&self, id: u16) -> Option<&Pending> {
        self.slots[usize::from(id)].as_ref()
    }

    /// Frees the slot. Returns `None`, and changes nothing, if the id was not pending.
    pub fn release(&mut self, id: u16) -> Option<Pending> {
        let pending = self.slots[usize::from(id)].take()?;
        self.in_flight -= 1;
        RELAY_IN_FLIGHT.set(self.in_flight as i64);
        Some(pending)
    }

    /// Releases every entry issued at least `timeout` before `now`; returns how many.
    pub fn sweep_expired(&mut self, now: Instant, timeout: Duration) -> usize {
        if self.in_flight == 0 {
            return 0;
        }
        let mut expired = 0;
        for slot in self.slots.iter_mut() {
            let stale = matches!(slot, Some(p) if now.saturating_duration_since(p.issued_at) >= timeout);
            if stale {
                *slot = None;
                expired += 1;
            }
        }
        self.in_flight -= expired;
        RELAY_IN_FLIGHT.set(self.in_flight as i64);
        RELAY_EXPIRED_TOTAL.inc_by(expired as u64);
        expired
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}
