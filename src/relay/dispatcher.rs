//! Per-packet state machine.
//!
//! Queries are answered, in order of precedence, as blocked (NXDOMAIN), from the static rule
//! table, from the cache, or forwarded upstream under a fresh correlation id. Upstream responses
//! are matched back to the waiting client by that id, cached, and relayed with the client's
//! original id restored.
//!
//! The dispatcher never touches sockets. Each call consumes one received datagram and yields the
//! datagram to send, if any, and where to send it.

use crate::error::{RelayError, Violation};
use crate::relay::cache::DnsCache;
use crate::relay::correlation::CorrelationTable;
use crate::relay::log;
use crate::relay::rules::RuleTable;
use crate::types::{DnsMessage, ResourceRecord, OPCODE_QUERY, RCODE_NOERROR, RCODE_NXDOMAIN};
use crate::wire;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Blocked,
    Configured,
    Cached,
    Relayed,
    ResponseRelayed,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Blocked => "blocked",
            Classification::Configured => "configured",
            Classification::Cached => "cached",
            Classification::Relayed => "relayed",
            Classification::ResponseRelayed => "response",
        }
    }
}

/// A datagram ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: SocketAddr,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub classification: Classification,
    pub outbound: Outbound,
}

/// Owns the relay state. The rule table is read-only; the cache and the correlation table are
/// each behind a mutex held for one whole logical operation, so concurrent workers never see a
/// half-updated entry.
pub struct Dispatcher {
    rules: RuleTable,
    cache: Mutex<DnsCache>,
    correlation: Mutex<CorrelationTable>,
    upstream: SocketAddr,
    relay_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        rules: RuleTable,
        cache: DnsCache,
        correlation: CorrelationTable,
        upstream: SocketAddr,
    ) -> Self {
        Self {
            rules,
            cache: Mutex::new(cache),
            correlation: Mutex::new(correlation),
            upstream,
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
        }
    }

    pub fn with_relay_timeout(mut self, timeout: Duration) -> Self {
        self.relay_timeout = timeout;
        self
    }

    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    /// Processes one datagram received from `from`. Errors mean the packet was dropped; they
    /// have already been logged.
    pub fn handle_packet(&self, bytes: &[u8], from: SocketAddr) -> Result<Dispatch, RelayError> {
        log::packet_received(bytes, from);
        let result = wire::decode(bytes).map_err(RelayError::from).and_then(|msg| {
            log::message_decoded(&msg);
            if msg.is_response() {
                self.handle_response(msg, from)
            } else {
                self.handle_query(msg, from)
            }
        });
        if let Err(err) = &result {
            log::dropped(err, from);
        }
        result
    }

    fn handle_query(&self, msg: DnsMessage, from: SocketAddr) -> Result<Dispatch, RelayError> {
        check_query(&msg)?;
        let question = msg.questions[0].clone();

        if self.rules.is_blocked(&question.name) {
            return self.reply(msg, RCODE_NXDOMAIN, Vec::new(), Classification::Blocked, from);
        }

        let configured: Vec<ResourceRecord> = self
            .rules
            .configured_records(&question.name)
            .into_iter()
            .filter(|rr| rr.matches(&question))
            .collect();
        if !configured.is_empty() {
            return self.reply(msg, RCODE_NOERROR, configured, Classification::Configured, from);
        }

        let cached = self.cache().query(&question);
        if !cached.is_empty() {
            return self.reply(msg, RCODE_NOERROR, cached, Classification::Cached, from);
        }

        self.forward(msg, from)
    }

    fn forward(&self, mut msg: DnsMessage, from: SocketAddr) -> Result<Dispatch, RelayError> {
        let original_id = msg.header.id;
        let mut correlation = self.correlation();
        let id = correlation.register(original_id, from, Instant::now())?;
        msg.header.id = id;
        let bytes = match wire::encode(&msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                correlation.release(id);
                return Err(err.into());
            }
        };
        drop(correlation);

        tracing::debug!("TxID: {:#06x} relayed upstream as {:#06x}", original_id, id);
        log::classified(Classification::Relayed, &msg, self.upstream);
        Ok(Dispatch {
            classification: Classification::Relayed,
            outbound: Outbound { to: self.upstream, bytes },
        })
    }

    fn handle_response(&self, mut msg: DnsMessage, from: SocketAddr) -> Result<Dispatch, RelayError> {
        if from != self.upstream {
            return Err(RelayError::UnexpectedResponder(from));
        }
        let id = msg.header.id;
        let pending = self
            .correlation()
            .release(id)
            .ok_or(RelayError::UnknownCorrelation(id))?;

        let flags = msg.header.flags;
        if flags.rcode == RCODE_NOERROR && !flags.tc {
            if let [question] = msg.questions.as_slice() {
                let mut cache = self.cache();
                for rr in &msg.answers {
                    cache.insert(question, rr);
                }
            }
        }

        msg.header.id = pending.original_id;
        let bytes = wire::encode(&msg)?;
        log::classified(Classification::ResponseRelayed, &msg, pending.client);
        Ok(Dispatch {
            classification: Classification::ResponseRelayed,
            outbound: Outbound { to: pending.client, bytes },
        })
    }

    fn reply(
        &self,
        mut msg: DnsMessage,
        rcode: u8,
        answers: Vec<ResourceRecord>,
        classification: Classification,
        to: SocketAddr,
    ) -> Result<Dispatch, RelayError> {
        msg.header.flags.qr = true;
        msg.header.flags.ra = true;
        msg.header.flags.rcode = rcode;
        msg.set_answers(answers);
        let bytes = wire::encode(&msg)?;
        log::classified(classification, &msg, to);
        Ok(Dispatch { classification, outbound: Outbound { to, bytes } })
    }

    /// Releases forwarded queries that have waited longer than the relay timeout.
    pub fn sweep_expired(&self) -> usize {
        let expired = self.correlation().sweep_expired(Instant::now(), self.relay_timeout);
        if expired > 0 {
            tracing::warn!("{} relayed quer(ies) timed out waiting for {}", expired, self.upstream);
        }
        expired
    }

    pub fn in_flight(&self) -> usize {
        self.correlation().in_flight()
    }

    pub fn cached_items(&self) -> usize {
        self.cache().resident_items()
    }

    fn cache(&self) -> MutexGuard<'_, DnsCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn correlation(&self) -> MutexGuard<'_, CorrelationTable> {
        self.correlation.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_query(msg: &DnsMessage) -> Result<(), Violation> {
    let flags = msg.header.flags;
    if flags.opcode != OPCODE_QUERY {
        return Err(Violation::Opcode(flags.opcode));
    }
    if flags.tc {
        return Err(Violation::Truncated);
    }
    if flags.z {
        return Err(Violation::ReservedBit);
    }
    if msg.questions.len() != 1 {
        return Err(Violation::QuestionCount(msg.questions.len()));
    }
    Ok(())
}
