use crate::error::RelayError;
use crate::relay::dispatcher::Classification;
use crate::relay::metrics::{DROPPED_TOTAL, PACKETS_RECEIVED_TOTAL, QUERIES_TOTAL, RESPONSES_RELAYED_TOTAL};
use crate::types::DnsMessage;
use std::fmt::Write;
use std::net::SocketAddr;

pub fn packet_received(bytes: &[u8], from: SocketAddr) {
    PACKETS_RECEIVED_TOTAL.inc();
    tracing::info!("=> Received {} byte(s) from {}", bytes.len(), from);
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!("{}", hex_dump(bytes));
    }
}

pub fn message_decoded(msg: &DnsMessage) {
    tracing::debug!("decoded message:\n{}", msg);
}

pub fn classified(outcome: Classification, msg: &DnsMessage, to: SocketAddr) {
    match outcome {
        Classification::ResponseRelayed => RESPONSES_RELAYED_TOTAL.inc(),
        _ => QUERIES_TOTAL.with_label_values(&[outcome.as_str()]).inc(),
    }
    let qname = msg
        .questions
        .first()
        .map_or_else(|| "-".to_string(), |q| q.name.to_string());
    tracing::info!("    |-- [{}] '{}' TxID: {:#06x} -> {}", outcome.as_str(), qname, msg.header.id, to);
}

pub fn dropped(err: &RelayError, from: SocketAddr) {
    DROPPED_TOTAL.with_label_values(&[err.reason()]).inc();
    tracing::warn!("Dropped packet from {}: {}", from, err);
}

/// Sixteen bytes per line, like `xxd` without the ASCII column.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3 + bytes.len() / 16 + 1);
    for (i, line) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "\n\t{:04x}:", i * 16);
        for b in line {
            let _ = write!(out, " {:02x}", b);
        }
    }
    out
}
