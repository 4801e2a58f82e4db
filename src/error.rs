//! Error types.
//!
//! Everything the relay can reject while processing a packet is a typed, recoverable error.
//! The server loop logs it and drops the packet; nothing on the packet path terminates the
//! process.

use std::net::SocketAddr;

/// Failures while decoding or encoding DNS wire format.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ended before a field that was expected at `offset`.
    #[error("message truncated at offset {offset}")]
    Truncated { offset: usize },

    /// A compression pointer referenced a location outside the buffer.
    #[error("compression pointer at offset {offset} targets {target}, outside the message")]
    PointerOutOfRange { offset: usize, target: usize },

    /// A name followed more compression pointers than allowed; almost always a loop.
    #[error("compression pointer chain longer than {limit} hops at offset {offset}")]
    PointerLoop { offset: usize, limit: usize },

    /// A length byte used one of the reserved label types (`0b01` / `0b10` prefixes).
    #[error("unsupported label type {0:#04x}")]
    UnsupportedLabelType(u8),

    /// A resource record declared more RDATA than the buffer holds.
    #[error("record data of {declared} bytes at offset {offset} runs past the end of the message")]
    RdataOverrun { offset: usize, declared: usize },

    /// A single label was longer than 63 bytes.
    #[error("label of {0} bytes exceeds 63")]
    LabelTooLong(usize),

    /// A name encodes to more than 255 bytes.
    #[error("name of {0} bytes exceeds 255")]
    NameTooLong(usize),

    /// A dotted name contained an empty label, e.g. `a..b`.
    #[error("empty label in name \"{0}\"")]
    EmptyLabel(String),

    /// A `\DDD` escape in a dotted name whose value does not fit in a byte.
    #[error("escape out of range in name \"{0}\"")]
    BadEscape(String),

    /// A header count disagreed with the number of entries held in that section.
    #[error("{section} count {declared} does not match {actual} entries")]
    CountMismatch {
        section: &'static str,
        declared: u16,
        actual: usize,
    },

    /// Record data longer than a 16-bit length can describe.
    #[error("record data of {0} bytes does not fit in RDLENGTH")]
    RdataTooLong(usize),
}

/// Protocol preconditions a query must meet before it is dispatched.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("unsupported opcode {0}")]
    Opcode(u8),
    #[error("truncation flag set")]
    Truncated,
    #[error("reserved Z bit set")]
    ReservedBit,
    #[error("expected exactly one question, found {0}")]
    QuestionCount(usize),
}

/// Problems in the rules input.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("line {line}: \"{marker}\" is not an IP address")]
    InvalidAddress { line: usize, marker: String },

    #[error("line {line}: invalid name: {source}")]
    InvalidName { line: usize, source: WireError },

    #[error("line {line}: expected \"<address> <name>\", found {found} field(s)")]
    Malformed { line: usize, found: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// Every one of the 65536 ids is held by a pending query.
    #[error("all correlation ids are in flight")]
    Exhausted,
}

/// Why the dispatcher dropped a packet.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("malformed message: {0}")]
    Malformed(#[from] WireError),

    #[error("protocol violation: {0}")]
    Violation(#[from] Violation),

    #[error("response id {0:#06x} matches no pending query")]
    UnknownCorrelation(u16),

    #[error("response from {0} which is not the upstream resolver")]
    UnexpectedResponder(SocketAddr),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

impl RelayError {
    /// Short label for metrics and log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            RelayError::Malformed(_) => "malformed",
            RelayError::Violation(_) => "violation",
            RelayError::UnknownCorrelation(_) => "unknown_id",
            RelayError::UnexpectedResponder(_) => "spoofed",
            RelayError::Correlation(_) => "id_exhausted",
        }
    }
}
