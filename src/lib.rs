//! DNS Relay - a caching DNS relay with a static rule table

pub mod config;
pub mod dns_server;
pub mod error;
pub mod relay;
pub mod trie;
pub mod types;
pub mod wire;

pub use error::{RelayError, RuleError, WireError};
pub use relay::{Dispatcher, RuleTable};
