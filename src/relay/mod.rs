//! The relay core: rule table, answer cache, correlation of relayed queries, and the dispatcher
//! that drives them for each received packet.

pub mod cache;
pub mod correlation;
pub mod dispatcher;
pub mod log;
pub mod metrics;
pub mod rules;

pub use cache::DnsCache;
pub use correlation::CorrelationTable;
pub use dispatcher::{Classification, Dispatch, Dispatcher, Outbound};
pub use rules::{RulePair, RuleTable};
