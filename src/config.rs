//! Configuration for the relay: resolved runtime settings and the rules file.
//!
//! The rules file holds one `<address> <name>` pair per line. `#` starts a comment that runs to
//! the end of the line; blank lines are ignored.

use crate::error::RuleError;
use crate::relay::rules::{RulePair, RuleTable};
use anyhow::Result;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_UPSTREAM_PORT: u16 = 53;

/// Settings the server runs with, after command-line parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    pub debug_level: u8,
    pub cache_size: usize,
    pub listen_port: u16,
    pub hosts_file: PathBuf,
    pub upstream: SocketAddr,
    pub log_file: PathBuf,
    pub stderr_enable: bool,
    pub relay_timeout: Duration,
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            debug_level: 0,
            cache_size: 4096,
            listen_port: 53,
            hosts_file: PathBuf::from("hosts.txt"),
            upstream: SocketAddr::from(([114, 114, 114, 114], DEFAULT_UPSTREAM_PORT)),
            log_file: PathBuf::from("dns_relay.log"),
            stderr_enable: false,
            relay_timeout: Duration::from_secs(10),
            metrics_addr: None,
        }
    }
}

impl RelayConfig {
    /// Default `EnvFilter` directive for the configured debug level.
    pub fn log_filter(&self) -> &'static str {
        match self.debug_level {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.listen_port))
    }
}

/// Accepts `IP` or `IP:port`; a bare address gets port 53.
pub fn parse_upstream(s: &str) -> Result<SocketAddr, String> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    s.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_UPSTREAM_PORT))
        .map_err(|_| format!("'{}' is not an IP address or IP:port", s))
}

#[derive(Debug, PartialEq)]
enum Token { Text(String), Newline }

fn lex(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c == '\n' { tokens.push(Token::Newline); chars.next(); }
        else if c.is_whitespace() { chars.next(); }
        else if c == '#' { while let Some(&c) = chars.peek() { if c == '\n' { break; } chars.next(); } }
        else {
            let mut s = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '#' { break; }
                s.push(c); chars.next();
            }
            tokens.push(Token::Text(s));
        }
    }
    tokens
}

/// Splits rules text into `(address, name)` pairs, tagging each with its 1-based line number.
pub fn parse_rules(content: &str) -> Result<Vec<RulePair>, RuleError> {
    let mut pairs = Vec::new();
    let mut fields = Vec::new();
    let mut line = 1;
    for token in lex(content) {
        match token {
            Token::Text(s) => fields.push(s),
            Token::Newline => {
                end_line(&mut pairs, &mut fields, line)?;
                line += 1;
            }
        }
    }
    end_line(&mut pairs, &mut fields, line)?;
    Ok(pairs)
}

fn end_line(pairs: &mut Vec<RulePair>, fields: &mut Vec<String>, line: usize) -> Result<(), RuleError> {
    match fields.len() {
        0 => {}
        2 => {
            let name = fields.pop().unwrap_or_default();
            let marker = fields.pop().unwrap_or_default();
            pairs.push(RulePair { line, marker, name });
        }
        found => return Err(RuleError::Malformed { line, found }),
    }
    fields.clear();
    Ok(())
}

/// Reads and parses the rules file at `path` into a ready rule table.
pub fn load_rules(path: &Path) -> Result<RuleTable> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read rules file '{}': {}", path.display(), e))?;
    let pairs = parse_rules(&content)
        .map_err(|e| anyhow::anyhow!("Invalid rules file '{}': {}", path.display(), e))?;
    let table = RuleTable::from_pairs(pairs)
        .map_err(|e| anyhow::anyhow!("Invalid rules file '{}': {}", path.display(), e))?;
    Ok(table)
}
