//! Basic types for the relay

use crate::error::WireError;
use std::fmt;
use std::str::FromStr;

pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_MX: u16 = 15;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;

pub const CLASS_IN: u16 = 1;

pub const OPCODE_QUERY: u8 = 0;

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_NXDOMAIN: u8 = 3;

pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_NAME_LEN: usize = 255;

/// A domain name as an ordered sequence of labels. The root name has no labels.
///
/// Labels keep the case they arrived with so a decoded message re-encodes to the same bytes.
/// Lookups go through [`Name::canonical_key`], which folds ASCII case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Name {
    labels: Vec<Vec<u8>>,
}

impl Name {
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds a name from raw labels without validating lengths; [`Name::write_wire`] rejects
    /// oversized labels or names when the name is encoded.
    pub fn from_labels(labels: Vec<Vec<u8>>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &[Vec<u8>] {
        &self.labels
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Length of the uncompressed wire form, terminating zero included.
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    /// Appends the uncompressed wire form to `out`.
    pub fn write_wire(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        self.validate()?;
        for label in &self.labels {
            out.push(label.len() as u8);
            out.extend_from_slice(label);
        }
        out.push(0);
        Ok(())
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(self.wire_len());
        self.write_wire(&mut out)?;
        Ok(out)
    }

    /// The single byte encoding used whenever a name is a lookup key: the wire form with
    /// ASCII letters lowered. Lengths are not validated here; an oversized name simply never
    /// matches a name that came off the wire.
    pub fn canonical_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.wire_len());
        for label in &self.labels {
            key.push(label.len() as u8);
            key.extend(label.iter().map(u8::to_ascii_lowercase));
        }
        key.push(0);
        key
    }

    fn validate(&self) -> Result<(), WireError> {
        if let Some(label) = self.labels.iter().find(|l| l.len() > MAX_LABEL_LEN) {
            return Err(WireError::LabelTooLong(label.len()));
        }
        let len = self.wire_len();
        if len > MAX_NAME_LEN {
            return Err(WireError::NameTooLong(len));
        }
        Ok(())
    }
}

impl FromStr for Name {
    type Err = WireError;

    /// Parses dotted presentation form. A single trailing dot is optional; `\.`, `\\` and
    /// `\DDD` escapes are understood.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "." {
            return Ok(Self::root());
        }

        let mut labels = Vec::new();
        let mut label = Vec::new();
        let mut bytes = s.bytes().peekable();
        let mut trailing_dot = false;

        while let Some(b) = bytes.next() {
            trailing_dot = false;
            match b {
                b'.' => {
                    if label.is_empty() {
                        return Err(WireError::EmptyLabel(s.to_string()));
                    }
                    labels.push(std::mem::take(&mut label));
                    trailing_dot = true;
                }
                b'\\' => {
                    let mut digits = Vec::with_capacity(3);
                    while digits.len() < 3 {
                        match bytes.peek() {
                            Some(d) if d.is_ascii_digit() => {
                                digits.push(*d);
                                bytes.next();
                            }
                            _ => break,
                        }
                    }
                    if digits.is_empty() {
                        match bytes.next() {
                            Some(escaped) => label.push(escaped),
                            None => label.push(b'\\'),
                        }
                    } else {
                        let value = digits
                            .iter()
                            .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
                        let byte = u8::try_from(value)
                            .map_err(|_| WireError::BadEscape(s.to_string()))?;
                        label.push(byte);
                    }
                }
                other => label.push(other),
            }
        }

        if !trailing_dot {
            if label.is_empty() {
                return Err(WireError::EmptyLabel(s.to_string()));
            }
            labels.push(label);
        }

        let name = Self { labels };
        name.validate()?;
        Ok(name)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return f.write_str(".");
        }
        for label in &self.labels {
            for &b in label {
                match b {
                    b'.' | b'\\' => write!(f, "\\{}", b as char)?,
                    0x21..=0x7e => write!(f, "{}", b as char)?,
                    _ => write!(f, "\\{:03}", b)?,
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderFlags {
    pub qr: bool, pub opcode: u8, pub aa: bool, pub tc: bool,
    pub rd: bool, pub ra: bool, pub z: bool, pub ad: bool,
    pub cd: bool, pub rcode: u8,
}

impl From<u16> for HeaderFlags {
    fn from(v: u16) -> Self {
        Self {
            qr: v & 0x8000 != 0,
            opcode: ((v >> 11) & 0x0F) as u8,
            aa: v & 0x0400 != 0,
            tc: v & 0x0200 != 0,
            rd: v & 0x0100 != 0,
            ra: v & 0x0080 != 0,
            z: v & 0x0040 != 0,
            ad: v & 0x0020 != 0,
            cd: v & 0x0010 != 0,
            rcode: (v & 0x000F) as u8,
        }
    }
}

impl From<HeaderFlags> for u16 {
    fn from(f: HeaderFlags) -> Self {
        (u16::from(f.qr) << 15)
            | (u16::from(f.opcode & 0x0F) << 11)
            | (u16::from(f.aa) << 10)
            | (u16::from(f.tc) << 9)
            | (u16::from(f.rd) << 8)
            | (u16::from(f.ra) << 7)
            | (u16::from(f.z) << 6)
            | (u16::from(f.ad) << 5)
            | (u16::from(f.cd) << 4)
            | u16::from(f.rcode & 0x0F)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16, pub flags: HeaderFlags,
    pub question_count: u16, pub answer_count: u16,
    pub authority_count: u16, pub additional_count: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion { pub name: Name, pub qtype: u16, pub qclass: u16 }

/// A resource record. Inside the cache the TTL is not stored here; see
/// [`crate::relay::cache::DnsCache`] for how expiry is tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: Name,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl ResourceRecord {
    pub fn matches(&self, question: &DnsQuestion) -> bool {
        self.rtype == question.qtype && self.class == question.qclass
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl DnsMessage {
    pub fn is_response(&self) -> bool {
        self.header.flags.qr
    }

    /// Replaces the answer section and keeps the header count in step.
    pub fn set_answers(&mut self, answers: Vec<ResourceRecord>) {
        self.header.answer_count = answers.len().min(usize::from(u16::MAX)) as u16;
        self.answers = answers;
    }
}

impl fmt::Display for DnsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = &self.header;
        let fl = &h.flags;
        writeln!(f, "id={:#06x}", h.id)?;
        writeln!(
            f,
            "qr={}, opcode={}, aa={}, tc={}, rd={}, ra={}, z={}, ad={}, cd={}, rcode={}",
            u8::from(fl.qr), fl.opcode, u8::from(fl.aa), u8::from(fl.tc), u8::from(fl.rd),
            u8::from(fl.ra), u8::from(fl.z), u8::from(fl.ad), u8::from(fl.cd), fl.rcode
        )?;
        writeln!(
            f,
            "qdcount={}, ancount={}, nscount={}, arcount={}",
            h.question_count, h.answer_count, h.authority_count, h.additional_count
        )?;
        writeln!(f, "questions:")?;
        for q in &self.questions {
            writeln!(f, "  qname={}, qtype={}, qclass={}", q.name, q.qtype, q.qclass)?;
        }
        for (title, section) in [
            ("answers", &self.answers),
            ("authority", &self.authority),
            ("additional", &self.additional),
        ] {
            writeln!(f, "{title}:")?;
            for rr in section {
                writeln!(
                    f,
                    "  name={}, type={}, class={}, ttl={}, rdlength={}",
                    rr.name, rr.rtype, rr.class, rr.ttl, rr.rdata.len()
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_parses_with_and_without_trailing_dot() {
        let a: Name = "static.example.".parse().unwrap();
        let b: Name = "static.example".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.labels().len(), 2);
        assert_eq!(a.to_string(), "static.example.");
    }

    #[test]
    fn root_name_round_trips_through_text() {
        let root: Name = ".".parse().unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), ".");
        assert_eq!(root.to_wire().unwrap(), vec![0]);
    }

    #[test]
    fn empty_label_is_rejected() {
        assert!(matches!("a..b".parse::<Name>(), Err(WireError::EmptyLabel(_))));
    }

    #[test]
    fn oversized_label_is_rejected() {
        let long = "a".repeat(64);
        assert_eq!(long.parse::<Name>(), Err(WireError::LabelTooLong(64)));
    }

    #[test]
    fn oversized_name_fails_to_encode() {
        let label = vec![b'x'; 63];
        let name = Name::from_labels(vec![label; 4]);
        assert_eq!(name.to_wire(), Err(WireError::NameTooLong(257)));
    }

    #[test]
    fn canonical_key_folds_case() {
        let upper: Name = "WWW.Example.COM".parse().unwrap();
        let lower: Name = "www.example.com".parse().unwrap();
        assert_ne!(upper, lower);
        assert_eq!(upper.canonical_key(), lower.canonical_key());
        assert_eq!(lower.canonical_key(), lower.to_wire().unwrap());
    }

    #[test]
    fn escapes_survive_display_and_parse() {
        let name = Name::from_labels(vec![b"a.b".to_vec(), vec![0x01, b'c']]);
        let text = name.to_string();
        assert_eq!(text, "a\\.b.\\001c.");
        assert_eq!(text.parse::<Name>().unwrap(), name);
    }

    #[test]
    fn decimal_escape_must_fit_in_a_byte() {
        assert_eq!("a\\255b".parse::<Name>().unwrap().labels()[0], b"a\xffb".to_vec());
        assert_eq!(
            "a\\300b.example".parse::<Name>(),
            Err(WireError::BadEscape("a\\300b.example".to_string()))
        );
    }

    #[test]
    fn flags_round_trip_through_u16() {
        let raw: u16 = 0x8583;
        let flags = HeaderFlags::from(raw);
        assert!(flags.qr && flags.aa && flags.rd && flags.ra);
        assert!(!flags.tc && !flags.z);
        assert_eq!(flags.rcode, 3);
        assert_eq!(u16::from(flags), raw);
    }
}
