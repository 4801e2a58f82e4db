//! DNS wire format codec (RFC 1035 §4).
//!
//! Decoding follows compression pointers but never trusts them: every offset is bounds-checked,
//! and a name may follow at most [`MAX_POINTER_HOPS`] pointers. Encoding always writes names
//! uncompressed.
//!
//! Names embedded in the RDATA of a few well-known types (NS, CNAME, SOA, PTR, MX, SRV) are
//! expanded while decoding. Their compression pointers refer to offsets in the original packet,
//! which would be meaningless once the record is re-encoded or served from the cache.

use crate::error::WireError;
use crate::types::{
    DnsHeader, DnsMessage, DnsQuestion, HeaderFlags, Name, ResourceRecord, MAX_LABEL_LEN,
    MAX_NAME_LEN, TYPE_CNAME, TYPE_MX, TYPE_NS, TYPE_PTR, TYPE_SOA, TYPE_SRV,
};

pub const HEADER_LEN: usize = 12;

/// Upper bound on compression pointers followed while reading a single name.
pub const MAX_POINTER_HOPS: usize = 32;

const POINTER_MASK: u8 = 0xC0;

/// Decodes a complete message. Bytes after the last declared record are ignored.
pub fn decode(buf: &[u8]) -> Result<DnsMessage, WireError> {
    let mut reader = Reader::new(buf);

    let id = reader.read_u16()?;
    let flags = HeaderFlags::from(reader.read_u16()?);
    let header = DnsHeader {
        id,
        flags,
        question_count: reader.read_u16()?,
        answer_count: reader.read_u16()?,
        authority_count: reader.read_u16()?,
        additional_count: reader.read_u16()?,
    };

    // Each entry needs at least 5 bytes, so a lying count fails on truncation long before the
    // capacity hint could matter. The hint is still clamped to what the buffer could hold.
    let room = buf.len() / 5;
    let mut questions = Vec::with_capacity(usize::from(header.question_count).min(room));
    for _ in 0..header.question_count {
        let name = reader.read_name()?;
        let qtype = reader.read_u16()?;
        let qclass = reader.read_u16()?;
        questions.push(DnsQuestion { name, qtype, qclass });
    }

    let answers = reader.read_records(header.answer_count)?;
    let authority = reader.read_records(header.authority_count)?;
    let additional = reader.read_records(header.additional_count)?;

    Ok(DnsMessage { header, questions, answers, authority, additional })
}

/// Encodes a message. Header counts must agree with the section lengths.
pub fn encode(msg: &DnsMessage) -> Result<Vec<u8>, WireError> {
    let h = &msg.header;
    check_count("question", h.question_count, msg.questions.len())?;
    check_count("answer", h.answer_count, msg.answers.len())?;
    check_count("authority", h.authority_count, msg.authority.len())?;
    check_count("additional", h.additional_count, msg.additional.len())?;

    let mut out = Vec::with_capacity(512);
    out.extend_from_slice(&h.id.to_be_bytes());
    out.extend_from_slice(&u16::from(h.flags).to_be_bytes());
    out.extend_from_slice(&h.question_count.to_be_bytes());
    out.extend_from_slice(&h.answer_count.to_be_bytes());
    out.extend_from_slice(&h.authority_count.to_be_bytes());
    out.extend_from_slice(&h.additional_count.to_be_bytes());

    for q in &msg.questions {
        q.name.write_wire(&mut out)?;
        out.extend_from_slice(&q.qtype.to_be_bytes());
        out.extend_from_slice(&q.qclass.to_be_bytes());
    }
    for rr in msg.answers.iter().chain(&msg.authority).chain(&msg.additional) {
        write_record(rr, &mut out)?;
    }
    Ok(out)
}

fn check_count(section: &'static str, declared: u16, actual: usize) -> Result<(), WireError> {
    if usize::from(declared) != actual {
        return Err(WireError::CountMismatch { section, declared, actual });
    }
    Ok(())
}

fn write_record(rr: &ResourceRecord, out: &mut Vec<u8>) -> Result<(), WireError> {
    let rdlength = u16::try_from(rr.rdata.len()).map_err(|_| WireError::RdataTooLong(rr.rdata.len()))?;
    rr.name.write_wire(out)?;
    out.extend_from_slice(&rr.rtype.to_be_bytes());
    out.extend_from_slice(&rr.class.to_be_bytes());
    out.extend_from_slice(&rr.ttl.to_be_bytes());
    out.extend_from_slice(&rdlength.to_be_bytes());
    out.extend_from_slice(&rr.rdata);
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(WireError::Truncated { offset: self.pos })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_name(&mut self) -> Result<Name, WireError> {
        let (name, next) = read_name_at(self.buf, self.pos)?;
        self.pos = next;
        Ok(name)
    }

    fn read_records(&mut self, count: u16) -> Result<Vec<ResourceRecord>, WireError> {
        let mut records = Vec::with_capacity(usize::from(count).min(self.buf.len() / 11));
        for _ in 0..count {
            let name = self.read_name()?;
            let rtype = self.read_u16()?;
            let class = self.read_u16()?;
            let ttl = self.read_u32()?;
            let declared = usize::from(self.read_u16()?);
            let start = self.pos;
            if start + declared > self.buf.len() {
                return Err(WireError::RdataOverrun { offset: start, declared });
            }
            self.pos += declared;
            let rdata = expand_rdata(self.buf, rtype, start, declared)?;
            records.push(ResourceRecord { name, rtype, class, ttl, rdata });
        }
        Ok(records)
    }
}

/// Reads the name starting at `start` and returns it with the offset at which parsing of the
/// enclosing message continues. That offset is just past the terminating zero, or just past the
/// first compression pointer if the name used one; later pointers do not move it.
fn read_name_at(buf: &[u8], start: usize) -> Result<(Name, usize), WireError> {
    let mut labels = Vec::new();
    let mut pos = start;
    let mut resume = None;
    let mut hops = 0;
    let mut wire_len = 1;

    loop {
        let len = *buf.get(pos).ok_or(WireError::Truncated { offset: pos })?;
        match len & POINTER_MASK {
            0x00 if len == 0 => {
                let next = resume.unwrap_or(pos + 1);
                return Ok((Name::from_labels(labels), next));
            }
            0x00 => {
                let len = usize::from(len);
                let label = buf
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(WireError::Truncated { offset: pos + 1 })?;
                wire_len += len + 1;
                if wire_len > MAX_NAME_LEN {
                    return Err(WireError::NameTooLong(wire_len));
                }
                labels.push(label.to_vec());
                pos += len + 1;
            }
            POINTER_MASK => {
                let low = *buf.get(pos + 1).ok_or(WireError::Truncated { offset: pos + 1 })?;
                let target = (usize::from(len & !POINTER_MASK) << 8) | usize::from(low);
                if target >= buf.len() {
                    return Err(WireError::PointerOutOfRange { offset: pos, target });
                }
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(WireError::PointerLoop { offset: pos, limit: MAX_POINTER_HOPS });
                }
                resume.get_or_insert(pos + 2);
                pos = target;
            }
            _ => return Err(WireError::UnsupportedLabelType(len)),
        }
    }
}

/// Copies RDATA out of the packet, rewriting embedded names in uncompressed form for the types
/// that carry them. The expanded data must still end exactly at the declared length.
fn expand_rdata(buf: &[u8], rtype: u16, start: usize, len: usize) -> Result<Vec<u8>, WireError> {
    let end = start + len;
    // (bytes of fixed data before the names, number of names, fixed bytes after the names)
    let layout = match rtype {
        TYPE_NS | TYPE_CNAME | TYPE_PTR => (0, 1, 0),
        TYPE_MX => (2, 1, 0),
        TYPE_SRV => (6, 1, 0),
        TYPE_SOA => (0, 2, 20),
        _ => return Ok(buf[start..end].to_vec()),
    };
    let (prefix, names, suffix) = layout;

    // Only the record's own bytes are in play; anything beyond `end` is a different record.
    let record_view = &buf[..end];
    if prefix > len {
        return Err(WireError::RdataOverrun { offset: start, declared: len });
    }
    let mut out = buf[start..start + prefix].to_vec();
    let mut pos = start + prefix;
    for _ in 0..names {
        let (name, next) = read_name_at(record_view, pos)?;
        name.write_wire(&mut out)?;
        pos = next;
    }
    if pos + suffix != end {
        return Err(WireError::RdataOverrun { offset: start, declared: len });
    }
    out.extend_from_slice(&buf[pos..end]);
    Ok(out)
}
