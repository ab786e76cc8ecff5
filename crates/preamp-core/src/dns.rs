//! Captive-portal DNS: answer every A/ANY query with the access point's address.
//!
//! Phones and laptops probe a well-known hostname right after joining a Wi-Fi
//! network.  Pointing every name at the bridge makes them open the setup page
//! automatically.  Anything that is not a plain A/ANY question in class IN is
//! ignored, so no response is sent for it.

use std::collections::HashSet;
use std::net::Ipv4Addr;

pub const DNS_PORT: u16 = 53;

/// TTL of the synthesized answer.
pub const ANSWER_TTL_SECS: u32 = 60;

pub const QTYPE_A: u16 = 1;
pub const QTYPE_ANY: u16 = 255;
pub const QCLASS_IN: u16 = 1;
/// Class IN with the mDNS "unicast response" bit set.
pub const QCLASS_IN_UNICAST: u16 = 0x8001;

const HEADER_LEN: usize = 12;

/// The first question of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
    /// Offset of the first byte after QTYPE/QCLASS.
    pub end: usize,
}

/// Decodes a possibly compressed domain name starting at `offset`.
///
/// Returns the dotted name and the offset just past the name in the original
/// position (after the first pointer, when one was followed).  Each pointer
/// target is visited at most once so a looping packet cannot hang the
/// responder.
pub fn decode_name(packet: &[u8], mut offset: usize) -> Option<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut resume_at = None;
    let mut visited = HashSet::new();

    loop {
        let len = *packet.get(offset)?;
        if len == 0 {
            offset += 1;
            break;
        }
        if len & 0xC0 == 0xC0 {
            let low = *packet.get(offset + 1)?;
            let target = (usize::from(len & 0x3F) << 8) | usize::from(low);
            if !visited.insert(target) {
                return None;
            }
            resume_at.get_or_insert(offset + 2);
            offset = target;
            continue;
        }
        let start = offset + 1;
        let label = packet.get(start..start + usize::from(len))?;
        labels.push(std::str::from_utf8(label).ok()?.to_string());
        offset = start + usize::from(len);
    }

    Some((labels.join("."), resume_at.unwrap_or(offset)))
}

/// Parses the first question of `packet`.
///
/// Returns `None` for short packets, `qdcount == 0`, an empty or malformed
/// name, or a truncated QTYPE/QCLASS.
pub fn parse_question(packet: &[u8]) -> Option<DnsQuestion> {
    if packet.len() < HEADER_LEN {
        return None;
    }
    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);
    if qdcount == 0 {
        return None;
    }

    let (name, name_end) = decode_name(packet, HEADER_LEN)?;
    if name.is_empty() {
        return None;
    }
    let tail = packet.get(name_end..name_end + 4)?;
    Some(DnsQuestion {
        name,
        qtype: u16::from_be_bytes([tail[0], tail[1]]),
        qclass: u16::from_be_bytes([tail[2], tail[3]]),
        end: name_end + 4,
    })
}

impl DnsQuestion {
    /// Returns `true` for A or ANY questions in class IN.
    pub fn is_supported(&self) -> bool {
        matches!(self.qtype, QTYPE_A | QTYPE_ANY)
            && matches!(self.qclass, QCLASS_IN | QCLASS_IN_UNICAST)
    }
}

/// Builds the captive answer for `query`, or `None` when it must be ignored.
///
/// The response copies the query ID and question section and carries one A
/// record pointing at `address`.
pub fn build_captive_response(query: &[u8], address: Ipv4Addr) -> Option<Vec<u8>> {
    let question = parse_question(query)?;
    if !question.is_supported() {
        return None;
    }

    let mut resp = Vec::with_capacity(question.end + 16);
    resp.extend_from_slice(&query[0..2]);
    // QR=1, opcode 0, RD=1, RA=1, RCODE=0
    resp.extend_from_slice(&[0x81, 0x80]);
    resp.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    resp.extend_from_slice(&1u16.to_be_bytes()); // ANCOUNT
    resp.extend_from_slice(&[0, 0, 0, 0]); // NSCOUNT, ARCOUNT
    resp.extend_from_slice(&query[HEADER_LEN..question.end]);

    resp.extend_from_slice(&[0xC0, 0x0C]); // name -> question at offset 12
    resp.extend_from_slice(&QTYPE_A.to_be_bytes());
    resp.extend_from_slice(&QCLASS_IN.to_be_bytes());
    resp.extend_from_slice(&ANSWER_TTL_SECS.to_be_bytes());
    resp.extend_from_slice(&4u16.to_be_bytes());
    resp.extend_from_slice(&address.octets());
    Some(resp)
}

/// Encodes a single-question query.  Used by tests and the integration suite.
pub fn encode_query(id: u16, name: &str, qtype: u16, qclass: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&[0x01, 0x00]); // RD
    packet.extend_from_slice(&1u16.to_be_bytes());
    packet.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    for label in name.split('.').filter(|l| !l.is_empty()) {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);
    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&qclass.to_be_bytes());
    packet
}
