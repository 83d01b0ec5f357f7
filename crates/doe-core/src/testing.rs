//! Wire-format fixtures for tests.
//!
//! Responses are assembled byte by byte and decoded through
//! [`Message::from_vec`], so fixtures exercise the same decoder as live
//! traffic.

#![allow(clippy::missing_panics_doc)]

use crate::svcb::{KEY_ALPN, KEY_DOHPATH, KEY_IPV4HINT, KEY_IPV6HINT, KEY_PORT};
use crate::types::ddr_dnssec::TYPE_RRSIG;
use crate::types::resinfo::TYPE_RESINFO;
use crate::wire;
use hickory_proto::op::Message;
use hickory_proto::rr::RecordType;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Type and RDATA of a fixture record
#[derive(Debug, Clone)]
pub struct RecordData {
    /// Record type
    pub rtype: u16,
    /// Raw RDATA
    pub rdata: Vec<u8>,
}

/// A single SvcParam
#[derive(Debug, Clone)]
pub struct SvcParam {
    key: u16,
    value: Vec<u8>,
}

impl SvcParam {
    /// `alpn` parameter
    #[must_use]
    pub fn alpn(ids: &[&str]) -> Self {
        let mut value = Vec::new();
        for id in ids {
            wire::encode_character_string(id.as_bytes(), &mut value).expect("alpn id");
        }
        Self { key: KEY_ALPN, value }
    }

    /// `port` parameter
    #[must_use]
    pub fn port(port: u16) -> Self {
        Self {
            key: KEY_PORT,
            value: port.to_be_bytes().to_vec(),
        }
    }

    /// `ipv4hint` parameter
    #[must_use]
    pub fn ipv4hint(addrs: &[Ipv4Addr]) -> Self {
        Self {
            key: KEY_IPV4HINT,
            value: addrs.iter().flat_map(|a| a.octets()).collect(),
        }
    }

    /// `ipv6hint` parameter
    #[must_use]
    pub fn ipv6hint(addrs: &[Ipv6Addr]) -> Self {
        Self {
            key: KEY_IPV6HINT,
            value: addrs.iter().flat_map(|a| a.octets()).collect(),
        }
    }

    /// `dohpath` parameter
    #[must_use]
    pub fn dohpath(template: &str) -> Self {
        Self {
            key: KEY_DOHPATH,
            value: template.as_bytes().to_vec(),
        }
    }

    /// Arbitrary key and value
    #[must_use]
    pub const fn raw(key: u16, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}

/// SVCB RDATA; `params` must be in ascending key order
#[must_use]
pub fn svcb_rdata(priority: u16, target: &str, params: &[SvcParam]) -> RecordData {
    let mut rdata = priority.to_be_bytes().to_vec();
    wire::encode_name(target, &mut rdata).expect("svcb target");
    for param in params {
        rdata.extend_from_slice(&param.key.to_be_bytes());
        let len = u16::try_from(param.value.len()).expect("svc param length");
        rdata.extend_from_slice(&len.to_be_bytes());
        rdata.extend_from_slice(&param.value);
    }
    RecordData {
        rtype: u16::from(RecordType::SVCB),
        rdata,
    }
}

/// A RDATA
#[must_use]
pub fn a_rdata(addr: Ipv4Addr) -> RecordData {
    RecordData {
        rtype: u16::from(RecordType::A),
        rdata: addr.octets().to_vec(),
    }
}

/// AAAA RDATA
#[must_use]
pub fn aaaa_rdata(addr: Ipv6Addr) -> RecordData {
    RecordData {
        rtype: u16::from(RecordType::AAAA),
        rdata: addr.octets().to_vec(),
    }
}

/// TXT RDATA
#[must_use]
pub fn txt_rdata(strings: &[&str]) -> RecordData {
    RecordData {
        rtype: u16::from(RecordType::TXT),
        rdata: character_strings(strings),
    }
}

/// RESINFO RDATA (same layout as TXT)
#[must_use]
pub fn resinfo_rdata(keys: &[&str]) -> RecordData {
    RecordData {
        rtype: TYPE_RESINFO,
        rdata: character_strings(keys),
    }
}

/// PTR RDATA
#[must_use]
pub fn ptr_rdata(name: &str) -> RecordData {
    let mut rdata = Vec::new();
    wire::encode_name(name, &mut rdata).expect("ptr name");
    RecordData {
        rtype: u16::from(RecordType::PTR),
        rdata,
    }
}

/// Syntactically valid RRSIG covering `covered`
#[must_use]
pub fn rrsig_rdata(covered: RecordType, signer: &str) -> RecordData {
    let mut rdata = Vec::new();
    rdata.extend_from_slice(&u16::from(covered).to_be_bytes());
    rdata.push(13); // ECDSAP256SHA256
    rdata.push(3);
    rdata.extend_from_slice(&300u32.to_be_bytes());
    rdata.extend_from_slice(&2_000_000_000u32.to_be_bytes());
    rdata.extend_from_slice(&1_700_000_000u32.to_be_bytes());
    rdata.extend_from_slice(&12345u16.to_be_bytes());
    wire::encode_name(signer, &mut rdata).expect("signer name");
    rdata.extend_from_slice(&[0xAB; 64]);
    RecordData {
        rtype: TYPE_RRSIG,
        rdata,
    }
}

fn character_strings(strings: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for s in strings {
        wire::encode_character_string(s.as_bytes(), &mut out).expect("character-string");
    }
    out
}

/// Builder for response messages
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    id: u16,
    name: String,
    qtype: u16,
    qclass: u16,
    rcode: u8,
    truncated: bool,
    authentic_data: bool,
    answers: Vec<(String, u32, RecordData)>,
    authority: Vec<(String, u32, RecordData)>,
    additionals: Vec<(String, u32, RecordData)>,
}

impl ResponseBuilder {
    /// Response to a class IN question
    #[must_use]
    pub fn new(name: &str, qtype: RecordType) -> Self {
        Self::with_type(name, u16::from(qtype))
    }

    /// Response to a question with a numeric type
    #[must_use]
    pub fn with_type(name: &str, qtype: u16) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            qtype,
            qclass: wire::CLASS_IN,
            rcode: 0,
            truncated: false,
            authentic_data: false,
            answers: Vec::new(),
            authority: Vec::new(),
            additionals: Vec::new(),
        }
    }

    /// Message ID
    #[must_use]
    pub const fn id(mut self, id: u16) -> Self {
        self.id = id;
        self
    }

    /// Question class
    #[must_use]
    pub const fn class(mut self, class: u16) -> Self {
        self.qclass = class;
        self
    }

    /// Response code (low four bits)
    #[must_use]
    pub const fn rcode(mut self, rcode: u8) -> Self {
        self.rcode = rcode;
        self
    }

    /// Set the TC bit
    #[must_use]
    pub const fn truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    /// Set the AD bit
    #[must_use]
    pub const fn authentic_data(mut self, ad: bool) -> Self {
        self.authentic_data = ad;
        self
    }

    /// Add an answer record
    #[must_use]
    pub fn answer(mut self, name: &str, ttl: u32, data: RecordData) -> Self {
        self.answers.push((name.to_string(), ttl, data));
        self
    }

    /// Add an authority record
    #[must_use]
    pub fn authority(mut self, name: &str, ttl: u32, data: RecordData) -> Self {
        self.authority.push((name.to_string(), ttl, data));
        self
    }

    /// Add an additional (glue) record
    #[must_use]
    pub fn additional(mut self, name: &str, ttl: u32, data: RecordData) -> Self {
        self.additionals.push((name.to_string(), ttl, data));
        self
    }

    /// Wire bytes of the response
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        let mut flags: u16 = 0x8000 | 0x0100 | 0x0080 | u16::from(self.rcode & 0x0F);
        if self.truncated {
            flags |= 0x0200;
        }
        if self.authentic_data {
            flags |= 0x0020;
        }
        let count = |n: usize| u16::try_from(n).expect("section size");
        let mut out = Vec::new();
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&count(self.answers.len()).to_be_bytes());
        out.extend_from_slice(&count(self.authority.len()).to_be_bytes());
        out.extend_from_slice(&count(self.additionals.len()).to_be_bytes());
        wire::encode_name(&self.name, &mut out).expect("question name");
        out.extend_from_slice(&self.qtype.to_be_bytes());
        out.extend_from_slice(&self.qclass.to_be_bytes());
        for (name, ttl, data) in self
            .answers
            .iter()
            .chain(&self.authority)
            .chain(&self.additionals)
        {
            wire::encode_record(name, data.rtype, wire::CLASS_IN, *ttl, &data.rdata, &mut out)
                .expect("record");
        }
        out
    }

    /// Decoded response
    #[must_use]
    pub fn build(&self) -> Message {
        Message::from_vec(&self.to_wire()).expect("fixture must decode")
    }
}
