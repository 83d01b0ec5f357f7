//! Minimal DNS wire-format writer.
//!
//! Queries are emitted here and then parsed back into a
//! [`hickory_proto::op::Message`], so every message handled downstream went
//! through the same decoder as responses read off the network.

use crate::error::{CoreError, Result};

/// DNS class IN
pub const CLASS_IN: u16 = 1;
/// DNS class CH
pub const CLASS_CH: u16 = 3;
/// OPT pseudo record type
pub const TYPE_OPT: u16 = 41;
/// Advertised EDNS0 UDP payload size
pub const EDNS_PAYLOAD: u16 = 1232;

const FLAG_RD: u16 = 0x0100;
const FLAG_DO: u32 = 0x8000;

/// Encode a presentation-format name as uncompressed wire labels
pub fn encode_name(name: &str, out: &mut Vec<u8>) -> Result<()> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    let mut total = 1;
    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            let bytes = label.as_bytes();
            if bytes.is_empty() || bytes.len() > 63 {
                return Err(CoreError::Dns(format!("invalid label in name '{name}'")));
            }
            total += bytes.len() + 1;
            #[allow(clippy::cast_possible_truncation)]
            out.push(bytes.len() as u8);
            out.extend_from_slice(bytes);
        }
    }
    if total > 255 {
        return Err(CoreError::Dns(format!("name '{name}' exceeds 255 octets")));
    }
    out.push(0);
    Ok(())
}

/// Encode a `<character-string>`
pub fn encode_character_string(value: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let len = u8::try_from(value.len())
        .map_err(|_| CoreError::Invalid("character-string longer than 255 octets".into()))?;
    out.push(len);
    out.extend_from_slice(value);
    Ok(())
}

/// Append a resource record
pub fn encode_record(
    name: &str,
    rtype: u16,
    class: u16,
    ttl: u32,
    rdata: &[u8],
    out: &mut Vec<u8>,
) -> Result<()> {
    encode_name(name, out)?;
    out.extend_from_slice(&rtype.to_be_bytes());
    out.extend_from_slice(&class.to_be_bytes());
    out.extend_from_slice(&ttl.to_be_bytes());
    let len = u16::try_from(rdata.len())
        .map_err(|_| CoreError::Invalid("RDATA longer than 65535 octets".into()))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(rdata);
    Ok(())
}

/// Encode a recursive query with one question and an optional EDNS0 OPT
/// record carrying the DNSSEC-OK bit.
pub fn encode_query(id: u16, name: &str, qtype: u16, qclass: u16, dnssec_ok: bool) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&FLAG_RD.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&u16::from(dnssec_ok).to_be_bytes());
    encode_name(name, &mut out)?;
    out.extend_from_slice(&qtype.to_be_bytes());
    out.extend_from_slice(&qclass.to_be_bytes());
    if dnssec_ok {
        // OPT: class carries the payload size, TTL carries the flags
        encode_record(".", TYPE_OPT, EDNS_PAYLOAD, FLAG_DO, &[], &mut out)?;
    }
    Ok(out)
}

/// Split a `<character-string>` sequence into its strings
pub fn decode_character_strings(mut data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut strings = Vec::new();
    while let Some((&len, rest)) = data.split_first() {
        let len = usize::from(len);
        if rest.len() < len {
            return Err(CoreError::Dns("truncated character-string".into()));
        }
        strings.push(rest[..len].to_vec());
        data = &rest[len..];
    }
    Ok(strings)
}
