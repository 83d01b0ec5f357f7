//! JSON representation of DNS messages.
//!
//! Messages are written as a structured object (question, answer, authority,
//! additional) for readers of the stored envelopes, together with the base64
//! wire form. Decoding only trusts the wire form, so every wire-observable
//! field (SVCB parameters, raw RDATA, header flags) survives a round-trip.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hickory_proto::op::Message;
use hickory_proto::rr::Record;
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Serialize, Deserialize)]
struct MessageRepr {
    #[serde(default)]
    id: u16,
    #[serde(default)]
    response_code: String,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    question: Vec<QuestionRepr>,
    #[serde(default)]
    answer: Vec<RecordRepr>,
    #[serde(default)]
    authority: Vec<RecordRepr>,
    #[serde(default)]
    additional: Vec<RecordRepr>,
    wire: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct QuestionRepr {
    name: String,
    qtype: String,
    qclass: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordRepr {
    name: String,
    rtype: String,
    ttl: u32,
    data: String,
}

impl From<&Record> for RecordRepr {
    fn from(record: &Record) -> Self {
        Self {
            name: record.name().to_string(),
            rtype: record.record_type().to_string(),
            ttl: record.ttl(),
            data: record.data().to_string(),
        }
    }
}

fn to_repr(message: &Message) -> Result<MessageRepr, hickory_proto::ProtoError> {
    let wire = message.to_vec()?;
    Ok(MessageRepr {
        id: message.id(),
        response_code: message.response_code().to_string(),
        truncated: message.truncated(),
        question: message
            .queries()
            .iter()
            .map(|q| QuestionRepr {
                name: q.name().to_string(),
                qtype: q.query_type().to_string(),
                qclass: q.query_class().to_string(),
            })
            .collect(),
        answer: message.answers().iter().map(RecordRepr::from).collect(),
        authority: message.name_servers().iter().map(RecordRepr::from).collect(),
        additional: message.additionals().iter().map(RecordRepr::from).collect(),
        wire: STANDARD.encode(wire),
    })
}

fn from_repr(repr: &MessageRepr) -> Result<Message, String> {
    let wire = STANDARD
        .decode(repr.wire.as_bytes())
        .map_err(|e| format!("invalid wire encoding: {e}"))?;
    Message::from_vec(&wire).map_err(|e| format!("invalid DNS message: {e}"))
}

/// Serialize a DNS message
pub fn serialize<S: Serializer>(message: &Message, serializer: S) -> Result<S::Ok, S::Error> {
    to_repr(message)
        .map_err(S::Error::custom)?
        .serialize(serializer)
}

/// Deserialize a DNS message
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Message, D::Error> {
    let repr = MessageRepr::deserialize(deserializer)?;
    from_repr(&repr).map_err(D::Error::custom)
}

/// Same codec for optional messages
pub mod option {
    use super::{from_repr, to_repr, MessageRepr};
    use hickory_proto::op::Message;
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize an optional DNS message
    pub fn serialize<S: Serializer>(
        message: &Option<Message>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match message {
            Some(message) => Some(to_repr(message).map_err(S::Error::custom)?),
            None => None,
        }
        .serialize(serializer)
    }

    /// Deserialize an optional DNS message
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Message>, D::Error> {
        Option::<MessageRepr>::deserialize(deserializer)?
            .map(|repr| from_repr(&repr).map_err(D::Error::custom))
            .transpose()
    }
}
