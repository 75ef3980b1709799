//! Application messages carried over the extension channel.
use snafu::{ResultExt, Snafu};

use crate::bencode::{self, DecodeError, Value};
use crate::handshake::NULL_SENTINEL;
use crate::peer::{PeerId, PeerMetadata};
use crate::schema::{Fields, Payload, SchemaError, UnknownTagSnafu};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Liveness probe; carries nothing and expects nothing back.
    Ping,
    Metadata(MetadataUpdate),
    /// Free-form chat text.
    Message(String),
    /// An opaque payload for the layer above, e.g. game traffic.
    Data(Value),
}

/// A partial `PeerMetadata`. Absent fields are left unchanged by `apply`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub id: Option<PeerId>,
    pub username: Option<String>,
    /// `Some(None)` clears the leader, `None` leaves it alone.
    pub leader: Option<Option<PeerId>>,
}

impl MetadataUpdate {
    pub fn leader(leader: Option<PeerId>) -> Self {
        MetadataUpdate {
            leader: Some(leader),
            ..Default::default()
        }
    }

    /// Produce the replacement metadata. The id is part of a peer's identity
    /// and is never taken from an update.
    pub fn apply(&self, metadata: &PeerMetadata) -> PeerMetadata {
        let mut next = metadata.clone();
        if let Some(username) = &self.username {
            next.username = username.clone();
        }
        if let Some(leader) = &self.leader {
            next.leader = leader.clone();
        }
        next
    }

    fn to_value(&self) -> Value {
        let mut entries = Vec::new();
        if let Some(id) = &self.id {
            entries.push(("id", Value::from(id.as_str())));
        }
        if let Some(username) = &self.username {
            entries.push(("username", Value::from(username.as_str())));
        }
        if let Some(leader) = &self.leader {
            entries.push(("leader", encode_leader(leader.as_ref())));
        }
        Value::dict(entries)
    }

    fn from_fields(fields: Fields<'_>) -> Result<Self, SchemaError> {
        Ok(MetadataUpdate {
            id: fields.opt_text("id")?.map(PeerId::from),
            username: fields.opt_text("username")?.map(str::to_owned),
            leader: fields.opt_text("leader")?.map(decode_leader),
        })
    }
}

// The sentinel is a single NUL byte, which is also valid UTF-8.
const NULL_TEXT: &str = "\u{0}";

fn encode_leader(leader: Option<&PeerId>) -> Value {
    match leader {
        Some(id) => Value::from(id.as_str()),
        None => Value::from(NULL_TEXT),
    }
}

fn decode_leader(text: &str) -> Option<PeerId> {
    if text.as_bytes() == NULL_SENTINEL {
        None
    } else {
        Some(PeerId::from(text))
    }
}

#[derive(Debug, Snafu)]
pub enum EnvelopeError {
    #[snafu(display("undecodable message: {}", source))]
    Decode { source: DecodeError },

    #[snafu(display("invalid message: {}", source))]
    Schema { source: SchemaError },
}

impl Envelope {
    pub fn data<P: Payload>(payload: &P) -> Self {
        Envelope::Data(payload.to_value())
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_value().encode()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value = bencode::decode_text(bytes).context(DecodeSnafu)?;
        Envelope::from_value(&value).context(SchemaSnafu)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Ping => "ping",
            Envelope::Metadata(_) => "metadata",
            Envelope::Message(_) => "message",
            Envelope::Data(_) => "data",
        }
    }
}

impl Payload for Envelope {
    fn to_value(&self) -> Value {
        let tag = ("type", Value::from(self.kind()));
        match self {
            Envelope::Ping => Value::dict(vec![tag]),
            Envelope::Metadata(update) => Value::dict(vec![tag, ("metadata", update.to_value())]),
            Envelope::Message(text) => {
                Value::dict(vec![tag, ("message", Value::from(text.as_str()))])
            }
            Envelope::Data(data) => Value::dict(vec![tag, ("data", data.clone())]),
        }
    }

    fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let fields = Fields::of(value)?;
        match fields.tag()? {
            "ping" => Ok(Envelope::Ping),
            "metadata" => Ok(Envelope::Metadata(MetadataUpdate::from_fields(
                fields.dict("metadata")?,
            )?)),
            "message" => Ok(Envelope::Message(fields.text("message")?.to_owned())),
            "data" => Ok(Envelope::Data(fields.get("data")?.clone())),
            tag => UnknownTagSnafu { tag }.fail(),
        }
    }
}
