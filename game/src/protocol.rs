//! Messages exchanged between game clients and the game server.
//!
//! Both travel as the payload of `data` envelopes, as dictionaries tagged by
//! a `type` field. The wire encoding has no null, so optional round fields
//! are simply left out.
use std::convert::{From, TryFrom};

use cardswarm_swarm::bencode::Value;
use cardswarm_swarm::schema::{
    Fields, OutOfRangeSnafu, Payload, SchemaError, UnknownTagSnafu, WrongTypeSnafu,
};
use snafu::OptionExt;

use crate::model::{
    ActiveRound, CardId, ClientId, CompleteRound, Player, Round, Submissions,
};

/// Requests a client may send to the game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Draw `number` white cards; the server clamps it to a sane range.
    ReqCard { number: i64 },
    /// Volunteer as czar for the next round.
    ReqCzar,
    /// Submit white cards for the current round.
    PlayCard { cards: Vec<CardId> },
    /// As czar, pick the round's winner.
    SelectWinner { winner: ClientId },
}

/// Updates the game server sends to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// The current round; sent to everyone.
    Round(Round),
    /// The recipient's own hand; sent only to that player.
    Player(Player),
}

// Auxillary macro for wrapping message contents into their message type.

macro_rules! derive_from {
    ($to:ident, $ty:ident, $r:ident) => {
        impl From<$r> for $to {
            fn from(r: $r) -> Self {
                $to::$ty(r)
            }
        }
    };
}

derive_from!(ServerMessage, Round, Round);
derive_from!(ServerMessage, Player, Player);

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::ReqCard { .. } => "req-card",
            ClientMessage::ReqCzar => "req-czar",
            ClientMessage::PlayCard { .. } => "play-card",
            ClientMessage::SelectWinner { .. } => "select-winner",
        }
    }
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Round(_) => "round",
            ServerMessage::Player(_) => "player",
        }
    }
}

fn card_list(cards: &[CardId]) -> Value {
    Value::List(cards.iter().map(|card| Value::from(i64::from(card.0))).collect())
}

fn parse_card_list(field: &str, values: &[Value]) -> Result<Vec<CardId>, SchemaError> {
    values
        .iter()
        .map(|value| {
            let n = value.as_integer().context(WrongTypeSnafu {
                field,
                expected: "a list of card ids",
            })?;
            u32::try_from(n)
                .map(CardId)
                .ok()
                .context(OutOfRangeSnafu { field })
        })
        .collect()
}

impl Payload for ClientMessage {
    fn to_value(&self) -> Value {
        let tag = ("type", Value::from(self.kind()));
        match self {
            ClientMessage::ReqCard { number } => {
                Value::dict(vec![tag, ("number", Value::from(*number))])
            }
            ClientMessage::ReqCzar => Value::dict(vec![tag]),
            ClientMessage::PlayCard { cards } => Value::dict(vec![tag, ("cards", card_list(cards))]),
            ClientMessage::SelectWinner { winner } => {
                Value::dict(vec![tag, ("winner", Value::from(winner.as_str()))])
            }
        }
    }

    fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let fields = Fields::of(value)?;
        match fields.tag()? {
            "req-card" => Ok(ClientMessage::ReqCard {
                number: fields.integer("number")?,
            }),
            "req-czar" => Ok(ClientMessage::ReqCzar),
            "play-card" => Ok(ClientMessage::PlayCard {
                cards: parse_card_list("cards", fields.list("cards")?)?,
            }),
            "select-winner" => Ok(ClientMessage::SelectWinner {
                winner: ClientId::from(fields.text("winner")?),
            }),
            tag => UnknownTagSnafu { tag }.fail(),
        }
    }
}

fn submissions_value(submissions: &Submissions) -> Value {
    Value::dict(
        submissions
            .iter()
            .map(|(client, cards)| (client.as_str(), card_list(cards))),
    )
}

fn parse_submissions(fields: Option<Fields<'_>>) -> Result<Submissions, SchemaError> {
    let fields = match fields {
        Some(fields) => fields,
        None => return Ok(Submissions::new()),
    };
    fields
        .entries()
        .iter()
        .map(|(client, cards)| {
            let cards = cards.as_list().context(WrongTypeSnafu {
                field: "submissions",
                expected: "lists of card ids",
            })?;
            Ok((
                ClientId::from(client.as_str()),
                parse_card_list("submissions", cards)?,
            ))
        })
        .collect()
}

fn round_value(round: &Round) -> Vec<(&'static str, Value)> {
    let mut entries = Vec::new();
    if let Some(czar) = round.czar() {
        entries.push(("czar", Value::from(czar.as_str())));
    }
    if let Some(black_card) = round.black_card() {
        entries.push(("blackCard", Value::from(i64::from(black_card.0))));
    }
    if let Some(submissions) = round.submissions() {
        entries.push(("submissions", submissions_value(submissions)));
    }
    if let Some(winner) = round.winner() {
        entries.push(("winner", Value::from(winner.as_str())));
    }
    entries
}

fn parse_round(fields: Fields<'_>) -> Result<Round, SchemaError> {
    let czar = match fields.opt_text("czar")? {
        Some(czar) => ClientId::from(czar),
        None => return Ok(Round::Limbo),
    };
    let black_card = u32::try_from(fields.integer("blackCard")?)
        .map(CardId)
        .ok()
        .context(OutOfRangeSnafu { field: "blackCard" })?;
    let submissions = match fields.opt("submissions") {
        Some(_) => parse_submissions(Some(fields.dict("submissions")?))?,
        None => parse_submissions(None)?,
    };
    Ok(match fields.opt_text("winner")? {
        Some(winner) => Round::Complete(CompleteRound {
            czar,
            black_card,
            submissions,
            winner: ClientId::from(winner),
        }),
        None => Round::Active(ActiveRound {
            czar,
            black_card,
            submissions,
        }),
    })
}

impl Payload for ServerMessage {
    fn to_value(&self) -> Value {
        let tag = ("type", Value::from(self.kind()));
        match self {
            ServerMessage::Round(round) => {
                let mut entries = round_value(round);
                entries.push(tag);
                Value::dict(entries)
            }
            ServerMessage::Player(player) => {
                Value::dict(vec![tag, ("hand", card_list(&player.hand))])
            }
        }
    }

    fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let fields = Fields::of(value)?;
        match fields.tag()? {
            "round" => Ok(ServerMessage::Round(parse_round(fields)?)),
            "player" => Ok(ServerMessage::Player(Player {
                hand: parse_card_list("hand", fields.list("hand")?)?,
            })),
            tag => UnknownTagSnafu { tag }.fail(),
        }
    }
}
