use log::debug;

use crate::model::{CardId, ClientId, CompleteRound, Player, Round, Submissions};
use crate::protocol::{ClientMessage, ServerMessage};

/// A client's picture of the game, built from what the leader broadcasts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundView {
    /// `None` until the leader has said anything.
    pub round: Option<Round>,
    pub player: Player,
    /// Every completed round seen, oldest first.
    pub history: Vec<CompleteRound>,
}

impl RoundView {
    pub fn new() -> Self {
        Default::default()
    }

    /// Fold in a message from the leader. Returns the round just completed,
    /// if this message completed one.
    pub fn apply(&mut self, message: ServerMessage) -> Option<&CompleteRound> {
        match message {
            ServerMessage::Player(player) => {
                self.player = player;
                None
            }
            ServerMessage::Round(round) => {
                let completed = match &round {
                    Round::Complete(complete) => Some(complete.clone()),
                    _ => None,
                };
                self.round = Some(round);
                let complete = completed?;
                debug!("round won by {}", complete.winner.short());
                self.history.push(complete);
                self.history.last()
            }
        }
    }

    /// Forget everything, e.g. because a different leader took over.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn czar(&self) -> Option<&ClientId> {
        self.round.as_ref().and_then(Round::czar)
    }

    pub fn black_card(&self) -> Option<CardId> {
        self.round.as_ref().and_then(Round::black_card)
    }

    pub fn submissions(&self) -> Option<&Submissions> {
        self.round.as_ref().and_then(Round::submissions)
    }

    pub fn is_czar(&self, me: &ClientId) -> bool {
        self.czar() == Some(me)
    }

    /// Whether `me` has already played this round.
    pub fn has_submitted(&self, me: &ClientId) -> bool {
        self.submissions()
            .map_or(false, |submissions| submissions.contains_key(me))
    }
}

// The things a player can ask of the leader.

pub fn request_cards(number: i64) -> ClientMessage {
    ClientMessage::ReqCard { number }
}

pub fn request_czar() -> ClientMessage {
    ClientMessage::ReqCzar
}

pub fn submit_cards(cards: Vec<CardId>) -> ClientMessage {
    ClientMessage::PlayCard { cards }
}

pub fn select_winner(winner: ClientId) -> ClientMessage {
    ClientMessage::SelectWinner { winner }
}
