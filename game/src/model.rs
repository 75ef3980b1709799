use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::TryFrom;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};

pub use cardswarm_swarm::PeerId as ClientId;

/// Number of white cards a player holds between rounds.
pub const STARTING_HAND_SIZE: usize = 10;

/// Index of a card within its catalog deck.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct CardId(pub u32);

/// How many white cards a black card asks for.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Pick {
    One,
    Two,
}

impl Pick {
    pub fn count(self) -> usize {
        match self {
            Pick::One => 1,
            Pick::Two => 2,
        }
    }
}

impl TryFrom<u8> for Pick {
    type Error = CatalogError;

    fn try_from(pick: u8) -> Result<Self, Self::Error> {
        match pick {
            1 => Ok(Pick::One),
            2 => Ok(Pick::Two),
            pick => InvalidPickSnafu { pick }.fail(),
        }
    }
}

impl From<Pick> for u8 {
    fn from(pick: Pick) -> u8 {
        pick.count() as u8
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct WhiteCard {
    pub id: CardId,
    pub text: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BlackCard {
    pub id: CardId,
    pub text: String,
    pub pick: Pick,
}

#[derive(Debug, Snafu)]
pub enum CatalogError {
    #[snafu(display("could not read card catalog {}: {}", path.display(), source))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("malformed card catalog: {}", source))]
    Parse { source: serde_json::Error },

    #[snafu(display("black cards must pick 1 or 2, not {}", pick))]
    InvalidPick { pick: u8 },

    #[snafu(display("the {} deck is empty", deck))]
    EmptyDeck { deck: &'static str },

    #[snafu(display("{} card {} appears twice", deck, id))]
    DuplicateCard { deck: &'static str, id: u32 },
}

/// The lookup table of card text. Game logic only ever deals in ids.
#[derive(Debug, Clone)]
pub struct Catalog {
    white: Vec<WhiteCard>,
    black: Vec<BlackCard>,
    black_index: HashMap<CardId, usize>,
}

#[derive(Deserialize)]
struct CatalogFile {
    white: Vec<WhiteCard>,
    black: Vec<BlackCard>,
}

impl Catalog {
    pub fn new(white: Vec<WhiteCard>, black: Vec<BlackCard>) -> Result<Self, CatalogError> {
        ensure!(!white.is_empty(), EmptyDeckSnafu { deck: "white" });
        ensure!(!black.is_empty(), EmptyDeckSnafu { deck: "black" });
        let mut white_ids = HashSet::new();
        for card in &white {
            ensure!(
                white_ids.insert(card.id),
                DuplicateCardSnafu {
                    deck: "white",
                    id: card.id.0
                }
            );
        }
        let mut black_index = HashMap::new();
        for (index, card) in black.iter().enumerate() {
            ensure!(
                black_index.insert(card.id, index).is_none(),
                DuplicateCardSnafu {
                    deck: "black",
                    id: card.id.0
                }
            );
        }
        Ok(Catalog {
            white,
            black,
            black_index,
        })
    }

    /// Parse a catalog of the form `{"white": [{id, text}], "black": [{id,
    /// text, pick}]}`.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json).context(ParseSnafu)?;
        Self::new(file.white, file.black)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = fs::read_to_string(path).context(ReadSnafu { path })?;
        let catalog = Self::from_json(&json)?;
        info!(
            "loaded {} white and {} black cards from {}",
            catalog.white.len(),
            catalog.black.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// A stand-in deck of numbered cards: 460 white, 98 black, every ninth
    /// black card picking two.
    pub fn placeholder() -> Self {
        let white = (0..460)
            .map(|id| WhiteCard {
                id: CardId(id),
                text: format!("White card #{}", id),
            })
            .collect();
        let black = (0..98)
            .map(|id| {
                let pick = if (id + 1) % 9 == 0 { Pick::Two } else { Pick::One };
                BlackCard {
                    id: CardId(id),
                    text: format!("Black card #{} wants {} ______.", id, pick.count()),
                    pick,
                }
            })
            .collect();
        Catalog {
            white,
            black,
            black_index: (0..98).map(|id| (CardId(id), id as usize)).collect(),
        }
    }

    pub fn white(&self) -> &[WhiteCard] {
        &self.white
    }

    pub fn black(&self) -> &[BlackCard] {
        &self.black
    }

    pub fn white_ids(&self) -> Vec<CardId> {
        self.white.iter().map(|card| card.id).collect()
    }

    pub fn black_ids(&self) -> Vec<CardId> {
        self.black.iter().map(|card| card.id).collect()
    }

    pub fn black_card(&self, id: CardId) -> Option<&BlackCard> {
        self.black_index.get(&id).map(|&index| &self.black[index])
    }

    pub fn white_card(&self, id: CardId) -> Option<&WhiteCard> {
        self.white.iter().find(|card| card.id == id)
    }
}

/// A player's private state.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Player {
    pub hand: Vec<CardId>,
}

/// White cards played in a round, by player.
pub type Submissions = BTreeMap<ClientId, Vec<CardId>>;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ActiveRound {
    pub czar: ClientId,
    pub black_card: CardId,
    pub submissions: Submissions,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CompleteRound {
    pub czar: ClientId,
    pub black_card: CardId,
    pub submissions: Submissions,
    pub winner: ClientId,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Round {
    /// Nobody has volunteered as czar yet.
    Limbo,
    Active(ActiveRound),
    /// The czar picked a winner; the round is about to be settled.
    Complete(CompleteRound),
}

impl Default for Round {
    fn default() -> Self {
        Round::Limbo
    }
}

impl Round {
    pub fn czar(&self) -> Option<&ClientId> {
        match self {
            Round::Limbo => None,
            Round::Active(round) => Some(&round.czar),
            Round::Complete(round) => Some(&round.czar),
        }
    }

    pub fn black_card(&self) -> Option<CardId> {
        match self {
            Round::Limbo => None,
            Round::Active(round) => Some(round.black_card),
            Round::Complete(round) => Some(round.black_card),
        }
    }

    pub fn submissions(&self) -> Option<&Submissions> {
        match self {
            Round::Limbo => None,
            Round::Active(round) => Some(&round.submissions),
            Round::Complete(round) => Some(&round.submissions),
        }
    }

    pub fn winner(&self) -> Option<&ClientId> {
        match self {
            Round::Complete(round) => Some(&round.winner),
            _ => None,
        }
    }
}
