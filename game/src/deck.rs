use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::model::CardId;

/// A shuffled copy of `cards`.
pub fn shuffled<R: Rng + ?Sized>(cards: &[CardId], rng: &mut R) -> Vec<CardId> {
    let mut deck = cards.to_vec();
    deck.shuffle(rng);
    deck
}

/// Move `count` cards from the top of `deck` into `hand`.
///
/// Whenever the deck runs dry it is replaced by a fresh shuffle of
/// `full_set`, so any number of cards can be dealt.
pub fn deal_cards<R: Rng + ?Sized>(
    deck: &mut Vec<CardId>,
    hand: &mut Vec<CardId>,
    count: usize,
    full_set: &[CardId],
    rng: &mut R,
) {
    let mut remaining = count;
    while remaining > 0 {
        if deck.is_empty() {
            if full_set.is_empty() {
                warn!("no cards to deal from");
                return;
            }
            debug!("reshuffling {} cards", full_set.len());
            *deck = shuffled(full_set, rng);
        }
        let take = remaining.min(deck.len());
        hand.extend(deck.drain(..take));
        remaining -= take;
    }
}

/// Draw the top card, reshuffling `full_set` first if the deck is empty.
pub fn draw<R: Rng + ?Sized>(
    deck: &mut Vec<CardId>,
    full_set: &[CardId],
    rng: &mut R,
) -> Option<CardId> {
    let mut drawn = Vec::with_capacity(1);
    deal_cards(deck, &mut drawn, 1, full_set, rng);
    drawn.pop()
}
