//! The authoritative game state machine, run only by the leader.
//!
//! All rules live in [`reduce`], a pure function from a state and an action to
//! the next state plus the effects to run afterwards. [`GameServer`] drives
//! it: it dispatches messages according to the sender's role, diffs states to
//! decide what to broadcast, and flushes queued effects once per pass.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::deck;
use crate::model::{
    ActiveRound, Catalog, CardId, ClientId, CompleteRound, Player, Round, STARTING_HAND_SIZE,
};
use crate::protocol::{ClientMessage, ServerMessage};

/// Everything the leader knows about the game.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameState {
    pub round: Round,
    pub players: BTreeMap<ClientId, Player>,
    pub white_deck: Vec<CardId>,
    pub black_deck: Vec<CardId>,
    /// Clients currently taking part.
    pub peers: BTreeSet<ClientId>,
    /// Notifications waiting for the next flush.
    pub side_effects: Vec<Effect>,
}

impl GameState {
    /// A fresh game with both decks shuffled.
    pub fn new<R: Rng + ?Sized>(catalog: &Catalog, rng: &mut R) -> Self {
        GameState {
            white_deck: deck::shuffled(&catalog.white_ids(), rng),
            black_deck: deck::shuffled(&catalog.black_ids(), rng),
            ..Default::default()
        }
    }
}

/// Something that happened to the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    PeerSetChanged { peers: BTreeSet<ClientId> },
    ReqCard { from: ClientId, number: i64 },
    ReqCzar { from: ClientId },
    PlayCard { from: ClientId, cards: Vec<CardId> },
    SelectWinner { from: ClientId, winner: ClientId },
    SettleCompletedRound,
}

/// A deferred, targeted notification. Resolved against the state at flush
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ShareRound { to: ClientId },
    SharePlayer { to: ClientId },
}

/// A message for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: ClientId,
    pub message: ServerMessage,
}

/// Apply one action.
pub fn reduce<R: Rng + ?Sized>(
    mut state: GameState,
    action: Action,
    catalog: &Catalog,
    rng: &mut R,
) -> (GameState, Vec<Effect>) {
    let mut effects = Vec::new();
    match action {
        Action::PeerSetChanged { peers } => {
            for added in peers.difference(&state.peers) {
                if state.players.contains_key(added) {
                    // A returning player gets their hand back.
                    effects.push(Effect::SharePlayer { to: added.clone() });
                } else {
                    let mut player = Player::default();
                    deal(&mut state.white_deck, &mut player, STARTING_HAND_SIZE, catalog, rng);
                    state.players.insert(added.clone(), player);
                }
                effects.push(Effect::ShareRound { to: added.clone() });
            }
            let czar_gone = state
                .round
                .czar()
                .map_or(false, |czar| !peers.contains(czar));
            if czar_gone {
                info!("czar left; abandoning the round");
                state.round = Round::Limbo;
            }
            if let Round::Active(round) = &mut state.round {
                let departed: Vec<_> = round
                    .submissions
                    .keys()
                    .filter(|client| !peers.contains(*client))
                    .cloned()
                    .collect();
                for client in departed {
                    if let Some(cards) = round.submissions.remove(&client) {
                        state
                            .players
                            .entry(client)
                            .or_default()
                            .hand
                            .extend(cards);
                    }
                }
            }
            state.peers = peers;
        }

        Action::ReqCard { from, number } => {
            let count = number.max(0).min(STARTING_HAND_SIZE as i64) as usize;
            let player = state.players.entry(from).or_default();
            deal(&mut state.white_deck, player, count, catalog, rng);
        }

        Action::ReqCzar { from } => {
            if state.round.czar().is_none() {
                match deck::draw(&mut state.black_deck, &catalog.black_ids(), rng) {
                    Some(black_card) => {
                        info!("{} is czar", from.short());
                        state.round = Round::Active(ActiveRound {
                            czar: from,
                            black_card,
                            submissions: Default::default(),
                        });
                    }
                    None => warn!("no black cards to start a round with"),
                }
            } else {
                // Someone got there first; the requester is out of date.
                effects.push(Effect::ShareRound { to: from });
            }
        }

        Action::PlayCard { from, cards } => {
            let accepted = match &mut state.round {
                Round::Active(round) => {
                    let pick = catalog.black_card(round.black_card).map(|card| card.pick.count());
                    let player = state.players.entry(from.clone()).or_default();
                    let valid = round.czar != from
                        && !round.submissions.contains_key(&from)
                        && pick == Some(cards.len());
                    match remove_from_hand(&player.hand, &cards) {
                        Some(hand) if valid => {
                            player.hand = hand;
                            round.submissions.insert(from.clone(), cards);
                            true
                        }
                        _ => false,
                    }
                }
                _ => false,
            };
            if !accepted {
                debug!("rejected cards from {}", from.short());
                effects.push(Effect::ShareRound { to: from.clone() });
                effects.push(Effect::SharePlayer { to: from });
            }
        }

        Action::SelectWinner { from, winner } => {
            let round = std::mem::take(&mut state.round);
            state.round = match round {
                Round::Active(round)
                    if round.czar == from && round.submissions.contains_key(&winner) =>
                {
                    info!("{} won the round", winner.short());
                    Round::Complete(CompleteRound {
                        czar: round.czar,
                        black_card: round.black_card,
                        submissions: round.submissions,
                        winner,
                    })
                }
                round => {
                    debug!("rejected winner selection from {}", from.short());
                    effects.push(Effect::ShareRound { to: from });
                    round
                }
            };
        }

        Action::SettleCompletedRound => {
            if let Round::Complete(_) = state.round {
                for player in state.players.values_mut() {
                    let missing = STARTING_HAND_SIZE.saturating_sub(player.hand.len());
                    deal(&mut state.white_deck, player, missing, catalog, rng);
                }
                state.round = Round::Limbo;
            }
        }
    }
    (state, effects)
}

fn deal<R: Rng + ?Sized>(
    white_deck: &mut Vec<CardId>,
    player: &mut Player,
    count: usize,
    catalog: &Catalog,
    rng: &mut R,
) {
    deck::deal_cards(white_deck, &mut player.hand, count, &catalog.white_ids(), rng);
}

// The hand without `cards`, or `None` if the hand does not hold them all.
fn remove_from_hand(hand: &[CardId], cards: &[CardId]) -> Option<Vec<CardId>> {
    let mut hand = hand.to_vec();
    for card in cards {
        let index = hand.iter().position(|held| held == card)?;
        hand.remove(index);
    }
    Some(hand)
}

/// What a client may do depends on whether it judges the round.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Serf,
    Czar,
}

// Which messages each role is listened to for.
const LISTENERS: &[(Role, &[&str])] = &[
    (Role::Serf, &["req-card", "req-czar", "play-card"]),
    (Role::Czar, &["select-winner"]),
];

impl Role {
    pub fn of(client: &ClientId, round: &Round) -> Self {
        if round.czar() == Some(client) {
            Role::Czar
        } else {
            Role::Serf
        }
    }

    pub fn listens_to(self, message: &ClientMessage) -> bool {
        LISTENERS
            .iter()
            .any(|(role, kinds)| *role == self && kinds.contains(&message.kind()))
    }
}

/// Runs a game for a set of clients.
pub struct GameServer<R = StdRng> {
    catalog: Arc<Catalog>,
    state: GameState,
    rng: R,
}

impl GameServer<StdRng> {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self::with_rng(catalog, StdRng::from_entropy())
    }
}

impl<R: Rng> GameServer<R> {
    pub fn with_rng(catalog: Arc<Catalog>, mut rng: R) -> Self {
        let state = GameState::new(&catalog, &mut rng);
        GameServer {
            catalog,
            state,
            rng,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Replace the set of participating clients.
    pub fn set_peers<I>(&mut self, peers: I) -> Vec<Outbound>
    where
        I: IntoIterator<Item = ClientId>,
    {
        let peers: BTreeSet<_> = peers.into_iter().collect();
        if peers == self.state.peers {
            return Vec::new();
        }
        self.dispatch(Action::PeerSetChanged { peers })
    }

    /// Handle a message from a participating client.
    pub fn handle(&mut self, from: &ClientId, message: ClientMessage) -> Vec<Outbound> {
        if !self.state.peers.contains(from) {
            warn!("ignoring {} from non-player {}", message.kind(), from.short());
            return Vec::new();
        }
        let role = Role::of(from, &self.state.round);
        if !role.listens_to(&message) {
            debug!("{:?} {} may not send {}", role, from.short(), message.kind());
            return Vec::new();
        }
        let from = from.clone();
        let action = match message {
            ClientMessage::ReqCard { number } => Action::ReqCard { from, number },
            ClientMessage::ReqCzar => Action::ReqCzar { from },
            ClientMessage::PlayCard { cards } => Action::PlayCard { from, cards },
            ClientMessage::SelectWinner { winner } => Action::SelectWinner { from, winner },
        };
        self.dispatch(action)
    }

    fn dispatch(&mut self, action: Action) -> Vec<Outbound> {
        let mut outbound = self.pass(action);
        // Everyone sees the winner before the round is settled.
        if let Round::Complete(_) = self.state.round {
            outbound.extend(self.pass(Action::SettleCompletedRound));
        }
        outbound
    }

    // One reducer pass, followed by broadcasts and a flush.
    fn pass(&mut self, action: Action) -> Vec<Outbound> {
        let previous = std::mem::take(&mut self.state);
        let before_round = previous.round.clone();
        let before_players = previous.players.clone();
        let (state, effects) = reduce(previous, action, &self.catalog, &mut self.rng);
        self.state = state;
        self.state.side_effects.extend(effects);

        let mut outbound = Vec::new();
        for (client, player) in &self.state.players {
            if before_players.get(client) != Some(player) && self.state.peers.contains(client) {
                outbound.push(Outbound {
                    to: client.clone(),
                    message: player.clone().into(),
                });
            }
        }
        if before_round != self.state.round {
            for client in &self.state.peers {
                outbound.push(Outbound {
                    to: client.clone(),
                    message: self.state.round.clone().into(),
                });
            }
        }

        // Only what was queued before the flush started.
        let count = self.state.side_effects.len();
        let effects: Vec<_> = self.state.side_effects.drain(..count).collect();
        for effect in effects {
            outbound.extend(self.resolve(effect));
        }
        outbound
    }

    fn resolve(&self, effect: Effect) -> Option<Outbound> {
        let (to, message) = match effect {
            Effect::ShareRound { to } => {
                let message = ServerMessage::Round(self.state.round.clone());
                (to, message)
            }
            Effect::SharePlayer { to } => {
                let message = ServerMessage::Player(self.state.players.get(&to)?.clone());
                (to, message)
            }
        };
        if self.state.peers.contains(&to) {
            Some(Outbound { to, message })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ClientId {
        ClientId::from(name)
    }

    fn server(players: &[&str]) -> GameServer<StdRng> {
        let catalog = Arc::new(Catalog::placeholder());
        let mut server = GameServer::with_rng(catalog, StdRng::seed_from_u64(7));
        server.set_peers(players.iter().map(|p| id(p)));
        server
    }

    fn messages_to<'a>(outbound: &'a [Outbound], to: &str) -> Vec<&'a ServerMessage> {
        outbound
            .iter()
            .filter(|o| o.to == id(to))
            .map(|o| &o.message)
            .collect()
    }

    fn white_total(state: &GameState) -> usize {
        let submitted: usize = state
            .round
            .submissions()
            .map_or(0, |s| s.values().map(Vec::len).sum());
        state.white_deck.len()
            + state.players.values().map(|p| p.hand.len()).sum::<usize>()
            + submitted
    }

    // Start a round with `czar` and return its pick count.
    fn start_round(server: &mut GameServer<StdRng>, czar: &str) -> usize {
        server.handle(&id(czar), ClientMessage::ReqCzar);
        let black = server.state().round.black_card().unwrap();
        server.catalog().black_card(black).unwrap().pick.count()
    }

    fn play(server: &mut GameServer<StdRng>, who: &str, pick: usize) -> Vec<Outbound> {
        let cards = server.state().players[&id(who)].hand[..pick].to_vec();
        server.handle(&id(who), ClientMessage::PlayCard { cards })
    }

    #[test]
    fn new_peers_get_a_full_hand_and_the_round() {
        let mut server = server(&[]);
        let outbound = server.set_peers(vec![id("a"), id("b")]);
        for who in &["a", "b"] {
            let messages = messages_to(&outbound, who);
            assert!(messages.contains(&&ServerMessage::Round(Round::Limbo)));
            assert!(messages.iter().any(|m| matches!(m,
                ServerMessage::Player(p) if p.hand.len() == STARTING_HAND_SIZE)));
        }
        assert_eq!(white_total(server.state()), 460);
    }

    #[test]
    fn returning_player_gets_their_hand_back() {
        let mut server = server(&["a", "b"]);
        let hand = server.state().players[&id("b")].clone();
        server.set_peers(vec![id("a")]);
        let outbound = server.set_peers(vec![id("a"), id("b")]);
        assert!(messages_to(&outbound, "b").contains(&&ServerMessage::Player(hand)));
        assert!(messages_to(&outbound, "a").is_empty());
    }

    #[test]
    fn czar_request_starts_round_or_resyncs() {
        let mut server = server(&["a", "b"]);
        let outbound = server.handle(&id("a"), ClientMessage::ReqCzar);
        assert_eq!(server.state().round.czar(), Some(&id("a")));
        assert_eq!(messages_to(&outbound, "a").len(), 1);
        assert_eq!(messages_to(&outbound, "b").len(), 1);
        let blacks = server.state().black_deck.len();

        // A second request only resyncs the latecomer.
        let round = server.state().round.clone();
        let outbound = server.handle(&id("b"), ClientMessage::ReqCzar);
        assert_eq!(
            outbound,
            vec![Outbound {
                to: id("b"),
                message: ServerMessage::Round(round)
            }]
        );
        assert_eq!(server.state().black_deck.len(), blacks);
    }

    #[test]
    fn czar_request_reshuffles_empty_black_deck() {
        let mut server = server(&["a"]);
        server.state.black_deck.clear();
        server.handle(&id("a"), ClientMessage::ReqCzar);
        assert!(server.state().round.czar().is_some());
        assert_eq!(server.state().black_deck.len(), 97);
    }

    #[test]
    fn wrong_pick_count_is_rejected_with_resync() {
        let mut server = server(&["a", "b"]);
        let pick = start_round(&mut server, "a");
        let hand = server.state().players[&id("b")].clone();
        let outbound = play(&mut server, "b", pick + 1);

        assert!(server.state().round.submissions().unwrap().is_empty());
        let messages = messages_to(&outbound, "b");
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ServerMessage::Round(Round::Active(_))));
        assert_eq!(messages[1], &ServerMessage::Player(hand));
        assert!(messages_to(&outbound, "a").is_empty());
    }

    #[test]
    fn at_most_one_submission_per_round() {
        let mut server = server(&["a", "b"]);
        let pick = start_round(&mut server, "a");
        play(&mut server, "b", pick);
        let after_first = server.state().clone();
        play(&mut server, "b", pick);

        assert_eq!(server.state().round, after_first.round);
        assert_eq!(server.state().players, after_first.players);
        assert_eq!(
            server.state().players[&id("b")].hand.len(),
            STARTING_HAND_SIZE - pick
        );
    }

    #[test]
    fn cards_must_come_from_the_hand() {
        let mut server = server(&["a", "b"]);
        let pick = start_round(&mut server, "a");
        let foreign = server.state().players[&id("a")].hand[..pick].to_vec();
        server.handle(&id("b"), ClientMessage::PlayCard { cards: foreign });
        assert!(server.state().round.submissions().unwrap().is_empty());
    }

    #[test]
    fn play_outside_a_round_is_rejected() {
        let mut server = server(&["a"]);
        let cards = server.state().players[&id("a")].hand[..1].to_vec();
        let outbound = server.handle(&id("a"), ClientMessage::PlayCard { cards });
        assert_eq!(messages_to(&outbound, "a").len(), 2);
        assert_eq!(
            server.state().players[&id("a")].hand.len(),
            STARTING_HAND_SIZE
        );
    }

    #[test]
    fn only_the_czar_selects_winners() {
        let mut server = server(&["a", "b", "c"]);
        let pick = start_round(&mut server, "a");
        play(&mut server, "b", pick);

        // A serf is not listened to for this.
        let outbound = server.handle(&id("c"), ClientMessage::SelectWinner { winner: id("c") });
        assert!(outbound.is_empty());
        // The czar may only pick someone who played.
        let outbound = server.handle(&id("a"), ClientMessage::SelectWinner { winner: id("c") });
        assert_eq!(messages_to(&outbound, "a").len(), 1);
        assert!(matches!(server.state().round, Round::Active(_)));
        // And the czar is not listened to for serf requests.
        assert!(server.handle(&id("a"), ClientMessage::ReqCard { number: 2 }).is_empty());
    }

    #[test]
    fn completed_round_is_announced_then_settled() {
        let mut server = server(&["a", "b", "c"]);
        let pick = start_round(&mut server, "a");
        play(&mut server, "b", pick);
        play(&mut server, "c", pick);
        let outbound = server.handle(&id("a"), ClientMessage::SelectWinner { winner: id("b") });

        for who in &["a", "b", "c"] {
            let rounds: Vec<_> = messages_to(&outbound, who)
                .into_iter()
                .filter_map(|m| match m {
                    ServerMessage::Round(round) => Some(round),
                    _ => None,
                })
                .collect();
            assert_eq!(rounds.len(), 2);
            assert_eq!(rounds[0].winner(), Some(&id("b")));
            assert_eq!(rounds[1], &Round::Limbo);
        }
        assert_eq!(server.state().round, Round::Limbo);
        for player in server.state().players.values() {
            assert_eq!(player.hand.len(), STARTING_HAND_SIZE);
        }
        assert!(messages_to(&outbound, "b")
            .iter()
            .any(|m| matches!(m, ServerMessage::Player(_))));
    }

    #[test]
    fn white_cards_are_conserved() {
        let mut server = server(&["a", "b", "c"]);
        assert_eq!(white_total(server.state()), 460);
        server.handle(&id("b"), ClientMessage::ReqCard { number: 4 });
        assert_eq!(white_total(server.state()), 460);
        let pick = start_round(&mut server, "a");
        play(&mut server, "b", pick);
        assert_eq!(white_total(server.state()), 460);
        // Settling moves submitted cards out of play; the deck covers the rest.
        server.handle(&id("a"), ClientMessage::SelectWinner { winner: id("b") });
        assert_eq!(white_total(server.state()) + pick, 460);
    }

    #[test]
    fn card_requests_are_clamped() {
        let mut server = server(&["a"]);
        server.handle(&id("a"), ClientMessage::ReqCard { number: 50 });
        assert_eq!(server.state().players[&id("a")].hand.len(), 20);
        let outbound = server.handle(&id("a"), ClientMessage::ReqCard { number: -5 });
        assert!(outbound.is_empty());
        assert_eq!(server.state().players[&id("a")].hand.len(), 20);
    }

    #[test]
    fn exhausted_white_deck_is_reshuffled() {
        let mut server = server(&["a"]);
        server.state.white_deck.truncate(3);
        let outbound = server.handle(&id("a"), ClientMessage::ReqCard { number: 5 });
        assert_eq!(server.state().players[&id("a")].hand.len(), 15);
        assert_eq!(server.state().white_deck.len(), 458);
        assert_eq!(outbound.len(), 1);
    }

    #[test]
    fn departing_czar_abandons_the_round() {
        let mut server = server(&["a", "b"]);
        start_round(&mut server, "a");
        let outbound = server.set_peers(vec![id("b")]);
        assert_eq!(server.state().round, Round::Limbo);
        assert_eq!(
            messages_to(&outbound, "b"),
            vec![&ServerMessage::Round(Round::Limbo)]
        );
    }

    #[test]
    fn departing_serf_takes_back_their_submission() {
        let mut server = server(&["a", "b", "c"]);
        let pick = start_round(&mut server, "a");
        play(&mut server, "b", pick);
        server.set_peers(vec![id("a"), id("c")]);
        assert!(server.state().round.submissions().unwrap().is_empty());
        assert_eq!(
            server.state().players[&id("b")].hand.len(),
            STARTING_HAND_SIZE
        );
    }

    #[test]
    fn strangers_are_ignored() {
        let mut server = server(&["a"]);
        assert!(server.handle(&id("z"), ClientMessage::ReqCzar).is_empty());
        assert_eq!(server.state().round, Round::Limbo);
    }

    #[test]
    fn reduce_is_pure_given_the_rng() {
        let catalog = Catalog::placeholder();
        let state = GameState::new(&catalog, &mut StdRng::seed_from_u64(1));
        let action = Action::PeerSetChanged {
            peers: vec![id("a"), id("b")].into_iter().collect(),
        };
        let first = reduce(state.clone(), action.clone(), &catalog, &mut StdRng::seed_from_u64(9));
        let second = reduce(state, action, &catalog, &mut StdRng::seed_from_u64(9));
        assert_eq!(first, second);
        assert_eq!(first.1.len(), 2);
    }
}
