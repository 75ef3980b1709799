//! A whole game on one machine: a host and a handful of bots, fully
//! connected over in-memory wires, playing until enough rounds are won.

use std::sync::Arc;

use futures::channel::mpsc;
use futures::future::join_all;
use futures::StreamExt;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use cardswarm_game::model::{CardId, Round};
use cardswarm_game::{Catalog, ClientId};
use cardswarm_swarm::memory;
use cardswarm_swarm::{Identity, PeerId, PeerMetadata};

use crate::node::{Intent, Node, NodeOptions, Stats, ViewEvent, ViewRx};
use crate::settings;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Report {
    /// Rounds the host saw completed.
    pub rounds: usize,
    pub host: Stats,
    pub bots: Vec<Stats>,
}

/// Play until the host has seen `simulation.rounds` rounds completed, or
/// until `stop_rx` fires.
pub async fn run(
    simulation: settings::Simulation,
    host: Identity,
    options: NodeOptions,
    catalog: Arc<Catalog>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Report {
    if simulation.peers == 0 {
        warn!("no bots configured; the host will be playing alone");
    }
    let (progress_tx, mut progress_rx) = mpsc::unbounded();

    let mut handles = Vec::with_capacity(simulation.peers + 1);
    let mut nodes = Vec::with_capacity(simulation.peers + 1);
    let mut bots = Vec::with_capacity(simulation.peers + 1);
    let host_options = NodeOptions {
        host: true,
        ..options
    };
    let bot_options = (1..=simulation.peers).map(|n| {
        let options = NodeOptions {
            username: format!("bot-{}", n),
            host: false,
        };
        (Identity::generate(), options)
    });
    for (index, (identity, options)) in std::iter::once((host, host_options))
        .chain(bot_options)
        .enumerate()
    {
        let (node, handle, view_rx) = Node::new(identity, options, catalog.clone());
        let progress = if index == 0 {
            Some(progress_tx.clone())
        } else {
            None
        };
        bots.push(tokio::spawn(play(
            handle.id().clone(),
            handle.intents(),
            view_rx,
            catalog.clone(),
            progress,
        )));
        nodes.push(tokio::spawn(node.run()));
        handles.push(handle);
    }
    drop(progress_tx);

    for (i, a) in handles.iter().enumerate() {
        for b in &handles[i + 1..] {
            memory::connect(a.inbound(), b.inbound());
        }
    }
    info!("simulating {} peers", handles.len());

    let mut rounds = 0;
    while rounds < simulation.rounds {
        tokio::select! {
            _ = &mut stop_rx => {
                info!("stopping simulation early");
                break
            },
            progress = progress_rx.next() => match progress {
                Some(completed) => {
                    rounds = completed;
                    info!("{} of {} rounds complete", rounds, simulation.rounds);
                }
                None => break,
            },
        }
    }

    for handle in &mut handles {
        handle.shutdown();
    }
    let mut stats = collect(nodes).await.into_iter();
    collect(bots).await;
    Report {
        rounds,
        host: stats.next().unwrap_or_default(),
        bots: stats.collect(),
    }
}

async fn collect<T: Default>(tasks: Vec<JoinHandle<T>>) -> Vec<T> {
    join_all(tasks)
        .await
        .into_iter()
        .map(|result| {
            result.unwrap_or_else(|e| {
                error!("simulation task: {}", e);
                T::default()
            })
        })
        .collect()
}

// What a bot has seen of the game so far.
#[derive(Default)]
struct Table {
    leader: Option<PeerId>,
    peers: Vec<PeerMetadata>,
    round: Option<Round>,
    hand: Vec<CardId>,
    completed: usize,
    // The active round we already played in.
    acted: Option<(usize, ClientId, CardId)>,
}

impl Table {
    // Everyone following the leader, from where we sit. When we are czar
    // that is everyone else in the game.
    fn serfs(&self) -> usize {
        match &self.leader {
            Some(leader) => self
                .peers
                .iter()
                .filter(|peer| peer.leader.as_ref() == Some(leader))
                .count(),
            None => 0,
        }
    }
}

async fn play(
    me: PeerId,
    intents: mpsc::UnboundedSender<Intent>,
    mut view_rx: ViewRx,
    catalog: Arc<Catalog>,
    progress: Option<mpsc::UnboundedSender<usize>>,
) {
    let mut rng = StdRng::from_entropy();
    let mut table = Table::default();
    while let Some(event) = view_rx.next().await {
        match event {
            ViewEvent::Leader(leader) => {
                table.leader = leader;
                continue;
            }
            ViewEvent::Peers(peers) => table.peers = peers,
            ViewEvent::Round(round) => table.round = round,
            ViewEvent::Player(player) => {
                table.hand = player.hand;
                continue;
            }
            ViewEvent::History(history) => {
                table.completed = history.len();
                if let Some(progress) = &progress {
                    let _ = progress.unbounded_send(history.len());
                }
                continue;
            }
            ViewEvent::Chat { .. } => continue,
        }
        if let Some(intent) = decide(&me, &mut table, &catalog, &mut rng) {
            debug!("{} wants {:?}", me.short(), intent);
            if intents.unbounded_send(intent).is_err() {
                break;
            }
        }
    }
}

fn decide(me: &PeerId, table: &mut Table, catalog: &Catalog, rng: &mut StdRng) -> Option<Intent> {
    let round = match &table.round {
        Some(Round::Active(round)) => round,
        Some(Round::Limbo) => return Some(Intent::RequestCzar),
        _ => return None,
    };
    let key = (table.completed, round.czar.clone(), round.black_card);
    if table.acted.as_ref() == Some(&key) {
        return None;
    }
    if &round.czar == me {
        let serfs = table.serfs();
        if serfs == 0 || round.submissions.len() < serfs {
            return None;
        }
        let winner = round.submissions.keys().choose(rng)?.clone();
        table.acted = Some(key);
        return Some(Intent::SelectWinner(winner));
    }
    if round.submissions.contains_key(me) {
        return None;
    }
    let pick = catalog
        .black_card(round.black_card)
        .map_or(1, |card| card.pick.count());
    if table.hand.len() < pick {
        return Some(Intent::RequestCards(pick as i64));
    }
    table.acted = Some(key);
    Some(Intent::SubmitCards(table.hand[..pick].to_vec()))
}
