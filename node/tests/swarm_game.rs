use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use cardswarm_game::model::{CardId, CompleteRound, Round};
use cardswarm_game::Catalog;
use cardswarm_node::{
    settings, sim, Intent, Node, NodeHandle, NodeOptions, Stats, ViewEvent, ViewRx,
};
use cardswarm_swarm::handshake::ExtendedHandshake;
use cardswarm_swarm::wire::inbound_channel;
use cardswarm_swarm::{memory, Identity, PeerId, PeerMetadata, WireEvent};

const PATIENCE: Duration = Duration::from_secs(10);

// A node plus everything it has told us so far.
struct Seat {
    handle: NodeHandle,
    views: ViewRx,
    task: JoinHandle<Stats>,
    leader: Option<PeerId>,
    peers: Vec<PeerMetadata>,
    round: Option<Round>,
    hand: Vec<CardId>,
    history: Vec<CompleteRound>,
    chat: Vec<(PeerId, String, String)>,
}

impl Seat {
    fn spawn(username: &str, host: bool, catalog: &Arc<Catalog>) -> Seat {
        let options = NodeOptions {
            username: username.into(),
            host,
        };
        let (node, handle, views) = Node::new(Identity::generate(), options, catalog.clone());
        Seat {
            handle,
            views,
            task: tokio::spawn(node.run()),
            leader: None,
            peers: Vec::new(),
            round: None,
            hand: Vec::new(),
            history: Vec::new(),
            chat: Vec::new(),
        }
    }

    fn id(&self) -> PeerId {
        self.handle.id().clone()
    }

    fn apply(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::Leader(leader) => self.leader = leader,
            ViewEvent::Peers(peers) => self.peers = peers,
            ViewEvent::Round(round) => self.round = round,
            ViewEvent::Player(player) => self.hand = player.hand,
            ViewEvent::History(history) => self.history = history,
            ViewEvent::Chat {
                from,
                username,
                text,
            } => self.chat.push((from, username, text)),
        }
    }

    // Read view events until `done` holds.
    async fn until<F: Fn(&Seat) -> bool>(&mut self, done: F) {
        let waiting = async {
            while !done(self) {
                let event = self.views.next().await.expect("node to be running");
                self.apply(event);
            }
        };
        timeout(PATIENCE, waiting).await.expect("view to settle");
    }

    async fn stop(mut self) -> Stats {
        self.handle.shutdown();
        self.task.await.expect("node to stop cleanly")
    }
}

fn connect_all(seats: &[&Seat]) {
    for (i, a) in seats.iter().enumerate() {
        for b in &seats[i + 1..] {
            memory::connect(a.handle.inbound(), b.handle.inbound());
        }
    }
}

fn following(seat: &Seat, leader: &PeerId) -> usize {
    seat.peers
        .iter()
        .filter(|peer| peer.leader.as_ref() == Some(leader))
        .count()
}

#[tokio::test]
async fn everyone_follows_the_host() {
    let catalog = Arc::new(Catalog::placeholder());
    let mut alice = Seat::spawn("alice", true, &catalog);
    let mut bob = Seat::spawn("bob", false, &catalog);
    let mut carol = Seat::spawn("carol", false, &catalog);
    connect_all(&[&alice, &bob, &carol]);

    let host = alice.id();
    alice.until(|s| s.leader.as_ref() == Some(&host)).await;
    bob.until(|s| s.leader.as_ref() == Some(&host)).await;
    carol.until(|s| s.leader.as_ref() == Some(&host)).await;
    alice.until(|s| following(s, &host) == 2).await;

    let names: Vec<_> = alice.peers.iter().map(|p| p.username.as_str()).collect();
    assert!(names.contains(&"bob") && names.contains(&"carol"));

    let stats = alice.stop().await;
    assert_eq!(stats.connections, 2);
    assert_eq!(stats.peers_authenticated, 2);
    bob.stop().await;
    carol.stop().await;
}

#[tokio::test]
async fn a_full_round_is_played_through_intents() {
    let catalog = Arc::new(Catalog::placeholder());
    let mut alice = Seat::spawn("alice", true, &catalog);
    let mut bob = Seat::spawn("bob", false, &catalog);
    let mut carol = Seat::spawn("carol", false, &catalog);
    connect_all(&[&alice, &bob, &carol]);

    let host = alice.id();
    alice.until(|s| following(s, &host) == 2).await;
    alice.handle.send(Intent::RequestCzar);

    let czar_is_host = |s: &Seat| {
        s.hand.len() == 10
            && matches!(&s.round, Some(Round::Active(round)) if round.czar == host)
    };
    bob.until(czar_is_host).await;
    carol.until(czar_is_host).await;

    for seat in [&bob, &carol].iter() {
        let black = seat.round.as_ref().and_then(Round::black_card).unwrap();
        let pick = catalog.black_card(black).unwrap().pick.count();
        seat.handle.send(Intent::SubmitCards(seat.hand[..pick].to_vec()));
    }
    let submitted = |s: &Seat| {
        s.round
            .as_ref()
            .and_then(Round::submissions)
            .map_or(0, |submissions| submissions.len())
    };
    alice.until(|s| submitted(s) == 2).await;

    let winner = bob.id();
    alice.handle.send(Intent::SelectWinner(winner.clone()));

    for seat in [&mut alice, &mut bob, &mut carol].iter_mut() {
        seat.until(|s| s.history.len() == 1 && s.round == Some(Round::Limbo))
            .await;
        assert_eq!(seat.history[0].winner, winner);
        assert_eq!(seat.history[0].czar, host);
    }
    // Hands are topped back up once the round settles.
    bob.until(|s| s.hand.len() == 10).await;

    assert_eq!(alice.stop().await.rounds_completed, 1);
    assert_eq!(bob.stop().await.rounds_completed, 1);
    carol.stop().await;
}

#[tokio::test]
async fn serfs_cannot_pick_the_winner() {
    let catalog = Arc::new(Catalog::placeholder());
    let mut alice = Seat::spawn("alice", true, &catalog);
    let mut bob = Seat::spawn("bob", false, &catalog);
    connect_all(&[&alice, &bob]);

    let host = alice.id();
    alice.until(|s| following(s, &host) == 1).await;
    alice.handle.send(Intent::RequestCzar);
    bob.until(|s| {
        s.hand.len() == 10 && s.round.as_ref().and_then(Round::czar) == Some(&host)
    })
    .await;
    let black = bob.round.as_ref().and_then(Round::black_card).unwrap();
    let pick = catalog.black_card(black).unwrap().pick.count();
    bob.handle.send(Intent::SubmitCards(bob.hand[..pick].to_vec()));
    bob.handle.send(Intent::SelectWinner(bob.id()));
    // A chat message marks the point after which bob's intents were handled.
    bob.handle.send(Intent::Chat("done".into()));

    alice.until(|s| !s.chat.is_empty()).await;
    assert!(alice.history.is_empty());
    assert!(matches!(alice.round, Some(Round::Active(_))));

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
async fn chat_reaches_every_peer() {
    let catalog = Arc::new(Catalog::placeholder());
    let mut alice = Seat::spawn("alice", false, &catalog);
    let mut bob = Seat::spawn("bob", false, &catalog);
    connect_all(&[&alice, &bob]);

    alice.until(|s| s.peers.len() == 1).await;
    bob.until(|s| s.peers.len() == 1).await;
    bob.handle.send(Intent::Chat("hello".into()));

    alice.until(|s| !s.chat.is_empty()).await;
    assert_eq!(alice.chat[0], (bob.id(), "bob".to_owned(), "hello".to_owned()));
    assert_eq!(alice.leader, None);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
async fn forged_handshake_closes_the_connection() {
    let catalog = Arc::new(Catalog::placeholder());
    let alice = Seat::spawn("alice", false, &catalog);
    let (mallory_tx, mut mallory_rx) = inbound_channel();
    memory::connect(alice.handle.inbound(), &mallory_tx);

    let wire = match mallory_rx.next().await.map(|inbound| inbound.event) {
        Some(WireEvent::Connected(wire)) => wire,
        other => panic!("expected a connection, got {:?}", other),
    };
    let mut handshake = ExtendedHandshake::announce(&Identity::generate(), "mallory", None);
    handshake.signature[0] ^= 0x01;
    wire.send_handshake(handshake.encode()).unwrap();

    let closed = async {
        while let Some(inbound) = mallory_rx.next().await {
            if let WireEvent::Closed = inbound.event {
                return;
            }
        }
    };
    timeout(PATIENCE, closed).await.expect("connection to close");
    assert!(wire.is_destroyed());

    let stats = alice.stop().await;
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.peers_authenticated, 0);
}

#[tokio::test]
async fn losing_the_host_leaves_no_leader() {
    let catalog = Arc::new(Catalog::placeholder());
    let mut alice = Seat::spawn("alice", true, &catalog);
    let mut bob = Seat::spawn("bob", false, &catalog);
    connect_all(&[&alice, &bob]);

    let host = alice.id();
    bob.until(|s| s.leader.as_ref() == Some(&host) && s.round.is_some()).await;
    alice.stop().await;

    bob.until(|s| s.leader.is_none() && s.round.is_none()).await;
    assert!(bob.peers.is_empty());
    bob.until(|s| s.hand.is_empty()).await;
    bob.stop().await;
}

#[tokio::test]
async fn second_host_takes_over_after_the_first_leaves() {
    let catalog = Arc::new(Catalog::placeholder());
    let mut alice = Seat::spawn("alice", true, &catalog);
    let mut bob = Seat::spawn("bob", false, &catalog);
    let mut carol = Seat::spawn("carol", false, &catalog);
    connect_all(&[&alice, &bob, &carol]);

    let first = alice.id();
    carol.until(|s| s.leader.as_ref() == Some(&first)).await;
    bob.handle.send(Intent::Host(true));
    let second = bob.id();
    bob.until(|s| s.leader.as_ref() == Some(&second)).await;
    alice.stop().await;

    // Carol only moves on once alice is gone.
    carol.until(|s| s.leader.as_ref() == Some(&second)).await;
    bob.until(|s| following(s, &second) == 1).await;

    bob.stop().await;
    carol.stop().await;
}

#[tokio::test]
async fn simulation_plays_the_requested_rounds() {
    let catalog = Arc::new(Catalog::placeholder());
    let simulation = settings::Simulation {
        peers: 3,
        rounds: 2,
    };
    let options = NodeOptions {
        username: "host".into(),
        host: false,
    };
    let (_stop_tx, stop_rx) = oneshot::channel();
    let report = timeout(
        Duration::from_secs(30),
        sim::run(simulation, Identity::generate(), options, catalog, stop_rx),
    )
    .await
    .expect("simulation to finish");

    assert!(report.rounds >= 2);
    assert!(report.host.rounds_completed >= 2);
    assert_eq!(report.host.peers_authenticated, 3);
    assert_eq!(report.bots.len(), 3);
}

#[tokio::test]
async fn simulation_stops_on_request() {
    let catalog = Arc::new(Catalog::placeholder());
    let simulation = settings::Simulation {
        peers: 0,
        rounds: 1,
    };
    let options = NodeOptions {
        username: "host".into(),
        host: true,
    };
    let (stop_tx, stop_rx) = oneshot::channel();
    let running = tokio::spawn(sim::run(
        simulation,
        Identity::generate(),
        options,
        catalog,
        stop_rx,
    ));
    stop_tx.send(()).unwrap();
    let report = timeout(PATIENCE, running)
        .await
        .expect("simulation to stop")
        .expect("simulation task");
    assert_eq!(report.rounds, 0);
    assert!(report.bots.is_empty());
}
