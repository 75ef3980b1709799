use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::channel::mpsc;
use futures::StreamExt;
use log::{debug, info, trace, warn};
use tokio::sync::oneshot;

use cardswarm_game::client::{self, RoundView};
use cardswarm_game::model::{CardId, CompleteRound, Player, Round};
use cardswarm_game::{Catalog, ClientId, ClientMessage, GameServer, Outbound, ServerMessage};
use cardswarm_swarm::wire::inbound_channel;
use cardswarm_swarm::{
    Channel, Envelope, Identity, Inbound, InboundRx, InboundTx, LeaderChange, LeaderElection,
    PeerEvent, PeerId, PeerMetadata, PeerRegistry, SwarmCommExtension, WireEvent, WireId,
};

use crate::settings;

/// Something the local player wants to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    RequestCards(i64),
    RequestCzar,
    SubmitCards(Vec<CardId>),
    SelectWinner(ClientId),
    /// Say something to every connected peer.
    Chat(String),
    /// Start or stop hosting the game.
    Host(bool),
}

/// What a front end needs to know to draw the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    Leader(Option<PeerId>),
    Peers(Vec<PeerMetadata>),
    Round(Option<Round>),
    Player(Player),
    History(Vec<CompleteRound>),
    Chat {
        from: PeerId,
        username: String,
        text: String,
    },
}

pub type ViewTx = mpsc::UnboundedSender<ViewEvent>;
pub type ViewRx = mpsc::UnboundedReceiver<ViewEvent>;

#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub username: String,
    pub host: bool,
}

impl From<&settings::Player> for NodeOptions {
    fn from(player: &settings::Player) -> Self {
        NodeOptions {
            username: player.username.clone(),
            host: player.host,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    pub connections: usize,
    pub peers_authenticated: usize,
    pub rounds_completed: usize,
}

/// One peer of the swarm. Everything it does happens on the task that
/// awaits [`Node::run`].
pub struct Node {
    identity: Identity,
    options: NodeOptions,
    catalog: Arc<Catalog>,
    inbound_rx: InboundRx,
    intent_rx: mpsc::UnboundedReceiver<Intent>,
    shutdown_rx: oneshot::Receiver<()>,
    view_tx: ViewTx,
}

/// The outside world's grip on a running node.
#[derive(Debug)]
pub struct NodeHandle {
    id: PeerId,
    inbound: InboundTx,
    intents: mpsc::UnboundedSender<Intent>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl NodeHandle {
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Where transports deliver wire events for this node.
    pub fn inbound(&self) -> &InboundTx {
        &self.inbound
    }

    pub fn intents(&self) -> mpsc::UnboundedSender<Intent> {
        self.intents.clone()
    }

    /// Returns false once the node has stopped.
    pub fn send(&self, intent: Intent) -> bool {
        self.intents.unbounded_send(intent).is_ok()
    }

    /// Ask the node to stop. Dropping the handle does the same.
    pub fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Node {
    pub fn new(
        identity: Identity,
        options: NodeOptions,
        catalog: Arc<Catalog>,
    ) -> (Node, NodeHandle, ViewRx) {
        let (inbound_tx, inbound_rx) = inbound_channel();
        let (intent_tx, intent_rx) = mpsc::unbounded();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (view_tx, view_rx) = mpsc::unbounded();
        let handle = NodeHandle {
            id: identity.id().clone(),
            inbound: inbound_tx,
            intents: intent_tx,
            shutdown: Some(shutdown_tx),
        };
        let node = Node {
            identity,
            options,
            catalog,
            inbound_rx,
            intent_rx,
            shutdown_rx,
            view_tx,
        };
        (node, handle, view_rx)
    }

    /// Execute the entire life-cycle of the node.
    pub async fn run(self) -> Stats {
        let Node {
            identity,
            options,
            catalog,
            mut inbound_rx,
            mut intent_rx,
            mut shutdown_rx,
            view_tx,
        } = self;
        let host = options.host;
        let mut core = Core::new(identity, options.username, catalog, view_tx);
        info!("node {} ({}) starting", core.me().short(), core.username);
        if host {
            core.on_intent(Intent::Host(true));
        }

        loop {
            tokio::select! {
                // Handle asked us to stop, or went away.
                _ = &mut shutdown_rx => {
                    info!("received shutdown notice");
                    break
                },
                Some(inbound) = inbound_rx.next() => core.on_inbound(inbound),
                Some(intent) = intent_rx.next() => core.on_intent(intent),
                else => break,
            }
        }
        core.shutdown()
    }
}

// The game as run by the leader.
struct HostedGame {
    server: GameServer,
    followers: BTreeMap<ClientId, Channel<ServerMessage, ClientMessage>>,
}

impl HostedGame {
    fn close(self) {
        for channel in self.followers.values() {
            channel.destroy();
        }
    }
}

struct Core {
    identity: Identity,
    username: String,
    catalog: Arc<Catalog>,
    extensions: HashMap<WireId, SwarmCommExtension>,
    registry: PeerRegistry,
    election: LeaderElection,
    hosted: Option<HostedGame>,
    // Our line to the leader, when somebody else leads.
    server_channel: Option<Channel<ClientMessage, ServerMessage>>,
    view: RoundView,
    view_tx: ViewTx,
    stats: Stats,
}

impl Core {
    fn new(identity: Identity, username: String, catalog: Arc<Catalog>, view_tx: ViewTx) -> Self {
        let election = LeaderElection::new(identity.id().clone());
        Core {
            identity,
            username,
            catalog,
            extensions: HashMap::new(),
            registry: PeerRegistry::new(),
            election,
            hosted: None,
            server_channel: None,
            view: RoundView::new(),
            view_tx,
            stats: Stats::default(),
        }
    }

    fn me(&self) -> &PeerId {
        self.identity.id()
    }

    fn emit(&self, event: ViewEvent) {
        if self.view_tx.unbounded_send(event).is_err() {
            trace!("nobody is watching");
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        let Inbound { wire, event } = inbound;
        match event {
            WireEvent::Connected(connection) => {
                self.stats.connections += 1;
                let extension = SwarmCommExtension::attach(
                    connection,
                    &self.identity,
                    &self.username,
                    self.election.leader().cloned(),
                );
                self.extensions.insert(wire, extension);
            }
            WireEvent::Handshake(bytes) => {
                let added = match self.extensions.get_mut(&wire) {
                    Some(extension) => extension.on_extended_handshake(&bytes),
                    None => {
                        warn!("handshake on unknown {}", wire);
                        None
                    }
                };
                if let Some(PeerEvent::Added(metadata)) = added {
                    self.on_peer_added(wire, metadata);
                }
            }
            WireEvent::Extended(bytes) => {
                let received = self.extensions.get_mut(&wire).and_then(|extension| {
                    let envelope = extension.on_message(&bytes)?;
                    let from = extension.peer()?.id.clone();
                    Some((from, envelope))
                });
                if let Some((from, envelope)) = received {
                    self.on_envelope(wire, from, envelope);
                }
            }
            WireEvent::Closed => {
                let dropped = self
                    .extensions
                    .remove(&wire)
                    .and_then(|mut extension| extension.on_close());
                if let Some(PeerEvent::Dropped(id)) = dropped {
                    if self.registry.on_peer_drop(wire, &id) {
                        info!("{} left", id.short());
                        self.peers_changed();
                    }
                }
            }
        }
    }

    fn on_peer_added(&mut self, wire: WireId, metadata: PeerMetadata) {
        if &metadata.id == self.me() {
            warn!("{} leads back to ourselves; closing it", wire);
            if let Some(extension) = self.extensions.get(&wire) {
                extension.destroy();
            }
            return;
        }
        self.stats.peers_authenticated += 1;
        info!("{} ({}) joined", metadata.id.short(), metadata.username);
        self.registry.on_peer_add(wire, metadata);
        self.peers_changed();
    }

    fn on_envelope(&mut self, wire: WireId, from: PeerId, envelope: Envelope) {
        match envelope {
            Envelope::Ping => trace!("ping from {}", from.short()),
            Envelope::Metadata(update) => {
                // Only the connection the peer is registered under speaks for it.
                if self.registry.get(&from).map(|peer| peer.wire) != Some(wire) {
                    debug!("ignoring metadata from stale {}", wire);
                    return;
                }
                if self.registry.on_peer_metadata_change(&from, &update).is_some() {
                    self.peers_changed();
                }
            }
            Envelope::Message(text) => {
                let username = self
                    .registry
                    .get(&from)
                    .map(|peer| peer.metadata.username.clone())
                    .unwrap_or_default();
                self.emit(ViewEvent::Chat {
                    from,
                    username,
                    text,
                });
            }
            Envelope::Data(_) => self.on_data(from, &envelope),
        }
    }

    fn on_data(&mut self, from: PeerId, envelope: &Envelope) {
        if let Some(hosted) = &mut self.hosted {
            let message = hosted
                .followers
                .get(&from)
                .and_then(|channel| channel.receive(envelope));
            if let Some(message) = message {
                debug!("{} from {}", message.kind(), from.short());
                let outbound = hosted.server.handle(&from, message);
                self.deliver(outbound);
                return;
            }
        }
        let message = self
            .server_channel
            .as_ref()
            .filter(|channel| channel.peer().id == from)
            .and_then(|channel| channel.receive(envelope));
        match message {
            Some(message) => self.apply_server_message(message),
            None => debug!("unexpected data from {}", from.short()),
        }
    }

    fn on_intent(&mut self, intent: Intent) {
        match intent {
            Intent::RequestCards(number) => self.send_to_leader(client::request_cards(number)),
            Intent::RequestCzar => self.send_to_leader(client::request_czar()),
            Intent::SubmitCards(cards) => self.send_to_leader(client::submit_cards(cards)),
            Intent::SelectWinner(winner) => self.send_to_leader(client::select_winner(winner)),
            Intent::Chat(text) => {
                let envelope = Envelope::Message(text);
                for extension in self.extensions.values() {
                    if extension.peer().is_some() {
                        extension.send(&envelope);
                    }
                }
            }
            Intent::Host(hosting) => {
                let change = self.election.set_hosting(hosting, &self.registry);
                self.reconcile(change);
            }
        }
    }

    fn send_to_leader(&mut self, message: ClientMessage) {
        if self.election.is_leader() {
            let outbound = match &mut self.hosted {
                Some(hosted) => hosted.server.handle(self.identity.id(), message),
                None => return,
            };
            self.deliver(outbound);
        } else if let Some(channel) = &self.server_channel {
            channel.send(&message);
        } else {
            warn!("no leader to send {} to", message.kind());
        }
    }

    fn deliver(&mut self, outbound: Vec<Outbound>) {
        for Outbound { to, message } in outbound {
            if &to == self.me() {
                self.apply_server_message(message);
                continue;
            }
            let channel = self
                .hosted
                .as_ref()
                .and_then(|hosted| hosted.followers.get(&to));
            match channel {
                Some(channel) => channel.send(&message),
                None => debug!("{} is not following us", to.short()),
            }
        }
    }

    fn apply_server_message(&mut self, message: ServerMessage) {
        let is_round = matches!(message, ServerMessage::Round(_));
        let completed = self.view.apply(message).is_some();
        if is_round {
            self.emit(ViewEvent::Round(self.view.round.clone()));
        } else {
            self.emit(ViewEvent::Player(self.view.player.clone()));
        }
        if completed {
            self.stats.rounds_completed += 1;
            self.emit(ViewEvent::History(self.view.history.clone()));
        }
    }

    fn peers_changed(&mut self) {
        self.emit(ViewEvent::Peers(self.registry.snapshot()));
        let change = self.election.update(&self.registry);
        self.reconcile(change);
    }

    fn reconcile(&mut self, change: Option<LeaderChange>) {
        if let Some(change) = change {
            self.on_leader_change(change);
        }
        self.sync_game();
    }

    fn on_leader_change(&mut self, change: LeaderChange) {
        for extension in self.extensions.values_mut() {
            extension.set_leader(change.current.clone());
        }
        if let Some(channel) = self.server_channel.take() {
            channel.destroy();
        }
        if change.current.as_ref() != Some(self.identity.id()) {
            if let Some(hosted) = self.hosted.take() {
                info!("no longer hosting");
                hosted.close();
            }
        }
        self.view.reset();
        self.emit(ViewEvent::Leader(change.current));
        self.emit(ViewEvent::Round(None));
        self.emit(ViewEvent::Player(Player::default()));
        self.emit(ViewEvent::History(Vec::new()));
    }

    // Point the game channels at whoever the registry says is around.
    fn sync_game(&mut self) {
        let me = self.identity.id().clone();
        match self.election.leader().cloned() {
            Some(leader) if leader == me => {
                let outbound = {
                    let catalog = &self.catalog;
                    let hosted = self.hosted.get_or_insert_with(|| {
                        info!("hosting a new game");
                        HostedGame {
                            server: GameServer::new(catalog.clone()),
                            followers: BTreeMap::new(),
                        }
                    });
                    let mut followers = BTreeMap::new();
                    for peer in self.registry.followers_of(&me) {
                        let id = peer.metadata.id.clone();
                        let kept = hosted
                            .followers
                            .remove(&id)
                            .filter(|channel| channel.wire_id() == peer.wire);
                        let channel = match kept {
                            Some(channel) => channel,
                            None => match self.extensions.get(&peer.wire) {
                                Some(extension) => {
                                    Channel::new(peer.metadata.clone(), extension.outlet())
                                }
                                None => continue,
                            },
                        };
                        followers.insert(id, channel);
                    }
                    for stale in hosted.followers.values() {
                        stale.destroy();
                    }
                    hosted.followers = followers;
                    let players = hosted
                        .followers
                        .keys()
                        .cloned()
                        .chain(std::iter::once(me.clone()));
                    hosted.server.set_peers(players)
                };
                self.deliver(outbound);
            }
            Some(leader) => {
                let wire = self.registry.get(&leader).map(|peer| peer.wire);
                let current = self
                    .server_channel
                    .as_ref()
                    .map_or(false, |channel| Some(channel.wire_id()) == wire);
                if current {
                    return;
                }
                if let Some(channel) = self.server_channel.take() {
                    channel.destroy();
                }
                self.server_channel = self.registry.get(&leader).and_then(|peer| {
                    let extension = self.extensions.get(&peer.wire)?;
                    Some(Channel::new(peer.metadata.clone(), extension.outlet()))
                });
            }
            None => {
                if let Some(channel) = self.server_channel.take() {
                    channel.destroy();
                }
            }
        }
    }

    fn shutdown(self) -> Stats {
        for extension in self.extensions.values() {
            extension.destroy();
        }
        if let Some(hosted) = self.hosted {
            hosted.close();
        }
        info!(
            "node {} stopped after {} rounds",
            self.identity.id().short(),
            self.stats.rounds_completed
        );
        self.stats
    }
}
