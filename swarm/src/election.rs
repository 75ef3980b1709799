//! Who runs the game, as far as this client can tell.
use log::info;

use crate::peer::PeerId;
use crate::registry::PeerRegistry;

/// The local leader changed from `previous` to `current`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderChange {
    pub previous: Option<PeerId>,
    pub current: Option<PeerId>,
}

#[derive(Debug)]
pub struct LeaderElection {
    self_id: PeerId,
    hosting: bool,
    leader: Option<PeerId>,
}

impl LeaderElection {
    pub fn new(self_id: PeerId) -> Self {
        LeaderElection {
            self_id,
            hosting: false,
            leader: None,
        }
    }

    pub fn leader(&self) -> Option<&PeerId> {
        self.leader.as_ref()
    }

    pub fn is_hosting(&self) -> bool {
        self.hosting
    }

    pub fn is_leader(&self) -> bool {
        self.leader.as_ref() == Some(&self.self_id)
    }

    /// Start or stop hosting, then re-run the election.
    pub fn set_hosting(&mut self, hosting: bool, registry: &PeerRegistry) -> Option<LeaderChange> {
        self.hosting = hosting;
        self.update(registry)
    }

    /// Re-evaluate the leader against the current registry.
    ///
    /// A hosting client always leads. Otherwise a leader that has left, or
    /// that is ourselves without hosting, is forgotten, and if there is then
    /// no leader the first self-declared one in id order is adopted.
    pub fn update(&mut self, registry: &PeerRegistry) -> Option<LeaderChange> {
        let next = if self.hosting {
            Some(self.self_id.clone())
        } else {
            let kept = self
                .leader
                .clone()
                .filter(|leader| *leader != self.self_id && registry.contains(leader));
            kept.or_else(|| {
                registry
                    .iter()
                    .map(|peer| &peer.metadata)
                    .find(|metadata| metadata.is_self_declared_leader())
                    .map(|metadata| metadata.id.clone())
            })
        };

        if next == self.leader {
            return None;
        }
        let previous = std::mem::replace(&mut self.leader, next.clone());
        info!(
            "leader changed: {} -> {}",
            display(previous.as_ref()),
            display(next.as_ref())
        );
        Some(LeaderChange {
            previous,
            current: next,
        })
    }
}

fn display(leader: Option<&PeerId>) -> &str {
    leader.map(PeerId::short).unwrap_or("none")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerMetadata;
    use crate::wire::WireId;

    fn add(registry: &mut PeerRegistry, id: &str, leader: Option<&str>) -> WireId {
        let wire = WireId::next();
        registry.on_peer_add(
            wire,
            PeerMetadata {
                id: PeerId::from(id),
                username: id.into(),
                leader: leader.map(PeerId::from),
            },
        );
        wire
    }

    #[test]
    fn hosting_wins_unconditionally() {
        let mut registry = PeerRegistry::new();
        add(&mut registry, "aa", Some("aa"));
        let mut election = LeaderElection::new(PeerId::from("me"));

        let change = election.set_hosting(true, &registry).unwrap();
        assert_eq!(change.current, Some(PeerId::from("me")));
        assert!(election.is_leader());
        assert_eq!(election.update(&registry), None);
    }

    #[test]
    fn first_candidate_in_id_order_is_adopted() {
        let mut registry = PeerRegistry::new();
        add(&mut registry, "c3", Some("c3"));
        add(&mut registry, "a1", Some("c3"));
        add(&mut registry, "b2", Some("b2"));
        let mut election = LeaderElection::new(PeerId::from("me"));

        let change = election.update(&registry).unwrap();
        assert_eq!(change.previous, None);
        assert_eq!(change.current, Some(PeerId::from("b2")));
        assert!(!election.is_leader());
    }

    #[test]
    fn established_leader_is_kept() {
        let mut registry = PeerRegistry::new();
        add(&mut registry, "b2", Some("b2"));
        let mut election = LeaderElection::new(PeerId::from("me"));
        election.update(&registry);

        add(&mut registry, "a1", Some("a1"));
        assert_eq!(election.update(&registry), None);
        assert_eq!(election.leader(), Some(&PeerId::from("b2")));
    }

    #[test]
    fn departed_leader_is_replaced_in_the_same_pass() {
        let mut registry = PeerRegistry::new();
        let wire = add(&mut registry, "b2", Some("b2"));
        add(&mut registry, "d4", Some("d4"));
        let mut election = LeaderElection::new(PeerId::from("me"));
        election.update(&registry);

        registry.on_peer_drop(wire, &PeerId::from("b2"));
        let change = election.update(&registry).unwrap();
        assert_eq!(change.previous, Some(PeerId::from("b2")));
        assert_eq!(change.current, Some(PeerId::from("d4")));
    }

    #[test]
    fn leader_loss_leaves_no_leader() {
        let mut registry = PeerRegistry::new();
        let wire = add(&mut registry, "b2", Some("b2"));
        let mut election = LeaderElection::new(PeerId::from("me"));
        election.update(&registry);
        registry.on_peer_drop(wire, &PeerId::from("b2"));

        let change = election.update(&registry).unwrap();
        assert_eq!(change.current, None);
        assert_eq!(election.leader(), None);
    }

    #[test]
    fn giving_up_hosting_resets_to_remote_candidate() {
        let mut registry = PeerRegistry::new();
        add(&mut registry, "b2", Some("b2"));
        let mut election = LeaderElection::new(PeerId::from("me"));
        election.set_hosting(true, &registry);

        let change = election.set_hosting(false, &registry).unwrap();
        assert_eq!(change.previous, Some(PeerId::from("me")));
        assert_eq!(change.current, Some(PeerId::from("b2")));
    }
}
