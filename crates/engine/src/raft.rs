//! Raft router seam.
//!
//! Consensus is an external collaborator; the lifecycle subsystem only asks
//! three questions: who are the region's peers, am I the leader, and does a
//! raft node exist at all. Peers are `host:port` strings matching the
//! advertised `server_addr` of each node.

use dashmap::DashMap;

use shardvec_core::{Error, Result};

/// The subsystem's view of the consensus layer.
pub trait RaftRouter: Send + Sync {
    /// All peers of the region's raft group, including this node.
    /// `RaftNotFound` when no raft node exists for the region.
    fn peers(&self, region_id: u64) -> Result<Vec<String>>;

    /// True when this node leads the region's raft group.
    fn is_leader(&self, region_id: u64) -> Result<bool>;
}

struct RaftGroup {
    peers: Vec<String>,
    leader: String,
}

/// Static router for tests and single-process tooling.
#[derive(Default)]
pub struct MemRaftRouter {
    self_addr: String,
    groups: DashMap<u64, RaftGroup>,
}

impl MemRaftRouter {
    /// Router describing the node at `self_addr`.
    pub fn new(self_addr: impl Into<String>) -> Self {
        MemRaftRouter {
            self_addr: self_addr.into(),
            groups: DashMap::new(),
        }
    }

    /// Register a region's raft group.
    pub fn add_group(&self, region_id: u64, peers: Vec<String>, leader: impl Into<String>) {
        self.groups.insert(
            region_id,
            RaftGroup {
                peers,
                leader: leader.into(),
            },
        );
    }

    /// Move a region's leadership.
    pub fn set_leader(&self, region_id: u64, leader: impl Into<String>) {
        if let Some(mut group) = self.groups.get_mut(&region_id) {
            group.leader = leader.into();
        }
    }
}

impl RaftRouter for MemRaftRouter {
    fn peers(&self, region_id: u64) -> Result<Vec<String>> {
        self.groups
            .get(&region_id)
            .map(|group| group.peers.clone())
            .ok_or(Error::RaftNotFound { region_id })
    }

    fn is_leader(&self, region_id: u64) -> Result<bool> {
        self.groups
            .get(&region_id)
            .map(|group| group.leader == self.self_addr)
            .ok_or(Error::RaftNotFound { region_id })
    }
}
