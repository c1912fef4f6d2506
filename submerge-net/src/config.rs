use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use submerge_base::{err, Result};

use crate::NodeID;

/// One entry of the static peer table: `node_id -> (host, port)`. Loaded
/// once at startup; there is no reload.
#[derive(Debug, Clone, Deserialize)]
struct PeerEntry {
    id: i64,
    host: String,
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct PeerFile {
    peer: Vec<PeerEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct PeerConfig {
    addrs: BTreeMap<NodeID, SocketAddr>,
}

impl PeerConfig {
    pub fn load(path: &Path) -> Result<PeerConfig> {
        let text = std::fs::read_to_string(path)?;
        let parsed: PeerFile = toml::from_str(&text)?;
        let mut addrs = BTreeMap::new();
        for entry in parsed.peer {
            let addr: SocketAddr = format!("{}:{}", entry.host, entry.port).parse()?;
            addrs.insert(NodeID(entry.id), addr);
        }
        if addrs.len() != NodeID::COUNT as usize {
            return Err(err(format!(
                "peer config must name exactly {} nodes, found {}",
                NodeID::COUNT,
                addrs.len()
            )));
        }
        Ok(PeerConfig { addrs })
    }

    pub fn addr_of(&self, id: NodeID) -> Option<SocketAddr> {
        self.addrs.get(&id).copied()
    }

    pub fn peers_other_than(&self, self_id: NodeID) -> impl Iterator<Item = NodeID> + '_ {
        self.addrs.keys().copied().filter(move |id| *id != self_id)
    }

    pub fn all_ids(&self) -> impl Iterator<Item = NodeID> + '_ {
        self.addrs.keys().copied()
    }
}
