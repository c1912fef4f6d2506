// The persistence store is the durable per-node snapshot of (chain,
// balances). It is intentionally the simplest thing that can work: there is
// no incremental log, because the snapshot is small (one block per
// transfer) and rewriting it whole after every commit is cheap and easy to
// reason about. The only hard requirement is that a crash mid-write must
// never leave a torn file on disk, which is why `save` always goes through
// a temp file in the same directory followed by a rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use submerge_base::Result;
use submerge_net::{Block, NodeID};

pub const INITIAL_BALANCE: u64 = 100;

/// The durable contents of one node: its chain and the balance table
/// derived from it. `submerge-txn`'s `Ledger` is the in-memory counterpart;
/// this type is its serialized form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub chain: Vec<Block>,
    pub balances: BTreeMap<NodeID, u64>,
}

impl Snapshot {
    pub fn empty() -> Snapshot {
        let balances = NodeID::all().map(|id| (id, INITIAL_BALANCE)).collect();
        Snapshot {
            chain: Vec::new(),
            balances,
        }
    }
}

/// Owns one node's snapshot file on disk.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(data_dir: &Path, self_id: NodeID) -> SnapshotStore {
        SnapshotStore {
            path: data_dir.join(format!("node-{}.json", self_id.0)),
        }
    }

    /// Returns the last successfully saved snapshot, or [`Snapshot::empty`]
    /// if none exists yet. A snapshot file that exists but fails to parse is
    /// a fatal error: it means the write-temp-then-rename contract was
    /// violated somewhere upstream, and silently treating it as empty would
    /// throw away a committed ledger.
    pub fn load(&self) -> Result<Snapshot> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::empty()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the whole snapshot to a temp file in the same directory as
    /// the target, then renames it into place. The rename is atomic on any
    /// filesystem POSIX cares about, so a concurrent reader (or a crash)
    /// never observes a partially-written snapshot.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, snapshot)?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}
