use serde::{Deserialize, Serialize};

use crate::NodeID;

/// Ballots are neither created nor destroyed, they just exist. The overall
/// protocol must guarantee that no two replicas ever work the synod protocol
/// using the same ballot for the same depth. To accomplish this, a ballot is
/// the ordered triple (depth, seq, node), where only `node` is allowed to
/// issue proposals under it.
///
/// Field order matters: `derive(Ord)` compares lexicographically in
/// declaration order, so encoding `depth` first binds every ballot to a
/// single Paxos instance and lets a lagging node recognize a stale PREPARE
/// immediately, before it even looks at `seq`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Ballot {
    pub depth: u64,
    pub seq: u64,
    pub node: NodeID,
}

impl Ballot {
    pub fn new(seq: u64, node: NodeID, depth: u64) -> Ballot {
        Ballot { depth, seq, node }
    }

    /// The smallest possible ballot at a given depth: every real ballot at
    /// that depth (`seq >= 1`) supersedes it, so it is a safe initial value
    /// for `promised_ballot` when a slot begins.
    pub const fn bottom(depth: u64) -> Ballot {
        Ballot {
            depth,
            seq: 0,
            node: NodeID(0),
        }
    }
}
