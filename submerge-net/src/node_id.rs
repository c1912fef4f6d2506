use serde::{Deserialize, Serialize};

/// A Realm is the fixed five-node group running this system. Every node in
/// the group doubles as a ledger account: node 3's balance is account 3's
/// balance. There is one identifier space, not two.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeID(pub i64);

impl NodeID {
    pub const COUNT: i64 = 5;

    pub fn all() -> impl Iterator<Item = NodeID> {
        (1..=Self::COUNT).map(NodeID)
    }
}

impl std::fmt::Display for NodeID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
