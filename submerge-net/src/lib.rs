// submerge-net owns the shared vocabulary of the replicated ledger — node
// identity, the block and ballot data types, the wire protocol, and the
// concrete TCP transport that carries it — the same way the original
// prototype bundled `NodeID`, `RealmTime`, `Msg`/`SpecificMsg`, and the
// `Node` connection state machine into one crate. `submerge-txn` depends on
// this crate for all of the above and adds the Ledger and Paxos algorithms
// on top; it is never the other way around.

mod ballot;
mod block;
mod config;
mod node_id;
mod transport;
mod wire;

pub use ballot::Ballot;
pub use block::{Block, GENESIS_PREV_HASH};
pub use config::PeerConfig;
pub use node_id::NodeID;
pub use transport::{Transport, NET_DELAY};
pub use wire::WireMsg;
