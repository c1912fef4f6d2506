use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Ballot, Block, NodeID};

/// All inter-node communication takes the form of one `WireMsg` per TCP
/// connection: the whole connection's payload is one JSON object, tagged by
/// `type`, and the connection closes once it has been written or read.
/// There is no request/response pairing at the transport level — even
/// `REQUEST_LEDGER`/`LEDGER_RESPONSE` are just two more one-way messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMsg {
    #[serde(rename = "PREPARE")]
    Prepare { from: NodeID, ballot: Ballot },

    #[serde(rename = "PROMISE")]
    Promise {
        from: NodeID,
        ballot: Ballot,
        accepted_ballot: Option<Ballot>,
        accepted_value: Option<Block>,
    },

    #[serde(rename = "ACCEPT")]
    Accept {
        from: NodeID,
        ballot: Ballot,
        value: Block,
    },

    #[serde(rename = "ACCEPTED")]
    Accepted {
        from: NodeID,
        ballot: Ballot,
        value: Block,
    },

    #[serde(rename = "DECIDE")]
    Decide { from: NodeID, value: Block },

    #[serde(rename = "REQUEST_LEDGER")]
    RequestLedger { from: NodeID },

    #[serde(rename = "LEDGER_RESPONSE")]
    LedgerResponse {
        from: NodeID,
        chain: Vec<Block>,
        balances: BTreeMap<NodeID, u64>,
    },
}

impl WireMsg {
    pub fn from(&self) -> NodeID {
        match self {
            WireMsg::Prepare { from, .. }
            | WireMsg::Promise { from, .. }
            | WireMsg::Accept { from, .. }
            | WireMsg::Accepted { from, .. }
            | WireMsg::Decide { from, .. }
            | WireMsg::RequestLedger { from }
            | WireMsg::LedgerResponse { from, .. } => *from,
        }
    }
}
