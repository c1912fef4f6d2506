// The Node Controller is the top-level component of the replicated ledger:
// it owns the run/fail/recover lifecycle, turns console requests into Paxos
// proposals, and drives the catch-up sub-protocol a restarted node uses to
// rejoin the quorum. Every other crate in the workspace is a leaf this one
// assembles: `submerge-net` for identity, wire messages and transport,
// `submerge-txn` for the Ledger and the Paxos slot engine, `submerge-store`
// for the durable snapshot.
//
// The interactive console itself lives outside this crate — `console`
// exists only so the `submerge` binary has a thin way to turn a line of
// stdin into a request the Controller understands.

mod console;
mod controller;

pub use console::{parse_line, ConsoleCmd, ParseError};
pub use controller::{spawn_node, ConsoleReply, Handle, CATCHUP_WINDOW};
