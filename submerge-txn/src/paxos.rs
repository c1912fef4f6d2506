use std::collections::BTreeSet;
use std::time::Duration;

use submerge_net::{Ballot, Block, NodeID, WireMsg};

/// Out of five nodes, three form a majority. Agreement only requires a
/// majority at each phase, never all five — this is what lets the protocol
/// make progress with one node failed.
const MAJORITY: usize = 3;

/// How long a proposer waits for its ballot to decide before retrying with a
/// fresh, higher ballot for the same value. The engine itself never starts
/// this timer (it has no clock) — it only asks the caller to via
/// [`Action::StartProposalTimeout`].
pub const PROPOSAL_TIMEOUT: Duration = Duration::from_secs(20);

/// What the caller (the Node Controller's dispatcher) must do in response to
/// a [`PaxosEngine`] transition. The engine itself never touches a
/// [`submerge_net::Transport`] or a clock; it only decides what should
/// happen and leaves carrying it out to its caller.
#[derive(Debug, Clone)]
pub enum Action {
    Send(NodeID, WireMsg),
    Broadcast(WireMsg),
    /// Start (or restart) a retry timer for this exact ballot. If the
    /// ballot the timer fires for no longer matches what the engine is
    /// currently proposing, the timeout is stale and must be ignored —
    /// this is the cancellation-by-value-comparison contract.
    StartProposalTimeout(Ballot),
    /// This depth has reached DECIDE. The caller applies `value` to the
    /// [`crate::Ledger`] and then calls [`PaxosEngine::advance_to_depth`]
    /// with the new depth before any further messages for it are handled.
    Decided(Block),
}

/// An acceptor's durable view of one depth's ballot protocol. Survives
/// across restarts only within a process lifetime — Paxos acceptor state is
/// not part of the persisted snapshot, since the Decided value it protects
/// already is: this lives only as long as its depth is undecided.
#[derive(Debug, Clone)]
struct Slot {
    promised: Ballot,
    accepted: Option<(Ballot, Block)>,
}

impl Slot {
    fn new(depth: u64) -> Slot {
        Slot {
            promised: Ballot::bottom(depth),
            accepted: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Preparing,
    Accepting,
}

/// This node's own in-flight proposal for the current depth, if any. A node
/// can be an acceptor for another node's ballot and a proposer for its own
/// at the same time; this struct only tracks the latter.
#[derive(Debug, Clone)]
struct Proposal {
    ballot: Ballot,
    value: Block,
    phase: Phase,
    promises: BTreeSet<NodeID>,
    best_accepted: Option<(Ballot, Block)>,
    accepts: BTreeSet<NodeID>,
}

/// Runs single-decree Paxos for exactly one ledger depth at a time. A fresh
/// `PaxosEngine` starts at depth 0; every DECIDE advances it to the next
/// depth via [`PaxosEngine::advance_to_depth`], which is also the only
/// place prior-depth acceptor state is discarded.
#[derive(Debug, Clone)]
pub struct PaxosEngine {
    self_id: NodeID,
    depth: u64,
    slot: Slot,
    proposal: Option<Proposal>,
    /// Monotonic per-process counter used to mint each new ballot's `seq`.
    /// Deliberately not persisted: a restarted node starting back at
    /// `seq = 1` can only ever produce a ballot a quorum has already
    /// promised past, so it just loses a race rather than violating safety.
    next_seq: u64,
}

impl PaxosEngine {
    pub fn new(self_id: NodeID, depth: u64) -> PaxosEngine {
        PaxosEngine {
            self_id,
            depth,
            slot: Slot::new(depth),
            proposal: None,
            next_seq: 1,
        }
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// True once this depth has been decided and is just waiting to be
    /// advanced past.
    pub fn is_deciding(&self) -> bool {
        self.proposal
            .as_ref()
            .is_some_and(|p| p.phase == Phase::Accepting && p.accepts.len() >= MAJORITY)
    }

    fn new_ballot(&mut self) -> Ballot {
        let ballot = Ballot::new(self.next_seq, self.self_id, self.depth);
        self.next_seq += 1;
        ballot
    }

    /// Starts a fresh ballot proposing `value` at the current depth and
    /// broadcasts PREPARE. Called both for a brand new proposal and for a
    /// proposal-timeout retry (with the same `value`, a higher `seq`).
    pub fn propose(&mut self, value: Block) -> Vec<Action> {
        let ballot = self.new_ballot();
        self.proposal = Some(Proposal {
            ballot,
            value,
            phase: Phase::Preparing,
            promises: BTreeSet::new(),
            best_accepted: None,
            accepts: BTreeSet::new(),
        });
        vec![
            Action::Broadcast(WireMsg::Prepare {
                from: self.self_id,
                ballot,
            }),
            Action::StartProposalTimeout(ballot),
        ]
    }

    /// A proposal-timeout fired for `ballot`. Ignored if stale (this engine
    /// has since moved on to a higher ballot, a different depth, or
    /// decided) — otherwise retries with a fresh, higher ballot for the
    /// same value.
    pub fn on_proposal_timeout(&mut self, ballot: Ballot) -> Vec<Action> {
        let still_current = self
            .proposal
            .as_ref()
            .is_some_and(|p| p.ballot == ballot && !(p.phase == Phase::Accepting && p.accepts.len() >= MAJORITY));
        if !still_current {
            return vec![];
        }
        let value = self.proposal.as_ref().unwrap().value.clone();
        self.propose(value)
    }

    /// Acceptor role: a PREPARE arrived for `ballot`. Promises iff `ballot`
    /// is strictly greater than anything already promised at this depth.
    pub fn on_prepare(&mut self, ballot: Ballot) -> Vec<Action> {
        if ballot.depth != self.depth || ballot <= self.slot.promised {
            return vec![];
        }
        self.slot.promised = ballot;
        let (accepted_ballot, accepted_value) = match &self.slot.accepted {
            Some((b, v)) => (Some(*b), Some(v.clone())),
            None => (None, None),
        };
        vec![Action::Send(
            ballot.node,
            WireMsg::Promise {
                from: self.self_id,
                ballot,
                accepted_ballot,
                accepted_value,
            },
        )]
    }

    /// Proposer role: a PROMISE arrived. Once a majority of promises for
    /// the current ballot are in, picks the value associated with the
    /// highest accepted ballot reported by any acceptor (or its own value,
    /// if nobody has accepted anything yet) and moves to the ACCEPT phase.
    pub fn on_promise(
        &mut self,
        from: NodeID,
        ballot: Ballot,
        accepted_ballot: Option<Ballot>,
        accepted_value: Option<Block>,
    ) -> Vec<Action> {
        let Some(proposal) = &mut self.proposal else {
            return vec![];
        };
        if proposal.ballot != ballot || proposal.phase != Phase::Preparing {
            return vec![];
        }
        proposal.promises.insert(from);
        if let (Some(ab), Some(av)) = (accepted_ballot, accepted_value) {
            let supersedes = proposal.best_accepted.as_ref().is_none_or(|(best, _)| ab > *best);
            if supersedes {
                proposal.best_accepted = Some((ab, av));
            }
        }
        if proposal.promises.len() < MAJORITY {
            return vec![];
        }
        let value = proposal
            .best_accepted
            .as_ref()
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| proposal.value.clone());
        proposal.phase = Phase::Accepting;
        proposal.value = value.clone();
        vec![Action::Broadcast(WireMsg::Accept {
            from: self.self_id,
            ballot,
            value,
        })]
    }

    /// Acceptor role: an ACCEPT arrived for `ballot`/`value`. Accepts iff
    /// `ballot` is at least as large as anything already promised.
    pub fn on_accept(&mut self, ballot: Ballot, value: Block) -> Vec<Action> {
        if ballot.depth != self.depth || ballot < self.slot.promised {
            return vec![];
        }
        self.slot.promised = ballot;
        self.slot.accepted = Some((ballot, value.clone()));
        vec![Action::Send(
            ballot.node,
            WireMsg::Accepted {
                from: self.self_id,
                ballot,
                value,
            },
        )]
    }

    /// Proposer role: an ACCEPTED arrived. Once a majority of acceptances
    /// for the current ballot are in, the value is decided: broadcasts
    /// DECIDE and reports it to the caller.
    pub fn on_accepted(&mut self, from: NodeID, ballot: Ballot, value: Block) -> Vec<Action> {
        let Some(proposal) = &mut self.proposal else {
            return vec![];
        };
        if proposal.ballot != ballot || proposal.phase != Phase::Accepting {
            return vec![];
        }
        proposal.accepts.insert(from);
        if proposal.accepts.len() < MAJORITY {
            return vec![];
        }
        vec![
            Action::Broadcast(WireMsg::Decide {
                from: self.self_id,
                value: value.clone(),
            }),
            Action::Decided(value),
        ]
    }

    /// Any node's view of DECIDE, whether it was the proposer or not.
    /// Idempotent: a DECIDE for an already-advanced depth is simply ignored
    /// by the caller, since [`Ledger::apply`](crate::Ledger::apply) reports
    /// duplicates rather than erroring.
    pub fn on_decide(&mut self, value: Block) -> Vec<Action> {
        vec![Action::Decided(value)]
    }

    /// Moves the engine on to `new_depth`, discarding this depth's acceptor
    /// state and any in-flight proposal. Must be called exactly once per
    /// DECIDE, after the decided value has been applied to the ledger.
    pub fn advance_to_depth(&mut self, new_depth: u64) {
        self.depth = new_depth;
        self.slot = Slot::new(new_depth);
        self.proposal = None;
    }

    /// Discards this node's in-flight proposal without advancing the depth.
    /// Called when the Node Controller transitions to `FAILED`: a stray
    /// `ProposalTimeout` for the abandoned ballot becomes a no-op because
    /// `on_proposal_timeout` compares against `self.proposal`, which is now
    /// `None` — cancellation by value comparison, not by an epoch counter.
    /// Acceptor state (`slot`) is untouched, since a failed node that
    /// recovers without a depth change should still honor any promise it
    /// already made.
    pub fn abandon_proposal(&mut self) {
        self.proposal = None;
    }
}
