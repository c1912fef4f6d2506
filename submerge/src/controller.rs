use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use submerge_net::{Ballot, Block, NodeID, PeerConfig, Transport, WireMsg};
use submerge_store::{Snapshot, SnapshotStore};
use submerge_txn::{Action, ApplyOutcome, BuildCandidateError, Ledger, PaxosEngine, PROPOSAL_TIMEOUT};

use crate::console::ConsoleCmd;

/// How long a recovering node waits for `LEDGER_RESPONSE`s before picking a
/// winner and, if it is longer than what's on disk, replacing the local
/// ledger with it.
pub const CATCHUP_WINDOW: Duration = Duration::from_secs(8);

/// Everything the single dispatcher thread consumes: decoded wire traffic,
/// console requests (paired with a reply channel so the caller can block for
/// an answer), and the two flavors of self-addressed timer this system uses.
/// All four arrive down one `mpsc` channel, so handling any one of them is
/// naturally mutually exclusive with handling any other — serialization
/// falls out for free from picking an implementation with a single owning
/// thread.
pub enum Event {
    Wire(WireMsg),
    Command(ConsoleCmd, Sender<ConsoleReply>),
    ProposalTimeout(Ballot),
    CatchupTimeout(u64),
}

/// What a console request gets back. `Blockchain`/`Balances` are structured
/// rather than pre-formatted text so that both the shipped binary (which
/// prints them) and tests (which assert on them) can use the same API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleReply {
    Ok,
    Error(String),
    Blockchain(Vec<Block>),
    Balances(BTreeMap<NodeID, u64>),
}

/// Owns the run/fail/recover lifecycle for one node: the Ledger, the Paxos
/// engine for the slot at the current depth, the `FAILED` flag, and the
/// catch-up protocol's bookkeeping. A `Controller` is not `Send`-shared —
/// exactly one thread ever touches it, via [`Controller::run`]; every other
/// thread in the process (listener, per-connection readers, timers, the
/// console) only ever sends it an [`Event`].
pub struct Controller {
    self_id: NodeID,
    ledger: Ledger,
    paxos: PaxosEngine,
    transport: Transport,
    store: SnapshotStore,
    failed: Arc<AtomicBool>,
    event_tx: Sender<Event>,
    /// Bumped on every `recover`, so a `CatchupTimeout` from a window that a
    /// later `fail`/`recover` has since superseded is recognized as stale
    /// and ignored — the same cancel-by-value-comparison discipline the
    /// Paxos engine uses for proposal ballots.
    catchup_round: u64,
    in_catchup: bool,
    catchup_responses: Vec<(Vec<Block>, BTreeMap<NodeID, u64>)>,
}

impl Controller {
    fn new(
        self_id: NodeID,
        ledger: Ledger,
        transport: Transport,
        store: SnapshotStore,
        failed: Arc<AtomicBool>,
        event_tx: Sender<Event>,
    ) -> Controller {
        let depth = ledger.depth();
        Controller {
            self_id,
            ledger,
            paxos: PaxosEngine::new(self_id, depth),
            transport,
            store,
            failed,
            event_tx,
            catchup_round: 0,
            in_catchup: false,
            catchup_responses: Vec::new(),
        }
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Runs forever, handling one [`Event`] at a time. Returns only when
    /// every [`Sender<Event>`] clone has been dropped, which in practice
    /// means the process is shutting down.
    pub fn run(mut self, rx: Receiver<Event>) {
        while let Ok(event) = rx.recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Wire(msg) => self.handle_wire(msg),
            Event::Command(cmd, reply_tx) => {
                let reply = self.handle_command(cmd);
                let _ = reply_tx.send(reply);
            }
            Event::ProposalTimeout(ballot) => self.handle_proposal_timeout(ballot),
            Event::CatchupTimeout(round) => self.handle_catchup_timeout(round),
        }
    }

    fn handle_command(&mut self, cmd: ConsoleCmd) -> ConsoleReply {
        match cmd {
            ConsoleCmd::MoneyTransfer { dst, amount } => self.submit_transfer(dst, amount),
            ConsoleCmd::FailProcess => {
                self.do_fail();
                ConsoleReply::Ok
            }
            ConsoleCmd::FixProcess => {
                self.do_recover();
                ConsoleReply::Ok
            }
            ConsoleCmd::PrintBlockchain => ConsoleReply::Blockchain(self.ledger.chain().to_vec()),
            ConsoleCmd::PrintBalance => ConsoleReply::Balances(self.ledger.balances().clone()),
        }
    }

    /// While `RUNNING`, builds a candidate block and hands it to the Paxos
    /// engine; an `InsufficientFunds` (or other build-time) error is
    /// reported locally and never reaches Paxos.
    fn submit_transfer(&mut self, dst: NodeID, amount: u64) -> ConsoleReply {
        if self.is_failed() {
            return ConsoleReply::Error("node is in FAILED mode".to_owned());
        }
        match self.ledger.build_candidate(self.self_id, dst, amount) {
            Ok(block) => {
                let actions = self.paxos.propose(block);
                self.process_actions(actions);
                ConsoleReply::Ok
            }
            Err(BuildCandidateError::InsufficientFunds) => {
                ConsoleReply::Error("insufficient funds".to_owned())
            }
            Err(BuildCandidateError::SelfTransfer) => {
                ConsoleReply::Error("sender and receiver must differ".to_owned())
            }
            Err(BuildCandidateError::NonPositiveAmount) => {
                ConsoleReply::Error("amount must be positive".to_owned())
            }
        }
    }

    /// Cancels the live proposal (by discarding it — any in-flight timer
    /// becomes a no-op by value comparison), drops the catch-up window if
    /// one is open, and flips `FAILED` so `Transport` starts dropping all
    /// traffic.
    fn do_fail(&mut self) {
        info!(node = %self.self_id, "entering FAILED mode");
        self.failed.store(true, Ordering::SeqCst);
        self.paxos.abandon_proposal();
        self.in_catchup = false;
        self.catchup_responses.clear();
    }

    /// Re-enables traffic and kicks off a fresh catch-up round. Does not
    /// retry any proposal this node may have abandoned on `fail` — that
    /// transfer is simply lost unless some other node's proposer picks it
    /// back up.
    fn do_recover(&mut self) {
        info!(node = %self.self_id, "recovering, starting catch-up");
        self.failed.store(false, Ordering::SeqCst);
        self.catchup_round += 1;
        let round = self.catchup_round;
        self.catchup_responses.clear();
        self.in_catchup = true;
        self.transport.broadcast(WireMsg::RequestLedger { from: self.self_id });
        self.start_catchup_timer(round);
    }

    /// `Transport`'s reader threads already drop everything inbound while
    /// this node is `FAILED` before it ever reaches the mailbox; this check
    /// only guards the race where a message was already queued in the
    /// `Event` channel the instant `fail` ran.
    fn handle_wire(&mut self, msg: WireMsg) {
        if self.is_failed() {
            return;
        }
        match msg {
            WireMsg::RequestLedger { from } => self.handle_request_ledger(from),
            WireMsg::LedgerResponse { chain, balances, .. } => self.handle_ledger_response(chain, balances),
            other => {
                let actions = self.dispatch_paxos(other);
                self.process_actions(actions);
            }
        }
    }

    fn handle_request_ledger(&mut self, from: NodeID) {
        self.transport.send(
            from,
            WireMsg::LedgerResponse {
                from: self.self_id,
                chain: self.ledger.chain().to_vec(),
                balances: self.ledger.balances().clone(),
            },
        );
    }

    fn handle_ledger_response(&mut self, chain: Vec<Block>, balances: BTreeMap<NodeID, u64>) {
        if !self.in_catchup {
            return;
        }
        self.catchup_responses.push((chain, balances));
    }

    /// Among every response collected during the catch-up window, picks
    /// the longest one that also passes full validation; ties
    /// go to whichever arrived first (we only replace `best` on a strictly
    /// greater length). If nothing beats the local depth, the ledger is left
    /// untouched.
    fn handle_catchup_timeout(&mut self, round: u64) {
        if round != self.catchup_round || !self.in_catchup {
            return;
        }
        self.in_catchup = false;
        let local_depth = self.ledger.depth();
        let mut best: Option<(usize, Ledger)> = None;
        for (chain, _balances) in self.catchup_responses.drain(..) {
            if (chain.len() as u64) <= local_depth {
                continue;
            }
            let Ok(validated) = Ledger::validate_chain(&chain) else {
                continue;
            };
            let len = chain.len();
            let better = best.as_ref().is_none_or(|(best_len, _)| len > *best_len);
            if better {
                best = Some((len, validated));
            }
        }
        if let Some((_, validated)) = best {
            info!(node = %self.self_id, depth = validated.depth(), "catch-up replaced ledger");
            self.ledger = validated;
            self.paxos.advance_to_depth(self.ledger.depth());
            self.persist();
        }
    }

    fn handle_proposal_timeout(&mut self, ballot: Ballot) {
        if self.is_failed() {
            return;
        }
        let actions = self.paxos.on_proposal_timeout(ballot);
        self.process_actions(actions);
    }

    /// Routes one Paxos-protocol `WireMsg` to the matching `PaxosEngine`
    /// handler. `REQUEST_LEDGER`/`LEDGER_RESPONSE` never reach here — they
    /// are Node Controller business, handled directly by `handle_wire`.
    fn dispatch_paxos(&mut self, msg: WireMsg) -> Vec<Action> {
        match msg {
            WireMsg::Prepare { ballot, .. } => self.paxos.on_prepare(ballot),
            WireMsg::Promise { from, ballot, accepted_ballot, accepted_value } => {
                self.paxos.on_promise(from, ballot, accepted_ballot, accepted_value)
            }
            WireMsg::Accept { ballot, value, .. } => self.paxos.on_accept(ballot, value),
            WireMsg::Accepted { from, ballot, value } => self.paxos.on_accepted(from, ballot, value),
            WireMsg::Decide { value, .. } => self.paxos.on_decide(value),
            WireMsg::RequestLedger { .. } | WireMsg::LedgerResponse { .. } => vec![],
        }
    }

    /// Carries out a batch of [`Action`]s. A `Send` addressed to this same
    /// node and every `Broadcast` are fed back into [`Self::dispatch_paxos`]
    /// immediately — a proposer broadcasting PREPARE(b) also handles
    /// PREPARE(b) locally as an acceptor — so one inbound message can
    /// cascade through several role transitions (PREPARE -> self-PROMISE
    /// -> ACCEPT)
    /// without leaving this thread or touching the network for the
    /// self-addressed half of it.
    fn process_actions(&mut self, actions: Vec<Action>) {
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Send(to, msg) => {
                    if to == self.self_id {
                        queue.extend(self.dispatch_paxos(msg));
                    } else {
                        self.transport.send(to, msg);
                    }
                }
                Action::Broadcast(msg) => {
                    self.transport.broadcast(msg.clone());
                    queue.extend(self.dispatch_paxos(msg));
                }
                Action::StartProposalTimeout(ballot) => self.start_proposal_timer(ballot),
                Action::Decided(block) => self.commit(block),
            }
        }
    }

    /// The only caller of `Ledger::apply` outside of catch-up. Duplicate and
    /// Invalid outcomes are expected, frequently-taken branches — a `DECIDE`
    /// arriving twice, or arriving late for a depth this node has already
    /// moved past via catch-up, is silently absorbed here rather than
    /// treated as an error.
    fn commit(&mut self, block: Block) {
        match self.ledger.apply(block) {
            ApplyOutcome::Applied => {
                self.paxos.advance_to_depth(self.ledger.depth());
                self.persist();
            }
            ApplyOutcome::Duplicate => {}
            ApplyOutcome::Invalid(reason) => {
                warn!(node = %self.self_id, ?reason, "rejected a decided block");
            }
        }
    }

    /// A snapshot write failure is fatal and must abort the process rather
    /// than risk silently diverging from what's on disk.
    fn persist(&self) {
        let snapshot = Snapshot {
            chain: self.ledger.chain().to_vec(),
            balances: self.ledger.balances().clone(),
        };
        if let Err(e) = self.store.save(&snapshot) {
            error!(node = %self.self_id, error = ?e, "fatal: snapshot write failed");
            panic!("snapshot write failed for node {}: {e:?}", self.self_id);
        }
    }

    fn start_proposal_timer(&self, ballot: Ballot) {
        let tx = self.event_tx.clone();
        std::thread::spawn(move || {
            std::thread::sleep(PROPOSAL_TIMEOUT);
            let _ = tx.send(Event::ProposalTimeout(ballot));
        });
    }

    fn start_catchup_timer(&self, round: u64) {
        let tx = self.event_tx.clone();
        std::thread::spawn(move || {
            std::thread::sleep(CATCHUP_WINDOW);
            let _ = tx.send(Event::CatchupTimeout(round));
        });
    }
}

/// A cheap, cloneable front for a running [`Controller`]. Every method sends
/// one [`Event::Command`] and blocks on its reply, the same synchronous
/// request/response shape the console surface presents.
#[derive(Clone)]
pub struct Handle {
    tx: Sender<Event>,
}

impl Handle {
    fn command(&self, cmd: ConsoleCmd) -> ConsoleReply {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Event::Command(cmd, reply_tx))
            .expect("controller thread is gone");
        reply_rx.recv().expect("controller dropped its reply sender")
    }

    pub fn submit_transfer(&self, dst: NodeID, amount: u64) -> ConsoleReply {
        self.command(ConsoleCmd::MoneyTransfer { dst, amount })
    }

    pub fn fail(&self) -> ConsoleReply {
        self.command(ConsoleCmd::FailProcess)
    }

    pub fn recover(&self) -> ConsoleReply {
        self.command(ConsoleCmd::FixProcess)
    }

    pub fn read_ledger(&self) -> ConsoleReply {
        self.command(ConsoleCmd::PrintBlockchain)
    }

    pub fn read_balances(&self) -> ConsoleReply {
        self.command(ConsoleCmd::PrintBalance)
    }
}

/// Boots one node: binds its listener, loads its snapshot from `data_dir`,
/// and starts the single dispatcher thread that owns the Ledger, the Paxos
/// engine, and the `FAILED` flag for the rest of the process's life. The
/// dispatcher thread runs detached; the returned [`Handle`] is the only way
/// the rest of the process talks to it.
pub fn spawn_node(self_id: NodeID, peers: PeerConfig, data_dir: &Path) -> std::io::Result<Handle> {
    let (event_tx, event_rx) = mpsc::channel();
    let (wire_tx, wire_rx) = mpsc::channel();
    let failed = Arc::new(AtomicBool::new(false));

    let transport = Transport::new(self_id, peers, Arc::clone(&failed), wire_tx)?;

    let forward_tx = event_tx.clone();
    std::thread::spawn(move || {
        for (_from, msg) in wire_rx {
            if forward_tx.send(Event::Wire(msg)).is_err() {
                break;
            }
        }
    });

    let store = SnapshotStore::new(data_dir, self_id);
    let snapshot = store.load().expect("snapshot load failed");
    let ledger = Ledger::from_parts(snapshot.chain, snapshot.balances);

    let controller = Controller::new(self_id, ledger, transport, store, failed, event_tx.clone());
    std::thread::spawn(move || controller.run(event_rx));

    Ok(Handle { tx: event_tx })
}
