use std::collections::BTreeMap;

use submerge_net::{Block, NodeID, GENESIS_PREV_HASH};

pub const INITIAL_BALANCE: u64 = 100;

/// The chained sequence of committed blocks plus the balance table it
/// implies. `apply` is the only mutator — both normal commits and catch-up
/// replacement funnel through it, the latter via [`Ledger::validate_chain`]
/// applying into a fresh ledger that is then swapped in wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    chain: Vec<Block>,
    balances: BTreeMap<NodeID, u64>,
}

/// Why a candidate transfer could not even be built. Distinct from
/// [`ApplyOutcome::Invalid`]: these are user errors caught before a block
/// is ever constructed, not protocol-level rejections of an existing block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildCandidateError {
    SelfTransfer,
    NonPositiveAmount,
    InsufficientFunds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    PrevHashMismatch,
    BadProofOfWork,
    HashMismatch,
    SelfTransfer,
    NonPositiveAmount,
    InsufficientFunds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Duplicate,
    Invalid(InvalidReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainError {
    Empty,
    InvalidAt { depth: u64, reason: InvalidReason },
}

impl Ledger {
    pub fn empty() -> Ledger {
        let balances = NodeID::all().map(|id| (id, INITIAL_BALANCE)).collect();
        Ledger {
            chain: Vec::new(),
            balances,
        }
    }

    pub fn from_parts(chain: Vec<Block>, balances: BTreeMap<NodeID, u64>) -> Ledger {
        Ledger { chain, balances }
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn balances(&self) -> &BTreeMap<NodeID, u64> {
        &self.balances
    }

    pub fn depth(&self) -> u64 {
        self.chain.len() as u64
    }

    pub fn balance(&self, account: NodeID) -> u64 {
        self.balances.get(&account).copied().unwrap_or(0)
    }

    pub fn tip_hash(&self) -> String {
        self.chain
            .last()
            .map(|b| b.hash.clone())
            .unwrap_or_else(|| GENESIS_PREV_HASH.to_owned())
    }

    pub fn contains_hash(&self, hash: &str) -> bool {
        self.chain.iter().any(|b| b.hash == hash)
    }

    /// Mines a block transferring `amount` from `sender` to `receiver`
    /// against the current tip. Has no side effect on ledger state; this is
    /// the only place a nonce is searched for.
    pub fn build_candidate(
        &self,
        sender: NodeID,
        receiver: NodeID,
        amount: u64,
    ) -> Result<Block, BuildCandidateError> {
        if sender == receiver {
            return Err(BuildCandidateError::SelfTransfer);
        }
        if amount == 0 {
            return Err(BuildCandidateError::NonPositiveAmount);
        }
        if self.balance(sender) < amount {
            return Err(BuildCandidateError::InsufficientFunds);
        }
        Ok(Block::mine(sender, receiver, amount, self.tip_hash()))
    }

    /// Validates and, if valid, appends `block`. The only mutator of `chain`
    /// and `balances`.
    pub fn apply(&mut self, block: Block) -> ApplyOutcome {
        if self.contains_hash(&block.hash) {
            return ApplyOutcome::Duplicate;
        }
        if let Err(reason) = self.check_applies(&block) {
            return ApplyOutcome::Invalid(reason);
        }
        *self.balances.entry(block.sender).or_insert(0) -= block.amount;
        *self.balances.entry(block.receiver).or_insert(0) += block.amount;
        self.chain.push(block);
        ApplyOutcome::Applied
    }

    fn check_applies(&self, block: &Block) -> Result<(), InvalidReason> {
        if block.sender == block.receiver {
            return Err(InvalidReason::SelfTransfer);
        }
        if block.amount == 0 {
            return Err(InvalidReason::NonPositiveAmount);
        }
        if block.prev_hash != self.tip_hash() {
            return Err(InvalidReason::PrevHashMismatch);
        }
        if !block.pow_is_valid() {
            return Err(InvalidReason::BadProofOfWork);
        }
        if !block.hash_is_consistent() {
            return Err(InvalidReason::HashMismatch);
        }
        if self.balance(block.sender) < block.amount {
            return Err(InvalidReason::InsufficientFunds);
        }
        Ok(())
    }

    /// Replays `chain` from depth 0 against fresh `INITIAL_BALANCE`
    /// balances, using exactly [`Ledger::apply`]'s rules. This is the "full
    /// validation" step of the catch-up protocol (spec §4.5): a chain is
    /// valid iff every block in it applies cleanly in sequence.
    pub fn validate_chain(chain: &[Block]) -> Result<Ledger, ChainError> {
        let mut replay = Ledger::empty();
        for (depth, block) in chain.iter().enumerate() {
            match replay.apply(block.clone()) {
                ApplyOutcome::Applied => {}
                ApplyOutcome::Duplicate => {
                    // Only possible if `chain` repeats a hash; apply() never
                    // reports Duplicate against an empty-so-far ledger, but
                    // a malicious/garbled peer chain could still do this.
                    return Err(ChainError::InvalidAt {
                        depth: depth as u64,
                        reason: InvalidReason::HashMismatch,
                    });
                }
                ApplyOutcome::Invalid(reason) => {
                    return Err(ChainError::InvalidAt {
                        depth: depth as u64,
                        reason,
                    });
                }
            }
        }
        Ok(replay)
    }
}
