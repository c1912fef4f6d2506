use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::NodeID;

/// Sentinel `prev_hash` for the block at depth 0.
pub const GENESIS_PREV_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Last hex digit a block's proof-of-work tag must land in. Acceptance
/// probability is |POW_TAG_DIGITS| / 16 = 5/16.
const POW_TAG_DIGITS: [char; 5] = ['0', '1', '2', '3', '4'];

const NONCE_LEN: usize = 8;

/// A single money transfer, content-addressed by [`Block::hash`] and chained
/// to its predecessor by [`Block::prev_hash`]. Blocks are immutable once
/// constructed; `Ledger` (in `submerge-txn`) is the only thing that decides
/// whether a given block may be appended.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub sender: NodeID,
    pub receiver: NodeID,
    pub amount: u64,
    pub nonce: String,
    pub prev_hash: String,
    pub hash: String,
}

impl Block {
    /// `sha256(sender || receiver || amount || nonce)`, lowercase hex. This
    /// is the proof-of-work tag input; it does not depend on `prev_hash`, so
    /// a nonce search can run before the chain tip is known to have settled.
    pub fn pow_preimage(sender: NodeID, receiver: NodeID, amount: u64, nonce: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(sender.0.to_string());
        hasher.update(receiver.0.to_string());
        hasher.update(amount.to_string());
        hasher.update(nonce);
        hex::encode(hasher.finalize())
    }

    /// Whether `sha256(sender || receiver || amount || nonce)` ends in a
    /// digit from [`POW_TAG_DIGITS`].
    pub fn pow_tag_ok(sender: NodeID, receiver: NodeID, amount: u64, nonce: &str) -> bool {
        let digest = Self::pow_preimage(sender, receiver, amount, nonce);
        digest
            .chars()
            .last()
            .map(|c| POW_TAG_DIGITS.contains(&c))
            .unwrap_or(false)
    }

    /// `sha256(sender || receiver || amount || nonce || prev_hash)`, lowercase
    /// hex — this is the value stored in [`Block::hash`].
    pub fn content_hash(
        sender: NodeID,
        receiver: NodeID,
        amount: u64,
        nonce: &str,
        prev_hash: &str,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(sender.0.to_string());
        hasher.update(receiver.0.to_string());
        hasher.update(amount.to_string());
        hasher.update(nonce);
        hasher.update(prev_hash);
        hex::encode(hasher.finalize())
    }

    /// Draw random 8-character alphanumeric nonces until one satisfies the
    /// PoW tag, then assemble the block against `prev_hash`. This is the
    /// only place a nonce is searched for; callers that already have a
    /// complete `Block` (from the wire, or from a catch-up chain) never call
    /// this again.
    pub fn mine(sender: NodeID, receiver: NodeID, amount: u64, prev_hash: String) -> Block {
        let mut rng = rand::thread_rng();
        loop {
            let nonce: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(NONCE_LEN)
                .map(char::from)
                .collect();
            if Self::pow_tag_ok(sender, receiver, amount, &nonce) {
                let hash = Self::content_hash(sender, receiver, amount, &nonce, &prev_hash);
                return Block {
                    sender,
                    receiver,
                    amount,
                    nonce,
                    prev_hash,
                    hash,
                };
            }
        }
    }

    /// Re-derive [`Block::hash`] from the block's own fields and compare.
    pub fn hash_is_consistent(&self) -> bool {
        self.hash == Self::content_hash(self.sender, self.receiver, self.amount, &self.nonce, &self.prev_hash)
    }

    pub fn pow_is_valid(&self) -> bool {
        Self::pow_tag_ok(self.sender, self.receiver, self.amount, &self.nonce)
    }
}
