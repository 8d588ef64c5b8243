use shared::Hash256;
use thiserror::Error;

use crate::transaction::OutPoint;

/// Serialization / format failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of data")]
    UnexpectedEof,

    #[error("payload exceeds maximum size: {size} > {max}")]
    OversizePayload { size: usize, max: usize },

    #[error("bad network magic: {0:#010x}")]
    BadMagic(u32),

    #[error("invalid field value: {0}")]
    InvalidValue(String),
}

/// Equihash verification failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquihashError {
    #[error("solution buffer has the wrong length")]
    InvalidSolutionLen,

    #[error("duplicate solution indices")]
    DuplicateIndices,

    #[error("solution indices out of canonical order")]
    IncorrectOrder,

    #[error("invalid collision length at recombination level")]
    InvalidCollisionLength,

    #[error("non-zero XOR after recombination")]
    NonZeroXor,
}

/// Proof-of-work failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowError {
    #[error("equihash: {0}")]
    Equihash(#[from] EquihashError),

    #[error("header hash above target")]
    HighHash,
}

/// Storage backend failures; fatal to the current write transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage I/O failure: {0}")]
    Io(String),

    #[error("corrupt entry in bucket {bucket}: {reason}")]
    Corrupt { bucket: String, reason: String },

    #[error("write transaction already finished")]
    Finished,
}

/// Every failure kind surfaced by the consensus core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    // --- Format ---
    #[error("format: {0}")]
    Decode(#[from] DecodeError),

    // --- PoW ---
    #[error("proof of work: {0}")]
    Pow(#[from] PowError),

    // --- Context ---
    #[error("orphan block: parent {0} unknown")]
    OrphanParent(Hash256),

    #[error("an ancestor of this block is invalid")]
    InvalidAncestor,

    #[error("block at height {height} conflicts with the finality checkpoint")]
    Stale { height: u32 },

    #[error("timestamp {got} is not after median time past {median}")]
    BadTimestamp { got: i64, median: i64 },

    #[error("bad difficulty bits: got {got:#010x}, expected {expected:#010x}")]
    WrongBits { got: u32, expected: u32 },

    #[error("bad stake difficulty: got {got}, expected {expected}")]
    WrongStakeDifficulty { got: i64, expected: i64 },

    #[error("wrong proof-of-work algorithm for height {height}")]
    WrongAlgorithm { height: u32 },

    #[error("block version {got} below required {required}")]
    OldBlockVersion { got: u32, required: u32 },

    #[error("header height {got} does not follow parent height {parent}")]
    BadHeight { got: u32, parent: u32 },

    // --- Content ---
    #[error("block has no transactions")]
    NoTransactions,

    #[error("first regular transaction is not a coinbase")]
    FirstTxNotCoinbase,

    #[error("bad coinbase: {0}")]
    BadCoinbase(String),

    #[error("duplicate transaction {0}")]
    DuplicateTx(Hash256),

    #[error("merkle root mismatch: got {got}, expected {expected}")]
    BadMerkleRoot { got: Hash256, expected: Hash256 },

    #[error("stake merkle root mismatch: got {got}, expected {expected}")]
    BadStakeRoot { got: Hash256, expected: Hash256 },

    #[error("stake tally mismatch in header: {0}")]
    BadStakeTally(String),

    // --- Spend ---
    #[error("missing spent output {0}")]
    MissingInput(OutPoint),

    #[error("script failure on input {input_index}: {reason}")]
    ScriptFailure { input_index: usize, reason: String },

    #[error("script version mismatch on input {input_index}")]
    ScriptVersionMismatch { input_index: usize },

    #[error("inputs {total_in} below outputs plus fee {total_out}")]
    ValueImbalance { total_in: i64, total_out: i64 },

    #[error("coinbase output spent at {spend_height} before maturity (created {created_height})")]
    ImmatureCoinbaseSpend {
        created_height: u32,
        spend_height: u32,
    },

    #[error("bad ticket spend: {0}")]
    BadTicketSpend(String),

    #[error("transaction expired at height {expiry}, included at {height}")]
    ExpiredTransaction { height: u32, expiry: u32 },

    #[error("coinbase pays {paid}, expected subsidy plus fees {expected}")]
    BadCoinbaseValue { paid: i64, expected: i64 },

    // --- Stake ---
    #[error("vote does not match a lottery winner")]
    WinnerMismatch,

    #[error("final state mismatch: got {got}, expected {expected}")]
    FinalStateMismatch { got: String, expected: String },

    #[error("too few votes: {got} of {required} required")]
    TooFewVotes { got: u16, required: u16 },

    #[error("ticket pool size mismatch: header {got}, actual {expected}")]
    PoolSizeMismatch { got: u32, expected: u32 },

    #[error("bad ticket lifecycle: {0}")]
    BadTicketLifecycle(String),

    #[error("bad vote: {0}")]
    BadVote(String),

    // --- Internal ---
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("validation cancelled")]
    Cancelled,
}

/// How a failure affects the status of the offending block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Recoverable: the caller should fetch the parent and resubmit
    Orphan,
    /// The header (and every descendant) is permanently invalid
    InvalidHeader,
    /// The block failed contextual spend/stake checks; the header stays
    /// usable and the block may validate again if context changes
    InvalidBlock,
    /// Nothing is known about the block: storage failed or the caller
    /// cancelled
    Transient,
}

impl ValidationError {
    /// Classifies the failure per the propagation rules
    #[must_use]
    pub fn severity(&self) -> Severity {
        use ValidationError as V;
        match self {
            V::OrphanParent(_) => Severity::Orphan,
            V::Store(_) | V::Cancelled => Severity::Transient,
            V::MissingInput(_)
            | V::ScriptFailure { .. }
            | V::ScriptVersionMismatch { .. }
            | V::ValueImbalance { .. }
            | V::ImmatureCoinbaseSpend { .. }
            | V::BadTicketSpend(_)
            | V::ExpiredTransaction { .. }
            | V::BadCoinbaseValue { .. }
            | V::WinnerMismatch
            | V::FinalStateMismatch { .. }
            | V::TooFewVotes { .. }
            | V::PoolSizeMismatch { .. }
            | V::BadTicketLifecycle(_)
            | V::BadVote(_) => Severity::InvalidBlock,
            _ => Severity::InvalidHeader,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classification() {
        assert_eq!(
            ValidationError::OrphanParent(Hash256::zero()).severity(),
            Severity::Orphan
        );
        assert_eq!(
            ValidationError::Pow(PowError::HighHash).severity(),
            Severity::InvalidHeader
        );
        assert_eq!(
            ValidationError::WinnerMismatch.severity(),
            Severity::InvalidBlock
        );
        assert_eq!(
            ValidationError::Store(StoreError::Io("disk".into())).severity(),
            Severity::Transient
        );
    }
}
