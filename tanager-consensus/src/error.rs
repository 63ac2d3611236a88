//! Consensus error types, one enum per layer.

use thiserror::Error;

use tanager_chain::block::{self, Height};
use tanager_chain::work::ExpandedDifficulty;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BlockError {
    #[error("block has no transactions")]
    NoTransactions,

    #[error("block hash {hash:?} at {height:?} does not meet target {target:?}")]
    Pow {
        height: Height,
        hash: block::Hash,
        target: ExpandedDifficulty,
    },

    #[error("invalid difficulty encoding at {0:?} {1:?}")]
    InvalidDifficulty(Height, block::Hash),

    #[error("target above the network difficulty limit at {0:?} {1:?}")]
    TargetDifficultyLimit(Height, block::Hash),

    #[error("merkle root mismatch: computed {actual:?}, header says {expected:?}")]
    Merkle {
        actual: block::merkle::Root,
        expected: block::merkle::Root,
    },

    #[error("block contains duplicate transactions")]
    DuplicateTransaction,

    #[error("block structure invalid: {0}")]
    Structure(&'static str),

    #[error("block exceeds the weight limit: {0}")]
    ExcessiveWeight(usize),

    #[error("block exceeds the legacy size limit: {0}")]
    ExcessiveSize(usize),

    #[error("block exceeds the sigop limit: {0}")]
    ExcessiveSigops(usize),

    #[error("coinbase encodes height {encoded:?}, expected {expected:?}")]
    CoinbaseHeight {
        encoded: Option<Height>,
        expected: Height,
    },

    #[error("coinbase claims {claimed} but subsidy plus fees is {allowed}")]
    CoinbaseSubsidy { claimed: i64, allowed: i64 },

    #[error("coinbase script length {0} outside 2..=100")]
    CoinbaseScriptSize(usize),

    #[error("witness commitment missing or mismatched")]
    WitnessCommitment,

    #[error("block time {0} too far past the local clock")]
    TimeTooFarAhead(u32),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Subsidy(#[from] SubsidyError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction is null")]
    Null,

    #[error("transaction has no inputs")]
    EmptyInputs,

    #[error("transaction has no outputs")]
    EmptyOutputs,

    #[error("transaction spends the same outpoint twice")]
    DuplicateInput,

    #[error("coinbase must be the first transaction")]
    CoinbasePosition,

    #[error("a non-coinbase transaction carries a coinbase input")]
    CoinbaseInputFound,

    #[error("output value is negative")]
    NegativeValue,

    #[error("output value exceeds the monetary cap")]
    ValueTooLarge,

    #[error("output total overflows the monetary cap")]
    TotalOverflow,

    #[error("outputs exceed inputs by {0} satoshis")]
    InsufficientFunds(i64),

    #[error("coinbase script length {0} outside 2..=100")]
    CoinbaseScriptSize(usize),

    #[error("coinbase output spent before maturity (created {created:?}, spent {spent:?})")]
    ImmatureCoinbase { created: Height, spent: Height },

    #[error("transaction is not final at height {0:?}")]
    NotFinal(Height),

    #[error("sequence lock not satisfied at height {0:?}")]
    SequenceLocked(Height),

    #[error("transaction exceeds the size limit: {0}")]
    OversizeTransaction(usize),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubsidyError {
    #[error("block has no coinbase transaction")]
    NoCoinbase,

    #[error("fee arithmetic overflowed")]
    FeeOverflow,
}
