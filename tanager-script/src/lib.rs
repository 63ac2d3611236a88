//! The Bitcoin Script interpreter.
//!
//! Script is a stack language with no loops: a spend supplies an unlock
//! script (or witness) that must leave `true` on the stack after the
//! referenced output's lock script runs. This crate parses, classifies,
//! and executes scripts, counts signature operations, and computes the
//! three generations of signature hashes (legacy, BIP-143, BIP-341).
//!
//! Nothing here touches storage; the [`checker::SignatureChecker`] trait
//! is the seam through which transaction context arrives.

mod error;
mod flags;
mod interpreter;
mod num;
mod stack;

pub mod checker;
pub mod opcode;
pub mod pattern;
pub mod sighash;
pub mod taproot;

pub use error::ScriptError;
pub use flags::VerifyFlags;
pub use interpreter::{eval_script, verify_script};
pub use num::ScriptNum;
pub use opcode::{iter_ops, Opcode, RawOp};
pub use pattern::{classify, count_sigops, witness_program, ScriptType, WitnessProgram};
pub use stack::Stack;

/// Maximum script size in bytes.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum non-push operations per script.
pub const MAX_OPS_PER_SCRIPT: usize = 201;

/// Maximum stack plus altstack depth during execution.
pub const MAX_STACK_SIZE: usize = 1_000;

/// Maximum size of a single stack element in bytes.
pub const MAX_ELEMENT_SIZE: usize = 520;

/// Maximum keys in an OP_CHECKMULTISIG.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;
