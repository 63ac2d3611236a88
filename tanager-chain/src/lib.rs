//! Consensus-critical data structures for Tanager.
//!
//! This crate defines the core Bitcoin entities (blocks, transactions,
//! transparent inputs and outputs), the consensus wire encoding, amounts,
//! difficulty/work arithmetic, and the hash primitives shared by the rest
//! of the node. It deliberately contains no I/O and no policy: everything
//! here is either a value type or a pure function over value types.

#![allow(clippy::unit_arg)]

#[macro_use]
extern crate serde;

pub mod amount;
pub mod block;
pub mod parameters;
pub mod primitives;
pub mod serialize;
pub mod transaction;
pub mod transparent;
pub mod work;

mod cached;

pub use cached::Cached;
pub use serialize::{Decode, Encode, SerializationError, VarInt};
