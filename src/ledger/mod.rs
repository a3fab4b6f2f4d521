//! Hash-chained ledger model: blocks, chains, validation, GCI, merge.
//!
//! Everything here is pure. Persistence lives in [`crate::replica`] and the
//! authoritative copy is reached through [`crate::remote`].

pub mod block;
pub mod chain;

pub use block::Block;
pub use chain::{Chain, gci, merge, validate, validate_segment};
