//! This module is the core of the library. It contains the accumulator in
//! both of its renditions, the batch proof format that connects them, and
//! the positional arithmetic they share.
//!
//! If you need to serve inclusion proofs for arbitrary elements, use
//! [forest::Forest], which materialises the whole forest. If you only need
//! to track a subset of the elements and verify updates produced elsewhere,
//! [pollard::Pollard] holds just the branches you ask it to remember, plus
//! whatever proof data it has ingested.
pub mod error;
pub mod forest;
pub mod node_hash;
pub mod pollard;
pub mod proof;
pub mod types;
pub mod undo;
pub mod util;
