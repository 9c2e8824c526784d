//! # Grove
//! Grove is a dynamic, hash-based accumulator for an ever-growing set of
//! unique elements, such as the unspent-output set of a cryptocurrency
//! ledger. The set is represented as a forest of perfect Merkle trees whose
//! roots collectively commit to the membership of every live element.
//! Updates are batched: one modification inserts a list of new leaves and
//! deletes a list of existing ones, identified by position.
//!
//! Two representations of the same logical forest are provided. The
//! [accumulator::forest::Forest] materialises every internal hash and can
//! produce inclusion proofs for arbitrary subsets. The
//! [accumulator::pollard::Pollard] is a sparse, pointer-linked rendition
//! that stores only what it needs to validate batch proofs and replay the
//! deletions the full forest performs, so the two stay in agreement on
//! their roots. For more information, check the documentation of each
//! module.
pub mod accumulator;
