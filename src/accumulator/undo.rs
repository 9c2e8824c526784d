#[cfg(feature = "with-serde")]
use serde::Deserialize;
#[cfg(feature = "with-serde")]
use serde::Serialize;

use super::node_hash::NodeHash;

/// A reversible record of one modification. Feeding it back to
/// [super::forest::Forest::undo] or [super::pollard::Pollard::undo]
/// restores the accumulator to the state it had before the corresponding
/// `modify` call, which is what a chain reorg needs.
///
/// The record carries the root snapshot from before the batch, the root
/// values left right after the deletions (the hashes the deletions promoted
/// into root slots), the removed leaves with their positions, and the
/// sibling hashes that walked each removed leaf to its root. The sibling
/// hashes are what make undoing possible on a pollard even after its prune
/// sweep has dropped the branches involved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
pub struct UndoBlock {
    /// Leaf count before the batch was applied.
    pub(crate) prev_num_leaves: u64,
    /// The hashes appended by the batch, in insertion order.
    pub(crate) added: Vec<NodeHash>,
    /// Root hashes before the batch, biggest row first.
    pub(crate) prev_roots: Vec<NodeHash>,
    /// Root hashes after the deletions but before the additions, biggest
    /// row first.
    pub(crate) post_del_roots: Vec<NodeHash>,
    /// The removed leaves: sorted positions and the hashes they held. A
    /// pollard that never cached a removed leaf records it as empty, which
    /// limits what its own record can restore; records produced by a full
    /// forest always carry the hashes.
    pub(crate) deleted: Vec<(u64, NodeHash)>,
    /// The sibling hashes on the removed leaves' paths to their roots, by
    /// position, as they were before the deletions.
    pub(crate) promoted: Vec<(u64, NodeHash)>,
}

impl UndoBlock {
    /// Leaf count before the recorded batch.
    pub fn prev_num_leaves(&self) -> u64 {
        self.prev_num_leaves
    }

    /// How many leaves the recorded batch appended.
    pub fn num_adds(&self) -> u64 {
        self.added.len() as u64
    }

    /// The roots as they were before the recorded batch, biggest row first.
    pub fn prev_roots(&self) -> &[NodeHash] {
        &self.prev_roots
    }

    /// The removed leaves with the positions they occupied.
    pub fn deleted(&self) -> &[(u64, NodeHash)] {
        &self.deleted
    }
}
