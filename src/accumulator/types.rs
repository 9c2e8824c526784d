use sha2::Digest;
use sha2::Sha512_256;

#[cfg(feature = "with-serde")]
use serde::Deserialize;
#[cfg(feature = "with-serde")]
use serde::Serialize;

use super::node_hash::NodeHash;

/// One element to be inserted into the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
pub struct Leaf {
    /// The hash of the element committed to.
    pub hash: NodeHash,
    /// Whether a pollard should retain this leaf long-term. If unset, the
    /// leaf is eligible for pruning once its sibling disappears. The full
    /// forest keeps everything and ignores this.
    pub remember: bool,
}

impl Leaf {
    pub fn new(hash: NodeHash, remember: bool) -> Self {
        Leaf { hash, remember }
    }
}

// parent_hash returns the merkle parent of the two passed in nodes.
//
// The empty hash is neutral: combining with it yields the other input
// unchanged. This is what lets a deleted leaf's sibling take over the
// parent slot without recomputation, and what lets additions write over
// roots whose subtrees were deleted out from under them.
pub fn parent_hash(left: &NodeHash, right: &NodeHash) -> NodeHash {
    if left.is_empty() {
        return *right;
    }
    if right.is_empty() {
        return *left;
    }
    let hash = Sha512_256::new()
        .chain_update(left)
        .chain_update(right)
        .finalize();

    let mut inner = [0; 32];
    inner.copy_from_slice(hash.as_slice());
    NodeHash::new(inner)
}
