//! The dense, array-backed rendition of the accumulator. Every internal
//! hash is materialised, which is what lets a full forest produce a
//! [BatchProof] for any subset of the live leaves. Nodes live in a flat
//! vector indexed by position; the vector is re-laid-out whenever the
//! forest grows (or, on undo, shrinks) a row, since positions encode the
//! total row count.
use std::collections::HashMap;
use std::fmt::Display;

use tracing::debug;

use super::error::Error;
use super::node_hash::MiniHash;
use super::node_hash::NodeHash;
use super::proof::BatchProof;
use super::types::parent_hash;
use super::types::Leaf;
use super::undo::UndoBlock;
use super::util;

/// The full accumulator. Leaves are appended at the next free position and
/// never move; deleting a leaf empties its slot and re-derives the hashes
/// above it, the empty hash being neutral under [parent_hash]. The set of
/// roots, one per set bit of the leaf count, commits to every live element.
pub struct Forest {
    /// Every position in the forest, empty meaning absent. The vector
    /// always spans `2 << rows` slots.
    data: Vec<NodeHash>,
    /// How many leaves were ever appended. Deletion never decreases this.
    num_leaves: u64,
    /// Rows the forest currently spans; always `tree_rows(num_leaves)`.
    rows: u8,
    /// Fingerprints of the live leaves to their positions.
    position_map: HashMap<MiniHash, u64>,
    /// How many parent hashes this forest ever computed.
    hashes_ever: u64,
}

impl Forest {
    /// Creates an empty forest. `forest_rows_hint` pre-allocates room for
    /// `2^hint` leaves; it does not change the forest's addressing, which
    /// always follows the actual leaf count.
    pub fn new(forest_rows_hint: u8) -> Self {
        let mut data = Vec::with_capacity(2_usize << forest_rows_hint);
        data.resize(2, NodeHash::empty());
        Forest {
            data,
            num_leaves: 0,
            rows: 0,
            position_map: HashMap::new(),
            hashes_ever: 0,
        }
    }

    /// How many leaves were ever appended to this forest.
    pub fn num_leaves(&self) -> u64 {
        self.num_leaves
    }

    /// How many parent hashes this forest computed over its lifetime.
    pub fn hashes_ever(&self) -> u64 {
        self.hashes_ever
    }

    /// The root hashes, biggest row first. Roots whose subtrees were
    /// deleted out entirely show up as the empty hash.
    pub fn roots(&self) -> Vec<NodeHash> {
        util::root_positions(self.num_leaves, self.rows)
            .iter()
            .map(|pos| self.get(*pos))
            .collect()
    }

    /// Looks a live leaf up by its hash and returns its current position.
    pub fn position_of(&self, hash: &NodeHash) -> Option<u64> {
        self.position_map.get(&hash.mini()).copied()
    }

    /// Applies one batch: deletes the targets, then appends the additions.
    /// Returns the record that [Forest::undo] needs to reverse the batch.
    /// Validation happens before anything is touched, so a failed batch
    /// leaves the forest unchanged.
    pub fn modify(&mut self, adds: &[Leaf], targets: &[u64]) -> Result<UndoBlock, Error> {
        let mut dels = targets.to_vec();
        dels.sort_unstable();
        for window in dels.windows(2) {
            if window[0] == window[1] {
                return Err(Error::DuplicateTarget(window[0]));
            }
        }
        for target in dels.iter() {
            if *target >= self.num_leaves {
                return Err(Error::OutOfRange(*target));
            }
            if self.get(*target).is_empty() {
                return Err(Error::Missing(*target));
            }
        }

        let prev_num_leaves = self.num_leaves;
        let prev_roots = self.roots();
        let deleted: Vec<(u64, NodeHash)> =
            dels.iter().map(|target| (*target, self.get(*target))).collect();
        let promoted: Vec<(u64, NodeHash)> =
            util::get_proof_positions(&dels, self.num_leaves, self.rows)
                .into_iter()
                .map(|pos| (pos, self.get(pos)))
                .collect();

        for (pos, hash) in deleted.iter() {
            if self.position_map.get(&hash.mini()) == Some(pos) {
                self.position_map.remove(&hash.mini());
            }
        }
        for target in dels.iter() {
            self.put(*target, NodeHash::empty());
        }
        self.rehash_above(&dels);
        let post_del_roots = self.roots();

        for leaf in adds.iter() {
            self.add_single(leaf.hash);
        }
        debug!(
            adds = adds.len(),
            dels = dels.len(),
            num_leaves = self.num_leaves,
            "applied batch"
        );

        Ok(UndoBlock {
            prev_num_leaves,
            added: adds.iter().map(|leaf| leaf.hash).collect(),
            prev_roots,
            post_del_roots,
            deleted,
            promoted,
        })
    }

    /// Builds the canonical proof for the given targets: the minimum set of
    /// sibling hashes that walks every target to its root, ordered bottom
    /// row up and left to right. The returned proof keeps the targets in
    /// the order the caller passed them.
    pub fn prove_batch(&self, targets: &[u64]) -> Result<BatchProof, Error> {
        let mut sorted = targets.to_vec();
        sorted.sort_unstable();
        for window in sorted.windows(2) {
            if window[0] == window[1] {
                return Err(Error::DuplicateTarget(window[0]));
            }
        }
        for target in sorted.iter() {
            if !util::in_forest(*target, self.num_leaves, self.rows) {
                return Err(Error::OutOfRange(*target));
            }
            if self.get(*target).is_empty() {
                return Err(Error::Missing(*target));
            }
        }

        let positions = util::get_proof_positions(&sorted, self.num_leaves, self.rows);
        let hashes = positions.iter().map(|pos| self.get(*pos)).collect();

        Ok(BatchProof::new(targets.to_vec(), hashes))
    }

    /// Reverses one batch recorded by [Forest::modify]: truncates the
    /// additions, restores the removed leaves into their old slots and
    /// re-derives the affected paths. The roots are checked against the
    /// record's snapshot afterwards.
    pub fn undo(&mut self, undo: &UndoBlock) -> Result<(), Error> {
        if undo.prev_num_leaves + undo.num_adds() != self.num_leaves {
            return Err(Error::Invariant("undo block does not match the current state"));
        }

        // truncate the additions
        for pos in undo.prev_num_leaves..self.num_leaves {
            let hash = self.get(pos);
            if !hash.is_empty() && self.position_map.get(&hash.mini()) == Some(&pos) {
                self.position_map.remove(&hash.mini());
            }
            self.put(pos, NodeHash::empty());
        }
        self.num_leaves = undo.prev_num_leaves;
        self.remap(util::tree_rows(self.num_leaves));

        // restore the removed leaves
        for (pos, hash) in undo.deleted.iter() {
            self.put(*pos, *hash);
            if !hash.is_empty() {
                self.position_map.insert(hash.mini(), *pos);
            }
        }
        let restored: Vec<u64> = undo.deleted.iter().map(|(pos, _)| *pos).collect();
        self.rehash_above(&restored);

        if self.roots() != undo.prev_roots {
            return Err(Error::Invariant("undo did not restore the root snapshot"));
        }
        debug!(num_leaves = self.num_leaves, "reversed batch");
        Ok(())
    }

    fn get(&self, pos: u64) -> NodeHash {
        self.data
            .get(pos as usize)
            .copied()
            .unwrap_or_else(NodeHash::empty)
    }

    fn put(&mut self, pos: u64, hash: NodeHash) {
        debug_assert!((pos as usize) < self.data.len());
        if let Some(slot) = self.data.get_mut(pos as usize) {
            *slot = hash;
        }
    }

    /// Appends one leaf at the next position and merges it into the
    /// existing roots, one merge per trailing set bit of the leaf count.
    /// Merging with an empty root just moves the accumulated hash up, so
    /// deleted-out subtrees get written over by later additions.
    fn add_single(&mut self, hash: NodeHash) {
        self.remap(util::tree_rows(self.num_leaves + 1));

        let pos = self.num_leaves;
        self.put(pos, hash);
        self.position_map.insert(hash.mini(), pos);

        let mut node = hash;
        let mut node_pos = pos;
        let mut row = 0;
        while util::is_root_populated(row, self.num_leaves) {
            let root = self.get(util::root_position(self.num_leaves, row, self.rows));
            node = parent_hash(&root, &node);
            self.hashes_ever += 1;
            node_pos = util::parent(node_pos, self.rows);
            self.put(node_pos, node);
            row += 1;
        }
        self.num_leaves += 1;
    }

    /// Re-derives every ancestor of the given positions, row by row from
    /// the bottom, stopping at the roots.
    fn rehash_above(&mut self, positions: &[u64]) {
        let rows = self.rows;
        let mut dirty: Vec<u64> = positions
            .iter()
            .filter(|pos| !util::is_root_position(**pos, self.num_leaves, rows))
            .map(|pos| util::parent(*pos, rows))
            .collect();
        dirty.sort_unstable();
        dirty.dedup();

        while !dirty.is_empty() {
            let mut next = Vec::new();
            for pos in dirty.iter() {
                let left = util::left_child(*pos, rows);
                let node = parent_hash(&self.get(left), &self.get(left | 1));
                self.hashes_ever += 1;
                self.put(*pos, node);
                if !util::is_root_position(*pos, self.num_leaves, rows) {
                    next.push(util::parent(*pos, rows));
                }
            }
            next.sort_unstable();
            next.dedup();
            dirty = next;
        }
    }

    /// Re-lays the data vector out for a different row count. Row zero
    /// positions do not move; higher rows shift to their new offsets.
    fn remap(&mut self, new_rows: u8) {
        if new_rows == self.rows {
            return;
        }
        let old_rows = self.rows;
        let mut new_data = vec![NodeHash::empty(); 2_usize << new_rows];
        for row in 0..=old_rows.min(new_rows) {
            let old_start = util::start_position_at_row(row, old_rows) as usize;
            let new_start = util::start_position_at_row(row, new_rows) as usize;
            let count = std::cmp::min(1_usize << (old_rows - row), 1_usize << (new_rows - row));
            new_data[new_start..new_start + count]
                .copy_from_slice(&self.data[old_start..old_start + count]);
        }
        self.data = new_data;
        self.rows = new_rows;
    }
}

impl Display for Forest {
    /// Renders the whole forest for anything under six rows, and just the
    /// roots above that.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.num_leaves == 0 {
            return f.write_str("empty");
        }
        let fh = self.rows;
        if fh > 6 {
            writeln!(f, "can't print {} leaves. roots:", self.num_leaves)?;
            for root in self.roots() {
                writeln!(f, "{root}")?;
            }
            return Ok(());
        }

        let mut output = vec![String::new(); (fh as usize * 2) + 1];
        let mut pos: u64 = 0;
        for h in 0..=fh {
            let row_len = 1_u64 << (fh - h);
            for _ in 0..row_len {
                let max = util::max_position_at_row(h, fh, self.num_leaves)
                    .map_err(|_| std::fmt::Error)?;
                if max >= pos {
                    let val = self.get(pos);
                    if val.is_empty() {
                        output[h as usize * 2].push_str("        ");
                    } else {
                        output[h as usize * 2]
                            .push_str(format!("{:0>2}:{} ", pos, &val.to_string()[..4]).as_str());
                    }
                }

                if h > 0 {
                    output[(h as usize * 2) - 1].push_str("|-------");
                    for _ in 0..((1_u64 << h) - 1) / 2 {
                        output[(h as usize * 2) - 1].push_str("--------");
                    }
                    output[(h as usize * 2) - 1].push_str("\\       ");
                    for _ in 0..((1_u64 << h) - 1) / 2 {
                        output[(h as usize * 2) - 1].push_str("        ");
                    }
                    for _ in 0..(1_u64 << h) - 1 {
                        output[h as usize * 2].push_str("        ");
                    }
                }
                pos += 1;
            }
        }

        for row in output.iter().rev() {
            writeln!(f, "{row}")?;
        }
        Ok(())
    }
}
