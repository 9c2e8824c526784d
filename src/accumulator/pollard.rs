//! The sparse rendition of the accumulator. A pollard holds the forest's
//! roots plus whichever branches it was asked to remember or has ingested
//! from batch proofs, and prunes everything else. It can replay the same
//! deletions a full forest performs and end up with the same roots, without
//! ever holding the whole tree.
//!
//! Nodes carry their hash and two *niece* pointers. For every non-root
//! node, the nieces are not its own children but the children of its
//! sibling. Verifying a node is then a local operation: hashing its two
//! nieces together yields its sibling's hash, which combined with the
//! node's own hash gives the parent. Roots are the one exception and point
//! at their own children, having no sibling to delegate to.
//!
//! There are no parent or aunt pointers and no shared ownership: every
//! node is owned by exactly one niece slot (or root cell), and every walk
//! starts at a root and descends, deriving positions from the address
//! arithmetic in [super::util]. A consequence of the niece convention is
//! that descending *through* a node reads its sibling's slot, so the code
//! below always tracks a (node, sibling) pair on the way down.
use std::collections::HashMap;

use tracing::debug;
use tracing::trace;

use super::error::Error;
use super::node_hash::MiniHash;
use super::node_hash::NodeHash;
use super::proof::BatchProof;
use super::types::parent_hash;
use super::types::Leaf;
use super::undo::UndoBlock;
use super::util;

/// A node in the pollard. `data` is the hash this node commits to, the
/// empty hash standing in for "not known here". The nieces follow the
/// convention described on the module: children of the sibling, own
/// children for roots. `remember` marks leaves the caller wants kept; it
/// is what the prune sweep consults before dropping a branch.
#[derive(Debug, Default, Clone)]
struct PolNode {
    data: NodeHash,
    nieces: [Option<Box<PolNode>>; 2],
    remember: bool,
}

impl PolNode {
    fn new(data: NodeHash, remember: bool) -> Self {
        PolNode {
            data,
            nieces: [None, None],
            remember,
        }
    }

    /// Hashes this node's nieces together, producing the hash one row up:
    /// the sibling's hash for a regular node, the root's own hash for a
    /// root. Absent nieces count as empty, so a fully deleted pair
    /// collapses to the empty hash.
    fn aunt_op(&self) -> NodeHash {
        let left = self.nieces[0].as_deref().map_or_else(NodeHash::empty, |n| n.data);
        let right = self.nieces[1].as_deref().map_or_else(NodeHash::empty, |n| n.data);
        parent_hash(&left, &right)
    }

    /// Whether both nieces are present, i.e. whether [PolNode::aunt_op]
    /// reflects real data.
    fn auntable(&self) -> bool {
        self.nieces[0].is_some() && self.nieces[1].is_some()
    }

    /// A dead end stores nothing below itself.
    fn dead_end(&self) -> bool {
        self.nieces[0].is_none() && self.nieces[1].is_none()
    }

    /// Drops both nieces, turning this node into a dead end.
    fn chop(&mut self) {
        self.nieces = [None, None];
    }

    /// Whether this branch must be kept: remembered leaves and anything
    /// with materialised descendants stay.
    fn keepable(&self) -> bool {
        self.remember || !self.dead_end()
    }

    /// The prune for nodes whose nieces are leaves. A leaf is only dropped
    /// together with its sibling: an unmemorable leaf may still be the
    /// proof sibling of a remembered one.
    fn leaf_prune(&mut self) {
        if self.prunable() {
            self.chop();
        }
    }

    /// The prune for higher rows. Nieces travel in pairs here too; a
    /// half-present pair would leave the surviving side's children
    /// unaddressable, so the pair goes together or not at all.
    fn prune(&mut self) {
        if self.prunable() {
            self.chop();
        }
    }

    fn prunable(&self) -> bool {
        !self.nieces.iter().any(|niece| match niece {
            Some(node) => node.keepable(),
            None => false,
        })
    }

    /// Exchanges the niece arrays of two nodes. This is the pointer half
    /// of the subtree swap: when an addition merges a root under a new
    /// parent, the merged pair exchange nieces so that each now holds the
    /// other's children, as the convention demands of siblings.
    fn swap_nieces(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.nieces, &mut other.nieces);
    }
}

/// The sparse accumulator. Tracks the same roots as a [Forest] fed the
/// same batches, holding only remembered branches and ingested proof data.
///
/// [Forest]: super::forest::Forest
pub struct Pollard {
    /// How many leaves were ever added. Deletions do not decrease this.
    num_leaves: u64,
    /// The tree roots, biggest row first. Roots own their subtrees; this
    /// vector is the only entry point into the node graph.
    roots: Vec<PolNode>,
    /// Fingerprints of leaves this pollard has seen added, to their
    /// positions.
    position_map: HashMap<MiniHash, u64>,
    /// How many parent hashes this pollard ever computed.
    hashes_ever: u64,
    /// How many leaves were added with the remember flag set.
    remember_ever: u64,
}

impl Default for Pollard {
    fn default() -> Self {
        Self::new()
    }
}

impl Pollard {
    /// Creates an empty pollard.
    pub fn new() -> Self {
        Pollard {
            num_leaves: 0,
            roots: Vec::new(),
            position_map: HashMap::new(),
            hashes_ever: 0,
            remember_ever: 0,
        }
    }

    /// Rebuilds a degenerate pollard from bare roots, biggest row first,
    /// e.g. after [Pollard::deserialize]d state or a snapshot exchange.
    /// The result has no nieces at all: proofs must be ingested before any
    /// batch that deletes.
    pub fn from_roots(roots: Vec<NodeHash>, num_leaves: u64) -> Result<Self, Error> {
        if roots.len() != util::num_roots(num_leaves) {
            return Err(Error::Invariant("root count does not match the leaf count"));
        }
        Ok(Pollard {
            num_leaves,
            roots: roots
                .into_iter()
                .map(|data| PolNode::new(data, false))
                .collect(),
            position_map: HashMap::new(),
            hashes_ever: 0,
            remember_ever: 0,
        })
    }

    /// How many leaves were ever added.
    pub fn num_leaves(&self) -> u64 {
        self.num_leaves
    }

    /// How many parent hashes this pollard computed over its lifetime.
    pub fn hashes_ever(&self) -> u64 {
        self.hashes_ever
    }

    /// How many leaves were added with the remember flag set.
    pub fn remember_ever(&self) -> u64 {
        self.remember_ever
    }

    /// The root hashes, biggest row first. Equal to the roots of a full
    /// forest fed the same batches.
    pub fn roots(&self) -> Vec<NodeHash> {
        self.roots.iter().map(|root| root.data).collect()
    }

    /// Looks up the position of a leaf this pollard saw being added.
    pub fn position_of(&self, hash: &NodeHash) -> Option<u64> {
        self.position_map.get(&hash.mini()).copied()
    }

    /// Checks a proof against this pollard's roots.
    pub fn verify(&self, proof: &BatchProof, del_hashes: &[NodeHash]) -> Result<bool, Error> {
        proof.verify(del_hashes, &self.roots(), self.num_leaves)
    }

    /// Absorbs a batch proof: every sibling hash the proof carries is
    /// placed at its position, materialising skeleton nodes along the way
    /// so that the targets' whole paths to their roots become walkable.
    /// Hashes that land on data the pollard already holds must agree with
    /// it; a disagreement fails with [Error::ProofMismatch] before
    /// anything is written.
    ///
    /// This does not check the proof against the roots; use
    /// [Pollard::verify] first when the proof comes from an untrusted
    /// source.
    pub fn ingest_batch_proof(&mut self, proof: &BatchProof) -> Result<(), Error> {
        let rows = self.rows();
        let proof_map = proof.reconstruct(self.num_leaves, rows)?;

        // parents before children, so the descent below a fresh node finds
        // its ancestors already in place
        let mut items: Vec<(u64, NodeHash)> = proof_map.into_iter().collect();
        items.sort_by(|a, b| {
            let row_a = util::detect_row(a.0, rows);
            let row_b = util::detect_row(b.0, rows);
            row_b.cmp(&row_a).then(a.0.cmp(&b.0))
        });

        for (pos, hash) in items.iter() {
            let cached = self.read_pos(*pos)?;
            if !cached.is_empty() && cached != *hash {
                return Err(Error::ProofMismatch(*pos));
            }
        }
        for (pos, hash) in items.iter() {
            self.place(*pos, *hash, false)?;
        }
        trace!(
            targets = proof.targets().len(),
            hashes = proof.hashes().len(),
            "ingested batch proof"
        );
        Ok(())
    }

    /// Applies one batch: deletes the targets, then appends the additions,
    /// keeping branches for leaves added with `remember` set. Deleting
    /// needs the targets' paths materialised, by remembering or by a prior
    /// [Pollard::ingest_batch_proof]; otherwise the batch fails with
    /// [Error::Missing] and the pollard is left untouched.
    ///
    /// Ends with a prune sweep over the touched paths: subtrees that no
    /// remembered leaf needs are dropped.
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
        }

        let groups = self.group_by_tree(&dels)?;
        self.check_removable(&groups)?;

        let prev_num_leaves = self.num_leaves;
        let prev_roots = self.roots();
        let mut deleted = Vec::with_capacity(dels.len());
        for target in dels.iter() {
            deleted.push((*target, self.read_pos(*target)?));
        }
        let mut promoted = Vec::new();
        for pos in util::get_proof_positions(&dels, self.num_leaves, self.rows()) {
            promoted.push((pos, self.read_pos(pos)?));
        }

        for (pos, hash) in deleted.iter() {
            if self.position_map.get(&hash.mini()) == Some(pos) {
                self.position_map.remove(&hash.mini());
            }
        }
        self.remove_groups(&groups)?;
        let post_del_roots = self.roots();

        for leaf in adds.iter() {
            self.add_single(leaf)?;
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

    /// Reverses one batch recorded by [Pollard::modify] (or by a forest
    /// fed the same batch; a forest's record always carries the removed
    /// leaf hashes, which this pollard may not have cached itself).
    ///
    /// Additions are un-merged in reverse; where pruning already dropped
    /// the merged structure, the consumed roots are rebuilt by replaying
    /// the additions over the recorded post-deletion roots. Removed leaves
    /// are then restored from the record's hashes, the recorded sibling
    /// hashes re-materialising whatever the prune sweep discarded.
    pub fn undo(&mut self, undo: &UndoBlock) -> Result<(), Error> {
        if undo.prev_num_leaves + undo.num_adds() != self.num_leaves {
            return Err(Error::Invariant("undo block does not match the current state"));
        }
        for (pos, hash) in undo.deleted.iter() {
            if hash.is_empty() {
                // this record never knew the removed leaf's hash
                return Err(Error::Missing(*pos));
            }
        }

        // replay the additions over the post-deletion roots, value-only,
        // to recover the root hashes each addition consumed
        let mut states: Vec<Vec<NodeHash>> = Vec::with_capacity(undo.added.len());
        let mut stack = undo.post_del_roots.clone();
        let mut nl = undo.prev_num_leaves;
        for hash in undo.added.iter() {
            states.push(stack.clone());
            let mut acc = *hash;
            let mut row = 0;
            while util::is_root_populated(row, nl) {
                let root = stack
                    .pop()
                    .ok_or(Error::Invariant("fewer roots than set bits"))?;
                acc = parent_hash(&root, &acc);
                row += 1;
            }
            stack.push(acc);
            nl += 1;
        }

        // un-merge the additions, newest first
        for i in (0..undo.added.len()).rev() {
            self.num_leaves -= 1;
            let merged_rows = self.num_leaves.trailing_ones() as u8;
            let mut node = Box::new(
                self.roots
                    .pop()
                    .ok_or(Error::Invariant("fewer roots than set bits"))?,
            );
            for row in (0..merged_rows).rev() {
                if node.auntable() {
                    let (mut old_root, mut acc) =
                        match (node.nieces[0].take(), node.nieces[1].take()) {
                            (Some(left), Some(right)) => (left, right),
                            _ => return Err(Error::Invariant("niece pair half-materialised")),
                        };
                    old_root.swap_nieces(&mut acc);
                    self.roots.push(*old_root);
                    node = acc;
                } else {
                    // pruned: rebuild the consumed roots from the replay
                    let values = &states[i];
                    for rebuilt_row in (0..=row).rev() {
                        let index = values
                            .len()
                            .checked_sub(1 + rebuilt_row as usize)
                            .ok_or(Error::Invariant("fewer roots than set bits"))?;
                        self.roots.push(PolNode::new(values[index], false));
                    }
                    break;
                }
            }
            let leaf_hash = undo.added[i];
            if self.position_map.get(&leaf_hash.mini()) == Some(&self.num_leaves) {
                self.position_map.remove(&leaf_hash.mini());
            }
        }

        // restore the removed leaves and the sibling hashes their paths
        // need, then re-derive the touched paths
        for (pos, hash) in undo.promoted.iter() {
            self.place(*pos, *hash, true)?;
        }
        for (pos, hash) in undo.deleted.iter() {
            self.place(*pos, *hash, true)?;
            self.position_map.insert(hash.mini(), *pos);
        }
        let restored: Vec<u64> = undo.deleted.iter().map(|(pos, _)| *pos).collect();
        let groups = self.group_by_tree(&restored)?;
        self.rehash_groups(&groups)?;

        if self.roots() != undo.prev_roots {
            return Err(Error::Invariant("undo did not restore the root snapshot"));
        }
        debug!(num_leaves = self.num_leaves, "reversed batch");
        Ok(())
    }

    /// Writes the persistent snapshot: the leaf count as 8 big-endian
    /// bytes, then one 32 byte hash per root, biggest row first. Only the
    /// roots survive; restoring yields a degenerate pollard that needs
    /// proofs ingested before it can delete again.
    pub fn serialize<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.num_leaves.to_be_bytes())?;
        for root in self.roots.iter() {
            root.data.write(writer)?;
        }
        Ok(())
    }

    /// Reads a snapshot written by [Pollard::serialize].
    pub fn deserialize<R: std::io::Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut num_leaves = [0_u8; 8];
        reader.read_exact(&mut num_leaves)?;
        let num_leaves = u64::from_be_bytes(num_leaves);

        let mut roots = Vec::with_capacity(util::num_roots(num_leaves));
        for _ in 0..util::num_roots(num_leaves) {
            roots.push(NodeHash::read(reader)?);
        }
        Pollard::from_roots(roots, num_leaves)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))
    }

    fn rows(&self) -> u8 {
        util::tree_rows(self.num_leaves)
    }

    /// Reads the hash cached for a position, empty when the pollard holds
    /// nothing there. Only the sibling chain has to be walked: children of
    /// each node on the path live in that node's sibling.
    fn read_pos(&self, pos: u64) -> Result<NodeHash, Error> {
        let (tree, depth, path) = util::detect_offset(pos, self.num_leaves, self.rows())?;
        let root = self
            .roots
            .get(tree as usize)
            .ok_or(Error::Invariant("fewer roots than set bits"))?;
        if depth == 0 {
            return Ok(root.data);
        }

        let mut holder: &PolNode = root;
        for i in (1..depth).rev() {
            let lr = ((path >> i) & 1) as usize;
            match holder.nieces[lr ^ 1].as_deref() {
                Some(sibling) => holder = sibling,
                None => return Ok(NodeHash::empty()),
            }
        }
        Ok(holder.nieces[(path & 1) as usize]
            .as_deref()
            .map_or_else(NodeHash::empty, |node| node.data))
    }

    /// Writes a hash at a position, materialising skeleton nodes (and the
    /// sibling of every created slot, nieces travel in pairs) on the way
    /// down. Without `force`, disagreeing with cached data is a
    /// [Error::ProofMismatch].
    fn place(&mut self, pos: u64, hash: NodeHash, force: bool) -> Result<(), Error> {
        let (tree, depth, path) = util::detect_offset(pos, self.num_leaves, self.rows())?;
        let root = self
            .roots
            .get_mut(tree as usize)
            .ok_or(Error::Invariant("fewer roots than set bits"))?;
        if depth == 0 {
            if !force && !root.data.is_empty() && root.data != hash {
                return Err(Error::ProofMismatch(pos));
            }
            root.data = hash;
            return Ok(());
        }

        let mut holder: &mut PolNode = root;
        for i in (1..depth).rev() {
            let lr = ((path >> i) & 1) as usize;
            if holder.nieces[lr].is_none() {
                holder.nieces[lr] = Some(Box::default());
            }
            holder = holder.nieces[lr ^ 1]
                .get_or_insert_with(Box::default)
                .as_mut();
        }
        let lr = (path & 1) as usize;
        if holder.nieces[lr ^ 1].is_none() {
            holder.nieces[lr ^ 1] = Some(Box::default());
        }
        let slot = holder.nieces[lr].get_or_insert_with(Box::default);
        if !force && !slot.data.is_empty() && slot.data != hash {
            return Err(Error::ProofMismatch(pos));
        }
        slot.data = hash;
        Ok(())
    }

    /// Groups sorted row-zero positions by the tree they live in. Each
    /// group carries the depth below that tree's root and the descent
    /// paths, alongside the original positions for error reporting.
    #[allow(clippy::type_complexity)]
    fn group_by_tree(&self, targets: &[u64]) -> Result<Vec<(usize, u8, Vec<(u64, u64)>)>, Error> {
        let rows = self.rows();
        let mut groups: Vec<(usize, u8, Vec<(u64, u64)>)> = Vec::new();
        for target in targets.iter() {
            let (tree, depth, path) = util::detect_offset(*target, self.num_leaves, rows)?;
            match groups.last_mut() {
                Some((last_tree, _, paths)) if *last_tree == tree as usize => {
                    paths.push((path, *target));
                }
                _ => groups.push((tree as usize, depth, vec![(path, *target)])),
            }
        }
        Ok(groups)
    }

    /// Verifies that every target's path is materialised before anything
    /// is written, so a failing batch leaves the pollard untouched. A
    /// missing pair is acceptable only when the targets blanket the whole
    /// subtree below it: the outcome is the empty hash no matter what was
    /// cached there.
    fn check_removable(&self, groups: &[(usize, u8, Vec<(u64, u64)>)]) -> Result<(), Error> {
        for (tree, depth, paths) in groups.iter() {
            let root = self
                .roots
                .get(*tree)
                .ok_or(Error::Invariant("fewer roots than set bits"))?;
            if *depth == 0 {
                if root.data.is_empty() {
                    return Err(Error::Missing(paths[0].1));
                }
                continue;
            }
            Self::check_below(&root.nieces, *depth, paths)?;
        }
        Ok(())
    }

    fn check_below(
        nieces: &[Option<Box<PolNode>>; 2],
        depth: u8,
        paths: &[(u64, u64)],
    ) -> Result<(), Error> {
        match (nieces[0].as_deref(), nieces[1].as_deref()) {
            (Some(left), Some(right)) => {
                if depth > 1 {
                    let (lefts, rights) = split_paths(paths, depth);
                    if !lefts.is_empty() {
                        Self::check_below(&right.nieces, depth - 1, &lefts)?;
                    }
                    if !rights.is_empty() {
                        Self::check_below(&left.nieces, depth - 1, &rights)?;
                    }
                }
                Ok(())
            }
            (None, None) => {
                if paths.len() == 1_usize << depth {
                    Ok(())
                } else {
                    Err(Error::Missing(paths[0].1))
                }
            }
            _ => Err(Error::Invariant("niece pair half-materialised")),
        }
    }

    /// Applies the deletions group by group: targets are emptied in place
    /// and every touched path is re-derived bottom up through
    /// [PolNode::aunt_op], pruning as the recursion unwinds.
    fn remove_groups(&mut self, groups: &[(usize, u8, Vec<(u64, u64)>)]) -> Result<(), Error> {
        for (tree, depth, paths) in groups.iter() {
            let root = self
                .roots
                .get_mut(*tree)
                .ok_or(Error::Invariant("fewer roots than set bits"))?;
            if *depth == 0 {
                root.data = NodeHash::empty();
                root.remember = false;
                root.chop();
                continue;
            }
            Self::remove_below_pair(&mut root.nieces, *depth, paths, &mut self.hashes_ever)?;
            root.data = root.aunt_op();
            self.hashes_ever += 1;
            if *depth == 1 {
                root.leaf_prune();
            } else {
                root.prune();
            }
        }
        Ok(())
    }

    fn remove_below_pair(
        nieces: &mut [Option<Box<PolNode>>; 2],
        depth: u8,
        paths: &[(u64, u64)],
        hashes_ever: &mut u64,
    ) -> Result<(), Error> {
        let (lefts, rights) = split_paths(paths, depth);
        let [left_slot, right_slot] = nieces;
        match (left_slot.as_deref_mut(), right_slot.as_deref_mut()) {
            (Some(left), Some(right)) => {
                if depth == 1 {
                    if !lefts.is_empty() {
                        left.data = NodeHash::empty();
                        left.remember = false;
                    }
                    if !rights.is_empty() {
                        right.data = NodeHash::empty();
                        right.remember = false;
                    }
                } else {
                    if !lefts.is_empty() {
                        Self::remove_below(left, right, depth - 1, &lefts, hashes_ever)?;
                    }
                    if !rights.is_empty() {
                        Self::remove_below(right, left, depth - 1, &rights, hashes_ever)?;
                    }
                }
                Ok(())
            }
            // an absent pair under a blanket of targets: already nothing
            // here, and the re-derived value above it is empty either way
            (None, None) => Ok(()),
            _ => Err(Error::Invariant("niece pair half-materialised")),
        }
    }

    fn remove_below(
        node: &mut PolNode,
        sibling: &mut PolNode,
        depth: u8,
        paths: &[(u64, u64)],
        hashes_ever: &mut u64,
    ) -> Result<(), Error> {
        Self::remove_below_pair(&mut sibling.nieces, depth, paths, hashes_ever)?;
        node.data = sibling.aunt_op();
        *hashes_ever += 1;
        if depth == 1 {
            sibling.leaf_prune();
        } else {
            sibling.prune();
        }
        Ok(())
    }

    /// Re-derives the paths above the given groups without writing leaves
    /// or pruning; used after an undo has put hashes back in place.
    fn rehash_groups(&mut self, groups: &[(usize, u8, Vec<(u64, u64)>)]) -> Result<(), Error> {
        for (tree, depth, paths) in groups.iter() {
            let root = self
                .roots
                .get_mut(*tree)
                .ok_or(Error::Invariant("fewer roots than set bits"))?;
            if *depth == 0 {
                continue;
            }
            Self::rehash_below_pair(&mut root.nieces, *depth, paths, &mut self.hashes_ever)?;
            root.data = root.aunt_op();
            self.hashes_ever += 1;
        }
        Ok(())
    }

    fn rehash_below_pair(
        nieces: &mut [Option<Box<PolNode>>; 2],
        depth: u8,
        paths: &[(u64, u64)],
        hashes_ever: &mut u64,
    ) -> Result<(), Error> {
        if depth == 1 {
            return Ok(());
        }
        let (lefts, rights) = split_paths(paths, depth);
        let [left_slot, right_slot] = nieces;
        match (left_slot.as_deref_mut(), right_slot.as_deref_mut()) {
            (Some(left), Some(right)) => {
                if !lefts.is_empty() {
                    Self::rehash_below(left, right, depth - 1, &lefts, hashes_ever)?;
                }
                if !rights.is_empty() {
                    Self::rehash_below(right, left, depth - 1, &rights, hashes_ever)?;
                }
                Ok(())
            }
            (None, None) => Ok(()),
            _ => Err(Error::Invariant("niece pair half-materialised")),
        }
    }

    fn rehash_below(
        node: &mut PolNode,
        sibling: &mut PolNode,
        depth: u8,
        paths: &[(u64, u64)],
        hashes_ever: &mut u64,
    ) -> Result<(), Error> {
        Self::rehash_below_pair(&mut sibling.nieces, depth, paths, hashes_ever)?;
        node.data = sibling.aunt_op();
        *hashes_ever += 1;
        Ok(())
    }

    /// Appends one leaf and merges it into the existing roots, one merge
    /// per trailing set bit of the leaf count. The merged pair exchange
    /// nieces so the convention keeps holding, and the new parent drops
    /// its children right away when neither side is worth keeping.
    fn add_single(&mut self, leaf: &Leaf) -> Result<(), Error> {
        let mut node = Box::new(PolNode::new(leaf.hash, leaf.remember));
        self.position_map.insert(leaf.hash.mini(), self.num_leaves);
        if leaf.remember {
            self.remember_ever += 1;
        }

        let mut row = 0;
        while util::is_root_populated(row, self.num_leaves) {
            let mut root = Box::new(
                self.roots
                    .pop()
                    .ok_or(Error::Invariant("fewer roots than set bits"))?,
            );
            root.swap_nieces(&mut node);
            let data = parent_hash(&root.data, &node.data);
            self.hashes_ever += 1;

            let keep = root.keepable() || node.keepable();
            let mut parent = PolNode {
                data,
                nieces: [Some(root), Some(node)],
                remember: false,
            };
            if !keep {
                parent.chop();
            }
            node = Box::new(parent);
            row += 1;
        }
        self.roots.push(*node);
        self.num_leaves += 1;
        Ok(())
    }
}

/// Splits descent paths on the bit for this depth: bit `depth - 1` decides
/// left or right at the current level.
fn split_paths(paths: &[(u64, u64)], depth: u8) -> (Vec<(u64, u64)>, Vec<(u64, u64)>) {
    let mut lefts = Vec::new();
    let mut rights = Vec::new();
    for (path, pos) in paths.iter() {
        if (path >> (depth - 1)) & 1 == 0 {
            lefts.push((*path, *pos));
        } else {
            rights.push((*path, *pos));
        }
    }
    (lefts, rights)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rand::rngs::StdRng;
    use rand::Rng;
    use rand::SeedableRng;
    use serde::Deserialize;

    use super::Pollard;
    use crate::accumulator::error::Error;
    use crate::accumulator::forest::Forest;
    use crate::accumulator::node_hash::hash_from_u8;
    use crate::accumulator::node_hash::NodeHash;
    use crate::accumulator::types::Leaf;

    fn leaves_from(values: &[u8], remember: bool) -> Vec<Leaf> {
        values
            .iter()
            .map(|value| Leaf::new(hash_from_u8(*value), remember))
            .collect()
    }

    fn hash(hex: &str) -> NodeHash {
        NodeHash::from_str(hex).unwrap()
    }

    #[test]
    fn test_add() {
        let mut pollard = Pollard::new();
        pollard
            .modify(&leaves_from(&(0..15).collect::<Vec<_>>(), true), &[])
            .unwrap();

        assert_eq!(
            pollard.roots(),
            vec![
                hash("b151a956139bb821d4effa34ea95c17560e0135d1e4661fc23cedc3af49dac42"),
                hash("9c053db406c1a077112189469a3aca0573d3481bef09fa3d2eda3304d7d44be8"),
                hash("55d0a0ef8f5c25a9da266b36c0c5f4b31008ece82df2512c8966bddcc27a66a0"),
                hash("4d7b3ef7300acf70c892d8327db8272f54434adbc61a4e130a563cb59a0d0f47"),
            ]
        );
        assert_eq!(pollard.num_leaves(), 15);
        assert_eq!(pollard.remember_ever(), 15);
        assert_eq!(pollard.position_of(&hash_from_u8(9)), Some(9));
    }

    #[test]
    fn test_forgettable_adds_are_pruned() {
        let mut remembered = Pollard::new();
        remembered
            .modify(&leaves_from(&[0, 1, 2, 3], true), &[])
            .unwrap();
        let mut forgotten = Pollard::new();
        forgotten
            .modify(&leaves_from(&[0, 1, 2, 3], false), &[])
            .unwrap();

        // same commitment, different footprint
        assert_eq!(remembered.roots(), forgotten.roots());
        assert!(remembered.roots[0].auntable());
        assert!(forgotten.roots[0].dead_end());
    }

    #[test]
    fn test_delete_remembered() {
        // 06
        // |-------\
        // 04      05
        // |---\   |---\
        // 00  --  02  03
        let mut pollard = Pollard::new();
        pollard
            .modify(&leaves_from(&[0, 1, 2, 3], true), &[])
            .unwrap();
        pollard.modify(&[], &[1]).unwrap();

        assert_eq!(
            pollard.roots(),
            vec![hash(
                "81b3c95fbff42b9755053ca6edd93fb1be70a64282fc7fda02ddac2978b45828"
            )]
        );
        assert_eq!(pollard.num_leaves(), 4);
        assert_eq!(pollard.position_of(&hash_from_u8(1)), None);
    }

    #[test]
    fn test_delete_without_ingest_fails() {
        let mut pollard = Pollard::new();
        pollard
            .modify(&leaves_from(&(0..8).collect::<Vec<_>>(), false), &[])
            .unwrap();

        assert_eq!(pollard.modify(&[], &[2]), Err(Error::Missing(2)));
        // a partial blanket over a pruned pair is just as unanswerable
        assert_eq!(pollard.modify(&[], &[0, 1]), Err(Error::Missing(0)));
    }

    #[test]
    fn test_ingest_then_delete() {
        let mut forest = Forest::new(0);
        forest
            .modify(&leaves_from(&(0..8).collect::<Vec<_>>(), false), &[])
            .unwrap();
        let mut pollard = Pollard::new();
        pollard
            .modify(&leaves_from(&(0..8).collect::<Vec<_>>(), false), &[])
            .unwrap();

        let proof = forest.prove_batch(&[0, 1]).unwrap();
        assert_eq!(
            pollard.verify(&proof, &[hash_from_u8(0), hash_from_u8(1)]),
            Ok(true)
        );
        pollard.ingest_batch_proof(&proof).unwrap();
        pollard.modify(&[], &[0, 1]).unwrap();
        forest.modify(&[], &[0, 1]).unwrap();

        assert_eq!(pollard.roots(), forest.roots());
    }

    #[test]
    fn test_ingest_mismatch_is_atomic() {
        let mut pollard = Pollard::new();
        pollard
            .modify(&leaves_from(&(0..8).collect::<Vec<_>>(), true), &[])
            .unwrap();
        let mut forest = Forest::new(0);
        forest
            .modify(&leaves_from(&(0..8).collect::<Vec<_>>(), false), &[])
            .unwrap();

        let good = forest.prove_batch(&[3]).unwrap();
        let mut hashes = good.hashes().to_vec();
        hashes[0] = hash_from_u8(0xbe);
        let bad = crate::accumulator::proof::BatchProof::new(good.targets().to_vec(), hashes);

        let err = pollard.ingest_batch_proof(&bad);
        assert!(matches!(err, Err(Error::ProofMismatch(_))));
        // and the genuine proof still ingests cleanly afterwards
        pollard.ingest_batch_proof(&good).unwrap();
    }

    #[test]
    fn test_degenerate_pollard_from_roots() {
        // S5 of the accumulator scenarios: sync a pollard from bare roots,
        // ingest a proof produced by the forest, and apply the deletion
        let mut forest = Forest::new(0);
        forest
            .modify(&leaves_from(&[0, 1, 2, 3], false), &[])
            .unwrap();

        let mut pollard = Pollard::from_roots(forest.roots(), forest.num_leaves()).unwrap();
        let proof = forest.prove_batch(&[1]).unwrap();
        pollard.ingest_batch_proof(&proof).unwrap();

        pollard.modify(&[], &[1]).unwrap();
        forest.modify(&[], &[1]).unwrap();
        assert_eq!(pollard.roots(), forest.roots());
    }

    #[test]
    fn test_from_roots_wrong_count() {
        assert!(Pollard::from_roots(vec![hash_from_u8(0)], 3).is_err());
    }

    #[test]
    fn test_serialize_rtt() {
        let mut pollard = Pollard::new();
        pollard
            .modify(&leaves_from(&(0..12).collect::<Vec<_>>(), true), &[])
            .unwrap();

        let mut buf = Vec::new();
        pollard.serialize(&mut buf).unwrap();
        // 8 bytes of leaf count, two roots of 32 bytes
        assert_eq!(buf.len(), 8 + 2 * 32);

        let restored = Pollard::deserialize(&mut buf.as_slice()).unwrap();
        assert_eq!(restored.num_leaves(), 12);
        assert_eq!(restored.roots(), pollard.roots());
    }

    #[test]
    fn test_agreement_over_batches() {
        // a fixed multi-batch run, checked against the forest after every
        // batch
        let mut forest = Forest::new(0);
        let mut pollard = Pollard::new();

        let mut step = |forest: &mut Forest,
                        pollard: &mut Pollard,
                        adds: &[u8],
                        dels: &[u64],
                        expected: &[NodeHash]| {
            if !dels.is_empty() {
                let proof = forest.prove_batch(dels).unwrap();
                pollard.ingest_batch_proof(&proof).unwrap();
            }
            forest.modify(&leaves_from(adds, false), dels).unwrap();
            pollard.modify(&leaves_from(adds, false), dels).unwrap();
            assert_eq!(forest.roots(), pollard.roots());
            assert_eq!(forest.roots(), expected);
        };

        step(
            &mut forest,
            &mut pollard,
            &[0, 1, 2, 3, 4, 5, 6, 7],
            &[],
            &[hash(
                "b151a956139bb821d4effa34ea95c17560e0135d1e4661fc23cedc3af49dac42",
            )],
        );
        step(
            &mut forest,
            &mut pollard,
            &[],
            &[1, 2],
            &[hash(
                "a7687b2ffcef368c3f15507aa50278d5f83d9501adaa60543fc8bd224845ba74",
            )],
        );
        step(
            &mut forest,
            &mut pollard,
            &[8, 9],
            &[],
            &[
                hash("a7687b2ffcef368c3f15507aa50278d5f83d9501adaa60543fc8bd224845ba74"),
                hash("cd9c77062a338e63a63ca623db438cb8676f15466641079ee61ec2dda98de796"),
            ],
        );
        step(
            &mut forest,
            &mut pollard,
            &[],
            &[0, 3, 8],
            &[
                hash("29590a14c1b09384b94a2c0e94bf821ca75b62eacebc47893397ca88e3bbcbd7"),
                hash("2b4c342f5433ebe591a1da77e013d1b72475562d48578dca8b84bac6651c3cb9"),
            ],
        );
    }

    #[test]
    fn test_agreement_random_batches() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..25 {
            let mut forest = Forest::new(0);
            let mut pollard = Pollard::new();
            let mut live: Vec<u64> = Vec::new();

            for _ in 0..6 {
                let n_adds = if live.is_empty() {
                    rng.gen_range(1..6)
                } else {
                    rng.gen_range(0..6)
                };
                let adds: Vec<Leaf> = (0..n_adds)
                    .map(|_| {
                        let mut bytes = [0_u8; 32];
                        rng.fill(&mut bytes);
                        Leaf::new(NodeHash::new(bytes), true)
                    })
                    .collect();

                let n_dels = rng.gen_range(0..=live.len().min(4));
                let mut dels = Vec::new();
                while dels.len() < n_dels {
                    let candidate = live[rng.gen_range(0..live.len())];
                    if !dels.contains(&candidate) {
                        dels.push(candidate);
                    }
                }

                if !dels.is_empty() {
                    let proof = forest.prove_batch(&dels).unwrap();
                    pollard.ingest_batch_proof(&proof).unwrap();
                }
                forest.modify(&adds, &dels).unwrap();
                pollard.modify(&adds, &dels).unwrap();

                assert_eq!(forest.roots(), pollard.roots());

                live.retain(|pos| !dels.contains(pos));
                let first_new = forest.num_leaves() - n_adds as u64;
                live.extend(first_new..forest.num_leaves());
            }
        }
    }

    #[test]
    fn test_undo_roundtrip() {
        let mut pollard = Pollard::new();
        pollard
            .modify(&leaves_from(&(0..8).collect::<Vec<_>>(), true), &[])
            .unwrap();
        let roots_before = pollard.roots();

        let undo = pollard
            .modify(&leaves_from(&[8, 9], true), &[0, 3, 6])
            .unwrap();
        pollard.undo(&undo).unwrap();

        assert_eq!(pollard.roots(), roots_before);
        assert_eq!(pollard.num_leaves(), 8);
        assert_eq!(pollard.position_of(&hash_from_u8(3)), Some(3));
        assert_eq!(pollard.position_of(&hash_from_u8(9)), None);
    }

    #[test]
    fn test_undo_with_forest_record() {
        // a pollard that never cached the targets cannot undo from its own
        // record, but the forest's record carries the removed hashes
        let mut forest = Forest::new(0);
        forest
            .modify(&leaves_from(&(0..8).collect::<Vec<_>>(), false), &[])
            .unwrap();
        let mut pollard = Pollard::new();
        pollard
            .modify(&leaves_from(&(0..8).collect::<Vec<_>>(), false), &[])
            .unwrap();
        let roots_before = pollard.roots();

        let proof = forest.prove_batch(&[4, 5]).unwrap();
        pollard.ingest_batch_proof(&proof).unwrap();

        let own_record = pollard.modify(&[], &[4, 5]).unwrap();
        let forest_record = forest.modify(&[], &[4, 5]).unwrap();
        assert_eq!(pollard.roots(), forest.roots());

        // the pollard never saw leaves 4 and 5 being added with their
        // hashes remembered, so its own record is blind
        assert_eq!(pollard.undo(&own_record), Err(Error::Missing(4)));
        pollard.undo(&forest_record).unwrap();
        assert_eq!(pollard.roots(), roots_before);
    }

    #[test]
    fn test_undo_after_pruned_addition() {
        // nothing remembered: the merge chopped everything, and undo falls
        // back to replaying the recorded roots
        let mut pollard = Pollard::new();
        pollard
            .modify(&leaves_from(&[0, 1, 2], false), &[])
            .unwrap();
        let roots_before = pollard.roots();

        let undo = pollard.modify(&leaves_from(&[3, 4], false), &[]).unwrap();
        pollard.undo(&undo).unwrap();

        assert_eq!(pollard.roots(), roots_before);
        assert_eq!(pollard.num_leaves(), 3);
    }

    #[test]
    fn test_modify_validation() {
        let mut pollard = Pollard::new();
        pollard
            .modify(&leaves_from(&[0, 1, 2, 3], true), &[])
            .unwrap();

        assert_eq!(pollard.modify(&[], &[2, 2]), Err(Error::DuplicateTarget(2)));
        assert_eq!(pollard.modify(&[], &[4]), Err(Error::OutOfRange(4)));
        assert_eq!(pollard.num_leaves(), 4);
    }

    #[derive(Debug, Deserialize)]
    struct TestCase {
        leaf_preimages: Vec<u8>,
        target_values: Option<Vec<u64>>,
        expected_roots: Vec<String>,
        proofhashes: Option<Vec<String>>,
    }

    fn run_single_addition_case(case: TestCase) {
        let mut pollard = Pollard::new();
        pollard
            .modify(&leaves_from(&case.leaf_preimages, true), &[])
            .expect("Test pollards are valid");

        let expected = case
            .expected_roots
            .iter()
            .map(|root| NodeHash::from_str(root).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(pollard.roots(), expected);
    }

    fn run_case_with_deletion(case: TestCase) {
        let targets = case.target_values.clone().unwrap();
        let proof_hashes = case
            .proofhashes
            .clone()
            .unwrap_or_default()
            .iter()
            .map(|hash| NodeHash::from_str(hash).expect("Test case hashes are valid"))
            .collect::<Vec<_>>();

        let mut pollard = Pollard::new();
        pollard
            .modify(&leaves_from(&case.leaf_preimages, false), &[])
            .expect("Test pollards are valid");
        let proof = crate::accumulator::proof::BatchProof::new(targets.clone(), proof_hashes);
        pollard.ingest_batch_proof(&proof).unwrap();
        pollard.modify(&[], &targets).unwrap();

        let expected = case
            .expected_roots
            .iter()
            .map(|root| NodeHash::from_str(root).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(pollard.roots(), expected, "failed case {case:?}");
    }

    #[test]
    fn run_test_cases() {
        #[derive(Deserialize)]
        struct TestsJSON {
            insertion_tests: Vec<TestCase>,
            deletion_tests: Vec<TestCase>,
        }

        let contents = std::fs::read_to_string("test_values/test_cases.json")
            .expect("Something went wrong reading the file");
        let tests = serde_json::from_str::<TestsJSON>(contents.as_str())
            .expect("JSON deserialization error");

        for case in tests.insertion_tests {
            run_single_addition_case(case);
        }
        for case in tests.deletion_tests {
            run_case_with_deletion(case);
        }
    }
}
