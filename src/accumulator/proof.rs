use std::collections::HashMap;

#[cfg(feature = "with-serde")]
use serde::Deserialize;
#[cfg(feature = "with-serde")]
use serde::Serialize;

use super::error::Error;
use super::node_hash::NodeHash;
use super::types::parent_hash;
use super::util;

/// A proof is a collection of target positions and hashes. Each target
/// points at a leaf to be proven (and usually deleted); the hashes are all
/// the siblings that cannot be computed from the targets themselves.
///
/// Assuming a tree with leaf values [0, 1, 2, 3, 4, 5, 6, 7], we should see
/// something like this:
///```!
/// 14
/// |-----------------\
/// 12                13
/// |---------\       |--------\
/// 08        09      10       11
/// |----\    |----\  |----\   |----\
/// 00   01   02  03  04   05  06   07
/// ```
/// If we are proving `00`, then we need 01, 09 and 13's hashes: 08, 12 and
/// 14 can be computed by hashing both siblings at each level. The hashes
/// are carried in a canonical order, bottom row up and left to right within
/// a row, which is the order the verification walk consumes them in.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
pub struct BatchProof {
    /// The positions of the leaves being proven, in whatever order the
    /// caller asked for them. Verification never reorders this vector.
    pub(crate) targets: Vec<u64>,
    /// The sibling hashes needed to walk every target up to its root.
    pub(crate) hashes: Vec<NodeHash>,
}

impl BatchProof {
    /// Creates a proof from a vector of targets and hashes. `targets` are
    /// the positions of the leaves we are trying to prove, and `hashes`
    /// must be in the canonical order described on [BatchProof].
    pub fn new(targets: Vec<u64>, hashes: Vec<NodeHash>) -> Self {
        BatchProof { targets, hashes }
    }

    /// The positions being proven, in the original caller order.
    pub fn targets(&self) -> &[u64] {
        &self.targets
    }

    /// The sibling hashes carried by this proof.
    pub fn hashes(&self) -> &[NodeHash] {
        &self.hashes
    }

    /// Rebuilds the map from position to hash that this proof claims. The
    /// map holds exactly the canonical sibling positions for the sorted
    /// targets; too few or too many hashes is a malformed proof.
    pub fn reconstruct(
        &self,
        num_leaves: u64,
        forest_rows: u8,
    ) -> Result<HashMap<u64, NodeHash>, Error> {
        let mut targets = self.targets.clone();
        targets.sort_unstable();
        for window in targets.windows(2) {
            if window[0] == window[1] {
                return Err(Error::ProofMalformed);
            }
        }
        for target in targets.iter() {
            if !util::in_forest(*target, num_leaves, forest_rows) {
                return Err(Error::ProofMalformed);
            }
        }

        let positions = util::get_proof_positions(&targets, num_leaves, forest_rows);
        if positions.len() != self.hashes.len() {
            return Err(Error::ProofMalformed);
        }

        Ok(positions.into_iter().zip(self.hashes.iter().copied()).collect())
    }

    /// Walks every target bottom-up, hashing pairs until a root is reached,
    /// and returns the roots obtained that way as `(row, hash)` pairs. The
    /// caller supplies the leaf hashes aligned with the target order.
    ///
    /// This is the workhorse shared by [BatchProof::verify] and by pollard
    /// ingestion; it consumes proof hashes in the canonical order and fails
    /// with [Error::ProofMalformed] when the count does not line up.
    pub fn root_candidates(
        &self,
        del_hashes: &[NodeHash],
        num_leaves: u64,
    ) -> Result<Vec<(u8, NodeHash)>, Error> {
        let forest_rows = util::tree_rows(num_leaves);
        if del_hashes.len() != self.targets.len() {
            return Err(Error::ProofMalformed);
        }

        let mut proof_map = self.reconstruct(num_leaves, forest_rows)?;

        // positions are row-major, so ascending order is bottom-up order
        let mut nodes: Vec<(u64, NodeHash)> = self
            .targets
            .iter()
            .copied()
            .zip(del_hashes.iter().copied())
            .collect();
        nodes.sort();

        let mut calculated_roots = Vec::with_capacity(util::num_roots(num_leaves));
        while !nodes.is_empty() {
            let (pos, hash) = nodes.remove(0);
            if util::is_root_position(pos, num_leaves, forest_rows) {
                calculated_roots.push((util::detect_row(pos, forest_rows), hash));
                continue;
            }

            let sibling = pos ^ 1;
            let parent_data = if nodes.first().map(|(next, _)| *next) == Some(sibling) {
                // the next node in line is our sibling, hash the two together
                let (_, sibling_hash) = nodes.remove(0);
                parent_hash(&hash, &sibling_hash)
            } else if let Some(sibling_hash) = proof_map.remove(&sibling) {
                if util::is_left_niece(pos) {
                    parent_hash(&hash, &sibling_hash)
                } else {
                    parent_hash(&sibling_hash, &hash)
                }
            } else {
                return Err(Error::ProofMalformed);
            };

            Self::sorted_push(&mut nodes, (util::parent(pos, forest_rows), parent_data));
        }

        Ok(calculated_roots)
    }

    /// Checks the proof against a set of roots, returning whether every
    /// target hashes up to the root committed for its tree. `del_hashes`
    /// must be aligned with the proof's targets; `roots` come biggest row
    /// first, the way [super::forest::Forest::roots] returns them.
    ///
    /// The targets vector observable through [BatchProof::targets] is the
    /// same before and after the call: sorting happens on copies.
    pub fn verify(
        &self,
        del_hashes: &[NodeHash],
        roots: &[NodeHash],
        num_leaves: u64,
    ) -> Result<bool, Error> {
        if self.targets.is_empty() {
            return Ok(true);
        }
        let forest_rows = util::tree_rows(num_leaves);

        let mut expected = HashMap::new();
        let mut root_iter = roots.iter();
        for row in (0..=forest_rows).rev() {
            if util::is_root_populated(row, num_leaves) {
                match root_iter.next() {
                    Some(root) => expected.insert(row, *root),
                    None => return Err(Error::ProofMalformed),
                };
            }
        }

        let calculated = self.root_candidates(del_hashes, num_leaves)?;
        for (row, hash) in calculated {
            if expected.get(&row) != Some(&hash) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Serializes the proof into a writer: target count and hash count as
    /// little-endian u64, then the raw targets and hashes.
    pub fn serialize<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&(self.targets.len() as u64).to_le_bytes())?;
        for target in self.targets.iter() {
            writer.write_all(&target.to_le_bytes())?;
        }
        writer.write_all(&(self.hashes.len() as u64).to_le_bytes())?;
        for hash in self.hashes.iter() {
            hash.write(writer)?;
        }
        Ok(())
    }

    /// Deserializes a proof written by [BatchProof::serialize].
    pub fn deserialize<R: std::io::Read>(reader: &mut R) -> std::io::Result<Self> {
        let n_targets = read_u64(reader)?;
        let mut targets = Vec::with_capacity(n_targets as usize);
        for _ in 0..n_targets {
            targets.push(read_u64(reader)?);
        }
        let n_hashes = read_u64(reader)?;
        let mut hashes = Vec::with_capacity(n_hashes as usize);
        for _ in 0..n_hashes {
            hashes.push(NodeHash::read(reader)?);
        }
        Ok(BatchProof { targets, hashes })
    }

    fn sorted_push(nodes: &mut Vec<(u64, NodeHash)>, to_add: (u64, NodeHash)) {
        nodes.push(to_add);
        nodes.sort();
    }
}

fn read_u64<R: std::io::Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut bytes = [0_u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde::Deserialize;

    use super::BatchProof;
    use crate::accumulator::error::Error;
    use crate::accumulator::forest::Forest;
    use crate::accumulator::node_hash::hash_from_u8;
    use crate::accumulator::node_hash::NodeHash;
    use crate::accumulator::types::Leaf;

    fn forest_with(n: u8) -> Forest {
        let leaves = (0..n)
            .map(|i| Leaf::new(hash_from_u8(i), false))
            .collect::<Vec<_>>();
        let mut forest = Forest::new(0);
        forest.modify(&leaves, &[]).expect("test forests are valid");
        forest
    }

    #[test]
    fn test_prove_single_leaf() {
        // 06
        // |-------\
        // 04      05
        // |---\   |---\
        // 00  01  02  03
        //
        // proving 01 needs 00 and 05
        let forest = forest_with(4);
        let proof = forest.prove_batch(&[1]).unwrap();

        assert_eq!(proof.targets(), &[1]);
        assert_eq!(
            proof.hashes(),
            &[
                hash_from_u8(0),
                NodeHash::from_str(
                    "9576f4ade6e9bc3a6458b506ce3e4e890df29cb14cb5d3d887672aef55647a2b",
                )
                .unwrap(),
            ]
        );

        assert_eq!(
            proof.verify(&[hash_from_u8(1)], &forest.roots(), forest.num_leaves()),
            Ok(true)
        );
        assert_eq!(
            proof.verify(&[hash_from_u8(9)], &forest.roots(), forest.num_leaves()),
            Ok(false)
        );
    }

    #[test]
    fn test_verify_keeps_target_order() {
        let forest = forest_with(8);
        let targets = vec![2, 1, 4, 6];
        let proof = forest.prove_batch(&targets).unwrap();
        assert_eq!(proof.targets(), targets.as_slice());

        let del_hashes = targets.iter().map(|t| hash_from_u8(*t as u8)).collect::<Vec<_>>();
        assert_eq!(
            proof.verify(&del_hashes, &forest.roots(), forest.num_leaves()),
            Ok(true)
        );
        // the observable targets are element-wise what they were before
        assert_eq!(proof.targets(), targets.as_slice());
    }

    #[test]
    fn test_reconstruct() {
        let forest = forest_with(8);
        let proof = forest.prove_batch(&[0]).unwrap();
        let map = proof.reconstruct(8, 3).unwrap();

        // proving 00 needs 01, 09 and 13
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&1), Some(&hash_from_u8(1)));
        assert!(map.contains_key(&9));
        assert!(map.contains_key(&13));
    }

    #[test]
    fn test_malformed_proofs() {
        let forest = forest_with(8);
        let proof = forest.prove_batch(&[0]).unwrap();

        // dropping a hash
        let short = BatchProof::new(proof.targets().to_vec(), proof.hashes()[1..].to_vec());
        assert_eq!(short.reconstruct(8, 3), Err(Error::ProofMalformed));

        // an extra hash
        let mut hashes = proof.hashes().to_vec();
        hashes.push(hash_from_u8(0xaa));
        let long = BatchProof::new(proof.targets().to_vec(), hashes);
        assert_eq!(long.reconstruct(8, 3), Err(Error::ProofMalformed));

        // a duplicated target
        let dup = BatchProof::new(vec![0, 0], proof.hashes().to_vec());
        assert_eq!(dup.reconstruct(8, 3), Err(Error::ProofMalformed));

        // a target outside the forest
        let out = BatchProof::new(vec![11], proof.hashes().to_vec());
        assert_eq!(out.reconstruct(8, 3), Err(Error::ProofMalformed));
    }

    #[test]
    fn test_empty_proof() {
        let forest = forest_with(8);
        let proof = BatchProof::default();
        assert_eq!(proof.verify(&[], &forest.roots(), 8), Ok(true));
    }

    #[test]
    fn test_serialize_rtt() {
        let forest = forest_with(8);
        let proof = forest.prove_batch(&[2, 1, 4, 6]).unwrap();

        let mut buf = Vec::new();
        proof.serialize(&mut buf).unwrap();
        let back = BatchProof::deserialize(&mut buf.as_slice()).unwrap();
        assert_eq!(proof, back);
    }

    #[derive(Debug, Deserialize)]
    struct ProofCase {
        leaf_preimages: Vec<u8>,
        targets: Vec<u64>,
        proof: Vec<String>,
        values: Option<Vec<u8>>,
        expected: bool,
    }

    #[test]
    fn run_proof_cases() {
        #[derive(Deserialize)]
        struct TestsJSON {
            proof_tests: Vec<ProofCase>,
        }

        let contents = std::fs::read_to_string("test_values/test_cases.json")
            .expect("Something went wrong reading the file");
        let tests = serde_json::from_str::<TestsJSON>(contents.as_str())
            .expect("JSON deserialization error");

        for case in tests.proof_tests {
            let forest = forest_with(case.leaf_preimages.len() as u8);
            let hashes = case
                .proof
                .iter()
                .map(|hash| NodeHash::from_str(hash).expect("Test case hashes are valid"))
                .collect();
            let del_hashes = match case.values {
                Some(values) => values.iter().map(|v| hash_from_u8(*v)).collect::<Vec<_>>(),
                None => case
                    .targets
                    .iter()
                    .map(|t| hash_from_u8(*t as u8))
                    .collect::<Vec<_>>(),
            };

            let proof = BatchProof::new(case.targets, hashes);
            assert_eq!(
                proof.verify(&del_hashes, &forest.roots(), forest.num_leaves()),
                Ok(case.expected)
            );
        }
    }
}
