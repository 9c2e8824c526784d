//! An example of driving both renditions of the accumulator side by side:
//! a full forest producing proofs, and a pollard consuming them. This is
//! the shape of a bridge node feeding a compact-state node.

use grove::accumulator::forest::Forest;
use grove::accumulator::node_hash::hash_from_u8;
use grove::accumulator::pollard::Pollard;
use grove::accumulator::types::Leaf;

fn main() {
    // The forest holds everything and can prove anything.
    let mut forest = Forest::new(0);
    // The pollard only tracks what it is told to remember.
    let mut pollard = Pollard::new();

    let elements = (0..8)
        .map(|value| Leaf::new(hash_from_u8(value), false))
        .collect::<Vec<_>>();
    forest.modify(&elements, &[]).unwrap();
    pollard.modify(&elements, &[]).unwrap();
    assert_eq!(forest.roots(), pollard.roots());

    // A block spends the elements at positions 1 and 2. The forest builds
    // the proof; the pollard verifies it, ingests it, and applies the same
    // deletion.
    let targets = vec![1, 2];
    let proof = forest.prove_batch(&targets).unwrap();
    let del_hashes = vec![hash_from_u8(1), hash_from_u8(2)];
    assert_eq!(pollard.verify(&proof, &del_hashes), Ok(true));
    pollard.ingest_batch_proof(&proof).unwrap();

    let undo = forest.modify(&[], &targets).unwrap();
    pollard.modify(&[], &targets).unwrap();
    assert_eq!(forest.roots(), pollard.roots());

    // A reorg arrives: roll the forest back with the undo record.
    forest.undo(&undo).unwrap();
    let proof = forest.prove_batch(&[1]).unwrap();
    assert_eq!(
        proof.verify(&[hash_from_u8(1)], &forest.roots(), forest.num_leaves()),
        Ok(true)
    );

    println!("forest and pollard agree on {} roots", forest.roots().len());
}
