use std::hint::black_box;

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::Throughput;
use grove::accumulator::forest::Forest;
use grove::accumulator::node_hash::NodeHash;
use grove::accumulator::types::Leaf;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

fn generate_test_leaves(count: usize, seed: u64) -> Vec<Leaf> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut bytes = [0u8; 32];
            rng.fill(&mut bytes);
            Leaf::new(NodeHash::new(bytes), true)
        })
        .collect()
}

fn proof_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("proof_generation");

    let accumulator_size = 1000;
    let leaves = generate_test_leaves(accumulator_size, 42);
    let mut forest = Forest::new(0);
    forest.modify(&leaves, &[]).unwrap();

    for target_count in [1, 10, 100].iter() {
        let targets = (0..*target_count as u64).collect::<Vec<_>>();

        group.throughput(Throughput::Elements(*target_count as u64));
        group.bench_with_input(
            BenchmarkId::new("prove_batch", target_count),
            target_count,
            |b, _| {
                b.iter(|| {
                    let proof = forest.prove_batch(black_box(&targets));
                    black_box(proof.unwrap())
                });
            },
        );
    }
    group.finish();
}

fn proof_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("proof_verification");

    let accumulator_size = 1000;
    let leaves = generate_test_leaves(accumulator_size, 42);
    let mut forest = Forest::new(0);
    forest.modify(&leaves, &[]).unwrap();
    let roots = forest.roots();

    for target_count in [1, 10, 100].iter() {
        let targets = (0..*target_count as u64).collect::<Vec<_>>();
        let proof = forest.prove_batch(&targets).unwrap();
        let del_hashes = targets
            .iter()
            .map(|target| leaves[*target as usize].hash)
            .collect::<Vec<_>>();

        group.throughput(Throughput::Elements(*target_count as u64));
        group.bench_with_input(
            BenchmarkId::new("verify", target_count),
            target_count,
            |b, _| {
                b.iter(|| {
                    let result = proof.verify(
                        black_box(&del_hashes),
                        black_box(&roots),
                        forest.num_leaves(),
                    );
                    black_box(result.unwrap())
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, proof_generation, proof_verification);
criterion_main!(benches);
