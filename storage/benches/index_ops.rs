use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use storage::{IndexConfig, MemFile, RecordIndex};

const KEYS: u32 = 10_000;

fn shuffled_keys() -> Vec<u32> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let mut keys: Vec<u32> = (1..=KEYS).collect();
    keys.shuffle(&mut rng);
    keys
}

fn filled_index(keys: &[u32]) -> RecordIndex<MemFile> {
    let mut index = RecordIndex::from_file(MemFile::new(), IndexConfig::unsynced()).unwrap();
    for &k in keys {
        index.update_record_id(k, k * 16).unwrap();
    }
    index
}

fn bench_insert(c: &mut Criterion) {
    let keys = shuffled_keys();
    c.bench_function("insert 10k shuffled", |b| {
        b.iter(|| filled_index(black_box(&keys)))
    });
}

fn bench_lookup(c: &mut Criterion) {
    let keys = shuffled_keys();
    let mut index = filled_index(&keys);
    c.bench_function("lookup 10k", |b| {
        b.iter(|| {
            for &k in &keys {
                black_box(index.block_offset_of_record(k).unwrap());
            }
        })
    });
}

fn bench_delete(c: &mut Criterion) {
    let keys = shuffled_keys();
    c.bench_function("delete 10k shuffled", |b| {
        b.iter_batched(
            || filled_index(&keys),
            |mut index| {
                for &k in &keys {
                    index.delete_record_index(k).unwrap();
                }
                index
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_insert, bench_lookup, bench_delete);
criterion_main!(benches);
