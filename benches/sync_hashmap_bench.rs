use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;
use sync_hashmap::SyncHashMap;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn filled(seed: u64, n: usize) -> (SyncHashMap<String, u64>, Vec<String>) {
    let keys: Vec<_> = lcg(seed).take(n).map(key).collect();
    let m: SyncHashMap<String, u64> = keys
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, k)| (k, i as u64))
        .collect();
    (m, keys)
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("sync_hashmap_insert_10k", |b| {
        b.iter_batched(
            || SyncHashMap::<String, u64>::new(),
            |m| {
                for (i, x) in lcg(1).take(10_000).enumerate() {
                    m.insert(key(x), i as u64);
                }
                black_box(m)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get_hit(c: &mut Criterion) {
    c.bench_function("sync_hashmap_get_hit", |b| {
        let (m, keys) = filled(7, 20_000);
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(m.get(k.as_str()));
        })
    });
}

fn bench_get_miss(c: &mut Criterion) {
    c.bench_function("sync_hashmap_get_miss", |b| {
        let (m, _) = filled(11, 10_000);
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            // generate keys unlikely in map
            let k = key(miss.next().unwrap());
            black_box(m.get(k.as_str()));
        })
    });
}

fn bench_update_in_place(c: &mut Criterion) {
    c.bench_function("sync_hashmap_update_hit", |b| {
        let (m, keys) = filled(13, 10_000);
        let mut it = keys.iter().cycle();
        let mut n = 0u64;
        b.iter(|| {
            let k = it.next().unwrap();
            n += 1;
            // Snapshot-resident key: lock-free swap.
            black_box(m.insert(k.clone(), n));
        })
    });
}

fn bench_parallel_reads(c: &mut Criterion) {
    c.bench_function("sync_hashmap_get_hit_4_threads", |b| {
        let (m, keys) = filled(17, 4_096);
        b.iter(|| {
            std::thread::scope(|s| {
                for t in 0..4 {
                    let (m, keys) = (&m, &keys);
                    s.spawn(move || {
                        for k in keys.iter().skip(t).step_by(4) {
                            black_box(m.get(k.as_str()));
                        }
                    });
                }
            })
        })
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_insert, bench_get_hit, bench_get_miss, bench_update_in_place, bench_parallel_reads
}
criterion_main!(benches);
