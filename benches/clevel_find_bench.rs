use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use clevel_hash::core::config::Config;
use clevel_hash::ClevelHash;

fn bench_find(c: &mut Criterion) {
    let sizes: &[usize] = &[64, 1024, 10_000, 65536];

    let mut group = c.benchmark_group("clevel/find");
    for &n in sizes {
        let mut config = Config::default();
        config.hash_power = (n.next_power_of_two().trailing_zeros() + 1).max(4);
        config.region_size = (n * 256).max(1 << 20);
        let table: ClevelHash<u64, u64> = ClevelHash::new(config).unwrap();
        for i in 0..n as u64 {
            table.insert(i, i, 0).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("clevel/search_hit", n), &n, |b, &n| {
            b.iter(|| {
                for i in 0..n as u64 {
                    black_box(table.search(&i).unwrap());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("clevel/search_miss", n), &n, |b, &n| {
            b.iter(|| {
                for i in 0..n as u64 {
                    black_box(table.search(&(i + n as u64 * 10)).unwrap());
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_find);
criterion_main!(benches);
