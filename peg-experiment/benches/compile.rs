use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use peg_core::{TrialSpec, TrialTable};
use peg_experiment::{CompileOptions, compile};
use rand::SeedableRng;
use rand::rngs::StdRng;

// 4 fixed blocks and 3 sections of 5 blocks each, 20 trials per block.
fn large_table() -> TrialTable {
    let mut builder = TrialTable::builder();
    let mut row = 0;
    let blocks = (1..=4).chain((1..=3).flat_map(|s| (1..=5).map(move |b| s * 100 + b)));
    for block in blocks {
        for i in 0..20 {
            row += 1;
            builder.push(TrialSpec::timed(row, block, format!("b{block}-t{i}"), 500), 2);
        }
    }
    builder.build()
}

pub fn bench_compile(c: &mut Criterion) {
    let table = large_table();
    let mut g = c.benchmark_group("compile");
    g.sample_size(60);

    for (name, randomize_sections) in [("ordered", false), ("shuffled", true)] {
        let options = CompileOptions {
            repetitions: 5,
            randomize_sections,
        };
        g.bench_function(name, |b| {
            b.iter_batched(
                || StdRng::seed_from_u64(42),
                |mut rng| black_box(compile(black_box(&table), options, &mut rng)),
                BatchSize::SmallInput,
            )
        });
    }
    g.finish();
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
