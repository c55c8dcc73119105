use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use teamforge::model::Skills;
use teamforge::payoff::{PayoffModel, TaskConfig, TaskKind};
use teamforge::utility::{TieBreak, UtilityTuple};

fn random_profiles(nskills: usize, count: usize, rng: &mut StdRng) -> Vec<Skills> {
    (0..count)
        .map(|_| Skills::from_vec((0..nskills).map(|_| rng.gen_range(0..4)).collect()))
        .collect()
}

fn bench_task_value(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let mut group = c.benchmark_group("task_value");
    for kind in [TaskKind::BreadthDepth, TaskKind::MemberCount, TaskKind::Equality] {
        let cfg = TaskConfig {
            kind,
            ..TaskConfig::default()
        };
        let model = PayoffModel::new(&cfg, 8, false);
        let profiles = random_profiles(8, 256, &mut rng);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{:?}", kind)), &profiles, |b, profiles| {
            b.iter(|| profiles.iter().map(|s| model.task(black_box(s))).sum::<f64>())
        });
    }
    group.finish();
}

fn bench_tie_break(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(11);
    let tuples: Vec<UtilityTuple<usize>> = (0..64)
        .map(|i| {
            let dims = vec![
                rng.gen_range(-5.0..10.0),
                rng.gen_range(-1.0..1.0),
                rng.r#gen::<f64>() - 0.5,
            ];
            UtilityTuple::new(dims, i)
        })
        .collect();

    let mut group = c.benchmark_group("tie_break");
    for policy in [TieBreak::Deterministic, TieBreak::Normalized] {
        group.bench_function(format!("{:?}", policy), |b| {
            let mut rng = StdRng::seed_from_u64(3);
            b.iter(|| policy.select(black_box(&tuples), &mut rng))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_task_value, bench_tie_break);
criterion_main!(benches);
