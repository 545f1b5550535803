/// Benchmarks for NaN-skipping reductions.
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ensemble_explorer::operations::{self, Reducer};
use ndarray::{ArrayD, IxDyn};

fn criterion_benchmark(c: &mut Criterion) {
    // time, lat, lon and ensemble, with every seventh value missing.
    for days in [30, 365] {
        let shape = [days, 32, 32, 4];
        let data = ArrayD::from_shape_fn(IxDyn(&shape), |index| {
            let n = index[0] + index[1] + index[2] + index[3];
            if n % 7 == 0 {
                f64::NAN
            } else {
                (n % 256) as f64
            }
        });
        for reducer in [Reducer::Sum, Reducer::Mean, Reducer::Std, Reducer::Max] {
            for (axes_name, axes) in [("time", vec![0]), ("lat,lon", vec![1, 2])] {
                let name = format!("{}({}, {})", reducer, days, axes_name);
                c.bench_function(&name, |b| {
                    b.iter(|| operations::reduce(black_box(data.view()), &axes, reducer))
                });
            }
        }

        // Monthly buckets along time.
        let buckets: Vec<Vec<usize>> = (0..days)
            .collect::<Vec<_>>()
            .chunks(30)
            .map(|chunk| chunk.to_vec())
            .collect();
        let name = format!("bucket_reduce({}, {} buckets)", days, buckets.len());
        c.bench_function(&name, |b| {
            b.iter(|| {
                operations::bucket_reduce(black_box(data.view()), 0, &buckets, Reducer::Sum)
                    .unwrap()
            })
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
