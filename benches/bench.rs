use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use proxima::prelude::*;
use proxima::object::impls::FloatVector;

fn vector(locator: &str, values: Vec<f32>) -> MetricObject<FloatVector> {
    MetricObject::new(locator, FloatVector::new(values))
}

fn dataset(n: usize, dim: usize) -> Vec<MetricObject<FloatVector>> {
    (0..n)
        .map(|i| {
            let values: Vec<f32> = (0..dim)
                .map(|d| ((i * 31 + d * 17) % 97) as f32 / 97.0)
                .collect();
            vector(&format!("o{i}"), values)
        })
        .collect()
}

fn bench_ranking_collection(c: &mut Criterion) {
    let distances: Vec<f32> = (0..10_000).map(|i| ((i * 31) % 9973) as f32).collect();
    let objects: Vec<_> = distances
        .iter()
        .enumerate()
        .map(|(i, d)| std::sync::Arc::new(vector(&format!("o{i}"), vec![*d])))
        .collect();

    c.bench_function("ranking_collection_add_10k_cap_100", |b| {
        b.iter(|| {
            let mut collection = RankingCollection::new(100);
            for (object, distance) in objects.iter().zip(distances.iter()) {
                collection.add(object.clone(), *distance, None);
            }
            black_box(collection.threshold())
        })
    });
}

fn bench_pivot_selection(c: &mut Criterion) {
    let data = dataset(512, 8);

    c.bench_function("idistance_select_4_pivots", |b| {
        b.iter(|| {
            let chooser = IdistanceChooser::new(IdistanceConfig {
                sample_set_size: 256,
                sample_pivot_size: 16,
                seed: Some(5),
            });
            let pivots = chooser
                .select_from(&mut data.clone().into_iter(), 4)
                .unwrap();
            black_box(pivots.len())
        })
    });
}

fn bench_sequential_knn(c: &mut Criterion) {
    let data = dataset(2_000, 8);
    let chooser = IdistanceChooser::new(IdistanceConfig {
        sample_set_size: 256,
        sample_pivot_size: 16,
        seed: Some(5),
    });
    let pivots: Vec<MetricObject<FloatVector>> = chooser
        .select_from(&mut data.clone().into_iter(), 8)
        .unwrap()
        .iter()
        .map(|p| p.as_ref().clone())
        .collect();

    let scan = SequentialScan::new(BucketConfig::default(), pivots, false).unwrap();
    for object in data {
        scan.insert(object).unwrap();
    }

    c.bench_function("sequential_knn_10_of_2k", |b| {
        b.iter(|| {
            let mut query = KnnQuery::new(vector("q", vec![0.5; 8]), 10);
            scan.search(&mut query);
            black_box(query.answer().len())
        })
    });
}

criterion_group!(
    benches,
    bench_ranking_collection,
    bench_pivot_selection,
    bench_sequential_knn
);
criterion_main!(benches);
