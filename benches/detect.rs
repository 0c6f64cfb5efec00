use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use dedupkit::{
    DedupService, DetectionConfig, DuplicateDetector, EntityKind, InMemoryStore, NamedEntity,
    Relation, RelationKind,
};

const STEMS: &[&str] = &[
    "Elegant Events",
    "Rustic Barn",
    "Bloom Florals",
    "Harbor View Catering",
    "Golden Hour Photography",
    "Silver Strings Quartet",
    "Maple Grove Venue",
    "Sweet Tiers Bakery",
];

/// Vendor names where roughly one in four is a near-duplicate of another.
fn vendors(n: usize) -> Vec<NamedEntity> {
    (0..n)
        .map(|i| {
            let stem = STEMS[i % STEMS.len()];
            let name = match i % 4 {
                0 => format!("{stem} {i}"),
                1 => format!("{stem} {} Co", i - 1),
                2 => format!("{stem} No {i}"),
                _ => format!("{} {stem} {i}", i * 7),
            };
            NamedEntity::new(name, EntityKind::Vendor)
        })
        .collect()
}

fn bench_find(c: &mut Criterion) {
    let detector = DuplicateDetector::new(DetectionConfig::default()).unwrap();

    let mut group = c.benchmark_group("detect/find");
    for n in [100usize, 500, 1000] {
        let entities = vendors(n);
        group.throughput(Throughput::Elements((n * (n - 1) / 2) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &entities, |b, entities| {
            b.iter(|| detector.find(entities));
        });
    }
    group.finish();
}

fn bench_report(c: &mut Criterion) {
    let service = DedupService::new(Arc::new(InMemoryStore::new()));
    for (i, entity) in vendors(500).into_iter().enumerate() {
        let id = service.register_entity(entity).unwrap();
        for _ in 0..(i % 3) {
            service
                .record_relation(Relation::new(RelationKind::Booking, id))
                .unwrap();
        }
    }

    c.bench_function("service/duplicate_report_500", |b| {
        b.iter(|| {
            service
                .duplicate_report(&EntityKind::Vendor, DetectionConfig::default())
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_find, bench_report);
criterion_main!(benches);
