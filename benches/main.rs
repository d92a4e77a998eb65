use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BatchSize;
use criterion::Criterion;

use scavenger::util::heap::{Segment, SegmentLedger};
use scavenger::util::object_model;
use scavenger::util::ObjectReference;
use scavenger::{CollectionContext, GenerationalHeap, Options};

const NODES: usize = 10_000;

fn build_list(heap: &GenerationalHeap) -> Vec<ObjectReference> {
    let nodes: Vec<_> = (0..NODES)
        .map(|_| heap.alloc_instance(2, 1).unwrap())
        .collect();
    for i in 0..NODES {
        let next = nodes[(i + 1) % NODES];
        let skip = nodes[(i * 7919) % NODES];
        object_model::store_slot(object_model::ref_slot(nodes[i], 0), next);
        object_model::store_slot(object_model::ref_slot(nodes[i], 1), skip);
    }
    vec![nodes[0], nodes[NODES / 2]]
}

fn bench_scavenge(c: &mut Criterion) {
    for threads in [1, 4] {
        let mut options = Options::builtin();
        options.threads = threads;
        options.max_heap_size = 64 << 20;
        options.min_heap_size = 64 << 20;
        let heap = GenerationalHeap::new(&options).unwrap();
        let mut cx = CollectionContext::new(&heap, &options);

        c.bench_function(&format!("scavenge_{}_nodes_{}_threads", NODES, threads), |b| {
            b.iter_batched(
                || build_list(&heap),
                |mut roots| {
                    cx.begin_cycle();
                    cx.scavenge(&mut roots);
                    let outcome = cx.end_cycle();
                    assert!(!outcome.promotion_failed);
                    roots
                },
                BatchSize::PerIteration,
            )
        });
    }
}

fn bench_ledger(c: &mut Criterion) {
    c.bench_function("ledger_add_split", |b| {
        b.iter(|| {
            let mut ledger = SegmentLedger::new();
            // Every other granule first, then the gaps, so each add merges.
            for i in (0..256).step_by(2).chain((1..256).step_by(2)) {
                ledger.add(Segment::new(i << 21, 1 << 21, false));
            }
            let mut parts = vec![];
            while !ledger.is_empty() {
                let size = (3 << 21).min(ledger.size());
                parts.push(ledger.split(size));
            }
            parts
        })
    });
}

pub fn bench_main(c: &mut Criterion) {
    bench_ledger(c);
    bench_scavenge(c);
}

criterion_group!(benches, bench_main);
criterion_main!(benches);
