use std::collections::{HashMap, HashSet};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use scavenger::policy::ContiguousSpace;
use scavenger::util::copy::{AllocationPath, Generation};
use scavenger::util::object_forwarding;
use scavenger::util::object_model::{self, Shape};
use scavenger::util::ObjectReference;
use scavenger::{CollectionContext, GenerationalHeap, Options};

const MB: usize = 1 << 20;

fn options(threads: usize, heap_size: usize) -> Options {
    let mut options = Options::builtin();
    options.threads = threads;
    options.max_heap_size = heap_size;
    options.min_heap_size = heap_size;
    options
}

fn node(heap: &GenerationalHeap, id: usize) -> ObjectReference {
    let n = heap.alloc_instance(2, 1).unwrap();
    unsafe { object_model::data_word(n, 0).store::<usize>(id) };
    n
}

fn id(n: ObjectReference) -> usize {
    unsafe { object_model::data_word(n, 0).load::<usize>() }
}

fn link(from: ObjectReference, index: usize, to: ObjectReference) {
    object_model::store_slot(object_model::ref_slot(from, index), to);
}

fn target(from: ObjectReference, index: usize) -> ObjectReference {
    object_model::load_slot(object_model::ref_slot(from, index))
}

/// `n` nodes chained through their first field, the second field pointing at a random node.
fn random_graph(
    heap: &GenerationalHeap,
    n: usize,
    extra_roots: usize,
    seed: u64,
) -> Vec<ObjectReference> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let nodes: Vec<_> = (0..n).map(|i| node(heap, i)).collect();
    for i in 0..n {
        if i + 1 < n {
            link(nodes[i], 0, nodes[i + 1]);
        }
        link(nodes[i], 1, nodes[rng.random_range(0..n)]);
    }
    let mut roots = vec![nodes[0]];
    roots.extend((0..extra_roots).map(|_| nodes[rng.random_range(0..n)]));
    roots
}

fn reachable_ids(roots: &[ObjectReference]) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut stack = roots.to_vec();
    let mut ids = vec![];
    while let Some(n) = stack.pop() {
        if n.is_null() || !seen.insert(n) {
            continue;
        }
        ids.push(id(n));
        stack.push(target(n, 0));
        stack.push(target(n, 1));
    }
    ids.sort_unstable();
    ids
}

fn count_nodes(space: &ContiguousSpace, counts: &mut HashMap<usize, usize>) {
    space.object_iterate(|o| {
        if object_model::shape(o) == (Shape::Instance { refs: 2, data_words: 1 }) {
            *counts.entry(id(o)).or_default() += 1;
        }
    });
}

#[test]
fn four_workers_evacuate_every_node_once() {
    const NODES: usize = 10_000;
    let options = options(4, 64 * MB);
    let heap = GenerationalHeap::new(&options).unwrap();
    let mut cx = CollectionContext::new(&heap, &options);
    let mut roots = random_graph(&heap, NODES, 16, 7);

    cx.begin_cycle();
    cx.scavenge(&mut roots);
    let outcome = cx.end_cycle();

    assert!(!outcome.promotion_failed);
    assert_eq!(outcome.stats.objects_copied, NODES);
    assert!(outcome.stats.queue.pushes >= NODES);
    assert!(roots.iter().all(|r| heap.from_space().contains_object(*r)));
    assert_eq!(reachable_ids(&roots), (0..NODES).collect::<Vec<_>>());

    // Survivors now live in the from-space of the next cycle.
    let mut counts = HashMap::new();
    count_nodes(heap.from_space(), &mut counts);
    count_nodes(heap.old(), &mut counts);
    assert_eq!(counts.len(), NODES);
    assert!(counts.values().all(|&c| c == 1));
    assert_eq!(heap.eden().used(), 0);
    heap.verify_parseable();
}

#[test]
fn large_object_is_allocated_directly() {
    let mut options = options(1, 16 * MB);
    options.young_lab_size = 4096;
    let heap = GenerationalHeap::new(&options).unwrap();
    let mut cx = CollectionContext::new(&heap, &options);

    // 302 words: larger than half a buffer, far smaller than the survivor space.
    let array = heap.alloc_array(300).unwrap();
    assert!(object_model::object_size(array) > options.young_lab_size / 2);
    let mut roots = [array];

    cx.begin_cycle();
    cx.scavenge(&mut roots);
    let outcome = cx.end_cycle();

    let young = outcome.stats.allocations[Generation::Young];
    assert_eq!(young[AllocationPath::Direct], 1);
    assert_eq!(young[AllocationPath::Refill], 0);
    assert_eq!(young[AllocationPath::Local], 0);
    assert!(heap.from_space().contains_object(roots[0]));
}

#[test]
fn promotion_failure_is_reported_and_recoverable() {
    const NODES: usize = 10_000;
    let options = options(4, 16 * MB);
    let heap = GenerationalHeap::new(&options).unwrap();
    let mut cx = CollectionContext::new(&heap, &options);
    cx.set_tenuring_threshold(0);
    heap.old().set_capacity(64 << 10);
    let mut roots = random_graph(&heap, NODES, 8, 11);

    cx.begin_cycle();
    cx.scavenge(&mut roots);
    let outcome = cx.end_cycle();

    assert!(outcome.promotion_failed);
    assert!(!outcome.failures.is_empty());
    let failed: usize = outcome.failures.iter().map(|f| f.count).sum();
    assert_eq!(failed + outcome.stats.objects_promoted, NODES);
    assert_eq!(outcome.stats.objects_copied, outcome.stats.objects_promoted);
    for f in &outcome.failures {
        assert!(f.smallest_size <= f.first_size);
        assert!(f.total_size >= f.count * f.smallest_size);
    }

    // The graph is intact whether objects moved or stayed.
    assert_eq!(reachable_ids(&roots), (0..NODES).collect::<Vec<_>>());
    // Nothing was reset.
    assert!(heap.eden().used() > 0);

    assert_eq!(cx.restore_preserved_marks(), failed);
    let mut still_claimed = 0;
    heap.eden().object_iterate(|o| {
        if object_forwarding::is_self_forwarded(o) {
            still_claimed += 1;
        }
    });
    assert_eq!(still_claimed, 0);
    heap.verify_parseable();
}

#[test]
fn objects_are_promoted_at_tenuring_threshold() {
    let options = options(2, 16 * MB);
    let heap = GenerationalHeap::new(&options).unwrap();
    let mut cx = CollectionContext::new(&heap, &options);
    cx.set_tenuring_threshold(2);
    let mut roots = [node(&heap, 42)];

    for cycle in 1..=3 {
        cx.begin_cycle();
        cx.scavenge(&mut roots);
        let outcome = cx.end_cycle();
        assert!(!outcome.promotion_failed);
        if cycle < 3 {
            assert!(heap.from_space().contains_object(roots[0]));
            assert_eq!(object_model::read_mark(roots[0]).age(), cycle);
        } else {
            assert!(heap.old().contains_object(roots[0]));
            assert_eq!(outcome.stats.objects_promoted, 1);
        }
        assert_eq!(id(roots[0]), 42);
    }
}

#[test]
fn chunked_array_is_scanned_exactly_once() {
    const LENGTH: usize = 5000;
    let options = options(4, 32 * MB);
    let heap = GenerationalHeap::new(&options).unwrap();
    let mut cx = CollectionContext::new(&heap, &options);
    let array = heap.alloc_array(LENGTH).unwrap();
    for i in 0..LENGTH {
        object_model::store_slot(object_model::ref_slot(array, i), node(&heap, i));
    }
    let mut roots = [array];

    cx.begin_cycle();
    cx.scavenge(&mut roots);
    let outcome = cx.end_cycle();

    let chunks = LENGTH.div_ceil(options.array_chunk_size);
    assert_eq!(outcome.stats.arrays_chunked, 1);
    assert_eq!(outcome.stats.array_chunks_processed, chunks);
    assert_eq!(outcome.stats.masked_pushes, chunks);
    assert_eq!(outcome.stats.objects_copied, LENGTH + 1);
    for i in 0..LENGTH {
        let element = object_model::load_slot(object_model::ref_slot(roots[0], i));
        // After the flip the survivor copies form the next from-space.
        assert!(heap.from_space().contains_object(element));
        assert_eq!(id(element), i);
    }
    heap.verify_parseable();
}

#[test]
fn repeated_cycles_keep_graph_alive() {
    const NODES: usize = 2_000;
    let options = options(3, 16 * MB);
    let heap = GenerationalHeap::new(&options).unwrap();
    let mut cx = CollectionContext::new(&heap, &options);
    let mut roots = random_graph(&heap, NODES, 4, 3);

    for _ in 0..10 {
        // Garbage between cycles.
        for i in 0..500 {
            node(&heap, NODES + i);
        }
        cx.begin_cycle();
        cx.scavenge(&mut roots);
        let outcome = cx.end_cycle();
        assert!(!outcome.promotion_failed);
        assert_eq!(reachable_ids(&roots), (0..NODES).collect::<Vec<_>>());
    }
    // Past the default tenuring threshold everything lives in the old space.
    assert!(roots.iter().all(|r| heap.old().contains_object(*r)));
    assert_eq!(heap.from_space().used(), 0);
}
