//! Object graphs for exercising the promotion engine.
//!
//! Nodes are instances with two reference fields and one data word holding a unique id.

use std::collections::{HashMap, HashSet};

use crate::heap::GenerationalHeap;
use crate::policy::ContiguousSpace;
use crate::util::object_forwarding;
use crate::util::object_model::{self, Shape};
use crate::util::ObjectReference;

pub const NODE_REFS: usize = 2;
pub const NODE_DATA_WORDS: usize = 1;

pub fn node_size() -> usize {
    Shape::Instance {
        refs: NODE_REFS,
        data_words: NODE_DATA_WORDS,
    }
    .size_in_bytes()
}

/// Allocate a node with null edges in eden.
pub fn alloc_node(heap: &GenerationalHeap, id: usize) -> ObjectReference {
    let node = heap
        .alloc_instance(NODE_REFS, NODE_DATA_WORDS)
        .unwrap_or_else(|| panic!("Eden full allocating node {}", id));
    unsafe { object_model::data_word(node, 0).store::<usize>(id) };
    node
}

pub fn node_id(node: ObjectReference) -> usize {
    unsafe { object_model::data_word(node, 0).load::<usize>() }
}

pub fn set_edge(from: ObjectReference, index: usize, to: ObjectReference) {
    object_model::store_slot(object_model::ref_slot(from, index), to);
}

pub fn edge(from: ObjectReference, index: usize) -> ObjectReference {
    object_model::load_slot(object_model::ref_slot(from, index))
}

pub struct ObjectGraph {
    pub roots: Vec<ObjectReference>,
    pub nodes: usize,
}

/// Build `nodes` nodes chained through edge 0, with edge 1 pointing at `pick(i)` (or null if
/// `pick` returns `nodes` or more). Roots are the first node plus `extra_roots` nodes picked
/// the same way.
pub fn build_graph<F: FnMut(usize) -> usize>(
    heap: &GenerationalHeap,
    nodes: usize,
    extra_roots: usize,
    mut pick: F,
) -> ObjectGraph {
    let all: Vec<ObjectReference> = (0..nodes).map(|id| alloc_node(heap, id)).collect();
    for (i, &node) in all.iter().enumerate() {
        if i + 1 < nodes {
            set_edge(node, 0, all[i + 1]);
        }
        let target = pick(i);
        if target < nodes {
            set_edge(node, 1, all[target]);
        }
    }
    let mut roots = vec![all[0]];
    for i in 0..extra_roots {
        roots.push(all[pick(nodes + i) % nodes]);
    }
    ObjectGraph { roots, nodes }
}

/// Ids of all nodes reachable from `roots`, following edges as they are now.
pub fn reachable_ids(roots: &[ObjectReference]) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut stack: Vec<ObjectReference> = roots.iter().copied().filter(|r| !r.is_null()).collect();
    let mut ids = vec![];
    while let Some(node) = stack.pop() {
        if !seen.insert(node) {
            continue;
        }
        ids.push(node_id(node));
        for i in 0..NODE_REFS {
            let next = edge(node, i);
            if !next.is_null() {
                stack.push(next);
            }
        }
    }
    ids.sort_unstable();
    ids
}

/// Count the nodes in a space by id. Fillers and arrays are skipped.
pub fn count_nodes_in(space: &ContiguousSpace, counts: &mut HashMap<usize, usize>) {
    space.object_iterate(|object| {
        if object_model::shape(object)
            == (Shape::Instance {
                refs: NODE_REFS,
                data_words: NODE_DATA_WORDS,
            })
        {
            *counts.entry(node_id(object)).or_default() += 1;
        }
    });
}

/// Check that every one of `nodes` ids lives exactly once in the survivor and old spaces,
/// and that no surviving object refers into the collection set.
pub fn assert_evacuated_once(heap: &GenerationalHeap, nodes: usize) {
    let mut counts = HashMap::new();
    count_nodes_in(heap.from_space(), &mut counts);
    count_nodes_in(heap.old(), &mut counts);
    for id in 0..nodes {
        assert_eq!(counts.get(&id).copied(), Some(1), "node {} copies", id);
    }
    assert_eq!(counts.len(), nodes);
    for space in [heap.from_space(), heap.old()] {
        space.object_iterate(|object| {
            object_model::for_each_ref_slot(object, |slot| {
                let target = object_model::load_slot(slot);
                assert!(
                    target.is_null() || !heap.is_in_collection_set(target),
                    "{} still refers to {}",
                    object,
                    target
                );
            });
        });
    }
}

/// Objects in a space that are claimed in place.
pub fn self_forwarded_in(space: &ContiguousSpace) -> usize {
    let mut n = 0;
    space.object_iterate(|object| {
        if object_forwarding::is_self_forwarded(object) {
            n += 1;
        }
    });
    n
}
