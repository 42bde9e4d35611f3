//! The six literal end-to-end scenarios from the design doc's testable
//! properties section, with `NORMAL_ALLOCATION_SIZE = 1024`.

use heap_arena::page::page_header_size;
use heap_arena::{header_size, HeapArena};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

const NORMAL_ALLOCATION_SIZE: usize = 1024;

fn page_body_size() -> usize {
    NORMAL_ALLOCATION_SIZE - page_header_size() - header_size()
}

fn free_node_sizes(arena: &HeapArena) -> Vec<usize> {
    arena
        .nodes()
        .iter()
        .filter(|n| !n.occupied)
        .map(|n| n.size)
        .collect()
}

/// 1. `a = allocate(100); free(a); b = allocate(100)` -> `b == a`, with the
/// identical free-node shape reappearing after the second allocate.
#[test]
fn scenario_1_free_then_realloc_same_size_reuses_slot_identically() {
    let mut arena = HeapArena::new(NORMAL_ALLOCATION_SIZE);
    let a = arena.allocate(100).unwrap();

    let expected_leftover = page_body_size() - 100 - header_size();
    assert_eq!(free_node_sizes(&arena), vec![expected_leftover]);

    arena.free(a);
    assert_eq!(free_node_sizes(&arena), vec![page_body_size()]);

    let b = arena.allocate(100).unwrap();
    assert_eq!(a, b);
    assert_eq!(free_node_sizes(&arena), vec![expected_leftover]);
}

/// 2. `a = allocate(50); b = allocate(50); free(a); free(b)` -> one free node
/// per page, spanning the whole page minus the page header.
#[test]
fn scenario_2_freeing_both_allocations_collapses_the_page() {
    let mut arena = HeapArena::new(NORMAL_ALLOCATION_SIZE);
    let a = arena.allocate(50).unwrap();
    let b = arena.allocate(50).unwrap();
    arena.free(a);
    arena.free(b);

    let nodes = arena.nodes();
    assert_eq!(nodes.len(), 1, "both allocations should have merged into one node");
    assert!(!nodes[0].occupied);
    assert_eq!(nodes[0].size, NORMAL_ALLOCATION_SIZE - page_header_size());
}

/// 3. Same as scenario 2 but freed in the opposite order -> identical end
/// state (coalescing is order-invariant).
#[test]
fn scenario_3_coalescing_is_order_invariant() {
    let mut arena = HeapArena::new(NORMAL_ALLOCATION_SIZE);
    let a = arena.allocate(50).unwrap();
    let b = arena.allocate(50).unwrap();
    arena.free(b);
    arena.free(a);

    let nodes = arena.nodes();
    assert_eq!(nodes.len(), 1);
    assert!(!nodes[0].occupied);
    assert_eq!(nodes[0].size, NORMAL_ALLOCATION_SIZE - page_header_size());
}

/// 4. Allocate N regions, shuffle the free order, free everything -> each
/// page collapses back to exactly one free node, and the byte accounting
/// identity holds.
#[test]
fn scenario_4_shuffled_frees_collapse_every_page() {
    let mut arena = HeapArena::new(NORMAL_ALLOCATION_SIZE);
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    let sizes: Vec<usize> = (0..50).map(|i| 16 + (i * 37) % 400).collect();
    let mut ptrs: Vec<_> = sizes.iter().map(|&s| arena.allocate(s).unwrap()).collect();
    ptrs.shuffle(&mut rng);

    for p in ptrs {
        arena.free(p);
    }

    let pages = arena.page_count();
    let nodes = arena.nodes();
    assert_eq!(nodes.len(), pages, "expected exactly one surviving node per page");
    assert!(nodes.iter().all(|n| !n.occupied));

    let live_nodes = nodes.len();
    assert_eq!(
        arena.free_bytes(),
        arena.allocated_bytes() - pages * page_header_size() - live_nodes * header_size()
    );
}

/// 5. `a = allocate(200); realloc(a, 200)` -> same pointer, no mutation.
#[test]
fn scenario_5_realloc_to_same_size_is_a_no_op() {
    let mut arena = HeapArena::new(NORMAL_ALLOCATION_SIZE);
    let a = arena.allocate(200).unwrap();
    let before = arena.nodes();

    let c = arena.realloc(a, 200).unwrap();
    assert_eq!(c, a);

    let after = arena.nodes();
    assert_eq!(before, after);
    let node = after.iter().find(|n| n.occupied).unwrap();
    assert_eq!(node.used_size, 200);
}

/// 6. `a = allocate(10); b = allocate(10); c = realloc(a, 1000)` -> `c != a`
/// (blocked by `b`), the first 10 bytes survive the move, and `a`'s old
/// region is free afterward.
#[test]
fn scenario_6_realloc_blocked_by_neighbor_relocates_and_preserves_prefix() {
    let mut arena = HeapArena::new(NORMAL_ALLOCATION_SIZE);
    let a = arena.allocate(10).unwrap();
    let _b = arena.allocate(10).unwrap();

    unsafe {
        for i in 0..10u8 {
            a.as_ptr().add(i as usize).write(i * 3);
        }
    }
    let a_header_addr = a.as_ptr() as usize - header_size();

    let c = arena.realloc(a, 1000).unwrap();
    assert_ne!(c, a);

    unsafe {
        for i in 0..10u8 {
            assert_eq!(c.as_ptr().add(i as usize).read(), i * 3);
        }
    }

    let old_region = arena
        .nodes()
        .into_iter()
        .find(|n| n.address == a_header_addr)
        .expect("a's old header address should still describe a node");
    assert!(!old_region.occupied, "a's old region should now be free");
}
