//! Stress tests - push the arena to its limits.
//!
//! - Rapid allocate/free churn over many cycles
//! - A capacity-limited page supplier, to exercise `AllocError::OutOfMemory`
//! - Worst-case fragmentation: alternating live/dead allocations across many
//!   pages, then a full reclaim

use heap_arena::page::{PageSupplier, DEFAULT_NORMAL_ALLOCATION_SIZE};
use heap_arena::{AllocError, HeapArena};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::ptr::NonNull;

/// A page supplier that runs out after a fixed number of pages, mirroring a
/// sandboxed or memory-capped host.
struct LimitedPageSupplier {
    remaining_pages: usize,
}

impl PageSupplier for LimitedPageSupplier {
    fn get_memory(&mut self, byte_count: usize) -> Option<NonNull<u8>> {
        if self.remaining_pages == 0 {
            return None;
        }
        self.remaining_pages -= 1;
        let layout = std::alloc::Layout::from_size_align(byte_count, 16).unwrap();
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    unsafe fn free_memory(&mut self, ptr: NonNull<u8>, byte_count: usize) {
        let layout = std::alloc::Layout::from_size_align(byte_count, 16).unwrap();
        std::alloc::dealloc(ptr.as_ptr(), layout);
    }
}

#[test]
fn near_capacity_operation_stays_correct() {
    let mut arena = HeapArena::default();
    let mut live = Vec::new();
    for i in 0..5000usize {
        let size = 16 + (i % 64);
        live.push(arena.allocate(size).unwrap());
    }
    arena.check_invariants().unwrap();
    for p in live {
        arena.free(p);
    }
    arena.check_invariants().unwrap();
}

#[test]
fn supplier_exhaustion_surfaces_out_of_memory() {
    let supplier = LimitedPageSupplier { remaining_pages: 2 };
    let mut arena = HeapArena::with_supplier(supplier, DEFAULT_NORMAL_ALLOCATION_SIZE);

    // Each of these oversized requests consumes one of the two pages the
    // supplier is willing to hand out.
    let huge = DEFAULT_NORMAL_ALLOCATION_SIZE * 2;
    arena.allocate(huge).unwrap();
    arena.allocate(huge).unwrap();

    match arena.allocate(huge) {
        Err(AllocError::OutOfMemory) => {}
        other => panic!("expected OutOfMemory, got {:?}", other),
    }
}

#[test]
fn rapid_churn_at_a_single_size_class() {
    let mut arena = HeapArena::default();
    let mut rng = ChaCha8Rng::seed_from_u64(0xC0FFEE);
    let mut live: Vec<NonNull<u8>> = Vec::new();

    for _ in 0..20_000 {
        if live.len() < 64 && rng.gen_bool(0.6) {
            live.push(arena.allocate(48).unwrap());
        } else if let Some(idx) = (!live.is_empty()).then(|| rng.gen_range(0..live.len())) {
            arena.free(live.swap_remove(idx));
        }
    }
    for p in live {
        arena.free(p);
    }
    arena.check_invariants().unwrap();
    // Churning at one size class on one page should never need more than a
    // handful of pages.
    assert!(arena.page_count() <= 4, "unexpected page growth: {}", arena.page_count());
}

#[test]
fn worst_case_fragmentation_then_full_reclaim() {
    let mut arena = HeapArena::default();
    let mut keep = Vec::new();
    let mut drop_now = Vec::new();

    // Interleave keepers and throwaways so every other node on a page is
    // freed, maximizing the number of isolated free nodes before reclaim.
    for i in 0..2000 {
        let size = 32 + (i % 17);
        let ptr = arena.allocate(size).unwrap();
        if i % 2 == 0 {
            keep.push(ptr);
        } else {
            drop_now.push(ptr);
        }
    }
    for p in drop_now {
        arena.free(p);
    }
    arena.check_invariants().unwrap();

    for p in keep {
        arena.free(p);
    }
    arena.check_invariants().unwrap();

    // Every page should have fully collapsed back into a single free node.
    let nodes = arena.nodes();
    assert_eq!(nodes.len(), arena.page_count());
    assert!(nodes.iter().all(|n| !n.occupied));
}
