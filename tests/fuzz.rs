//! Fuzz test - checks the one property no amount of internal bookkeeping can
//! paper over: every two simultaneously live allocations occupy disjoint byte
//! ranges, and the content a caller wrote is exactly the content read back,
//! regardless of how much splitting/coalescing/realloc shuffling happened in
//! between.

use heap_arena::HeapArena;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::ptr::NonNull;

struct LiveRegion {
    ptr: NonNull<u8>,
    size: usize,
    tag: u8,
}

fn ranges_overlap(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

fn assert_no_overlaps(live: &HashMap<u64, LiveRegion>) {
    let mut ranges: Vec<(usize, usize)> = live
        .values()
        .map(|r| {
            let start = r.ptr.as_ptr() as usize;
            (start, start + r.size.max(1))
        })
        .collect();
    ranges.sort_unstable();
    for w in ranges.windows(2) {
        assert!(
            !ranges_overlap(w[0], w[1]),
            "live regions overlap: {:?} vs {:?}",
            w[0],
            w[1]
        );
    }
}

fn assert_contents_intact(live: &HashMap<u64, LiveRegion>) {
    for region in live.values() {
        unsafe {
            for i in 0..region.size {
                let byte = region.ptr.as_ptr().add(i).read();
                assert_eq!(byte, region.tag, "payload corrupted at offset {}", i);
            }
        }
    }
}

#[test]
fn no_two_live_allocations_ever_overlap() {
    let mut arena = HeapArena::default();
    let mut rng = ChaCha8Rng::seed_from_u64(0xDEADBEEF);
    let mut live: HashMap<u64, LiveRegion> = HashMap::new();
    let mut next_id = 0u64;

    for step in 0..8000u64 {
        let roll: u32 = rng.gen_range(0..100);
        if live.is_empty() || roll < 60 {
            let size = rng.gen_range(1..1024);
            let tag = (step % 251) as u8;
            if let Ok(ptr) = arena.allocate(size) {
                unsafe {
                    std::ptr::write_bytes(ptr.as_ptr(), tag, size);
                }
                live.insert(next_id, LiveRegion { ptr, size, tag });
                next_id += 1;
            }
        } else if roll < 85 {
            let idx = rng.gen_range(0..live.len());
            let key = *live.keys().nth(idx).unwrap();
            arena.free(live.remove(&key).unwrap().ptr);
        } else {
            let idx = rng.gen_range(0..live.len());
            let key = *live.keys().nth(idx).unwrap();
            let region = live.remove(&key).unwrap();
            let new_size = rng.gen_range(1..2048);
            if let Ok(new_ptr) = arena.realloc(region.ptr, new_size) {
                let keep = region.size.min(new_size);
                unsafe {
                    for i in 0..keep {
                        assert_eq!(new_ptr.as_ptr().add(i).read(), region.tag);
                    }
                    if new_size > keep {
                        std::ptr::write_bytes(new_ptr.as_ptr().add(keep), region.tag, new_size - keep);
                    }
                }
                live.insert(key, LiveRegion { ptr: new_ptr, size: new_size, tag: region.tag });
            } else {
                live.insert(key, region);
            }
        }

        if step % 200 == 0 {
            assert_no_overlaps(&live);
            assert_contents_intact(&live);
        }
    }

    assert_no_overlaps(&live);
    assert_contents_intact(&live);
    for region in live.into_values() {
        arena.free(region.ptr);
    }
    arena.check_invariants().unwrap();
}
