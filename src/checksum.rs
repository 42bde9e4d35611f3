//! Optional per-node integrity checksum (feature `integrity-checksum`).
//!
//! Covers the fields a corrupted header (a wild write from a buffer overrun
//! in the client's payload, say) would actually disturb: `size`, `used_size`,
//! the owning `block`, and the address-order links. It deliberately excludes
//! the free-size tree's `parent`/`left`/`right`/`color` links, the
//! duplicate-chain links, and `occupied` - those mutate on every rotation,
//! promotion, or allocate/free of *other* nodes in the tree, and are not
//! evidence of corruption on their own. Matches the original allocator's own
//! `HeapArenaGetNodeChecksum`, which zeroes the same fields before hashing.
//!
//! The hash is a plain FNV-1a over the header's bytes, collected into a
//! fixed-capacity `arrayvec::ArrayVec` scratch buffer to avoid a heap
//! allocation inside the allocator itself.

use std::mem::size_of;
use std::ptr::NonNull;

use arrayvec::ArrayVec;

use crate::node::{Color, Node};

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A bitwise copy of `node` with every field that changes for reasons other
/// than corruption zeroed out, ready to hash.
///
/// # Safety
/// `node` must point at a live, properly initialized `Node`.
unsafe fn canonical_copy(node: NonNull<Node>) -> Node {
    let mut copy = std::ptr::read(node.as_ptr());
    copy.parent = None;
    copy.left = None;
    copy.right = None;
    copy.color = Color::Red;
    copy.dup_prev = None;
    copy.dup_next = None;
    copy.occupied = false;
    copy.checksum = 0;
    copy
}

/// # Safety
/// `node` must point at a live, properly initialized `Node`.
unsafe fn scratch_copy(node: NonNull<Node>) -> ArrayVec<u8, { size_of::<Node>() }> {
    let copy = canonical_copy(node);
    let mut buf = ArrayVec::new();
    let base = &copy as *const Node as *const u8;
    for i in 0..size_of::<Node>() {
        buf.push(*base.add(i));
    }
    buf
}

/// Recomputes and writes `node`'s checksum field from its current header
/// contents. Call after any mutation of `size`, `used_size`, `block`,
/// `prev_addr`, or `next_addr` (split, coalesce, fresh write) - not needed
/// after a pure tree rebalancing touch.
///
/// # Safety
/// `node` must point at a live, properly initialized `Node`.
pub unsafe fn stamp(node: NonNull<Node>) {
    let digest = fnv1a(&scratch_copy(node));
    (*node.as_ptr()).checksum = digest;
}

/// Recomputes `node`'s checksum and compares it against the stored value.
/// Returns `false` on mismatch, meaning the header has been corrupted since
/// it was last stamped.
///
/// # Safety
/// `node` must point at a live, properly initialized `Node`.
pub unsafe fn verify(node: NonNull<Node>) -> bool {
    let digest = fnv1a(&scratch_copy(node));
    node.as_ref().checksum == digest
}
