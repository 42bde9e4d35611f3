//! HeapArena - the allocator façade tying the page list, address-order list,
//! and free-size index together into `allocate`/`free`/`realloc`/`release`.
//!
//! Best-fit allocation: the free-size index hands back the smallest free
//! node whose size is at least the request; if none exists, a fresh page is
//! pulled from the `PageSupplier`. A node is only split off when the
//! leftover is large enough to host its own header plus at least one byte
//! (`size > used + header_size()`); otherwise the whole node, slack
//! included, goes to the caller. `free` coalesces with same-page neighbors
//! in both directions before reinserting into the free-size index.

use std::fmt;
use std::ptr::NonNull;

use log::{debug, trace, warn};

use crate::address_order::AddressOrderList;
use crate::free_index::FreeSizeIndex;
use crate::node::{header_size, Node};
use crate::page::{PageList, PageSupplier, SystemPageSupplier, DEFAULT_NORMAL_ALLOCATION_SIZE};

/// Failure modes surfaced by the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The page supplier could not produce a new page large enough for the
    /// request.
    OutOfMemory,
    /// A node's integrity checksum didn't match its header contents (feature
    /// `integrity-checksum` only). Only reachable in test builds: outside of
    /// `cfg!(test)` the same finding aborts the process instead, since a
    /// corrupted header means the arena's bookkeeping can no longer be
    /// trusted to unwind safely.
    Corruption,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfMemory => {
                write!(f, "page supplier could not satisfy the allocation request")
            }
            AllocError::Corruption => {
                write!(f, "node integrity checksum mismatch: header corrupted")
            }
        }
    }
}

impl std::error::Error for AllocError {}

/// Recomputes `node`'s checksum and compares it against the stored one.
/// With `integrity-checksum` off this is a no-op that always succeeds.
///
/// On mismatch: test builds return `Err(AllocError::Corruption)`, a
/// recoverable path so the offending test fails without taking the whole
/// process down. Non-test builds abort immediately - a corrupted node
/// header means the free-size tree and address-order list can no longer be
/// trusted, and unwinding through them risks acting on bad pointers.
#[cfg(feature = "integrity-checksum")]
fn verify_or_abort(node: NonNull<Node>) -> Result<(), AllocError> {
    if unsafe { crate::checksum::verify(node) } {
        return Ok(());
    }
    if cfg!(test) {
        Err(AllocError::Corruption)
    } else {
        std::process::abort()
    }
}

#[cfg(not(feature = "integrity-checksum"))]
fn verify_or_abort(_node: NonNull<Node>) -> Result<(), AllocError> {
    Ok(())
}

/// Recomputes and writes `node`'s checksum. No-op with `integrity-checksum`
/// off.
#[cfg(feature = "integrity-checksum")]
fn restamp(node: NonNull<Node>) {
    unsafe { crate::checksum::stamp(node) };
}

#[cfg(not(feature = "integrity-checksum"))]
fn restamp(_node: NonNull<Node>) {}

/// A point-in-time view of one node, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub address: usize,
    pub page: usize,
    pub size: usize,
    pub used_size: usize,
    pub occupied: bool,
}

/// A general-purpose, best-fit, coalescing heap allocator over a pluggable
/// `PageSupplier`.
pub struct HeapArena<S: PageSupplier = SystemPageSupplier> {
    pages: PageList,
    address_order: AddressOrderList,
    free_index: FreeSizeIndex,
    supplier: S,
    normal_allocation_size: usize,
    allocated_size: usize,
    free_size: usize,
}

impl HeapArena<SystemPageSupplier> {
    /// An arena backed directly by the process allocator.
    ///
    /// `normal_allocation_size` is the one tunable named in the design: the
    /// minimum page size requested from the supplier, even for small
    /// allocations.
    pub fn new(normal_allocation_size: usize) -> Self {
        Self::with_supplier(SystemPageSupplier, normal_allocation_size)
    }
}

impl Default for HeapArena<SystemPageSupplier> {
    fn default() -> Self {
        Self::new(DEFAULT_NORMAL_ALLOCATION_SIZE)
    }
}

impl<S: PageSupplier> HeapArena<S> {
    pub fn with_supplier(supplier: S, normal_allocation_size: usize) -> Self {
        Self {
            pages: PageList::new(),
            address_order: AddressOrderList::new(),
            free_index: FreeSizeIndex::new(),
            supplier,
            normal_allocation_size,
            allocated_size: 0,
            free_size: 0,
        }
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_size
    }

    pub fn free_bytes(&self) -> usize {
        self.free_size
    }

    pub fn used_bytes(&self) -> usize {
        self.allocated_size - self.free_size
    }

    /// Allocates `size` bytes, returning a pointer to the payload.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let node = match self.free_index.find_best_fit(size) {
            Some(node) => node,
            None => self.acquire_page_node(size)?,
        };
        verify_or_abort(node)?;

        unsafe {
            self.free_index.remove(node);
            (*node.as_ptr()).reset_free_links();
            (*node.as_ptr()).occupied = true;
            (*node.as_ptr()).used_size = size;

            let node_size = node.as_ref().size;
            if node_size > size + header_size() {
                let free_bytes = node_size - size - header_size();
                (*node.as_ptr()).size = size;

                let next_raw = Node::payload(node).as_ptr().add(size) as *mut Node;
                let next = NonNull::new_unchecked(next_raw);
                let block = node.as_ref().block;
                let old_next = node.as_ref().next_addr;
                Node::write_fresh(next, block, free_bytes);

                self.address_order.insert_after(node, next);
                self.free_index.insert(next);
                self.free_size -= header_size();

                // `insert_after` rewrote `next`'s address-order links after
                // `write_fresh` stamped it, and rewrote the old neighbor's
                // `prev_addr` too; both need a fresh checksum.
                restamp(next);
                if let Some(old_next) = old_next {
                    restamp(old_next);
                }
            }

            self.free_size -= node.as_ref().size;
            restamp(node);
            trace!(
                "allocate({}): node size={} used={}",
                size,
                node.as_ref().size,
                size
            );
            Ok(Node::payload(node))
        }
    }

    /// Returns `memory` (previously returned by `allocate`/`realloc`) to the
    /// free pool, coalescing with same-page neighbors.
    pub fn free(&mut self, memory: NonNull<u8>) {
        unsafe {
            let mut info = Node::header_of(memory);
            verify_or_abort(info).expect("integrity checksum mismatch freeing node");
            (*info.as_ptr()).occupied = false;
            (*info.as_ptr()).used_size = 0;
            self.free_size += info.as_ref().size;

            if let Some(next) = info.as_ref().next_addr {
                if !next.as_ref().occupied && PageList::same_page(info, next) {
                    verify_or_abort(next).expect("integrity checksum mismatch on next neighbor");
                    // `unlink` rewrites the node past `next`'s `prev_addr`,
                    // if there is one.
                    let next_next = next.as_ref().next_addr;
                    self.free_index.remove(next);
                    self.address_order.unlink(next);
                    if let Some(next_next) = next_next {
                        restamp(next_next);
                    }
                    let combined = info.as_ref().size + header_size() + next.as_ref().size;
                    (*info.as_ptr()).size = combined;
                    self.free_size += header_size();
                }
            }

            if let Some(prev) = info.as_ref().prev_addr {
                if !prev.as_ref().occupied && PageList::same_page(prev, info) {
                    verify_or_abort(prev).expect("integrity checksum mismatch on prev neighbor");
                    // `unlink` rewrites the node past `info`'s `prev_addr`,
                    // if there is one (may be the same node restamped above).
                    let info_next = info.as_ref().next_addr;
                    self.free_index.remove(prev);
                    self.address_order.unlink(info);
                    if let Some(info_next) = info_next {
                        restamp(info_next);
                    }
                    let combined = prev.as_ref().size + header_size() + info.as_ref().size;
                    (*prev.as_ptr()).size = combined;
                    self.free_size += header_size();
                    info = prev;
                }
            }

            (*info.as_ptr()).reset_free_links();
            self.free_index.insert(info);
            restamp(info);
        }
    }

    /// Resizes a live allocation, copying the overlapping prefix. Behaves
    /// like `free` + `allocate` when the node cannot grow in place.
    pub fn realloc(&mut self, memory: NonNull<u8>, new_size: usize) -> Result<NonNull<u8>, AllocError> {
        let node = unsafe { Node::header_of(memory) };
        verify_or_abort(node)?;
        let used = unsafe { node.as_ref().used_size };
        if new_size == used {
            Ok(memory)
        } else if new_size > used {
            self.extend(memory, new_size)
        } else {
            self.shrink(memory, new_size)
        }
    }

    fn extend(&mut self, memory: NonNull<u8>, new_size: usize) -> Result<NonNull<u8>, AllocError> {
        let old_size = unsafe { Node::header_of(memory).as_ref().used_size };
        debug_assert!(new_size > old_size);
        self.free(memory);
        let new_memory = self.allocate(new_size)?;
        if new_memory != memory {
            // The freed region may have been coalesced with an earlier
            // neighbor, in which case `new_memory` and `memory` can overlap;
            // `copy` (memmove semantics) handles that, unlike
            // `copy_nonoverlapping`.
            unsafe {
                std::ptr::copy(memory.as_ptr(), new_memory.as_ptr(), old_size);
            }
        }
        Ok(new_memory)
    }

    fn shrink(&mut self, memory: NonNull<u8>, new_size: usize) -> Result<NonNull<u8>, AllocError> {
        let old_size = unsafe { Node::header_of(memory).as_ref().used_size };
        debug_assert!(new_size < old_size);
        self.free(memory);
        let new_memory = self.allocate(new_size)?;
        if new_memory != memory {
            unsafe {
                std::ptr::copy(memory.as_ptr(), new_memory.as_ptr(), new_size);
            }
        }
        Ok(new_memory)
    }

    /// Hands every page back to the supplier and resets all bookkeeping.
    pub fn release(&mut self) {
        self.pages.release_all(&mut self.supplier);
        self.address_order.reset();
        self.free_index = FreeSizeIndex::new();
        self.allocated_size = 0;
        self.free_size = 0;
        debug!("release: arena reset to empty");
    }

    /// Renders a human-readable snapshot: the address-order node list
    /// followed by the free-size tree, matching the shape of the original
    /// dump tool's output.
    pub fn dump(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let _ = writeln!(out, "------------ Heap Arena Dump ------------");
        let _ = writeln!(out, "allocated: {} bytes, free: {} bytes", self.allocated_size, self.free_size);

        let nodes: Vec<_> = self.address_order.iter().collect();
        let _ = writeln!(out, "Nodes({}):", nodes.len());
        for node in &nodes {
            unsafe {
                let _ = writeln!(
                    out,
                    "\tNode(size={}, occupied={}, ptr={:p})",
                    node.as_ref().size,
                    node.as_ref().occupied,
                    node.as_ptr()
                );
            }
        }

        let _ = writeln!(out, "Tree:");
        self.free_index.dump(&mut out);
        out
    }

    /// Checks the structural invariants of the free-size tree. Intended for
    /// tests and for callers that want to assert after a batch of
    /// operations; not called on the allocate/free hot path.
    pub fn check_invariants(&self) -> Result<(), String> {
        self.free_index.check_invariants()
    }

    /// Number of pages currently held by this arena.
    pub fn page_count(&self) -> usize {
        self.pages.iter().count()
    }

    /// Sizes of every free node, in address order. Diagnostic only - walks
    /// the whole node list, so callers shouldn't use this on a hot path.
    pub fn free_sizes(&self) -> Vec<usize> {
        self.address_order
            .iter()
            .filter_map(|n| unsafe {
                let n = n.as_ref();
                (!n.occupied).then_some(n.size)
            })
            .collect()
    }

    /// A full snapshot of every node (free and occupied), in address order.
    /// Diagnostic/test-only; walks the whole node list.
    pub fn nodes(&self) -> Vec<NodeSnapshot> {
        self.address_order
            .iter()
            .map(|n| unsafe {
                let n = n.as_ref();
                NodeSnapshot {
                    address: (n as *const Node) as usize,
                    page: n.block.as_ptr() as usize,
                    size: n.size,
                    used_size: n.used_size,
                    occupied: n.occupied,
                }
            })
            .collect()
    }

    fn acquire_page_node(&mut self, min_payload: usize) -> Result<NonNull<Node>, AllocError> {
        let (_, node, page_size, node_size) = self
            .pages
            .acquire_page(&mut self.supplier, min_payload, self.normal_allocation_size)
            .ok_or_else(|| {
                warn!("acquire_page_node: supplier exhausted, request for {} bytes failed", min_payload);
                AllocError::OutOfMemory
            })?;
        self.allocated_size += page_size;
        self.free_size += node_size;
        let old_last = self.address_order.last_node();
        self.address_order.append(node);
        restamp(node);
        if let Some(old_last) = old_last {
            restamp(old_last);
        }
        self.free_index.insert(node);
        Ok(node)
    }
}

impl<S: PageSupplier> Drop for HeapArena<S> {
    fn drop(&mut self) {
        self.pages.release_all(&mut self.supplier);
    }
}

impl<S: PageSupplier> fmt::Debug for HeapArena<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapArena")
            .field("allocated_size", &self.allocated_size)
            .field("free_size", &self.free_size)
            .field("pages", &self.pages)
            .finish()
    }
}
