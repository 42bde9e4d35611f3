//! Page list - the backing slabs obtained from the page supplier.
//!
//! Each page is a contiguous block: a `PageHeader` followed by a chain of
//! `Node`s that tile the remainder exactly (I3). Pages are singly linked and
//! never reordered; they are only ever appended (on acquisition) and walked
//! (on dump/release).

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;

use log::{debug, trace};

use crate::node::{header_size, Node};

/// Minimum page size used when the requested allocation would otherwise fit
/// in a smaller page. Production values are expected in the 64 KiB - 1 MiB
/// range; requests larger than this get a page sized exactly to the request.
pub const DEFAULT_NORMAL_ALLOCATION_SIZE: usize = 64 * 1024;

/// Header written at the start of every page.
#[repr(C)]
pub struct PageHeader {
    pub next: Option<NonNull<PageHeader>>,
    /// Total byte size of this page, including this header.
    pub size: usize,
}

#[inline]
pub const fn page_header_size() -> usize {
    std::mem::size_of::<PageHeader>()
}

/// A source of coarse, page-granularity memory.
///
/// Mirrors the C `PlatformGetMemory`/`PlatformFreeMemory` pair: the supplier
/// must hand back a fresh, writable region of exactly `byte_count` bytes, and
/// must be able to release a region it previously handed out. Rust's
/// allocator API additionally requires the size at dealloc time, so
/// `free_memory` takes it explicitly rather than only the address.
pub trait PageSupplier {
    /// Returns a fresh region of exactly `byte_count` bytes, or `None` if the
    /// supplier cannot satisfy the request.
    fn get_memory(&mut self, byte_count: usize) -> Option<NonNull<u8>>;

    /// Releases a region previously returned by `get_memory` with the same
    /// `byte_count`.
    ///
    /// # Safety
    /// `ptr` must have been returned by a prior `get_memory(byte_count)` call
    /// on this same supplier, and must not have been freed already.
    unsafe fn free_memory(&mut self, ptr: NonNull<u8>, byte_count: usize);
}

/// Default page supplier backed directly by the process allocator.
#[derive(Default)]
pub struct SystemPageSupplier;

fn page_layout(byte_count: usize) -> Layout {
    Layout::from_size_align(byte_count, std::mem::align_of::<PageHeader>())
        .expect("page size/align must form a valid layout")
}

impl PageSupplier for SystemPageSupplier {
    fn get_memory(&mut self, byte_count: usize) -> Option<NonNull<u8>> {
        let layout = page_layout(byte_count);
        let raw = unsafe { std::alloc::alloc(layout) };
        NonNull::new(raw)
    }

    unsafe fn free_memory(&mut self, ptr: NonNull<u8>, byte_count: usize) {
        let layout = page_layout(byte_count);
        std::alloc::dealloc(ptr.as_ptr(), layout);
    }
}

/// The singly linked list of pages owned by one arena, plus the byte-size
/// bookkeeping that `allocated_size`/`free_size` are derived from.
pub struct PageList {
    first: Option<NonNull<PageHeader>>,
    last: Option<NonNull<PageHeader>>,
}

impl PageList {
    pub const fn new() -> Self {
        Self {
            first: None,
            last: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Requests a new page sized for `min_payload` bytes from `supplier`,
    /// writes its header and sole free node, links the page at the tail of
    /// the page list, and returns a pointer to that free node. The caller is
    /// responsible for linking the node into the address-order list and the
    /// free-size index.
    pub fn acquire_page<S: PageSupplier>(
        &mut self,
        supplier: &mut S,
        min_payload: usize,
        normal_allocation_size: usize,
    ) -> Option<(NonNull<PageHeader>, NonNull<Node>, usize, usize)> {
        let requested = min_payload + page_header_size() + header_size();
        let page_size = requested.max(normal_allocation_size);
        trace!(
            "acquire_page: min_payload={} requested={} granted={}",
            min_payload,
            requested,
            page_size
        );

        let raw = supplier.get_memory(page_size)?;
        let page_ptr = raw.cast::<PageHeader>();
        unsafe {
            page_ptr.as_ptr().write(PageHeader {
                next: None,
                size: page_size,
            });
        }

        match self.last {
            None => {
                self.first = Some(page_ptr);
                self.last = Some(page_ptr);
            }
            Some(last) => {
                unsafe {
                    (*last.as_ptr()).next = Some(page_ptr);
                }
                self.last = Some(page_ptr);
            }
        }

        let node_size = page_size - page_header_size() - header_size();
        let node_ptr = unsafe {
            let raw = (page_ptr.as_ptr() as *mut u8).add(page_header_size()) as *mut Node;
            NonNull::new_unchecked(raw)
        };
        unsafe {
            Node::write_fresh(node_ptr, page_ptr, node_size);
        }

        debug!(
            "acquire_page: new page of {} bytes, sole free node of {} bytes",
            page_size, node_size
        );

        Some((page_ptr, node_ptr, page_size, node_size))
    }

    /// Hands every page back to `supplier` and resets the list to empty.
    pub fn release_all<S: PageSupplier>(&mut self, supplier: &mut S) {
        let mut current = self.first.take();
        self.last = None;
        let mut count = 0usize;
        while let Some(page) = current {
            let (next, size) = unsafe { ((*page.as_ptr()).next, (*page.as_ptr()).size) };
            unsafe {
                supplier.free_memory(page.cast::<u8>(), size);
            }
            current = next;
            count += 1;
        }
        debug!("release_all: returned {} pages to the supplier", count);
    }

    /// Whether `a` and `b` are nodes on the same page.
    #[inline]
    pub fn same_page(a: NonNull<Node>, b: NonNull<Node>) -> bool {
        unsafe { a.as_ref().block == b.as_ref().block }
    }

    /// Iterates page headers in link order, yielding `(page, total_size)`.
    pub fn iter(&self) -> PageIter {
        PageIter { current: self.first }
    }
}

impl Default for PageList {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PageIter {
    current: Option<NonNull<PageHeader>>,
}

impl Iterator for PageIter {
    type Item = (NonNull<PageHeader>, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let page = self.current?;
        let (next, size) = unsafe { ((*page.as_ptr()).next, (*page.as_ptr()).size) };
        self.current = next;
        Some((page, size))
    }
}

impl fmt::Debug for PageList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageList")
            .field("pages", &self.iter().count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_page_tiles_exactly() {
        let mut supplier = SystemPageSupplier;
        let mut pages = PageList::new();
        let (_, node, page_size, node_size) = pages
            .acquire_page(&mut supplier, 100, DEFAULT_NORMAL_ALLOCATION_SIZE)
            .expect("supplier should succeed");

        assert_eq!(
            page_size,
            page_header_size() + header_size() + node_size
        );
        unsafe {
            assert_eq!(node.as_ref().size, node_size);
            assert!(!node.as_ref().occupied);
        }
        pages.release_all(&mut supplier);
        assert!(pages.is_empty());
    }

    #[test]
    fn oversized_request_gets_exact_page() {
        let mut supplier = SystemPageSupplier;
        let mut pages = PageList::new();
        let big = DEFAULT_NORMAL_ALLOCATION_SIZE * 4;
        let (_, _, page_size, node_size) = pages
            .acquire_page(&mut supplier, big, DEFAULT_NORMAL_ALLOCATION_SIZE)
            .unwrap();
        assert_eq!(page_size, big + page_header_size() + header_size());
        assert_eq!(node_size, big);
        pages.release_all(&mut supplier);
    }

    #[test]
    fn multiple_pages_link_in_acquisition_order() {
        let mut supplier = SystemPageSupplier;
        let mut pages = PageList::new();
        pages
            .acquire_page(&mut supplier, 10, DEFAULT_NORMAL_ALLOCATION_SIZE)
            .unwrap();
        pages
            .acquire_page(&mut supplier, 10, DEFAULT_NORMAL_ALLOCATION_SIZE)
            .unwrap();
        pages
            .acquire_page(&mut supplier, 10, DEFAULT_NORMAL_ALLOCATION_SIZE)
            .unwrap();
        assert_eq!(pages.iter().count(), 3);
        pages.release_all(&mut supplier);
        assert_eq!(pages.iter().count(), 0);
    }
}
