//! # heap-arena
//!
//! A user-space, best-fit, coalescing heap allocator over a pluggable page
//! supplier.
//!
//! ## Design principles
//!
//! - **In-band bookkeeping**: a `Node` header sits directly before every
//!   byte region it describes, free or occupied.
//! - **Best fit**: a red-black tree keyed by free-node size answers "the
//!   smallest free region that is at least this big" in `O(log F)`.
//! - **Out-of-band duplicates**: free nodes sharing a size hang off one tree
//!   slot as a duplicate chain, keeping the tree free of equal keys.
//! - **Bidirectional coalescing**: freeing a node merges it with same-page
//!   address neighbors in both directions before reinserting it.
//!
//! ## Architecture
//!
//! ```text
//! [PageSupplier] --> [PageList] --> [Node headers tiling each page]
//!                                          |         \
//!                                 [AddressOrderList]  [FreeSizeIndex]
//! ```

pub mod address_order;
pub mod arena;
#[cfg(feature = "integrity-checksum")]
pub mod checksum;
pub mod free_index;
pub mod node;
pub mod page;
pub mod workload;

pub use arena::{AllocError, HeapArena, NodeSnapshot};
pub use node::{header_size, Node};
pub use page::{PageSupplier, SystemPageSupplier, DEFAULT_NORMAL_ALLOCATION_SIZE};
