//! A boundary-tag memory allocator over one caller-supplied arena.
//!
//! This crate provides a minimal `malloc`/`free` pair for environments where
//! no system allocator is available and the caller owns the whole backing
//! memory up front. It is `no_std` and keeps all of its metadata inside the
//! arena: no side tables, no size classes.
//!
//! # Design
//!
//! Every block records where it ends (in its first word) and where it
//! starts (in its last word). That pair of boundary tags is enough to step
//! to either neighbor in O(1), which gives the two core algorithms:
//!
//! - **Split**: allocation takes the first free block large enough and
//!   carves the request off its high end. The free remainder stays in place
//!   on the free list.
//! - **Coalesce**: release merges the block with a free neighbor on either
//!   side and pushes the merged block at the head of the free list.
//!
//! Two permanently allocated sentinel blocks bound the arena so that neighbor
//! traversal never leaves it.
//!
//! # Usage Examples
//!
//! ## An allocator value
//!
//! ```rust
//! use tagheap::TagHeap;
//!
//! let mut memory = vec![0_usize; 0x1000 / size_of::<usize>()];
//! let mut heap = TagHeap::new();
//! unsafe {
//!     heap.setup(memory.as_mut_ptr().cast(), 0x1000);
//! }
//!
//! let ptr1 = heap.allocate(0x100).unwrap();
//! let ptr2 = heap.allocate(0x100).unwrap();
//! assert_ne!(ptr1, ptr2);
//!
//! unsafe {
//!     heap.deallocate(ptr1);
//!     heap.deallocate(ptr2);
//! }
//!
//! let mut layout = String::new();
//! heap.dump(&mut layout).unwrap();
//! assert_eq!(layout.lines().count(), 3);
//! ```
//!
//! ## Process-wide functions
//!
//! The [`global`] module wraps a single static allocator behind
//! `setup`/`alloc`/`free`/`dump` functions.
//!
//! # Error Handling
//!
//! Running out of space is the only recoverable failure:
//! [`TagHeap::allocate`] returns `None`. Bad arguments to setup surface as a
//! [`SetupError`] from [`TagHeap::try_setup`] and panic in
//! [`TagHeap::setup`]. Releasing a block twice, releasing a sentinel, or
//! releasing a pointer outside the arena panics.
//!
//! # Thread Safety
//!
//! [`TagHeap`] is `Send` but not `Sync`. All operations are synchronous and
//! must be serialized by the caller.

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use self::{
    block::BlockInfo,
    error::{SetupError, SetupErrorKind},
    heap::{Blocks, FreeBlocks, HeapStats, MIN_ARENA_SIZE, TagHeap},
};

mod arena;
mod block;
pub mod error;
pub mod global;
mod heap;
