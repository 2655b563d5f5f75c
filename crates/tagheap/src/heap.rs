//! The allocator context.
//!
//! [`TagHeap`] owns one arena: the begin and end sentinels, the blocks tiling
//! the space between them, and the head of the free list.
//!
//! # Algorithm
//!
//! - **Setup**: the region is clipped to word boundaries, two allocated
//!   sentinel blocks of two words each are placed at its ends, and the rest
//!   becomes a single free block, the only entry of the free list.
//! - **Allocation**: first fit over the free list, in list order. The chosen
//!   block is split; the new allocated block takes its high end and the
//!   shrunken free block stays where it is in the list.
//! - **Release**: the block is found from the data pointer by a fixed
//!   offset, merged with a free higher neighbor and a free lower neighbor,
//!   and pushed at the head of the free list.
//!
//! ```text
//! ┌──────────┬──────────────┬───────┬──────────┬───────┬──────────┐
//! │ sentinel │ free         │ alloc │ free     │ alloc │ sentinel │
//! └──────────┴──────────────┴───────┴──────────┴───────┴──────────┘
//! ```
//!
//! # Usage Example
//!
//! ```rust
//! use tagheap::TagHeap;
//!
//! let mut heap = TagHeap::new();
//! let mut memory = vec![0_usize; 512];
//! unsafe {
//!     heap.setup(memory.as_mut_ptr().cast(), memory.len() * size_of::<usize>());
//! }
//!
//! let ptr = heap.allocate(100).unwrap();
//! unsafe {
//!     ptr.write_bytes(0xaa, 100);
//!     heap.deallocate(ptr);
//! }
//! assert_eq!(heap.stats().free_blocks, 1);
//! ```

use core::{fmt, iter::FusedIterator, marker::PhantomData, ops::Range, ptr::NonNull};

use crate::{
    arena::{self, RawArena, WORD},
    block::{BEGIN_SENTINEL, Block, BlockInfo, FREE_MIN, SENTINEL_SIZE},
    error::{self, SetupError, SetupErrorKind},
};

/// Smallest usable arena: both sentinels and one minimal free block.
pub const MIN_ARENA_SIZE: usize = 2 * SENTINEL_SIZE + FREE_MIN;

/// A boundary-tag allocator over a single caller-supplied arena.
///
/// # Thread Safety
///
/// The allocator is `Send` but not `Sync`. Every operation runs to
/// completion without blocking; concurrent access must be serialized by the
/// caller.
#[derive(Debug, Default)]
pub struct TagHeap {
    region: Option<Region>,
}

unsafe impl Send for TagHeap {}

#[derive(Debug)]
struct Region {
    raw: RawArena,
    end_sentinel: Block,
    free_head: Option<Block>,
}

/// Summary of an arena's state, as returned by [`TagHeap::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Usable arena length in bytes, sentinels included.
    pub arena_bytes: usize,
    /// Number of blocks on the free list.
    pub free_blocks: usize,
    /// Sum of the full sizes of all free blocks.
    pub free_bytes: usize,
    /// Largest request a single allocation can currently satisfy.
    pub largest_free: usize,
    /// Number of allocated blocks, sentinels excluded.
    pub used_blocks: usize,
}

impl TagHeap {
    /// Creates an allocator with no arena. Every allocation fails until
    /// [`setup`](Self::setup) is called.
    #[must_use]
    pub const fn new() -> Self {
        Self { region: None }
    }

    /// Prepares `base..base + len` as the arena, replacing any previous one.
    ///
    /// The region is clipped to word boundaries. A null `base` is ignored
    /// and leaves the allocator as it was.
    ///
    /// # Panics
    ///
    /// Panics if the clipped region is smaller than [`MIN_ARENA_SIZE`] or if
    /// `base + len` overflows. Use [`try_setup`](Self::try_setup) to handle
    /// these cases.
    ///
    /// # Safety
    ///
    /// See [`try_setup`](Self::try_setup).
    #[track_caller]
    pub unsafe fn setup(&mut self, base: *mut u8, len: usize) {
        if let Err(err) = unsafe { self.try_setup(base, len) } {
            error::report(&err);
        }
    }

    /// Fallible form of [`setup`](Self::setup).
    ///
    /// On error the allocator is left unchanged.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - The range `base..base + len` is valid for reads and writes
    /// - The memory region is not used by any other code while this allocator
    ///   (or a pointer it returned) is in use
    /// - This method is not called concurrently with other allocator
    ///   operations
    #[track_caller]
    pub unsafe fn try_setup(&mut self, base: *mut u8, len: usize) -> Result<(), SetupError> {
        let Some(base) = NonNull::new(base) else {
            return Ok(());
        };

        let (start, usable) = arena::clip_region(base, len)?;
        if usable < MIN_ARENA_SIZE {
            return Err(SetupErrorKind::ArenaTooSmall {
                usable,
                required: MIN_ARENA_SIZE,
            }
            .into());
        }

        let raw = unsafe { RawArena::new(start, usable) };
        Block::make_allocated(raw, BEGIN_SENTINEL.offset(), SENTINEL_SIZE);
        let end_sentinel = Block::make_allocated(raw, usable - SENTINEL_SIZE, SENTINEL_SIZE);
        let middle = Block::make_free(raw, SENTINEL_SIZE, usable - 2 * SENTINEL_SIZE, None);

        self.region = Some(Region {
            raw,
            end_sentinel,
            free_head: Some(middle),
        });
        Ok(())
    }

    /// Allocates `size` bytes.
    ///
    /// Uses the first block on the free list that can hold `size` bytes.
    /// The returned pointer is word aligned and valid for `size` bytes
    /// (rounded up to whole words). Returns `None` when no free block is
    /// large enough, or when no arena has been set up; the free list is
    /// left untouched in both cases.
    pub fn allocate(&mut self, size: usize) -> Option<*mut u8> {
        let region = self.region.as_mut()?;
        let raw = region.raw;

        let mut prev_block = None;
        let mut current_block = region.free_head;
        let block = loop {
            let block = current_block?;
            if block.free_bytes(raw) >= size {
                break block;
            }
            prev_block = Some(block);
            current_block = block.next(raw);
        };

        let next_block = block.next(raw);
        let allocated = block.split(raw, size);
        debug_assert!(!allocated.is_free(raw));

        // Only a fully consumed block comes back at its own offset.
        if allocated == block {
            match prev_block {
                Some(prev_block) => prev_block.set_next(raw, next_block),
                None => region.free_head = next_block,
            }
        }

        Some(raw.ptr(allocated.data_offset(raw)))
    }

    /// Releases a pointer returned by [`allocate`](Self::allocate).
    ///
    /// The block is merged with its free neighbors on both sides and the
    /// result is pushed at the head of the free list.
    ///
    /// # Panics
    ///
    /// Panics if no arena has been set up, if `ptr` lies outside the arena,
    /// or if its block is already free.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `ptr` was returned by `allocate` on this allocator since the last
    ///   `setup`
    /// - `ptr` has not been deallocated before
    /// - This method is not called concurrently with other allocator
    ///   operations
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        let Some(region) = self.region.as_mut() else {
            panic!("deallocate called on an allocator without an arena");
        };
        let raw = region.raw;

        let mut block = Block::from_data_offset(raw.offset_of(ptr));
        assert!(
            block != BEGIN_SENTINEL && block != region.end_sentinel,
            "attempt to release a sentinel block"
        );
        assert!(
            !block.is_free(raw),
            "double free of block at {:#x}",
            raw.addr(block.offset())
        );

        let mut merged_size = block.full_size(raw);

        let higher = block.higher_neighbor(raw);
        if higher.is_free(raw) {
            region.unlink(higher);
            merged_size += higher.full_size(raw);
        }

        let lower = block.lower_neighbor(raw);
        if lower.is_free(raw) {
            region.unlink(lower);
            merged_size += lower.full_size(raw);
            block = lower;
        }

        let merged = Block::make_free(raw, block.offset(), merged_size, region.free_head);
        region.free_head = Some(merged);
    }

    /// Writes one line per block, in address order, to `sink`.
    ///
    /// Nothing is written when no arena has been set up.
    pub fn dump<W>(&self, sink: &mut W) -> fmt::Result
    where
        W: fmt::Write + ?Sized,
    {
        for info in self.blocks() {
            writeln!(sink, "{info}")?;
        }
        Ok(())
    }

    /// Iterates over every block of the arena in address order, from the
    /// begin sentinel to the end sentinel.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            region: self.region.as_ref(),
            next: self.region.as_ref().map(|_| BEGIN_SENTINEL),
        }
    }

    /// Iterates over the free list in list order.
    #[must_use]
    pub fn free_blocks(&self) -> FreeBlocks<'_> {
        FreeBlocks {
            raw: self.region.as_ref().map(|region| region.raw),
            next: self.region.as_ref().and_then(|region| region.free_head),
            _heap: PhantomData,
        }
    }

    /// Address range of the usable arena, sentinels included.
    #[must_use]
    pub fn arena(&self) -> Option<Range<usize>> {
        let raw = self.region.as_ref()?.raw;
        Some(raw.addr(0)..raw.addr(raw.len()))
    }

    /// Largest `size` for which [`allocate`](Self::allocate) would currently
    /// succeed.
    #[must_use]
    pub fn max_request(&self) -> Option<usize> {
        self.free_blocks().map(|info| info.size - 2 * WORD).max()
    }

    /// Collects a snapshot of the arena's state.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let Some(region) = &self.region else {
            return HeapStats::default();
        };

        let mut stats = HeapStats {
            arena_bytes: region.raw.len(),
            ..HeapStats::default()
        };
        for info in self.free_blocks() {
            stats.free_blocks += 1;
            stats.free_bytes += info.size;
            stats.largest_free = stats.largest_free.max(info.size - 2 * WORD);
        }
        stats.used_blocks = self
            .blocks()
            .filter(|info| !info.is_free)
            .count()
            .saturating_sub(2);
        stats
    }
}

impl Region {
    /// Removes `target` from the free list.
    fn unlink(&mut self, target: Block) {
        let raw = self.raw;
        let mut prev_block: Option<Block> = None;
        let mut current_block = self.free_head;
        while let Some(block) = current_block {
            if block == target {
                let next_block = block.next(raw);
                match prev_block {
                    Some(prev_block) => prev_block.set_next(raw, next_block),
                    None => self.free_head = next_block,
                }
                return;
            }
            prev_block = Some(block);
            current_block = block.next(raw);
        }
        panic!(
            "free block at {:#x} missing from the free list",
            raw.addr(target.offset())
        );
    }
}

/// Iterator over the blocks of an arena in address order.
///
/// Created by [`TagHeap::blocks`].
#[derive(Debug)]
pub struct Blocks<'a> {
    region: Option<&'a Region>,
    next: Option<Block>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let region = self.region?;
        let block = self.next?;
        self.next = (block != region.end_sentinel).then(|| block.higher_neighbor(region.raw));
        Some(block.info(region.raw))
    }
}

impl FusedIterator for Blocks<'_> {}

/// Iterator over the free list.
///
/// Created by [`TagHeap::free_blocks`].
#[derive(Debug)]
pub struct FreeBlocks<'a> {
    raw: Option<RawArena>,
    next: Option<Block>,
    _heap: PhantomData<&'a TagHeap>,
}

impl Iterator for FreeBlocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.raw?;
        let block = self.next?;
        self.next = block.next(raw);
        Some(block.info(raw))
    }
}

impl FusedIterator for FreeBlocks<'_> {}
