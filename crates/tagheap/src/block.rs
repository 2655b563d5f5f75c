//! Boundary-tagged blocks.
//!
//! A block is a word-aligned byte range of the arena that describes itself.
//! It has no size field; instead its first word points at its own last word
//! (the *trailer*), and the trailer points back at the block start. The low
//! bit of the first word is the free flag, which is available because every
//! trailer offset is word aligned.
//!
//! ```text
//! Free block:
//! ┌────────────────────┬──────────────────┬──────────────┬────────────────┐
//! │ tag: tail | 1      │ next free offset │ unused ...   │ trailer: start │
//! └────────────────────┴──────────────────┴──────────────┴────────────────┘
//!
//! Allocated block:
//! ┌────────────────────┬─────────────────────────────────┬────────────────┐
//! │ tag: tail | 0      │ payload (data pointer here) ... │ trailer: start │
//! └────────────────────┴─────────────────────────────────┴────────────────┘
//! ```
//!
//! With the trailer in place, the block below any block is found by reading
//! the single word right before it, and the block above starts one word past
//! the trailer. Both neighbors are therefore O(1) to reach, which is what
//! lets a release coalesce without any side table.

use core::fmt;

use crate::arena::{RawArena, WORD};

const FREE_FLAG: usize = 1;

/// Free-list terminator.
///
/// The begin sentinel lives at offset zero and never joins the free list, so
/// no free block can have this offset.
const NO_NEXT: usize = 0;

/// Smallest allocated block: tag and trailer.
pub(crate) const ALLOCATED_MIN: usize = 2 * WORD;

/// Smallest free block: tag, free-list link and trailer.
pub(crate) const FREE_MIN: usize = 3 * WORD;

/// Size of each of the two arena-bounding sentinel blocks.
pub(crate) const SENTINEL_SIZE: usize = ALLOCATED_MIN;

/// A block, identified by the arena offset of its first word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block(usize);

/// The sentinel at the low end of every arena.
pub(crate) const BEGIN_SENTINEL: Block = Block(0);

#[derive(Debug, Clone, Copy)]
enum State {
    Allocated,
    Free { next: Option<Block> },
}

impl Block {
    /// Installs an allocated block over `full_size` bytes at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` or `full_size` is not word aligned, or if
    /// `full_size` is below [`ALLOCATED_MIN`].
    pub(crate) fn make_allocated(arena: RawArena, offset: usize, full_size: usize) -> Self {
        Self::install(arena, offset, full_size, State::Allocated)
    }

    /// Installs a free block over `full_size` bytes at `offset`, linked to
    /// `next`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` or `full_size` is not word aligned, or if
    /// `full_size` is below [`FREE_MIN`].
    pub(crate) fn make_free(
        arena: RawArena,
        offset: usize,
        full_size: usize,
        next: Option<Self>,
    ) -> Self {
        Self::install(arena, offset, full_size, State::Free { next })
    }

    fn install(arena: RawArena, offset: usize, full_size: usize, state: State) -> Self {
        assert!(offset.is_multiple_of(WORD), "block must be word aligned");
        assert!(
            full_size.is_multiple_of(WORD),
            "block size {full_size} must be a multiple of {WORD}"
        );
        let min = match state {
            State::Allocated => ALLOCATED_MIN,
            State::Free { .. } => FREE_MIN,
        };
        assert!(
            full_size >= min,
            "block size {full_size} below minimum {min} for {state:?}"
        );

        let tail = offset + full_size - WORD;
        arena.write(tail, offset);
        match state {
            State::Allocated => arena.write(offset, tail),
            State::Free { next } => {
                arena.write(offset, tail | FREE_FLAG);
                arena.write(offset + WORD, next.map_or(NO_NEXT, Self::offset));
            }
        }
        Self(offset)
    }

    /// Offset of the block's first word.
    pub(crate) fn offset(self) -> usize {
        self.0
    }

    pub(crate) fn is_free(self, arena: RawArena) -> bool {
        arena.read(self.0) & FREE_FLAG != 0
    }

    fn tail(self, arena: RawArena) -> usize {
        arena.read(self.0) & !FREE_FLAG
    }

    pub(crate) fn full_size(self, arena: RawArena) -> usize {
        self.tail(arena) + WORD - self.0
    }

    /// Largest request this free block can serve.
    pub(crate) fn free_bytes(self, arena: RawArena) -> usize {
        assert!(self.is_free(arena), "free_bytes of an allocated block");
        self.full_size(arena) - 2 * WORD
    }

    pub(crate) fn next(self, arena: RawArena) -> Option<Self> {
        assert!(self.is_free(arena), "next link of an allocated block");
        match arena.read(self.0 + WORD) {
            NO_NEXT => None,
            offset => Some(Self(offset)),
        }
    }

    pub(crate) fn set_next(self, arena: RawArena, next: Option<Self>) {
        assert!(self.is_free(arena), "next link of an allocated block");
        arena.write(self.0 + WORD, next.map_or(NO_NEXT, Self::offset));
    }

    /// Offset of the first payload byte handed to the user.
    ///
    /// This is the slot that holds the free-list link while the block is
    /// free.
    pub(crate) fn data_offset(self, arena: RawArena) -> usize {
        assert!(!self.is_free(arena), "data pointer of a free block");
        self.0 + WORD
    }

    /// Inverse of [`data_offset`](Self::data_offset).
    ///
    /// The offset must come from a live allocation; nothing else is checked.
    pub(crate) fn from_data_offset(data_offset: usize) -> Self {
        Self(data_offset - WORD)
    }

    /// The block ending right before this one. Undefined for the begin
    /// sentinel.
    pub(crate) fn lower_neighbor(self, arena: RawArena) -> Self {
        Self(arena.read(self.0 - WORD))
    }

    /// The block starting right after this one. Undefined for the end
    /// sentinel.
    pub(crate) fn higher_neighbor(self, arena: RawArena) -> Self {
        Self(self.tail(arena) + WORD)
    }

    /// Carves an allocated block for `size` bytes out of this free block.
    ///
    /// The free block keeps its offset and free-list link and shrinks by the
    /// carved size; the new allocated block takes the high end. When the
    /// remainder could not hold a free block the whole block is converted
    /// in place instead, and the returned block is `self`. That identity is
    /// what the caller uses to tell whether the block left the free list.
    ///
    /// # Panics
    ///
    /// Panics if this block is allocated or if `size` exceeds
    /// [`free_bytes`](Self::free_bytes).
    pub(crate) fn split(self, arena: RawArena, size: usize) -> Self {
        let free_bytes = self.free_bytes(arena);
        assert!(
            size <= free_bytes,
            "request of {size} bytes exceeds free block capacity of {free_bytes} bytes"
        );

        let full_size = self.full_size(arena);
        let carved = carved_size(size);
        let remainder = full_size - carved;
        if remainder < FREE_MIN {
            return Self::make_allocated(arena, self.0, full_size);
        }

        let next = self.next(arena);
        let shrunk = Self::make_free(arena, self.0, remainder, next);
        Self::make_allocated(arena, shrunk.higher_neighbor(arena).0, carved)
    }

    pub(crate) fn info(self, arena: RawArena) -> BlockInfo {
        BlockInfo {
            addr: arena.addr(self.0),
            size: self.full_size(arena),
            is_free: self.is_free(arena),
        }
    }
}

/// Full size of the allocated block that serves a `size`-byte request:
/// the payload rounded up to whole words, plus tag and trailer.
///
/// Never below [`FREE_MIN`], so that every allocated block can be turned
/// back into a free block when it is released on its own.
pub(crate) fn carved_size(size: usize) -> usize {
    (size.div_ceil(WORD) * WORD + ALLOCATED_MIN).max(FREE_MIN)
}

/// A snapshot of one block, as reported by
/// [`TagHeap::blocks`](crate::TagHeap::blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the block's first byte.
    pub addr: usize,
    /// Size of the block in bytes, including tag and trailer.
    pub size: usize,
    /// Whether the block is on the free list.
    pub is_free: bool,
}

impl BlockInfo {
    /// One past the block's last byte.
    #[must_use]
    pub fn end(&self) -> usize {
        self.addr + self.size
    }
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_free { "free" } else { "occupied" };
        write!(f, "block at {:#x}, {} bytes, {state}", self.addr, self.size)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use core::{alloc::Layout, ptr::NonNull};

    use super::*;

    const BLOCK_SIZE: usize = 10 * WORD;

    fn with_test_arena<F>(size: usize, test_fn: F)
    where
        F: FnOnce(RawArena),
    {
        unsafe {
            let layout = Layout::from_size_align(size, 16).unwrap();
            let start = alloc::alloc::alloc(layout);
            start.write_bytes(b'S', size);
            test_fn(RawArena::new(NonNull::new(start).unwrap(), size));
            alloc::alloc::dealloc(start, layout);
        }
    }

    #[test]
    fn test_allocated_block_tags() {
        with_test_arena(2 * BLOCK_SIZE, |arena| {
            let block = Block::make_allocated(arena, 0, BLOCK_SIZE);
            assert!(!block.is_free(arena));
            assert_eq!(block.full_size(arena), BLOCK_SIZE);
            assert_eq!(arena.read(BLOCK_SIZE - WORD), 0);

            // bytes past the block are untouched
            assert_eq!(arena.read(BLOCK_SIZE), usize::from_ne_bytes([b'S'; WORD]));
        });
    }

    #[test]
    fn test_neighbors() {
        with_test_arena(SENTINEL_SIZE + 2 * BLOCK_SIZE, |arena| {
            let block1 = Block::make_allocated(arena, 0, BLOCK_SIZE);
            let block2 = Block::make_allocated(arena, BLOCK_SIZE, BLOCK_SIZE);
            assert_eq!(block1.higher_neighbor(arena), block2);
            assert_eq!(block2.lower_neighbor(arena), block1);

            // offset zero is the list terminator, so the free pair starts higher
            let block0 = Block::make_allocated(arena, 0, SENTINEL_SIZE);
            let block1 = Block::make_free(arena, SENTINEL_SIZE, BLOCK_SIZE, None);
            let block2 =
                Block::make_free(arena, SENTINEL_SIZE + BLOCK_SIZE, BLOCK_SIZE, Some(block1));
            assert_eq!(block0.higher_neighbor(arena), block1);
            assert_eq!(block1.lower_neighbor(arena), block0);
            assert!(block1.is_free(arena));
            assert!(block2.is_free(arena));
            assert_eq!(block1.higher_neighbor(arena), block2);
            assert_eq!(block2.lower_neighbor(arena), block1);
            assert_eq!(block1.next(arena), None);
            assert_eq!(block2.next(arena), Some(block1));
        });
    }

    #[test]
    fn test_free_bytes() {
        with_test_arena(BLOCK_SIZE, |arena| {
            let block = Block::make_free(arena, 0, BLOCK_SIZE, None);
            assert_eq!(block.free_bytes(arena), BLOCK_SIZE - 2 * WORD);
        });
    }

    #[test]
    fn test_data_offset_round_trip() {
        with_test_arena(BLOCK_SIZE, |arena| {
            let block = Block::make_allocated(arena, 0, BLOCK_SIZE);
            let data = block.data_offset(arena);
            assert_eq!(data, WORD);
            assert_eq!(Block::from_data_offset(data), block);
        });
    }

    #[test]
    fn test_set_next() {
        with_test_arena(2 * BLOCK_SIZE, |arena| {
            let block1 = Block::make_free(arena, 0, BLOCK_SIZE, None);
            let block2 = Block::make_free(arena, BLOCK_SIZE, BLOCK_SIZE, None);
            block1.set_next(arena, Some(block2));
            assert_eq!(block1.next(arena), Some(block2));
            block1.set_next(arena, None);
            assert_eq!(block1.next(arena), None);
        });
    }

    #[test]
    fn test_carved_size() {
        assert_eq!(carved_size(0), FREE_MIN);
        assert_eq!(carved_size(1), 3 * WORD);
        assert_eq!(carved_size(WORD), 3 * WORD);
        assert_eq!(carved_size(WORD + 1), 4 * WORD);
        assert_eq!(carved_size(36), 36_usize.div_ceil(WORD) * WORD + 2 * WORD);
    }

    #[test]
    fn test_split_places_new_block_at_high_end() {
        with_test_arena(BLOCK_SIZE, |arena| {
            let block = Block::make_free(arena, 0, BLOCK_SIZE, None);
            let allocated = block.split(arena, WORD);
            assert_eq!(allocated.offset(), BLOCK_SIZE - 3 * WORD);
            assert_eq!(allocated.full_size(arena), 3 * WORD);
            assert!(!allocated.is_free(arena));

            assert!(block.is_free(arena));
            assert_eq!(block.full_size(arena), BLOCK_SIZE - 3 * WORD);
            assert_eq!(block.higher_neighbor(arena), allocated);
            assert_eq!(allocated.lower_neighbor(arena), block);
        });
    }

    #[test]
    fn test_split_keeps_free_list_link() {
        with_test_arena(2 * BLOCK_SIZE, |arena| {
            let other = Block::make_free(arena, BLOCK_SIZE, BLOCK_SIZE, None);
            let block = Block::make_free(arena, 0, BLOCK_SIZE, Some(other));
            let allocated = block.split(arena, 1);
            assert_ne!(allocated, block);
            assert_eq!(block.next(arena), Some(other));
        });
    }

    #[test]
    fn test_split_remainder_exactly_free_min() {
        with_test_arena(BLOCK_SIZE, |arena| {
            let block = Block::make_free(arena, 0, BLOCK_SIZE, None);
            let size = BLOCK_SIZE - FREE_MIN - 2 * WORD;
            let allocated = block.split(arena, size);
            assert_ne!(allocated, block);
            assert_eq!(block.full_size(arena), FREE_MIN);
            assert_eq!(block.free_bytes(arena), WORD);
        });
    }

    #[test]
    fn test_split_consumes_whole_block() {
        with_test_arena(BLOCK_SIZE, |arena| {
            let block = Block::make_free(arena, 0, BLOCK_SIZE, None);
            // leaves a remainder of one word, which cannot hold a free block
            let size = BLOCK_SIZE - 3 * WORD;
            let allocated = block.split(arena, size);
            assert_eq!(allocated, block);
            assert!(!allocated.is_free(arena));
            assert_eq!(allocated.full_size(arena), BLOCK_SIZE);
        });
    }

    #[test]
    fn test_split_full_capacity() {
        with_test_arena(BLOCK_SIZE, |arena| {
            let block = Block::make_free(arena, 0, BLOCK_SIZE, None);
            let allocated = block.split(arena, block.free_bytes(arena));
            assert_eq!(allocated, block);
            assert_eq!(allocated.full_size(arena), BLOCK_SIZE);
        });
    }

    #[test]
    #[should_panic(expected = "exceeds free block capacity")]
    fn test_split_over_capacity_panics() {
        with_test_arena(BLOCK_SIZE, |arena| {
            let block = Block::make_free(arena, 0, BLOCK_SIZE, None);
            block.split(arena, BLOCK_SIZE);
        });
    }

    #[test]
    #[should_panic(expected = "below minimum")]
    fn test_free_block_below_minimum_panics() {
        with_test_arena(BLOCK_SIZE, |arena| {
            Block::make_free(arena, 0, 2 * WORD, None);
        });
    }

    #[test]
    #[should_panic(expected = "must be a multiple of")]
    fn test_unaligned_size_panics() {
        with_test_arena(BLOCK_SIZE, |arena| {
            Block::make_allocated(arena, 0, 3 * WORD + 1);
        });
    }

    #[test]
    #[should_panic(expected = "data pointer of a free block")]
    fn test_data_offset_of_free_block_panics() {
        with_test_arena(BLOCK_SIZE, |arena| {
            Block::make_free(arena, 0, BLOCK_SIZE, None).data_offset(arena);
        });
    }

    #[test]
    fn test_info_display() {
        with_test_arena(BLOCK_SIZE, |arena| {
            let info = Block::make_free(arena, 0, BLOCK_SIZE, None).info(arena);
            assert_eq!(info.size, BLOCK_SIZE);
            assert!(info.is_free);
            assert_eq!(info.end(), info.addr + BLOCK_SIZE);

            let mut line = alloc::string::String::new();
            core::fmt::write(&mut line, format_args!("{info}")).unwrap();
            assert!(line.starts_with("block at 0x"));
            assert!(line.ends_with(&alloc::format!("{BLOCK_SIZE} bytes, free")));
        });
    }
}
