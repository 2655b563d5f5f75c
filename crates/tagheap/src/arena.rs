//! Word-addressed view of the raw arena bytes.
//!
//! Every block header, trailer and free-list link lives inside the arena
//! itself. [`RawArena`] is the only place where those words are read or
//! written through raw pointers; the rest of the crate talks in byte offsets
//! from the start of the usable region and goes through the checked
//! [`RawArena::read`] / [`RawArena::write`] accessors.

use core::ptr::NonNull;

use crate::error::{SetupError, SetupErrorKind};

/// Pointer width in bytes. Block starts, block sizes and every stored word
/// are multiples of this.
pub(crate) const WORD: usize = size_of::<usize>();

/// The usable, word-aligned part of a caller-supplied byte region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawArena {
    base: NonNull<u8>,
    len: usize,
}

impl RawArena {
    /// Wraps an already clipped region.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `base..base + len` is valid for reads and writes and is not used by
    ///   anything else for as long as the returned value (or a copy) is used
    /// - `base` is aligned to [`WORD`] and `len` is a multiple of [`WORD`]
    pub(crate) unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        assert!(
            base.as_ptr().addr().is_multiple_of(WORD),
            "arena base must be word aligned"
        );
        assert!(len.is_multiple_of(WORD), "arena length must be word aligned");
        Self { base, len }
    }

    /// Length of the usable region in bytes.
    pub(crate) fn len(self) -> usize {
        self.len
    }

    /// Absolute address of the byte at `offset`.
    pub(crate) fn addr(self, offset: usize) -> usize {
        self.base.as_ptr().addr() + offset
    }

    /// Pointer to the byte at `offset`, carrying the arena's provenance.
    pub(crate) fn ptr(self, offset: usize) -> *mut u8 {
        assert!(offset < self.len, "offset {offset:#x} outside of arena");
        self.base.as_ptr().wrapping_add(offset)
    }

    /// Inverse of [`ptr`](Self::ptr).
    pub(crate) fn offset_of(self, ptr: *mut u8) -> usize {
        let offset = ptr.addr().wrapping_sub(self.base.as_ptr().addr());
        assert!(
            offset < self.len,
            "pointer {ptr:p} does not belong to the arena at {:p}",
            self.base
        );
        offset
    }

    /// Reads the word stored at `offset`.
    pub(crate) fn read(self, offset: usize) -> usize {
        self.check_word(offset);
        unsafe { self.word_ptr(offset).read() }
    }

    /// Stores `value` into the word at `offset`.
    pub(crate) fn write(self, offset: usize, value: usize) {
        self.check_word(offset);
        unsafe { self.word_ptr(offset).write(value) }
    }

    fn check_word(self, offset: usize) {
        assert!(
            offset.is_multiple_of(WORD),
            "unaligned word offset {offset:#x}"
        );
        assert!(
            offset
                .checked_add(WORD)
                .is_some_and(|end| end <= self.len),
            "word offset {offset:#x} outside of arena of {} bytes",
            self.len
        );
    }

    /// # Safety
    ///
    /// `offset` must have passed [`check_word`](Self::check_word).
    #[expect(clippy::cast_ptr_alignment)]
    unsafe fn word_ptr(self, offset: usize) -> *mut usize {
        unsafe { self.base.add(offset).cast::<usize>().as_ptr() }
    }
}

/// Rounds `start` up and `start + len` down to word boundaries.
///
/// Returns the aligned start and the usable length (possibly zero).
pub(crate) fn clip_region(
    start: NonNull<u8>,
    len: usize,
) -> Result<(NonNull<u8>, usize), SetupError> {
    let start_addr = start.as_ptr().addr();
    let Some(end_addr) = start_addr.checked_add(len) else {
        return Err(SetupErrorKind::AddressOverflow {
            base: start_addr,
            len,
        }
        .into());
    };

    let head_pad = start.as_ptr().align_offset(WORD);
    let aligned_end = end_addr - end_addr % WORD;
    let usable = aligned_end.saturating_sub(start_addr.saturating_add(head_pad));
    if usable == 0 {
        return Ok((start, 0));
    }
    let aligned_start = start.map_addr(|addr| addr.saturating_add(head_pad));
    Ok((aligned_start, usable))
}
