//! Process-wide entry points.
//!
//! These functions operate on a single [`TagHeap`] stored in a static, for
//! callers that want the classic `setup`/`alloc`/`free`/`dump` quartet
//! instead of threading an allocator value around. There is exactly one
//! arena here at a time; calling [`setup`] again replaces it without
//! touching the old one.
//!
//! ```rust
//! use tagheap::global;
//!
//! static mut MEMORY: [usize; 512] = [0; 512];
//!
//! unsafe {
//!     global::setup((&raw mut MEMORY).cast(), size_of::<[usize; 512]>());
//! }
//! let ptr = global::alloc(0x100);
//! assert!(!ptr.is_null());
//! unsafe { global::free(ptr) };
//! ```

use core::fmt;

use spin::Mutex;

use crate::TagHeap;

static HEAP: Mutex<TagHeap> = Mutex::new(TagHeap::new());

/// Prepares the process-wide arena. A null `base` is ignored.
///
/// # Panics
///
/// Panics if the region is too small to hold an arena.
///
/// # Safety
///
/// Same contract as [`TagHeap::try_setup`].
#[track_caller]
pub unsafe fn setup(base: *mut u8, len: usize) {
    unsafe { HEAP.lock().setup(base, len) }
}

/// Allocates `size` bytes from the process-wide arena, or returns null.
#[must_use]
pub fn alloc(size: usize) -> *mut u8 {
    HEAP.lock().allocate(size).unwrap_or_default()
}

/// Releases a pointer returned by [`alloc`].
///
/// # Safety
///
/// Same contract as [`TagHeap::deallocate`].
pub unsafe fn free(ptr: *mut u8) {
    unsafe { HEAP.lock().deallocate(ptr) }
}

/// Writes the process-wide arena layout to `sink`, one block per line.
pub fn dump<W>(sink: &mut W) -> fmt::Result
where
    W: fmt::Write + ?Sized,
{
    HEAP.lock().dump(sink)
}
