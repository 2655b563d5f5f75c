use rand::{Rng as _, SeedableRng as _, rngs::StdRng, seq::SliceRandom as _};
use tagheap::{SetupError, TagHeap};

/// Owned, word-aligned backing memory for a probe arena.
pub struct Memory {
    words: Vec<usize>,
    offset: usize,
    len: usize,
}

impl Memory {
    /// Allocates `len` bytes, handed to the arena starting `offset` bytes
    /// into the buffer so that setup has to clip an unaligned start.
    pub fn new(len: usize, offset: usize) -> Self {
        let words = vec![0; (len + offset).div_ceil(size_of::<usize>())];
        Self { words, offset, len }
    }

    /// Sets up a fresh allocator over the whole buffer.
    pub fn try_heap(&mut self) -> Result<TagHeap, SetupError> {
        let base = self.words.as_mut_ptr().cast::<u8>().wrapping_add(self.offset);
        let mut heap = TagHeap::new();
        unsafe { heap.try_setup(base, self.len)? };
        Ok(heap)
    }

    /// Like [`try_heap`](Self::try_heap), for a buffer already known to fit.
    pub fn fresh_heap(&mut self) -> TagHeap {
        let base = self.words.as_mut_ptr().cast::<u8>().wrapping_add(self.offset);
        let mut heap = TagHeap::new();
        unsafe { heap.setup(base, self.len) };
        heap
    }
}

/// Largest request a single allocation serves from a clean arena.
///
/// The answer from [`TagHeap::max_request`] is confirmed against the
/// allocator itself: `max` must succeed and `max + 1` must fail.
pub fn max_size(memory: &mut Memory) -> Option<usize> {
    let max = memory.fresh_heap().max_request()?;
    let fits = memory.fresh_heap().allocate(max).is_some();
    let over = memory.fresh_heap().allocate(max + 1).is_some();
    debug!("max request {max}: fits={fits}, one more fits={over}");
    (fits && !over).then_some(max)
}

/// Bytes obtained by allocating `chunk`-sized pieces until the arena is
/// exhausted. Every piece is released again before returning.
pub fn effective_size(memory: &mut Memory, chunk: usize) -> usize {
    let mut heap = memory.fresh_heap();
    let mut ptrs = Vec::new();
    while let Some(ptr) = heap.allocate(chunk) {
        unsafe { ptr.write_bytes(0xa5, chunk) };
        ptrs.push(ptr);
    }
    trace!("{} chunks of {chunk} bytes, stats={:?}", ptrs.len(), heap.stats());

    let total = ptrs.len() * chunk;
    for ptr in ptrs {
        unsafe { heap.deallocate(ptr) };
    }
    total
}

/// Outcome of one replay round.
#[derive(Debug)]
pub enum Replay {
    /// Every allocation succeeded again.
    Passed { allocations: usize },
    /// The allocation at `index` of `size` bytes failed on the second pass.
    Failed { index: usize, size: usize },
}

/// Allocates random sizes until the first failure, releases everything in a
/// shuffled order, and replays the successful prefix.
pub fn replay(memory: &mut Memory, count: usize, max_chunk: usize, seed: u64) -> Replay {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut heap = memory.fresh_heap();

    let mut sizes = Vec::with_capacity(count);
    let mut ptrs = Vec::with_capacity(count);
    for _ in 0..count {
        let size = rng.random_range(0..=max_chunk);
        let Some(ptr) = heap.allocate(size) else {
            debug!("first pass stopped at {} allocations", sizes.len());
            break;
        };
        sizes.push(size);
        ptrs.push(ptr);
    }

    ptrs.shuffle(&mut rng);
    for ptr in ptrs {
        unsafe { heap.deallocate(ptr) };
    }
    trace!("after release: {:?}", heap.stats());

    for (index, &size) in sizes.iter().enumerate() {
        if heap.allocate(size).is_none() {
            return Replay::Failed { index, size };
        }
    }
    Replay::Passed {
        allocations: sizes.len(),
    }
}
