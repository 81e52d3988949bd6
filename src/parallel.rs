//! Deterministic work partitioning for per-phase worker threads.

use std::ops::Range;

/// Contiguous sub-range of `0..len` handled by thread `ti` out of `nthreads`.
///
/// The ranges of all threads tile `0..len` without overlap and differ in length
/// by at most one.
#[inline]
pub fn chunk_range(ti: usize, nthreads: usize, len: usize) -> Range<usize> {
    debug_assert!(ti < nthreads);
    let start = ti * len / nthreads;
    let end = (ti + 1) * len / nthreads;
    start..end
}

/// Split `items` into `nthreads` disjoint mutable chunks following
/// [`chunk_range`].
pub fn split_chunks_mut<T>(items: &mut [T], nthreads: usize) -> Vec<&mut [T]> {
    let len = items.len();
    let mut chunks = Vec::with_capacity(nthreads);
    let mut rest = items;
    let mut consumed = 0;
    for ti in 0..nthreads {
        let range = chunk_range(ti, nthreads, len);
        let (head, tail) = rest.split_at_mut(range.end - consumed);
        consumed = range.end;
        chunks.push(head);
        rest = tail;
    }
    chunks
}
