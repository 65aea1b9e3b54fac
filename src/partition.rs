//! Block-partition arithmetic for the one-dimensional process grid.
//!
//! A global extent `n` distributed over `p` ranks is cut into contiguous
//! blocks of `ceil(n / p)` elements; the trailing rank(s) take the remainder
//! and may end up empty. Every piece of the crate that needs to know "which
//! global indices does rank `r` own" goes through these functions, so the
//! layout convention lives in exactly one place.

use std::ops::Range;

/// Returns the half-open range of global indices owned by `rank` when an
/// extent of `n` elements is partitioned over `size` ranks.
pub fn block_range(n: usize, size: usize, rank: usize) -> Range<usize> {
    debug_assert!(rank < size, "rank {rank} out of range for world size {size}");
    let block = n.div_ceil(size);
    let start = (rank * block).min(n);
    let end = ((rank + 1) * block).min(n);
    start..end
}

/// Returns the number of elements owned by `rank`.
pub fn block_len(n: usize, size: usize, rank: usize) -> usize {
    block_range(n, size, rank).len()
}
