//! Map-reduce sharding over worker threads.
//!
//! Inputs are split into disjoint chunks, each chunk is mapped on its own
//! worker, and per-shard results are folded with a commutative-associative
//! reduce. Global outputs are therefore independent of scheduling order.

use rayon::prelude::*;

/// Sharding policy for a map-reduce run.
#[derive(Debug, Clone, Copy)]
pub struct SchedulePolicy {
    /// Number of inputs per shard.
    pub chunk_size: usize,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self { chunk_size: 64 }
    }
}

/// Map disjoint input chunks in parallel and reduce the shard results.
/// `reduce` must be commutative and associative with `initial` as its
/// identity.
pub fn map_reduce<I, R, M, F>(
    policy: SchedulePolicy,
    initial: R,
    map: M,
    reduce: F,
    inputs: &[I],
) -> R
where
    I: Sync,
    R: Clone + Send + Sync,
    M: Fn(&[I]) -> R + Sync,
    F: Fn(R, R) -> R + Sync + Send,
{
    let chunk_size = policy.chunk_size.max(1);
    inputs
        .par_chunks(chunk_size)
        .map(|chunk| map(chunk))
        .reduce(|| initial.clone(), &reduce)
}
