//! Run configuration: block size, line count, one trace path per core, the
//! simulated post-miss wait, and an optional PRNG seed. Resolved once at
//! startup into a single immutable value.

use std::path::PathBuf;

/// Parameters for one simulated run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Block size in bytes, shared by memory and every cache.
    pub block_size: u64,
    /// Number of lines per cache.
    pub line_count: usize,
    /// One trace file per simulated core, in registration order.
    pub trace_paths: Vec<PathBuf>,
    /// Cycles a core spends in `WaitingForMemory` after a miss that reaches
    /// main memory.
    pub wait_cycles: u32,
    /// PRNG seed for reproducible memory initialization. `None` seeds from
    /// entropy.
    pub seed: Option<u64>,
}

impl Config {
    /// Number of cores implied by how many trace paths were given.
    pub fn num_cores(&self) -> usize {
        self.trace_paths.len()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            block_size: 8,
            line_count: 3,
            trace_paths: Vec::new(),
            wait_cycles: 2,
            seed: None,
        }
    }
}
