//! Main memory: a sparse, lazily-materialized mapping from block address to
//! block bytes.

use std::collections::HashMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Maps an address down to the start of its containing block.
///
/// The subtraction never overflows: `address % block_size` is always
/// `<= address`, so this is safe even for addresses near `u64::MAX`.
pub fn block_of(address: u64, block_size: u64) -> u64 {
    address - (address % block_size)
}

/// The backing store shared by all caches. Blocks are materialized with
/// pseudo-random bytes the first time they are touched and then kept stable
/// for the rest of the run.
pub struct MainMemory {
    block_size: u64,
    blocks: HashMap<u64, Vec<u8>>,
    rng: StdRng,
}

impl MainMemory {
    /// Create an empty memory with the given block size. `seed` fixes the
    /// PRNG used to materialize new blocks, for reproducible runs; `None`
    /// seeds from entropy.
    pub fn new(block_size: u64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        MainMemory {
            block_size,
            blocks: HashMap::new(),
            rng,
        }
    }

    /// The configured block size in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Read a fresh copy of the block at `block`, materializing it with
    /// random bytes if this is the first access.
    pub fn read_block(&mut self, block: u64) -> Vec<u8> {
        let block_size = self.block_size;
        let rng = &mut self.rng;
        self.blocks
            .entry(block)
            .or_insert_with(|| (0..block_size).map(|_| rng.gen()).collect())
            .clone()
    }

    /// Overwrite (or create) the block at `block` with `data`. Takes
    /// ownership of the supplied bytes.
    pub fn write_block(&mut self, block: u64, data: Vec<u8>) {
        debug_assert_eq!(data.len(), self.block_size as usize);
        self.blocks.insert(block, data);
    }

    /// Number of distinct blocks materialized so far.
    pub fn materialized_block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl fmt::Display for MainMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Memory holds {} addresses in {} blocks:",
            self.blocks.len() * self.block_size as usize,
            self.blocks.len()
        )?;
        let mut entries: Vec<_> = self.blocks.iter().collect();
        entries.sort_by_key(|(block, _)| **block);
        for (block, data) in entries {
            let bytes = data
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(f, "{block:#018x}: {bytes}")?;
        }
        Ok(())
    }
}
