//! The per-core cache: a fully-associative, write-back, write-invalidate
//! array of lines, each carrying a MESI state, an LRU rank, and a transient
//! pending flag.

use std::fmt;

use crate::bus::{BusMessage, SnoopOutcome};
use crate::error::Pending;

/// The current MESI state of a cache line.
///
/// <pre>
///   M E S I
/// M ✗ ✗ ✗ ✓
/// E ✗ ✗ ✗ ✓
/// S ✗ ✗ ✓ ✓
/// I ✓ ✓ ✓ ✓
/// </pre>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MesiState {
    /// Present only here, dirty; must be written back before any other cache
    /// (or memory) may see a current value.
    Modified,
    /// Present only here, clean; matches main memory.
    Exclusive,
    /// May also be present in other caches; clean; matches main memory.
    Shared,
    /// Not present (or no longer valid).
    Invalid,
}

/// A single cache line.
#[derive(Debug, Clone)]
pub struct CacheLine {
    /// The block address tagged in this line. Meaningless while Invalid.
    pub block: u64,
    /// This line's MESI state.
    pub state: MesiState,
    /// LRU rank in `[0, line_count - 1]`; higher is more recently used.
    pub use_rank: usize,
    /// Set while this line is mid-fill from main memory.
    pub pending: bool,
    /// The line's data.
    pub data: Vec<u8>,
}

impl CacheLine {
    fn new(block_size: usize, use_rank: usize) -> Self {
        CacheLine {
            block: 0,
            state: MesiState::Invalid,
            use_rank,
            pending: false,
            data: vec![0; block_size],
        }
    }
}

/// A fully-associative cache of `line_count` lines, each holding
/// `block_size` bytes.
pub struct Cache {
    /// This cache's id, matching its owning core's id.
    pub id: usize,
    lines: Vec<CacheLine>,
    pending_line: Option<usize>,
}

impl Cache {
    /// Build a cache with `line_count` lines, all initially Invalid, with
    /// `use_rank` forming the identity permutation `[0, line_count)`.
    pub fn new(id: usize, line_count: usize, block_size: usize) -> Self {
        assert!(line_count > 0, "a cache needs at least one line");
        let lines = (0..line_count)
            .map(|rank| CacheLine::new(block_size, rank))
            .collect();
        Cache {
            id,
            lines,
            pending_line: None,
        }
    }

    /// Read-only access to a line by index.
    pub(crate) fn line(&self, idx: usize) -> &CacheLine {
        &self.lines[idx]
    }

    /// Whether this cache currently has a line mid-fill.
    pub fn is_pending(&self) -> bool {
        self.pending_line.is_some()
    }

    /// All lines, in storage order, for inspection/printing.
    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }

    /// Find the (non-Invalid) line tagged with `block`, if any.
    pub(crate) fn find_line(&self, block: u64) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| l.state != MesiState::Invalid && l.block == block)
    }

    /// Choose and prepare an eviction victim for an incoming `new_block`,
    /// without installing it yet. Returns the victim's index and, if it was
    /// Modified, the `(block, data)` that must be written back first.
    pub(crate) fn evict(&mut self, _new_block: u64) -> (usize, Option<(u64, Vec<u8>)>) {
        let victim = self
            .lines
            .iter()
            .position(|l| l.state == MesiState::Invalid)
            .unwrap_or_else(|| {
                self.lines
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, l)| l.use_rank)
                    .map(|(i, _)| i)
                    .expect("a cache always has at least one line")
            });

        let writeback = if self.lines[victim].state == MesiState::Modified {
            Some((self.lines[victim].block, self.lines[victim].data.clone()))
        } else {
            None
        };
        (victim, writeback)
    }

    /// Install `data` for `block` into line `idx`, set its state, mark it
    /// pending when `pending` is true, and promote it to most-recently-used.
    pub(crate) fn install(
        &mut self,
        idx: usize,
        block: u64,
        data: Vec<u8>,
        state: MesiState,
        pending: bool,
    ) {
        self.lines[idx].block = block;
        self.lines[idx].data = data;
        self.lines[idx].state = state;
        self.lines[idx].pending = pending;
        if pending {
            self.pending_line = Some(idx);
        }
        self.update_lru(idx);
    }

    /// Apply a write hit (upgrade already issued by the caller if needed):
    /// transition to Modified and write the byte, then update LRU.
    pub(crate) fn write_hit(&mut self, idx: usize, offset: usize, value: u8) {
        self.lines[idx].state = MesiState::Modified;
        self.lines[idx].data[offset] = value;
        self.update_lru(idx);
    }

    /// Promote line `idx` to most-recently-used, shifting every line that
    /// was ranked above it down by one. Preserves the permutation invariant.
    pub(crate) fn update_lru(&mut self, idx: usize) {
        let line_count = self.lines.len();
        let old_rank = self.lines[idx].use_rank;
        if old_rank == line_count - 1 {
            return;
        }
        self.lines[idx].use_rank = line_count - 1;
        for (i, line) in self.lines.iter_mut().enumerate() {
            if i != idx && line.use_rank > old_rank {
                line.use_rank -= 1;
            }
        }
    }

    /// Clear this cache's pending line, once the owning core's simulated
    /// fill latency has elapsed.
    pub fn clear_pending(&mut self) {
        if let Some(idx) = self.pending_line.take() {
            self.lines[idx].pending = false;
        }
    }

    /// React to a bus message broadcast by another cache. See the snoop
    /// table in the coherence spec for the state transitions below.
    pub(crate) fn react_to_bus(&mut self, msg: &BusMessage) -> Result<SnoopOutcome, Pending> {
        let block = msg.block();
        let Some(idx) = self.find_line(block) else {
            return Ok(SnoopOutcome::default());
        };

        if self.lines[idx].pending {
            return Err(Pending);
        }

        let state = self.lines[idx].state;
        let outcome = match (state, msg) {
            (MesiState::Shared, BusMessage::Read { .. }) => SnoopOutcome::none(),

            (MesiState::Shared, BusMessage::ReadForWrite { .. })
            | (MesiState::Shared, BusMessage::Upgrade { .. }) => {
                self.lines[idx].state = MesiState::Invalid;
                SnoopOutcome::none()
            }

            (MesiState::Exclusive, BusMessage::Read { .. }) => {
                self.lines[idx].state = MesiState::Shared;
                SnoopOutcome::data(self.lines[idx].data.clone())
            }

            (MesiState::Exclusive, BusMessage::ReadForWrite { .. }) => {
                self.lines[idx].state = MesiState::Invalid;
                SnoopOutcome::data(self.lines[idx].data.clone())
            }

            (MesiState::Modified, BusMessage::Read { .. }) => {
                self.lines[idx].state = MesiState::Shared;
                SnoopOutcome::data_with_writeback(self.lines[idx].data.clone())
            }

            (MesiState::Modified, BusMessage::ReadForWrite { .. }) => {
                self.lines[idx].state = MesiState::Invalid;
                SnoopOutcome::data_with_writeback(self.lines[idx].data.clone())
            }

            (MesiState::Exclusive, BusMessage::Upgrade { .. })
            | (MesiState::Modified, BusMessage::Upgrade { .. }) => {
                panic!(
                    "coherence invariant violated: UPGRADE observed for block {block:#018x} \
                     while a peer holds it {state:?}"
                );
            }

            (_, BusMessage::Writeback { .. }) => SnoopOutcome::none(),

            (MesiState::Invalid, _) => unreachable!("find_line never returns an Invalid line"),
        };

        Ok(outcome)
    }
}

impl fmt::Display for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Cache{} ({} lines of {} bytes each):",
            self.id,
            self.lines.len(),
            self.lines.first().map_or(0, |l| l.data.len())
        )?;
        for (i, line) in self.lines.iter().enumerate() {
            let bytes = line
                .data
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ");
            let state = match line.state {
                MesiState::Modified => "M",
                MesiState::Exclusive => "E",
                MesiState::Shared => "S",
                MesiState::Invalid => "I",
            };
            let pending = if line.pending { "*" } else { " " };
            writeln!(
                f,
                "{i:>2} | {:#018x} | {state}{pending} {:>2x} | {bytes}",
                line.block, line.use_rank
            )?;
        }
        Ok(())
    }
}
