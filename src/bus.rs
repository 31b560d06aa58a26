//! The broadcast bus: the single-message-at-a-time dispatcher that mediates
//! every cache miss, upgrade, and write-back.
//!
//! The bus owns nothing. It is handed the cache collection and main memory it
//! needs for the duration of one transaction by its caller (see
//! [`Bus::cpu_read`], [`Bus::cpu_write`], [`Bus::put_message`]), which avoids
//! a cache-needs-bus / bus-needs-caches reference cycle entirely: there is one
//! top-level owner (the [`crate::system::System`]), and the bus is a
//! stateless, re-entrant set of associated functions that borrow from it.

use crate::error::Pending;
use crate::main_memory::{block_of, MainMemory};
use crate::memory_cache::{Cache, MesiState};

/// A message broadcast on the bus.
#[derive(Debug, Clone)]
pub enum BusMessage {
    /// A read request: the requester wants a shared copy of `block`.
    Read { block: u64 },
    /// A read-for-write request: the requester wants exclusive ownership of
    /// `block`, about to modify it.
    ReadForWrite { block: u64 },
    /// An upgrade: the requester already holds `block` Shared and wants to
    /// write it without a new fetch. Peers only invalidate.
    Upgrade { block: u64 },
    /// A write-back of a dirty block to main memory.
    Writeback { block: u64, data: Vec<u8> },
}

impl BusMessage {
    /// The block address this message concerns.
    pub fn block(&self) -> u64 {
        match self {
            BusMessage::Read { block }
            | BusMessage::ReadForWrite { block }
            | BusMessage::Upgrade { block }
            | BusMessage::Writeback { block, .. } => *block,
        }
    }
}

/// What a single peer's snoop produced.
#[derive(Debug, Default)]
pub struct SnoopOutcome {
    /// A copy of the block's data, if this peer supplied one.
    pub data: Option<Vec<u8>>,
    /// Set when the peer held the block Modified and must flush it to memory
    /// as part of this same transaction, before ownership changes hands.
    pub writeback: bool,
}

impl SnoopOutcome {
    pub(crate) fn none() -> Self {
        SnoopOutcome::default()
    }

    pub(crate) fn data(bytes: Vec<u8>) -> Self {
        SnoopOutcome {
            data: Some(bytes),
            writeback: false,
        }
    }

    pub(crate) fn data_with_writeback(bytes: Vec<u8>) -> Self {
        SnoopOutcome {
            data: Some(bytes),
            writeback: true,
        }
    }
}

/// The bus dispatcher. Holds no state; every operation takes the cache
/// collection and memory it needs to act on.
pub struct Bus;

impl Bus {
    /// Broadcast `msg` from `sender` to every other cache, then dispatch it
    /// against memory. Returns `(data, memory_accessed)` per §4.2.
    ///
    /// A Modified peer snoop write-back re-enters this same function with a
    /// `Writeback` message before the outer snoop loop continues, so the
    /// write-back is observed strictly before the response that triggered it.
    pub fn put_message(
        caches: &mut [Cache],
        memory: &mut MainMemory,
        sender: usize,
        msg: BusMessage,
    ) -> Result<(Option<Vec<u8>>, bool), Pending> {
        let mut snoop_data = None;

        for i in 0..caches.len() {
            if i == sender {
                continue;
            }
            let outcome = caches[i].react_to_bus(&msg)?;
            if outcome.writeback {
                let block = msg.block();
                let data = outcome
                    .data
                    .clone()
                    .expect("a writeback snoop always carries the dirty data");
                Self::put_message(caches, memory, i, BusMessage::Writeback { block, data })?;
            }
            if outcome.data.is_some() {
                snoop_data = outcome.data;
            }
        }

        match msg {
            BusMessage::Read { block } | BusMessage::ReadForWrite { block } => {
                if let Some(data) = snoop_data {
                    Ok((Some(data), false))
                } else {
                    Ok((Some(memory.read_block(block)), true))
                }
            }
            BusMessage::Upgrade { .. } => Ok((None, false)),
            BusMessage::Writeback { block, data } => {
                memory.write_block(block, data);
                Ok((None, true))
            }
        }
    }

    /// Drive a CPU read on behalf of `id`: cache lookup, and on miss, a full
    /// bus transaction followed by installing the returned block. Returns the
    /// byte read and whether it was a cache hit.
    pub fn cpu_read(
        caches: &mut [Cache],
        memory: &mut MainMemory,
        id: usize,
        address: u64,
    ) -> Result<(u8, bool), Pending> {
        let block_size = memory.block_size();
        let block = block_of(address, block_size);
        let offset = (address % block_size) as usize;

        if let Some(idx) = caches[id].find_line(block) {
            caches[id].update_lru(idx);
            return Ok((caches[id].line(idx).data[offset], true));
        }

        let (data, memory_accessed) =
            Self::put_message(caches, memory, id, BusMessage::Read { block })?;
        let data = data.expect("a READ always returns data, from a peer or from memory");
        let state = if memory_accessed {
            MesiState::Exclusive
        } else {
            MesiState::Shared
        };
        let byte = data[offset];

        let (victim, writeback) = caches[id].evict(block);
        if let Some((wb_block, wb_data)) = writeback {
            Self::put_message(
                caches,
                memory,
                id,
                BusMessage::Writeback {
                    block: wb_block,
                    data: wb_data,
                },
            )?;
        }
        caches[id].install(victim, block, data, state, memory_accessed);
        Ok((byte, false))
    }

    /// Drive a CPU write on behalf of `id`. Returns whether it was a cache
    /// hit (including an upgrade hit).
    pub fn cpu_write(
        caches: &mut [Cache],
        memory: &mut MainMemory,
        id: usize,
        address: u64,
        value: u8,
    ) -> Result<bool, Pending> {
        let block_size = memory.block_size();
        let block = block_of(address, block_size);
        let offset = (address % block_size) as usize;

        if let Some(idx) = caches[id].find_line(block) {
            if caches[id].line(idx).state == MesiState::Shared {
                Self::put_message(caches, memory, id, BusMessage::Upgrade { block })?;
            }
            caches[id].write_hit(idx, offset, value);
            return Ok(true);
        }

        let (data, memory_accessed) =
            Self::put_message(caches, memory, id, BusMessage::ReadForWrite { block })?;
        let mut data = data.expect("a READ_FOR_WRITE always returns data, from a peer or memory");
        data[offset] = value;

        let (victim, writeback) = caches[id].evict(block);
        if let Some((wb_block, wb_data)) = writeback {
            Self::put_message(
                caches,
                memory,
                id,
                BusMessage::Writeback {
                    block: wb_block,
                    data: wb_data,
                },
            )?;
        }
        caches[id].install(victim, block, data, MesiState::Modified, memory_accessed);
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main_memory::MainMemory;

    fn harness(line_count: usize) -> (Vec<Cache>, MainMemory) {
        let caches = vec![Cache::new(0, line_count, 8), Cache::new(1, line_count, 8)];
        let memory = MainMemory::new(8, Some(1));
        (caches, memory)
    }

    fn read(caches: &mut [Cache], mem: &mut MainMemory, id: usize, addr: u64) -> (u8, bool) {
        Bus::cpu_read(caches, mem, id, addr).expect("no pending")
    }

    fn write(caches: &mut [Cache], mem: &mut MainMemory, id: usize, addr: u64, value: u8) -> bool {
        Bus::cpu_write(caches, mem, id, addr, value).expect("no pending")
    }

    fn state_of(caches: &[Cache], id: usize, block: u64) -> MesiState {
        let idx = caches[id].find_line(block).expect("block resident");
        caches[id].line(idx).state
    }

    fn clear_pending_all(caches: &mut [Cache]) {
        for cache in caches {
            cache.clear_pending();
        }
    }

    /// Scenario 2: a write from a Shared holder issues UPGRADE and
    /// invalidates the peer, with no main-memory access.
    #[test]
    fn write_invalidates_shared_peer() {
        let (mut caches, mut mem) = harness(3);
        read(&mut caches, &mut mem, 0, 0x00);
        clear_pending_all(&mut caches);
        read(&mut caches, &mut mem, 1, 0x00);
        assert_eq!(state_of(&caches, 0, 0x00), MesiState::Shared);
        assert_eq!(state_of(&caches, 1, 0x00), MesiState::Shared);

        let hit = write(&mut caches, &mut mem, 0, 0x00, 0x42);
        assert!(hit);
        assert_eq!(state_of(&caches, 0, 0x00), MesiState::Modified);
        let idx0 = caches[0].find_line(0x00).unwrap();
        assert_eq!(caches[0].line(idx0).data[0], 0x42);
        assert!(caches[1].find_line(0x00).is_none());
    }

    /// Scenario 3: a peer read of a Modified block triggers a write-back and
    /// hands over fresh data; the owner downgrades to Shared.
    #[test]
    fn modified_write_back_on_peer_read() {
        let (mut caches, mut mem) = harness(3);
        read(&mut caches, &mut mem, 0, 0x00);
        clear_pending_all(&mut caches);
        write(&mut caches, &mut mem, 0, 0x00, 0x42);
        assert_eq!(state_of(&caches, 0, 0x00), MesiState::Modified);

        let (byte, hit) = read(&mut caches, &mut mem, 1, 0x00);
        assert!(!hit);
        assert_eq!(byte, 0x42);
        assert_eq!(state_of(&caches, 0, 0x00), MesiState::Shared);
        assert_eq!(state_of(&caches, 1, 0x00), MesiState::Shared);
        assert_eq!(mem.read_block(0x00)[0], 0x42);
    }

    /// Scenario 4: both caches hold a block Shared; one writes and upgrades
    /// without any main-memory access.
    #[test]
    fn upgrade_invalidates_peer_without_memory_access() {
        let (mut caches, mut mem) = harness(3);
        read(&mut caches, &mut mem, 0, 0x08);
        clear_pending_all(&mut caches);
        read(&mut caches, &mut mem, 1, 0x08);
        clear_pending_all(&mut caches);
        let before = mem.materialized_block_count();

        write(&mut caches, &mut mem, 0, 0x08, 0x99);

        assert_eq!(state_of(&caches, 0, 0x08), MesiState::Modified);
        assert!(caches[1].find_line(0x08).is_none());
        assert_eq!(mem.materialized_block_count(), before);
    }

    /// Scenario 6: with 3 lines, touching three blocks then writing one of
    /// them means eviction prefers the clean LRU victim over the Modified
    /// line, even though the Modified line is now least-recently-written.
    #[test]
    fn lru_eviction_skips_modified_line() {
        let (mut caches, mut mem) = harness(3);
        read(&mut caches, &mut mem, 0, 0x00);
        clear_pending_all(&mut caches);
        read(&mut caches, &mut mem, 0, 0x08);
        clear_pending_all(&mut caches);
        read(&mut caches, &mut mem, 0, 0x10);
        clear_pending_all(&mut caches);
        write(&mut caches, &mut mem, 0, 0x08, 0x7);
        assert_eq!(state_of(&caches, 0, 0x08), MesiState::Modified);

        read(&mut caches, &mut mem, 0, 0x18);
        clear_pending_all(&mut caches);

        assert!(caches[0].find_line(0x00).is_none(), "block 0x00 should have been evicted");
        assert_eq!(state_of(&caches, 0, 0x08), MesiState::Modified);
        assert!(caches[0].find_line(0x18).is_some());
    }
}
