//! The core: drives one cache against a lazily-consumed trace, under a small
//! {Ready, WaitingForMemory, Finished} state machine with an at-most-one-deep
//! retry slot.

use crate::bus::Bus;
use crate::error::SimError;
use crate::main_memory::MainMemory;
use crate::memory_cache::Cache;
use crate::trace::{Instruction, TraceReader};

/// A core's run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    /// Ready to execute its next (or retried) instruction.
    Ready,
    /// Simulating the latency of a memory fill already in flight.
    WaitingForMemory,
    /// Trace exhausted; further ticks are no-ops.
    Finished,
}

/// What happened on one tick of one core, for the driver to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEvent {
    /// `NOP` executed.
    Nop,
    /// A read completed (possibly entering `WaitingForMemory`).
    Read { address: u64, hit: bool },
    /// A write completed (possibly entering `WaitingForMemory`).
    Write { address: u64, hit: bool },
    /// The instruction was aborted by a pending transaction and armed for
    /// retry; no state changed this tick.
    Retry,
    /// Still waiting out the simulated memory latency.
    Waiting,
    /// The memory wait just elapsed; the cache's pending line was cleared.
    MemoryReady,
    /// This core has no more instructions.
    Finished,
}

/// Drives one cache through a trace, one instruction per `Ready` tick.
pub struct Core {
    /// This core's id, matching its cache's id.
    pub id: usize,
    /// Current state.
    pub state: CoreState,
    wait_remaining: u32,
    wait_cycles: u32,
    retry_slot: Option<Instruction>,
    trace: TraceReader,
}

impl Core {
    /// Build a core reading from `trace`, waiting `wait_cycles` ticks after
    /// any miss that reaches main memory.
    pub fn new(id: usize, trace: TraceReader, wait_cycles: u32) -> Self {
        Core {
            id,
            state: CoreState::Ready,
            wait_remaining: 0,
            wait_cycles,
            retry_slot: None,
            trace,
        }
    }

    /// Advance this core by one tick against the shared caches and memory.
    pub fn tick(
        &mut self,
        caches: &mut [Cache],
        memory: &mut MainMemory,
    ) -> Result<TickEvent, SimError> {
        match self.state {
            CoreState::Finished => Ok(TickEvent::Finished),

            CoreState::WaitingForMemory => {
                if self.wait_remaining > 0 {
                    self.wait_remaining -= 1;
                    Ok(TickEvent::Waiting)
                } else {
                    caches[self.id].clear_pending();
                    self.state = CoreState::Ready;
                    Ok(TickEvent::MemoryReady)
                }
            }

            CoreState::Ready => self.tick_ready(caches, memory),
        }
    }

    fn tick_ready(
        &mut self,
        caches: &mut [Cache],
        memory: &mut MainMemory,
    ) -> Result<TickEvent, SimError> {
        let instruction = match self.retry_slot.take() {
            Some(instruction) => instruction,
            None => match self.trace.next() {
                None => {
                    self.state = CoreState::Finished;
                    return Ok(TickEvent::Finished);
                }
                Some(result) => result?,
            },
        };

        match instruction {
            Instruction::Nop => Ok(TickEvent::Nop),

            Instruction::Read(address) => {
                match Bus::cpu_read(caches, memory, self.id, address) {
                    Ok((_, hit)) => {
                        self.maybe_enter_wait(caches);
                        Ok(TickEvent::Read { address, hit })
                    }
                    Err(_pending) => {
                        self.retry_slot = Some(instruction);
                        Ok(TickEvent::Retry)
                    }
                }
            }

            Instruction::Write(address, value) => {
                match Bus::cpu_write(caches, memory, self.id, address, value) {
                    Ok(hit) => {
                        self.maybe_enter_wait(caches);
                        Ok(TickEvent::Write { address, hit })
                    }
                    Err(_pending) => {
                        self.retry_slot = Some(instruction);
                        Ok(TickEvent::Retry)
                    }
                }
            }
        }
    }

    fn maybe_enter_wait(&mut self, caches: &[Cache]) {
        if caches[self.id].is_pending() {
            self.state = CoreState::WaitingForMemory;
            self.wait_remaining = self.wait_cycles;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn trace_with(lines: &[&str]) -> TraceReader {
        let path = std::env::temp_dir().join(format!(
            "mesi_sim_core_test_{}_{}.txt",
            std::process::id(),
            lines.len()
        ));
        {
            let mut f = File::create(&path).unwrap();
            for line in lines {
                writeln!(f, "{line}").unwrap();
            }
        }
        TraceReader::open(&path).unwrap()
    }

    #[test]
    fn nop_stays_ready() {
        let mut caches = vec![Cache::new(0, 3, 8)];
        let mut memory = MainMemory::new(8, Some(1));
        let mut core = Core::new(0, trace_with(&["NOP"]), 2);
        let event = core.tick(&mut caches, &mut memory).unwrap();
        assert_eq!(event, TickEvent::Nop);
        assert_eq!(core.state, CoreState::Ready);
    }

    #[test]
    fn empty_trace_finishes_immediately() {
        let mut caches = vec![Cache::new(0, 3, 8)];
        let mut memory = MainMemory::new(8, Some(1));
        let mut core = Core::new(0, trace_with(&[]), 2);
        let event = core.tick(&mut caches, &mut memory).unwrap();
        assert_eq!(event, TickEvent::Finished);
        assert_eq!(core.state, CoreState::Finished);
    }

    #[test]
    fn read_miss_enters_waiting_for_memory_then_clears() {
        let mut caches = vec![Cache::new(0, 3, 8)];
        let mut memory = MainMemory::new(8, Some(1));
        let mut core = Core::new(0, trace_with(&["R 0"]), 2);

        let event = core.tick(&mut caches, &mut memory).unwrap();
        assert_eq!(event, TickEvent::Read { address: 0, hit: false });
        assert_eq!(core.state, CoreState::WaitingForMemory);
        assert!(caches[0].is_pending());

        assert_eq!(core.tick(&mut caches, &mut memory).unwrap(), TickEvent::Waiting);
        assert_eq!(core.tick(&mut caches, &mut memory).unwrap(), TickEvent::Waiting);
        assert_eq!(
            core.tick(&mut caches, &mut memory).unwrap(),
            TickEvent::MemoryReady
        );
        assert_eq!(core.state, CoreState::Ready);
        assert!(!caches[0].is_pending());
    }

    #[test]
    fn trace_syntax_error_propagates_from_tick() {
        let mut caches = vec![Cache::new(0, 3, 8)];
        let mut memory = MainMemory::new(8, Some(1));
        let mut core = Core::new(0, trace_with(&["garbage"]), 2);
        let err = core.tick(&mut caches, &mut memory).unwrap_err();
        assert!(matches!(err, SimError::TraceSyntax { .. }));
    }
}
