//! Wires memory, caches, and cores together and drives the deterministic
//! round-robin clock. The single owner of all mutable state, which is what
//! lets the bus and caches avoid holding references to each other: `System`
//! hands out disjoint `&mut` borrows of its own fields for the duration of
//! one tick.

use tracing::debug;

use crate::config::Config;
use crate::core::{Core, CoreState, TickEvent};
use crate::error::SimError;
use crate::main_memory::MainMemory;
use crate::memory_cache::Cache;
use crate::trace::TraceReader;

/// The whole simulated machine: one cache and one core per configured trace
/// file, plus the shared memory they all read and write through the bus.
pub struct System {
    /// Shared main memory.
    pub memory: MainMemory,
    /// One cache per core, in registration order.
    pub caches: Vec<Cache>,
    /// One core per configured trace file, in registration order.
    pub cores: Vec<Core>,
}

impl System {
    /// Build a system from `config`, opening every configured trace file.
    pub fn new(config: &Config) -> Result<Self, SimError> {
        assert!(
            !config.trace_paths.is_empty(),
            "at least one trace file must be configured"
        );

        let memory = MainMemory::new(config.block_size, config.seed);
        let mut caches = Vec::with_capacity(config.num_cores());
        let mut cores = Vec::with_capacity(config.num_cores());

        for (id, path) in config.trace_paths.iter().enumerate() {
            caches.push(Cache::new(id, config.line_count, config.block_size as usize));
            let trace = TraceReader::open(path)?;
            cores.push(Core::new(id, trace, config.wait_cycles));
        }

        Ok(System {
            memory,
            caches,
            cores,
        })
    }

    /// Advance every core by exactly one tick, in registration order. Returns
    /// one event per core, in the same order.
    pub fn step(&mut self) -> Result<Vec<TickEvent>, SimError> {
        let mut events = Vec::with_capacity(self.cores.len());
        for i in 0..self.cores.len() {
            let event = self.cores[i].tick(&mut self.caches, &mut self.memory)?;
            debug!(core = i, ?event, "ticked");
            events.push(event);
        }
        Ok(events)
    }

    /// Whether every core has exhausted its trace.
    pub fn is_finished(&self) -> bool {
        self.cores.iter().all(|c| c.state == CoreState::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn trace_file(name: &str, lines: &[&str]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "mesi_sim_system_test_{}_{name}.txt",
            std::process::id()
        ));
        let mut f = File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn exclusive_to_shared_on_peer_read() {
        let p1 = trace_file("c1", &["R 0"]);
        let p2 = trace_file("c2", &["NOP", "R 0"]);
        let config = Config {
            block_size: 8,
            line_count: 3,
            trace_paths: vec![p1, p2],
            wait_cycles: 2,
            seed: Some(1),
        };
        let mut system = System::new(&config).unwrap();

        system.step().unwrap();
        let idx0 = system.caches[0].find_line(0).unwrap();
        assert_eq!(
            system.caches[0].lines()[idx0].state,
            crate::memory_cache::MesiState::Exclusive
        );

        // Core1 waits out its miss latency while core2 runs its NOP.
        for _ in 0..config.wait_cycles {
            system.step().unwrap();
        }
        system.step().unwrap();

        let idx0 = system.caches[0].find_line(0).unwrap();
        let idx1 = system.caches[1].find_line(0).unwrap();
        assert_eq!(system.caches[0].lines()[idx0].state, crate::memory_cache::MesiState::Shared);
        assert_eq!(system.caches[1].lines()[idx1].state, crate::memory_cache::MesiState::Shared);
    }

    /// Scenario 5: a peer's read of a still-pending block is rejected and
    /// armed for retry, with no state change, until the pending core's wait
    /// elapses; then the retry succeeds off the snoop, never touching memory.
    #[test]
    fn pending_miss_forces_peer_retry_then_succeeds() {
        let p1 = trace_file("p1", &["R 10"]);
        let p2 = trace_file("p2", &["NOP", "R 10"]);
        let config = Config {
            block_size: 8,
            line_count: 3,
            trace_paths: vec![p1, p2],
            wait_cycles: 2,
            seed: Some(1),
        };
        let mut system = System::new(&config).unwrap();

        let events = system.step().unwrap();
        assert_eq!(events[0], TickEvent::Read { address: 0x10, hit: false });
        assert_eq!(events[1], TickEvent::Nop);

        let events = system.step().unwrap();
        assert_eq!(events[0], TickEvent::Waiting);
        assert_eq!(events[1], TickEvent::Retry);

        let events = system.step().unwrap();
        assert_eq!(events[0], TickEvent::Waiting);
        assert_eq!(
            events[1],
            TickEvent::Retry,
            "peer must keep retrying while the line is still pending"
        );

        let before = system.memory.materialized_block_count();
        let events = system.step().unwrap();
        assert_eq!(events[0], TickEvent::MemoryReady);
        assert_eq!(events[1], TickEvent::Read { address: 0x10, hit: false });
        assert_eq!(
            system.memory.materialized_block_count(),
            before,
            "the retried read must be served by the snoop, not by memory"
        );

        let idx0 = system.caches[0].find_line(0x10).unwrap();
        let idx1 = system.caches[1].find_line(0x10).unwrap();
        assert_eq!(
            system.caches[0].lines()[idx0].state,
            crate::memory_cache::MesiState::Shared
        );
        assert_eq!(
            system.caches[1].lines()[idx1].state,
            crate::memory_cache::MesiState::Shared
        );
    }

    #[test]
    fn all_finished_after_traces_exhausted() {
        let p1 = trace_file("f1", &["NOP"]);
        let p2 = trace_file("f2", &["NOP"]);
        let config = Config {
            trace_paths: vec![p1, p2],
            ..Config::default()
        };
        let mut system = System::new(&config).unwrap();
        assert!(!system.is_finished());
        system.step().unwrap();
        system.step().unwrap();
        assert!(system.is_finished());
    }
}
