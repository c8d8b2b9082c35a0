//! Deterministic counters for simulation and tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::counter::CycleCounter;
use crate::error::{ HarnessError, Result };

/// A shared cycle count advanced by a simulated processor.
///
/// Clones share the same underlying count.
#[derive(Clone, Debug, Default)]
pub struct SimClock(Rc<Cell<u64>>);
impl SimClock {
    pub fn new() -> Self { Self::default() }

    /// Advance the clock by `cycles`.
    pub fn tick(&self, cycles: u64) {
        self.0.set(self.0.get().wrapping_add(cycles));
    }

    pub fn now(&self) -> u64 { self.0.get() }
}

/// Reads a [SimClock].
#[derive(Clone, Debug)]
pub struct ClockCounter {
    clock: SimClock,
}
impl ClockCounter {
    pub fn new(clock: SimClock) -> Self { Self { clock } }
}
impl CycleCounter for ClockCounter {
    fn enable(&mut self) -> Result<()> { Ok(()) }
    fn read(&mut self) -> Result<u64> { Ok(self.clock.now()) }
}

/// Returns a fixed sequence of values, one per read.
///
/// Once the sequence runs out, the last value is repeated.
#[derive(Clone, Debug)]
pub struct SequenceCounter {
    values: VecDeque<u64>,
    last: u64,
    denied: bool,
    reads: usize,
}
impl SequenceCounter {
    pub fn new(values: impl IntoIterator<Item=u64>) -> Self {
        Self {
            values: values.into_iter().collect(),
            last: 0,
            denied: false,
            reads: 0,
        }
    }

    /// A counter whose `enable()` always fails, like an environment where
    /// userspace access was never granted.
    pub fn denied() -> Self {
        Self { denied: true, ..Self::new([]) }
    }

    /// Number of reads performed so far.
    pub fn reads(&self) -> usize { self.reads }
}
impl CycleCounter for SequenceCounter {
    fn enable(&mut self) -> Result<()> {
        if self.denied {
            return Err(HarnessError::unsupported("access denied (mock)"));
        }
        Ok(())
    }

    fn read(&mut self) -> Result<u64> {
        self.reads += 1;
        if let Some(v) = self.values.pop_front() {
            self.last = v;
        }
        Ok(self.last)
    }
}
