//! Cycle counter sources.
//!
//! Everything processor-specific about counting cycles sits behind
//! [CycleCounter]. Porting the harness to another processor family means
//! writing another implementation of it.

pub mod mock;
pub mod perf;
pub mod pmccntr;

pub use mock::*;
pub use perf::PerfCycles;
pub use pmccntr::Pmccntr;

use crate::error::Result;

/// A free-running cycle counter.
pub trait CycleCounter {
    /// Start the counter (or record a baseline).
    ///
    /// Fails with [crate::HarnessError::UnsupportedPlatform] when this
    /// process cannot access the counter.
    fn enable(&mut self) -> Result<()>;

    /// Return the current counter value.
    fn read(&mut self) -> Result<u64>;

    /// An instruction sequence which reads this counter, if it can be read
    /// directly by emitted code.
    ///
    /// Executors which emit native code place these reads right next to
    /// the loop instead of calling [CycleCounter::read].
    fn inline_read(&self) -> Option<InlineCounter> { None }
}

impl <C: CycleCounter + ?Sized> CycleCounter for Box<C> {
    fn enable(&mut self) -> Result<()> { (**self).enable() }
    fn read(&mut self) -> Result<u64> { (**self).read() }
    fn inline_read(&self) -> Option<InlineCounter> { (**self).inline_read() }
}

/// Counters readable from userspace with `isb; mrs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InlineCounter {
    /// `PMCCNTR_EL0`
    Pmccntr,
}

/// Hardware counter sources selectable from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum CounterBackend {
    /// `PMCCNTR_EL0`, read directly from userspace
    Pmccntr,
    /// The `perf` hardware cycles event
    Perf,
}
impl CounterBackend {
    pub fn build(&self) -> Box<dyn CycleCounter> {
        match self {
            Self::Pmccntr => Box::new(Pmccntr::new()),
            Self::Perf => Box::new(PerfCycles::new()),
        }
    }
}
