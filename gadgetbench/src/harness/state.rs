//! State associated with the harness.

use std::sync::atomic::{ AtomicBool, Ordering };

use crate::error::{ HarnessError, Result };
use crate::ir::Reg;

/// Lifecycle of the cycle counter within one harness.
///
/// ```text
/// Uninitialized --enable_counter--> Enabled --run_gadget--> Sampled
///                                      ^                       |
///                                      +--read_counter_delta---+
/// ```
///
/// The counter is left running after a delta is read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterState {
    Uninitialized,
    Enabled,
    Sampled { start: u64, end: u64 },
}
impl CounterState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Enabled => "enabled",
            Self::Sampled { .. } => "sampled",
        }
    }
}

/// Whether some run in this process currently holds the hardware counter.
static COUNTER_HELD: AtomicBool = AtomicBool::new(false);

/// Token for exclusive use of the hardware cycle counter.
///
/// The counter is a per-processor resource: enabling or resetting it from
/// one run corrupts any other run in flight on the same core. Hardware
/// counters acquire this in `enable()` and hold it until they are dropped.
#[derive(Debug)]
pub struct CounterLease { _priv: () }
impl CounterLease {
    pub fn acquire() -> Result<Self> {
        match COUNTER_HELD.compare_exchange(
            false, true, Ordering::AcqRel, Ordering::Acquire
        ) {
            Ok(_) => Ok(Self { _priv: () }),
            Err(_) => Err(HarnessError::CounterBusy),
        }
    }

    pub fn is_held() -> bool {
        COUNTER_HELD.load(Ordering::Acquire)
    }
}
impl Drop for CounterLease {
    fn drop(&mut self) {
        COUNTER_HELD.store(false, Ordering::Release);
    }
}

/// Values of the gadget registers (`x19`-`x27`) after a run.
#[repr(C)]
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct GprState(pub [u64; 9]);
impl GprState {
    pub fn new() -> Self { Self([0; 9]) }
    pub fn clear(&mut self) { self.0 = [0; 9]; }
    pub fn as_mut_ptr(&mut self) -> *mut u64 { self.0.as_mut_ptr() }

    /// Returns `None` for registers outside the gadget set.
    pub fn read_gpr(&self, reg: Reg) -> Option<u64> {
        reg.gadget_index().map(|idx| self.0[idx])
    }
}
impl std::fmt::Debug for GprState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GprState")
         .field("x19", &self.0[0])
         .field("x20", &self.0[1])
         .field("x21", &self.0[2])
         .field("x22", &self.0[3])
         .field("x23", &self.0[4])
         .field("x24", &self.0[5])
         .field("x25", &self.0[6])
         .field("x26", &self.0[7])
         .field("x27", &self.0[8])
         .finish()
    }
}
