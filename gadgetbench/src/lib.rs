//! Cycle-accurate micro-benchmarks for short AArch64 instruction gadgets.
//!
//! A gadget (a few instructions) is placed in a tight loop, the loop is run
//! a fixed number of times between two reads of a cycle counter, and the
//! difference is divided by the iteration count.
//!
//! ```no_run
//! use gadgetbench::*;
//!
//! let mut harness = HarnessConfig::default_bcm2711().emit()?;
//! let udiv = UnsignedDivide::default();
//! let cfg = BenchmarkConfig::for_gadget(&udiv)
//!     .operands(udiv.operands(0xff00_0000_0000_0000, 0x1234))
//!     .repetitions(16);
//! let res = harness.measure(&cfg)?;
//! println!("{}", res);
//! # Ok::<(), HarnessError>(())
//! ```

pub mod error;
pub mod ir;
pub mod asm;
pub mod gadget;
pub mod counter;
pub mod exec;
pub mod harness;
pub mod stats;
pub mod util;

pub use crate::error::{ HarnessError, Result };
pub use crate::ir::{ Reg, Op, GadgetProgram, OperandSet, Binding };
pub use crate::gadget::*;
pub use crate::counter::{ CycleCounter, CounterBackend, InlineCounter };
pub use crate::exec::{ Executor, Sampling };
pub use crate::harness::*;
pub use crate::stats::*;
pub use crate::util::*;
