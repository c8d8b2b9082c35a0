//! Executors run a prepared gadget loop.

pub mod jit;
pub mod sim;

pub use jit::JitExecutor;
pub use sim::*;

use crate::counter::InlineCounter;
use crate::error::Result;
use crate::harness::GprState;
use crate::ir::{ GadgetProgram, OperandSet };

/// How a loop samples the cycle counter around its iterations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Sampling {
    /// Call back into the harness, which reads the counter
    #[default]
    Call,
    /// Read the counter in the loop's own code
    Inline(InlineCounter),
}

/// Implemented on types which can run a gadget loop.
pub trait Executor {
    /// Encode `program` and bind `operands`.
    ///
    /// Fails with [crate::HarnessError::InvalidConfig] if the program
    /// can't be run by this executor, or if this executor can't sample
    /// the way `sampling` asks.
    fn prepare(&mut self, program: &GadgetProgram, operands: &OperandSet,
        sampling: Sampling) -> Result<()>;

    /// Run the prepared loop for `iterations` (at least 1) iterations.
    ///
    /// With [Sampling::Call], `sample` is called exactly twice: after the
    /// operands are loaded and immediately before the first iteration,
    /// then immediately after the last iteration. Nothing else happens
    /// between the two calls. The result is `None`.
    ///
    /// With [Sampling::Inline], `sample` is never called and the result
    /// holds the `(start, end)` counter values read by the loop itself.
    fn execute(&mut self, iterations: u64, sample: &mut dyn FnMut())
        -> Result<Option<(u64, u64)>>;

    /// Gadget register values left by the last call to [Executor::execute].
    fn gpr_state(&self) -> GprState;
}

impl <E: Executor + ?Sized> Executor for Box<E> {
    fn prepare(&mut self, program: &GadgetProgram, operands: &OperandSet,
        sampling: Sampling) -> Result<()>
    {
        (**self).prepare(program, operands, sampling)
    }
    fn execute(&mut self, iterations: u64, sample: &mut dyn FnMut())
        -> Result<Option<(u64, u64)>>
    {
        (**self).execute(iterations, sample)
    }
    fn gpr_state(&self) -> GprState { (**self).gpr_state() }
}
