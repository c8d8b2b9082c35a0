//! Native execution of gadget loops assembled at runtime.

use std::ffi::c_void;

use dynasmrt::{ Assembler, AssemblyOffset, ExecutableBuffer };
use dynasmrt::aarch64::Aarch64Relocation;

use crate::asm::{ Emitter, LoopLayout };
use crate::error::{ HarnessError, Result };
use crate::exec::{ Executor, Sampling };
use crate::harness::GprState;
use crate::ir::{ GadgetProgram, OperandSet };

/// Type of the hook called by emitted code to sample the counter.
pub type SampleFn = extern "C" fn(ctx: *mut c_void);

/// Type of an emitted gadget loop (see [LoopLayout] for the interface).
pub type LoopFn = extern "C" fn(
    iters: u64, ctx: *mut c_void, sample: SampleFn, gpr_out: *mut u64
);

/// Forwards a call from emitted code to a Rust closure.
///
/// `ctx` points at a `&mut dyn FnMut()`.
#[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
extern "C" fn sample_trampoline(ctx: *mut c_void) {
    let hook = unsafe { &mut *(ctx as *mut &mut dyn FnMut()) };
    hook();
}

/// Passed as `sample` to loops which read the counter inline.
#[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
extern "C" fn no_sample(_ctx: *mut c_void) {}

/// Assembles gadget loops into executable memory and calls them.
pub struct JitExecutor {
    buf: Option<(ExecutableBuffer, AssemblyOffset)>,
    sampling: Sampling,
    gpr_state: Box<GprState>,
}
impl JitExecutor {
    /// Fails with [HarnessError::UnsupportedPlatform] when not running on
    /// an aarch64 host.
    pub fn new() -> Result<Self> {
        if !cfg!(target_arch = "aarch64") {
            return Err(HarnessError::unsupported(
                "native gadget execution requires an aarch64 host"
            ));
        }
        Ok(Self {
            buf: None,
            sampling: Sampling::Call,
            gpr_state: Box::new(GprState::new()),
        })
    }

    #[cfg(target_arch = "aarch64")]
    fn call(&mut self, iterations: u64, sample: &mut dyn FnMut())
        -> Result<Option<(u64, u64)>>
    {
        let (buf, entry) = self.buf.as_ref().ok_or(HarnessError::OutOfSequence {
            op: "execute a gadget", state: "unprepared"
        })?;
        let loop_fn: LoopFn = unsafe { std::mem::transmute(buf.ptr(*entry)) };
        let gpr_out = self.gpr_state.as_mut_ptr();
        match self.sampling {
            Sampling::Call => {
                let mut hook: &mut dyn FnMut() = sample;
                let ctx = &mut hook as *mut &mut dyn FnMut() as *mut c_void;
                loop_fn(iterations, ctx, sample_trampoline, gpr_out);
                Ok(None)
            },
            Sampling::Inline(_) => {
                let mut stamps = [0u64; 2];
                let ctx = stamps.as_mut_ptr() as *mut c_void;
                loop_fn(iterations, ctx, no_sample, gpr_out);
                Ok(Some((stamps[0], stamps[1])))
            },
        }
    }

    #[cfg(not(target_arch = "aarch64"))]
    fn call(&mut self, _iterations: u64, _sample: &mut dyn FnMut())
        -> Result<Option<(u64, u64)>>
    {
        Err(HarnessError::unsupported(
            "native gadget execution requires an aarch64 host"
        ))
    }
}

impl Executor for JitExecutor {
    fn prepare(&mut self, program: &GadgetProgram, operands: &OperandSet,
        sampling: Sampling) -> Result<()>
    {
        let layout = LoopLayout::build(program, operands, sampling)?;
        let mut ops = Assembler::<Aarch64Relocation>::new().map_err(|e| {
            HarnessError::unsupported(format!("executable memory: {}", e))
        })?;
        let head = ops.new_dynamic_label();
        let offsets = ops.emit_loop(&layout, head);
        let buf = ops.finalize().map_err(|_| {
            HarnessError::invalid("failed to finalize the gadget loop")
        })?;
        tracing::debug!(
            "assembled '{}' ({:?}): {} bytes, loop body {} bytes",
            program.name(), sampling, buf.len(),
            offsets.loop_end.0 - offsets.loop_start.0
        );
        self.buf = Some((buf, offsets.entry));
        self.sampling = sampling;
        Ok(())
    }

    fn execute(&mut self, iterations: u64, sample: &mut dyn FnMut())
        -> Result<Option<(u64, u64)>>
    {
        if iterations == 0 {
            return Err(HarnessError::invalid("iteration count must be >= 1"));
        }
        self.gpr_state.clear();
        self.call(iterations, sample)
    }

    fn gpr_state(&self) -> GprState { *self.gpr_state }
}
