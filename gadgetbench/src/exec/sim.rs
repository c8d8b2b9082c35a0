//! A deterministic software model of gadget execution.
//!
//! The [Simulator] interprets a [GadgetProgram] and advances a [SimClock]
//! by the latency of every op it executes. Paired with a
//! [crate::counter::ClockCounter] it lets the whole harness run (and be
//! tested) on any host.

use crate::counter::SimClock;
use crate::error::{ HarnessError, Result };
use crate::exec::{ Executor, Sampling };
use crate::harness::GprState;
use crate::ir::{ GadgetProgram, Op, OperandSet, Reg };

/// Architectural register state (`x0`-`x30`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegFile([u64; 31]);
impl RegFile {
    pub fn new() -> Self { Self([0; 31]) }

    pub fn read(&self, reg: Reg) -> u64 {
        match reg.num() {
            31 => 0,
            n => self.0[n as usize],
        }
    }

    pub fn write(&mut self, reg: Reg, value: u64) {
        if reg.num() < 31 {
            self.0[reg.num() as usize] = value;
        }
    }

    /// Apply the architectural effect of `op`.
    pub fn step(&mut self, op: &Op) {
        match *op {
            Op::Nop | Op::Raw(_) => {},
            Op::Add { rd, rn, rm } => {
                self.write(rd, self.read(rn).wrapping_add(self.read(rm)))
            },
            Op::Sub { rd, rn, rm } => {
                self.write(rd, self.read(rn).wrapping_sub(self.read(rm)))
            },
            Op::Mul { rd, rn, rm } => {
                self.write(rd, self.read(rn).wrapping_mul(self.read(rm)))
            },
            // Division by zero produces zero on A64.
            Op::Udiv { rd, rn, rm } => {
                let (n, m) = (self.read(rn), self.read(rm));
                self.write(rd, if m == 0 { 0 } else { n / m })
            },
            Op::Sdiv { rd, rn, rm } => {
                let (n, m) = (self.read(rn) as i64, self.read(rm) as i64);
                self.write(rd, if m == 0 { 0 } else { n.wrapping_div(m) as u64 })
            },
        }
    }
}

/// Implemented on types which assign a cycle cost to an op.
///
/// The register file holds the op's inputs, so costs may depend on
/// operand values.
pub trait LatencyModel {
    fn latency(&self, op: &Op, regs: &RegFile) -> u64;
}

/// Every op costs the same number of cycles.
#[derive(Clone, Copy, Debug)]
pub struct UniformLatency(pub u64);
impl LatencyModel for UniformLatency {
    fn latency(&self, _op: &Op, _regs: &RegFile) -> u64 { self.0 }
}

/// Approximate latencies for the Cortex-A72 cores in the BCM2711.
///
/// The integer divider retires about four quotient bits per cycle after a
/// fixed setup cost, which matches measured 7, 13 and 17 cycle divides
/// (see [crate::gadget::DividerOperands]).
#[derive(Clone, Copy, Debug, Default)]
pub struct CortexA72;
impl CortexA72 {
    const DIV_SETUP: u64 = 4;
    const DIV_BITS_PER_CYCLE: u64 = 4;

    pub fn divide_latency(dividend: u64, divisor: u64) -> u64 {
        let quotient = if divisor == 0 { 0 } else { dividend / divisor };
        let bits = (u64::BITS - quotient.leading_zeros()) as u64;
        Self::DIV_SETUP + bits.div_ceil(Self::DIV_BITS_PER_CYCLE)
    }
}
impl LatencyModel for CortexA72 {
    fn latency(&self, op: &Op, regs: &RegFile) -> u64 {
        match *op {
            Op::Nop => 1,
            Op::Add { .. } | Op::Sub { .. } => 1,
            Op::Mul { .. } => 3,
            Op::Udiv { rn, rm, .. } => {
                Self::divide_latency(regs.read(rn), regs.read(rm))
            },
            Op::Sdiv { rn, rm, .. } => Self::divide_latency(
                (regs.read(rn) as i64).unsigned_abs(),
                (regs.read(rm) as i64).unsigned_abs(),
            ),
            Op::Raw(_) => 0,
        }
    }
}

/// Interprets gadget loops against a latency model.
pub struct Simulator<M: LatencyModel = CortexA72> {
    clock: SimClock,
    model: M,
    loop_cycles: u64,
    prepared: Option<(GadgetProgram, OperandSet)>,
    gpr_state: GprState,
}
impl <M: LatencyModel> Simulator<M> {
    pub fn new(clock: SimClock, model: M) -> Self {
        Self {
            clock,
            model,
            loop_cycles: 0,
            prepared: None,
            gpr_state: GprState::new(),
        }
    }

    /// Cycles charged per iteration for the loop control itself.
    pub fn loop_cycles(mut self, cycles: u64) -> Self {
        self.loop_cycles = cycles;
        self
    }
}

impl <M: LatencyModel> Executor for Simulator<M> {
    fn prepare(&mut self, program: &GadgetProgram, operands: &OperandSet,
        sampling: Sampling) -> Result<()>
    {
        if let Sampling::Inline(counter) = sampling {
            return Err(HarnessError::invalid(format!(
                "the simulator cannot read {:?} inline", counter
            )));
        }
        program.validate()?;
        operands.validate()?;
        if let Some(op) = program.ops().iter().find(|op| matches!(op, Op::Raw(_))) {
            return Err(HarnessError::invalid(
                format!("'{}' cannot be simulated", op)
            ));
        }
        self.prepared = Some((program.clone(), operands.clone()));
        Ok(())
    }

    fn execute(&mut self, iterations: u64, sample: &mut dyn FnMut())
        -> Result<Option<(u64, u64)>>
    {
        if iterations == 0 {
            return Err(HarnessError::invalid("iteration count must be >= 1"));
        }
        let (program, operands) = self.prepared.as_ref().ok_or(
            HarnessError::OutOfSequence { op: "execute a gadget", state: "unprepared" }
        )?;

        let mut regs = RegFile::new();
        for reg in Reg::GADGET {
            regs.write(reg, operands.initial(reg));
        }

        sample();
        for _ in 0..iterations {
            for op in program.ops() {
                let cycles = self.model.latency(op, &regs);
                regs.step(op);
                self.clock.tick(cycles);
            }
            self.clock.tick(self.loop_cycles);
        }
        sample();

        for (idx, reg) in Reg::GADGET.iter().enumerate() {
            self.gpr_state.0[idx] = regs.read(*reg);
        }
        Ok(None)
    }

    fn gpr_state(&self) -> GprState { self.gpr_state }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::gadget::DividerOperands;

    #[test]
    fn divider_reference_points() {
        let lat = |d: DividerOperands| {
            let (n, m) = d.values();
            CortexA72::divide_latency(n, m)
        };
        assert_eq!(lat(DividerOperands::Short), 7);
        assert_eq!(lat(DividerOperands::Medium), 13);
        assert_eq!(lat(DividerOperands::Long), 17);
        assert_eq!(CortexA72::divide_latency(1, 2), 4);
        assert_eq!(CortexA72::divide_latency(5, 0), 4);
        assert_eq!(CortexA72::divide_latency(u64::MAX, 1), 20);
    }

    #[test]
    fn regfile_semantics() {
        let mut r = RegFile::new();
        r.write(Reg::X21, 7);
        r.write(Reg::X22, 0);
        r.step(&Op::Udiv { rd: Reg::X20, rn: Reg::X21, rm: Reg::X22 });
        assert_eq!(r.read(Reg::X20), 0);

        r.write(Reg::X21, i64::MIN as u64);
        r.write(Reg::X22, -1i64 as u64);
        r.step(&Op::Sdiv { rd: Reg::X20, rn: Reg::X21, rm: Reg::X22 });
        assert_eq!(r.read(Reg::X20), i64::MIN as u64);

        r.write(Reg::ZR, 5);
        assert_eq!(r.read(Reg::ZR), 0);
    }

    #[test]
    fn rejects_raw_words() {
        let mut sim = Simulator::new(SimClock::new(), CortexA72);
        let prog = GadgetProgram::new("raw", vec![Op::Raw(0xd503_201f)]);
        assert!(matches!(
            sim.prepare(&prog, &OperandSet::new(), Sampling::Call),
            Err(HarnessError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_inline_sampling() {
        use crate::counter::InlineCounter;
        let mut sim = Simulator::new(SimClock::new(), CortexA72);
        let prog = GadgetProgram::new("nop", vec![Op::Nop]);
        assert!(matches!(
            sim.prepare(&prog, &OperandSet::new(),
                Sampling::Inline(InlineCounter::Pmccntr)),
            Err(HarnessError::InvalidConfig(_))
        ));
    }

    #[test]
    fn samples_bracket_the_loop() {
        let clock = SimClock::new();
        let mut sim = Simulator::new(clock.clone(), UniformLatency(2))
            .loop_cycles(1);
        let prog = GadgetProgram::new("nops", vec![Op::Nop, Op::Nop]);
        sim.prepare(&prog, &OperandSet::new(), Sampling::Call).unwrap();

        let mut stamps = Vec::new();
        let inline = sim.execute(10, &mut || stamps.push(clock.now())).unwrap();
        assert_eq!(stamps, vec![0, 10 * (2 * 2 + 1)]);
        assert_eq!(inline, None);
    }
}
