//! Gadgets: the instruction sequences being measured.

use rand::Rng;

use crate::ir::{ Op, OperandSet, Reg };

/// Implemented on types which describe a measurable instruction sequence.
///
/// The harness never looks inside a gadget; it only executes the ops
/// returned by [Gadget::encode] once per iteration.
pub trait Gadget {
    /// A short human-readable name.
    fn name(&self) -> &'static str;

    /// The primitive ops executed once per iteration.
    fn encode(&self) -> Vec<Op>;

    /// Operand values used when the caller doesn't provide any.
    fn default_operands(&self) -> OperandSet { OperandSet::new() }
}

/// Three-register form shared by the arithmetic gadgets.
///
/// Defaults to `x20 <- op(x21, x22)`. The destination is never a source, so
/// every iteration sees identical inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreeReg {
    pub rd: Reg,
    pub rn: Reg,
    pub rm: Reg,
}
impl Default for ThreeReg {
    fn default() -> Self {
        Self { rd: Reg::X20, rn: Reg::X21, rm: Reg::X22 }
    }
}

/// A single `nop`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Nop;
impl Gadget for Nop {
    fn name(&self) -> &'static str { "nop" }
    fn encode(&self) -> Vec<Op> { vec![Op::Nop] }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IntAdd(pub ThreeReg);
impl Gadget for IntAdd {
    fn name(&self) -> &'static str { "add" }
    fn encode(&self) -> Vec<Op> {
        let ThreeReg { rd, rn, rm } = self.0;
        vec![Op::Add { rd, rn, rm }]
    }
    fn default_operands(&self) -> OperandSet {
        OperandSet::new().set(self.0.rn, 1).set(self.0.rm, 2)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IntMul(pub ThreeReg);
impl Gadget for IntMul {
    fn name(&self) -> &'static str { "mul" }
    fn encode(&self) -> Vec<Op> {
        let ThreeReg { rd, rn, rm } = self.0;
        vec![Op::Mul { rd, rn, rm }]
    }
    fn default_operands(&self) -> OperandSet {
        OperandSet::new().set(self.0.rn, 0x1234).set(self.0.rm, 0x5678)
    }
}

/// `udiv rd, rn, rm`.
///
/// The divider's latency depends on the operands (roughly on the number of
/// significant quotient bits), so the operand choice matters as much as
/// the opcode. See [DividerOperands] for some reference points.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnsignedDivide(pub ThreeReg);
impl UnsignedDivide {
    pub fn operands(&self, dividend: u64, divisor: u64) -> OperandSet {
        OperandSet::new().set(self.0.rn, dividend).set(self.0.rm, divisor)
    }
}
impl Gadget for UnsignedDivide {
    fn name(&self) -> &'static str { "udiv" }
    fn encode(&self) -> Vec<Op> {
        let ThreeReg { rd, rn, rm } = self.0;
        vec![Op::Udiv { rd, rn, rm }]
    }
    fn default_operands(&self) -> OperandSet {
        let (n, d) = DividerOperands::Long.values();
        self.operands(n, d)
    }
}

/// `sdiv rd, rn, rm`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignedDivide(pub ThreeReg);
impl Gadget for SignedDivide {
    fn name(&self) -> &'static str { "sdiv" }
    fn encode(&self) -> Vec<Op> {
        let ThreeReg { rd, rn, rm } = self.0;
        vec![Op::Sdiv { rd, rn, rm }]
    }
    fn default_operands(&self) -> OperandSet {
        let (n, d) = DividerOperands::Long.values();
        OperandSet::new().set(self.0.rn, n).set(self.0.rm, d)
    }
}

/// A caller-provided sequence of already-encoded instruction words.
#[derive(Clone, Debug)]
pub struct RawGadget {
    pub words: Vec<u32>,
}
impl Gadget for RawGadget {
    fn name(&self) -> &'static str { "raw" }
    fn encode(&self) -> Vec<Op> {
        self.words.iter().map(|w| Op::Raw(*w)).collect()
    }
}

/// Dividend/divisor pairs with known divider latencies on the BCM2711.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum DividerOperands {
    /// `0x1000 / 0x3` (11 quotient bits, 7 cycles)
    Short,
    /// `0x5678_1234_5678 / 0x1234` (35 quotient bits, 13 cycles)
    Medium,
    /// `0xff00_0000_0000_0000 / 0x1234` (52 quotient bits, 17 cycles)
    Long,
}
impl DividerOperands {
    pub fn values(&self) -> (u64, u64) {
        match self {
            Self::Short  => (0x1000, 0x3),
            Self::Medium => (0x0000_5678_1234_5678, 0x1234),
            Self::Long   => (0xff00_0000_0000_0000, 0x1234),
        }
    }
}

/// A random value with exactly `bits` significant bits (`bits <= 64`).
///
/// Used to sweep divider operands by magnitude.
pub fn random_width(rng: &mut impl Rng, bits: u32) -> u64 {
    match bits {
        0 => 0,
        64.. => rng.gen::<u64>() | (1 << 63),
        _ => (rng.gen::<u64>() & ((1 << bits) - 1)) | (1 << (bits - 1)),
    }
}

/// Symbolic identifiers for the built-in gadgets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum GadgetKind {
    Nop,
    Add,
    Mul,
    Udiv,
    Sdiv,
}
impl GadgetKind {
    pub fn gadget(&self) -> Box<dyn Gadget> {
        match self {
            Self::Nop  => Box::new(Nop),
            Self::Add  => Box::new(IntAdd::default()),
            Self::Mul  => Box::new(IntMul::default()),
            Self::Udiv => Box::new(UnsignedDivide::default()),
            Self::Sdiv => Box::new(SignedDivide::default()),
        }
    }
}
