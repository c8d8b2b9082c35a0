//! Primitive operations making up a gadget program.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{HarnessError, Result};

/// An A64 general-purpose register (`x0` through `x30`).
///
/// Encoding value 31 is the zero register or the stack pointer depending on
/// the instruction; see [Reg::ZR] and [Reg::SP].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(u8);

impl Reg {
    pub const X0: Self  = Self(0);
    pub const X1: Self  = Self(1);
    pub const X2: Self  = Self(2);
    pub const X3: Self  = Self(3);
    pub const X9: Self  = Self(9);
    pub const X10: Self = Self(10);
    pub const X16: Self = Self(16);
    pub const X19: Self = Self(19);
    pub const X20: Self = Self(20);
    pub const X21: Self = Self(21);
    pub const X22: Self = Self(22);
    pub const X23: Self = Self(23);
    pub const X24: Self = Self(24);
    pub const X25: Self = Self(25);
    pub const X26: Self = Self(26);
    pub const X27: Self = Self(27);
    pub const X28: Self = Self(28);
    pub const X29: Self = Self(29);
    pub const X30: Self = Self(30);
    pub const ZR: Self  = Self(31);
    pub const SP: Self  = Self(31);

    /// Registers available to gadgets.
    ///
    /// These are callee-saved under AAPCS64, so their values survive the
    /// calls used to sample the counter around the loop.
    pub const GADGET: [Self; 9] = [
        Self::X19, Self::X20, Self::X21, Self::X22, Self::X23,
        Self::X24, Self::X25, Self::X26, Self::X27,
    ];

    /// Holds the remaining iteration count inside the loop.
    pub const LOOP_COUNTER: Self = Self::X28;

    pub fn new(num: u8) -> Result<Self> {
        if num <= 30 {
            Ok(Self(num))
        } else {
            Err(HarnessError::invalid(format!("x{} is not a register", num)))
        }
    }

    pub const fn num(&self) -> u8 { self.0 }

    pub fn is_gadget_reg(&self) -> bool {
        Self::GADGET.contains(self)
    }

    /// Index of this register in [crate::harness::GprState].
    pub fn gadget_index(&self) -> Option<usize> {
        Self::GADGET.iter().position(|r| r == self)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

impl FromStr for Reg {
    type Err = HarnessError;
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let num = s.strip_prefix('x')
            .or_else(|| s.strip_prefix('X'))
            .and_then(|n| n.parse::<u8>().ok())
            .ok_or_else(|| HarnessError::invalid(
                format!("'{}' is not a register name", s)
            ))?;
        Self::new(num)
    }
}

/// A single primitive operation.
///
/// All arithmetic is 64-bit. [Op::Raw] carries an already-encoded A64
/// instruction word which the harness emits verbatim and cannot inspect:
/// callers are responsible for keeping raw words within the gadget
/// registers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Nop,
    Add  { rd: Reg, rn: Reg, rm: Reg },
    Sub  { rd: Reg, rn: Reg, rm: Reg },
    Mul  { rd: Reg, rn: Reg, rm: Reg },
    Udiv { rd: Reg, rn: Reg, rm: Reg },
    Sdiv { rd: Reg, rn: Reg, rm: Reg },
    Raw(u32),
}

impl Op {
    /// Registers read or written by this operation.
    pub fn regs(&self) -> Vec<Reg> {
        match *self {
            Self::Nop | Self::Raw(_) => Vec::new(),
            Self::Add  { rd, rn, rm } |
            Self::Sub  { rd, rn, rm } |
            Self::Mul  { rd, rn, rm } |
            Self::Udiv { rd, rn, rm } |
            Self::Sdiv { rd, rn, rm } => vec![rd, rn, rm],
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => write!(f, "nop"),
            Self::Add  { rd, rn, rm } => write!(f, "add {}, {}, {}", rd, rn, rm),
            Self::Sub  { rd, rn, rm } => write!(f, "sub {}, {}, {}", rd, rn, rm),
            Self::Mul  { rd, rn, rm } => write!(f, "mul {}, {}, {}", rd, rn, rm),
            Self::Udiv { rd, rn, rm } => write!(f, "udiv {}, {}, {}", rd, rn, rm),
            Self::Sdiv { rd, rn, rm } => write!(f, "sdiv {}, {}, {}", rd, rn, rm),
            Self::Raw(word) => write!(f, ".inst 0x{:08x}", word),
        }
    }
}

/// The instruction sequence executed once per loop iteration.
///
/// The harness treats this as a black box. An empty program is allowed and
/// measures the loop control alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GadgetProgram {
    name: String,
    ops: Vec<Op>,
}

impl GadgetProgram {
    pub fn new(name: impl Into<String>, ops: Vec<Op>) -> Self {
        Self { name: name.into(), ops }
    }

    pub fn from_gadget(gadget: &dyn crate::gadget::Gadget) -> Self {
        Self::new(gadget.name(), gadget.encode())
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn ops(&self) -> &[Op] { &self.ops }
    pub fn len(&self) -> usize { self.ops.len() }
    pub fn is_empty(&self) -> bool { self.ops.is_empty() }

    /// Check that every register operand is a gadget register.
    pub fn validate(&self) -> Result<()> {
        for op in self.ops.iter() {
            if let Some(r) = op.regs().into_iter().find(|r| !r.is_gadget_reg()) {
                return Err(HarnessError::invalid(format!(
                    "'{}' uses {}; gadgets may only use x19-x27", op, r
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for GadgetProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        for op in self.ops.iter() {
            writeln!(f, "  {}", op)?;
        }
        Ok(())
    }
}

/// Initial register values consumed by a gadget.
///
/// These are written once before the start sample and never again, so every
/// iteration observes the same operands. Registers without a binding start
/// at zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperandSet(BTreeMap<Reg, u64>);

impl OperandSet {
    pub fn new() -> Self { Self(BTreeMap::new()) }

    pub fn set(mut self, reg: Reg, value: u64) -> Self {
        self.0.insert(reg, value);
        self
    }

    pub fn insert(&mut self, reg: Reg, value: u64) {
        self.0.insert(reg, value);
    }

    pub fn get(&self, reg: Reg) -> Option<u64> {
        self.0.get(&reg).copied()
    }

    /// Value a register holds when the loop starts.
    pub fn initial(&self, reg: Reg) -> u64 {
        self.get(reg).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item=(Reg, u64)> + '_ {
        self.0.iter().map(|(r, v)| (*r, *v))
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn validate(&self) -> Result<()> {
        match self.0.keys().find(|r| !r.is_gadget_reg()) {
            Some(r) => Err(HarnessError::invalid(format!(
                "operand bound to {}; operands may only use x19-x27", r
            ))),
            None => Ok(()),
        }
    }
}

/// A single `xN=VALUE` binding, as accepted on the command line.
///
/// Values may be decimal or `0x`-prefixed hexadecimal, with optional `_`
/// separators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Binding(pub Reg, pub u64);

impl FromStr for Binding {
    type Err = HarnessError;
    fn from_str(s: &str) -> Result<Self> {
        let (reg, val) = s.split_once('=').ok_or_else(|| {
            HarnessError::invalid(format!("expected xN=VALUE, got '{}'", s))
        })?;
        let reg: Reg = reg.parse()?;
        let val = parse_u64(val)?;
        Ok(Self(reg, val))
    }
}

pub fn parse_u64(s: &str) -> Result<u64> {
    let s = s.trim().replace('_', "");
    let res = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    res.map_err(|_| HarnessError::invalid(format!("'{}' is not a u64", s)))
}
