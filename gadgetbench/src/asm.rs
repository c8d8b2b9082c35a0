//! A64 code generation for the measured loop.

use dynasmrt::{
    dynasm,
    DynasmApi,
    DynasmLabelApi,
    AssemblyOffset,
    DynamicLabel,
    VecAssembler,
};
use dynasmrt::aarch64::Aarch64Relocation;
use yaxpeax_arch::{ Decoder, U8Reader };
use yaxpeax_arm::armv8::a64::InstDecoder;

use crate::counter::InlineCounter;
use crate::error::{ HarnessError, Result };
use crate::exec::Sampling;
use crate::ir::{ GadgetProgram, Op, OperandSet, Reg };

/// Instructions the assembler has no syntax for.
pub mod sys {
    use crate::ir::Reg;

    /// `isb`
    pub const ISB: u32 = 0xd503_3fdf;

    /// `mrs <rt>, pmccntr_el0`
    pub fn mrs_pmccntr(rt: Reg) -> u32 {
        0xd53b_9d00 | rt.num() as u32
    }
}

/// Holds the start sample across the loop when sampling inline.
const STAMP_START: Reg = Reg::X9;
/// Holds the end sample when sampling inline.
const STAMP_END: Reg = Reg::X10;

/// A validated gadget loop, ready to be emitted.
///
/// Binary Interface
/// ================
///
/// The emitted code is a function `extern "C" fn(iters, ctx, sample,
/// gpr_out)` (see [crate::exec::jit::LoopFn]):
///
/// - `x19`-`x28` are saved in a 128-byte frame
/// - `x28` takes the iteration count
/// - every gadget register is written with its initial operand value
/// - the start sample is taken
/// - the loop runs the gadget, then `subs x28, x28, #1; b.ne <loop>`
/// - the end sample is taken
/// - the gadget registers are stored to `gpr_out` (see [crate::GprState])
///
/// With [Sampling::Call], each sample is a call to `sample(ctx)`. Gadget
/// registers are callee-saved, so the operands survive the first call.
///
/// With [Sampling::Inline], each sample is `isb; mrs` into `x9` (start)
/// and `x10` (end), and nothing else sits between the two reads and the
/// loop. Both values are stored to `ctx` (a `[u64; 2]`) after the end
/// sample, and `sample` is never called. Raw gadget words must leave `x9`
/// alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopLayout {
    program: GadgetProgram,
    operands: OperandSet,
    sampling: Sampling,
}

/// Where the parts of an emitted loop were placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopOffsets {
    pub entry: AssemblyOffset,
    /// First instruction of the loop body
    pub loop_start: AssemblyOffset,
    /// First instruction after the closing `b.ne`
    pub loop_end: AssemblyOffset,
}

impl LoopLayout {
    pub fn build(program: &GadgetProgram, operands: &OperandSet,
        sampling: Sampling) -> Result<Self>
    {
        program.validate()?;
        operands.validate()?;
        Ok(Self {
            program: program.clone(),
            operands: operands.clone(),
            sampling,
        })
    }

    pub fn program(&self) -> &GadgetProgram { &self.program }
    pub fn sampling(&self) -> Sampling { self.sampling }

    /// Assemble into plain bytes. Nothing is executed, so this works on
    /// any host.
    pub fn assemble(&self) -> Result<(Vec<u8>, LoopOffsets)> {
        let mut ops = VecAssembler::<Aarch64Relocation>::new(0);
        let head = ops.new_dynamic_label();
        let offsets = ops.emit_loop(self, head);
        let bytes = ops.take()
            .map_err(|e| HarnessError::invalid(format!("{:?}", e)))?;
        Ok((bytes, offsets))
    }

    /// One line per instruction, with the loop body marked by `>`.
    pub fn listing(&self) -> Result<Vec<String>> {
        let (bytes, offsets) = self.assemble()?;
        let body = offsets.loop_start.0..offsets.loop_end.0;
        let res = bytes.chunks_exact(4).enumerate().map(|(idx, chunk)| {
            let off = idx * 4;
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let mark = if body.contains(&off) { '>' } else { ' ' };
            format!("{:04x}: {:08x} {} {}", off, word, mark, disas_word(word))
        }).collect();
        Ok(res)
    }

    /// Print a listing of the loop.
    pub fn disas(&self) -> Result<()> {
        for line in self.listing()? {
            println!("{}", line);
        }
        Ok(())
    }
}

/// Disassemble a single A64 instruction word.
pub fn disas_word(word: u32) -> String {
    let bytes = word.to_le_bytes();
    let mut reader = U8Reader::new(&bytes);
    match InstDecoder::default().decode(&mut reader) {
        Ok(inst) => inst.to_string(),
        Err(_) => format!(".inst 0x{:08x}", word),
    }
}

/// Utility functions you might want on an A64 assembler.
pub trait Emitter: DynasmLabelApi<Relocation=Aarch64Relocation> {
    fn place_dynamic_label(&mut self, lab: DynamicLabel) {
        dynasm!(self ; .arch aarch64 ; =>lab);
    }

    fn emit_op(&mut self, op: &Op) {
        match *op {
            Op::Nop => dynasm!(self ; .arch aarch64 ; nop),
            Op::Add { rd, rn, rm } => dynasm!(self
                ; .arch aarch64
                ; add X(rd.num() as u32), X(rn.num() as u32), X(rm.num() as u32)
            ),
            Op::Sub { rd, rn, rm } => dynasm!(self
                ; .arch aarch64
                ; sub X(rd.num() as u32), X(rn.num() as u32), X(rm.num() as u32)
            ),
            Op::Mul { rd, rn, rm } => dynasm!(self
                ; .arch aarch64
                ; mul X(rd.num() as u32), X(rn.num() as u32), X(rm.num() as u32)
            ),
            Op::Udiv { rd, rn, rm } => dynasm!(self
                ; .arch aarch64
                ; udiv X(rd.num() as u32), X(rn.num() as u32), X(rm.num() as u32)
            ),
            Op::Sdiv { rd, rn, rm } => dynasm!(self
                ; .arch aarch64
                ; sdiv X(rd.num() as u32), X(rn.num() as u32), X(rm.num() as u32)
            ),
            Op::Raw(word) => self.push_u32(word),
        }
    }

    fn emit_movz(&mut self, rd: Reg, imm16: u16, shift: u32) {
        let (r, imm) = (rd.num() as u32, imm16 as u32);
        match shift {
            0  => dynasm!(self ; .arch aarch64 ; movz X(r), imm),
            16 => dynasm!(self ; .arch aarch64 ; movz X(r), imm, lsl #16),
            32 => dynasm!(self ; .arch aarch64 ; movz X(r), imm, lsl #32),
            48 => dynasm!(self ; .arch aarch64 ; movz X(r), imm, lsl #48),
            _ => unreachable!("invalid movz shift {}", shift),
        }
    }

    fn emit_movk(&mut self, rd: Reg, imm16: u16, shift: u32) {
        let (r, imm) = (rd.num() as u32, imm16 as u32);
        match shift {
            0  => dynasm!(self ; .arch aarch64 ; movk X(r), imm),
            16 => dynasm!(self ; .arch aarch64 ; movk X(r), imm, lsl #16),
            32 => dynasm!(self ; .arch aarch64 ; movk X(r), imm, lsl #32),
            48 => dynasm!(self ; .arch aarch64 ; movk X(r), imm, lsl #48),
            _ => unreachable!("invalid movk shift {}", shift),
        }
    }

    /// Materialize a 64-bit constant with the shortest `movz`/`movk`
    /// sequence.
    fn emit_mov_imm(&mut self, rd: Reg, value: u64) {
        let mut first = true;
        for shift in [0u32, 16, 32, 48] {
            let imm16 = ((value >> shift) & 0xffff) as u16;
            if imm16 == 0 {
                continue;
            }
            if first {
                self.emit_movz(rd, imm16, shift);
                first = false;
            } else {
                self.emit_movk(rd, imm16, shift);
            }
        }
        if first {
            self.emit_movz(rd, 0, 0);
        }
    }

    /// Read an inline counter into `rt` once all prior instructions have
    /// completed.
    fn emit_inline_read(&mut self, counter: InlineCounter, rt: Reg) {
        match counter {
            InlineCounter::Pmccntr => {
                self.push_u32(sys::ISB);
                self.push_u32(sys::mrs_pmccntr(rt));
            },
        }
    }

    fn emit_sample(&mut self, sampling: Sampling, rt: Reg) {
        match sampling {
            Sampling::Call => dynasm!(self
                ; .arch aarch64
                ; ldp x0, x16, [sp, #96]
                ; blr x16
            ),
            Sampling::Inline(counter) => self.emit_inline_read(counter, rt),
        }
    }

    /// Emit a [LoopLayout]. `head` must be a fresh label; it marks the
    /// top of the loop.
    fn emit_loop(&mut self, layout: &LoopLayout, head: DynamicLabel)
        -> LoopOffsets
    {
        let entry = self.offset();
        dynasm!(self
            ; .arch aarch64
            ; stp x29, x30, [sp, #-128]!
            ; add x29, sp, #0
            ; stp x19, x20, [sp, #16]
            ; stp x21, x22, [sp, #32]
            ; stp x23, x24, [sp, #48]
            ; stp x25, x26, [sp, #64]
            ; stp x27, x28, [sp, #80]
            ; stp x1, x2, [sp, #96]
            ; str x3, [sp, #112]
            ; mov x28, x0
        );

        for reg in Reg::GADGET {
            self.emit_mov_imm(reg, layout.operands.initial(reg));
        }
        self.emit_sample(layout.sampling, STAMP_START);

        let loop_start = self.offset();
        self.place_dynamic_label(head);
        for op in layout.program.ops() {
            self.emit_op(op);
        }
        dynasm!(self
            ; .arch aarch64
            ; subs x28, x28, #1
            ; b.ne =>head
        );
        let loop_end = self.offset();

        self.emit_sample(layout.sampling, STAMP_END);
        if let Sampling::Inline(_) = layout.sampling {
            dynasm!(self
                ; .arch aarch64
                ; ldr x16, [sp, #96]
                ; stp x9, x10, [x16]
            );
        }

        dynasm!(self
            ; .arch aarch64
            ; ldr x16, [sp, #112]
            ; stp x19, x20, [x16]
            ; stp x21, x22, [x16, #16]
            ; stp x23, x24, [x16, #32]
            ; stp x25, x26, [x16, #48]
            ; str x27, [x16, #64]
            ; ldp x19, x20, [sp, #16]
            ; ldp x21, x22, [sp, #32]
            ; ldp x23, x24, [sp, #48]
            ; ldp x25, x26, [sp, #64]
            ; ldp x27, x28, [sp, #80]
            ; ldp x29, x30, [sp], #128
            ; ret
        );

        LoopOffsets { entry, loop_start, loop_end }
    }
}
impl <T: DynasmLabelApi<Relocation=Aarch64Relocation>> Emitter for T {}

#[cfg(test)]
mod test {
    use super::*;

    const BLR_X16: u32 = 0xd63f_0200;
    const RET: u32 = 0xd65f_03c0;

    fn to_words(bytes: &[u8]) -> Vec<u32> {
        bytes.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn assemble(f: impl FnOnce(&mut VecAssembler<Aarch64Relocation>)) -> Vec<u32> {
        let mut ops = VecAssembler::<Aarch64Relocation>::new(0);
        f(&mut ops);
        to_words(&ops.take().unwrap())
    }

    fn reg(n: u8) -> Reg { Reg::new(n).unwrap() }

    fn udiv_program() -> GadgetProgram {
        GadgetProgram::new("udiv", vec![
            Op::Udiv { rd: Reg::X20, rn: Reg::X21, rm: Reg::X22 },
        ])
    }

    #[test]
    fn known_encodings() {
        let words = assemble(|ops| {
            ops.emit_op(&Op::Nop);
            ops.emit_op(&Op::Udiv { rd: reg(6), rn: reg(7), rm: reg(8) });
            ops.emit_op(&Op::Add { rd: reg(0), rn: reg(1), rm: reg(2) });
            ops.emit_op(&Op::Mul { rd: reg(0), rn: reg(1), rm: reg(2) });
            ops.emit_movz(reg(0), 0x1234, 0);
            ops.emit_op(&Op::Raw(0xdead_beef));
        });
        assert_eq!(words, vec![
            0xd503_201f,
            0x9ac8_08e6,
            0x8b02_0020,
            0x9b02_7c20,
            0xd282_4680,
            0xdead_beef,
        ]);
        assert_eq!(sys::mrs_pmccntr(Reg::X0), 0xd53b_9d00);
    }

    #[test]
    fn materialize_uses_fewest_words() {
        let x = Reg::X21;
        assert_eq!(assemble(|ops| ops.emit_mov_imm(x, 0)), vec![0xd280_0015]);
        assert_eq!(
            assemble(|ops| ops.emit_mov_imm(x, 0xff00_0000_0000_0000)),
            vec![0xd2ff_e015]
        );
        assert_eq!(
            assemble(|ops| ops.emit_mov_imm(x, 0x0000_5678_1234_5678)),
            vec![0xd28a_cf15, 0xf2a2_4695, 0xf2ca_cf15]
        );
    }

    #[test]
    fn loop_body_is_gadget_plus_control() {
        let layout = LoopLayout::build(&udiv_program(), &OperandSet::new(),
            Sampling::Call).unwrap();
        let (bytes, offsets) = layout.assemble().unwrap();
        let words = to_words(&bytes);
        let (start, end) = (offsets.loop_start.0 / 4, offsets.loop_end.0 / 4);
        assert_eq!(offsets.entry.0, 0);
        assert_eq!(&words[start..end], &[
            0x9ad6_0ab4, // udiv x20, x21, x22
            0xf100_079c, // subs x28, x28, #1
            0x54ff_ffc1, // b.ne .-8
        ]);

        // Each sample is `ldp x0, x16, [sp, #96]; blr x16`
        assert_eq!(&words[start - 2..start], &[0xa946_43e0, BLR_X16]);
        assert_eq!(&words[end..end + 2], &[0xa946_43e0, BLR_X16]);
        assert_eq!(words.last(), Some(&RET));
    }

    #[test]
    fn inline_reads_hug_the_loop() {
        let layout = LoopLayout::build(&udiv_program(), &OperandSet::new(),
            Sampling::Inline(InlineCounter::Pmccntr)).unwrap();
        let (bytes, offsets) = layout.assemble().unwrap();
        let words = to_words(&bytes);
        let (start, end) = (offsets.loop_start.0 / 4, offsets.loop_end.0 / 4);

        assert_eq!(&words[start - 2..start], &[sys::ISB, sys::mrs_pmccntr(Reg::X9)]);
        assert_eq!(&words[end..end + 2], &[sys::ISB, sys::mrs_pmccntr(Reg::X10)]);
        assert!(!words.contains(&BLR_X16));
        assert_eq!(words.last(), Some(&RET));
    }

    #[test]
    fn operands_are_set_before_the_loop_only() {
        let ops = OperandSet::new().set(Reg::X21, 0x1000).set(Reg::X22, 3);
        let layout = LoopLayout::build(&GadgetProgram::new("nop", vec![Op::Nop]),
            &ops, Sampling::Call).unwrap();
        let (bytes, offsets) = layout.assemble().unwrap();
        let words = to_words(&bytes);
        let init = 0xd282_0015; // movz x21, #0x1000
        let pos = words.iter().position(|w| *w == init).unwrap();
        assert!(pos < offsets.loop_start.0 / 4);
        assert_eq!(words.iter().filter(|w| **w == init).count(), 1);
    }

    #[test]
    fn rejects_unencodable_programs() {
        let prog = GadgetProgram::new("bad", vec![
            Op::Add { rd: Reg::X0, rn: Reg::X21, rm: Reg::X22 },
        ]);
        assert!(LoopLayout::build(&prog, &OperandSet::new(), Sampling::Call).is_err());
        let prog = GadgetProgram::new("nop", vec![Op::Nop]);
        let ops = OperandSet::new().set(Reg::X28, 1);
        assert!(LoopLayout::build(&prog, &ops, Sampling::Call).is_err());
    }

    #[test]
    fn listing_marks_the_loop() {
        let layout = LoopLayout::build(&udiv_program(), &OperandSet::new(),
            Sampling::Call).unwrap();
        let lines = layout.listing().unwrap();
        let body: Vec<&String> = lines.iter().filter(|l| l.contains(" > ")).collect();
        assert_eq!(body.len(), 3);
        assert!(body[0].contains("udiv"));
        assert!(disas_word(0x9ac8_08e6).starts_with("udiv"));
    }
}
