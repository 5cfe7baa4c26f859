//! The instruction emitter: the external collaborator that turns opcode +
//! operand shape into bytes in a buffer. Adapted from `winch-codegen`'s own
//! `isa::x64::asm::Assembler` -- a thin struct wrapping a machine-code
//! buffer -- but built over `dynasmrt`/`dynasm` (the assembler family the
//! pack's `lightbeam` JIT depends on) instead of `cranelift-codegen`'s
//! `MachBuffer`, since this crate has no use for a full instruction-selection
//! backend, just the handful of forms the core actually emits.

use crate::abi::OperandSize;
use crate::isa::reg::Reg;
use dynasmrt::{dynasm, x64::Assembler as DynasmAssembler, DynasmApi, DynasmLabelApi};
use dynasmrt::{DynamicLabel, ExecutableBuffer};

/// A label, either bound to a known offset already emitted or still pending.
#[derive(Copy, Clone)]
pub(crate) struct Label(DynamicLabel);

/// The condition-code flavors the core needs: equality and the four
/// signed/unsigned ordering comparisons named in the opcode set.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Cc {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
}

pub(crate) struct Assembler {
    ops: DynasmAssembler,
}

impl Assembler {
    pub(crate) fn new() -> Self {
        Self {
            ops: DynasmAssembler::new().expect("failed to allocate JIT buffer"),
        }
    }

    pub(crate) fn allocate_label(&mut self) -> Label {
        Label(self.ops.new_dynamic_label())
    }

    pub(crate) fn place_label(&mut self, label: Label) {
        dynasm!(self.ops ; => label.0);
    }

    pub(crate) fn prologue(&mut self, frame_size: u32, callee_saved: &[Reg]) {
        dynasm!(self.ops
            ; .arch x64
            ; push rbp
            ; mov rbp, rsp
        );
        for r in callee_saved {
            let enc = r.hw_enc();
            dynasm!(self.ops ; push Rq(enc));
        }
        if frame_size > 0 {
            dynasm!(self.ops ; sub rsp, frame_size as i32);
        }
    }

    pub(crate) fn epilogue(&mut self, start_of_epilogue: Label, frame_size: u32, callee_saved: &[Reg]) {
        self.place_label(start_of_epilogue);
        if frame_size > 0 {
            dynasm!(self.ops ; add rsp, frame_size as i32);
        }
        for r in callee_saved.iter().rev() {
            let enc = r.hw_enc();
            dynasm!(self.ops ; pop Rq(enc));
        }
        dynasm!(self.ops
            ; pop rbp
            ; ret
        );
    }

    pub(crate) fn emit_mov_imm(&mut self, dst: Reg, value: i64) {
        let d = dst.hw_enc();
        dynasm!(self.ops ; mov Rq(d), QWORD value);
    }

    pub(crate) fn emit_mov_reg(&mut self, dst: Reg, src: Reg, size: OperandSize) {
        if dst.hw_enc() == src.hw_enc() {
            return;
        }
        let (d, s) = (dst.hw_enc(), src.hw_enc());
        match size {
            OperandSize::S64 => dynasm!(self.ops ; mov Rq(d), Rq(s)),
            OperandSize::S32 => dynasm!(self.ops ; mov Rd(d), Rd(s)),
        }
    }

    pub(crate) fn emit_store(&mut self, base: Reg, disp: i32, src: Reg, size: OperandSize) {
        let (b, s) = (base.hw_enc(), src.hw_enc());
        match size {
            OperandSize::S64 => dynasm!(self.ops ; mov [Rq(b) + disp], Rq(s)),
            OperandSize::S32 => dynasm!(self.ops ; mov [Rq(b) + disp], Rd(s)),
        }
    }

    pub(crate) fn emit_store_imm(&mut self, base: Reg, disp: i32, value: i32, size: OperandSize) {
        let b = base.hw_enc();
        match size {
            OperandSize::S64 => dynasm!(self.ops ; mov QWORD [Rq(b) + disp], value),
            OperandSize::S32 => dynasm!(self.ops ; mov DWORD [Rq(b) + disp], value),
        }
    }

    pub(crate) fn emit_load(&mut self, dst: Reg, base: Reg, disp: i32, size: OperandSize) {
        let (d, b) = (dst.hw_enc(), base.hw_enc());
        match size {
            OperandSize::S64 => dynasm!(self.ops ; mov Rq(d), [Rq(b) + disp]),
            OperandSize::S32 => dynasm!(self.ops ; mov Rd(d), [Rq(b) + disp]),
        }
    }

    pub(crate) fn emit_binop_rr(&mut self, op: BinOp, dst: Reg, src: Reg, size: OperandSize) {
        let (d, s) = (dst.hw_enc(), src.hw_enc());
        match (op, size) {
            (BinOp::Add, OperandSize::S64) => dynasm!(self.ops ; add Rq(d), Rq(s)),
            (BinOp::Add, OperandSize::S32) => dynasm!(self.ops ; add Rd(d), Rd(s)),
            (BinOp::Sub, OperandSize::S64) => dynasm!(self.ops ; sub Rq(d), Rq(s)),
            (BinOp::Sub, OperandSize::S32) => dynasm!(self.ops ; sub Rd(d), Rd(s)),
            (BinOp::Mul, OperandSize::S64) => dynasm!(self.ops ; imul Rq(d), Rq(s)),
            (BinOp::Mul, OperandSize::S32) => dynasm!(self.ops ; imul Rd(d), Rd(s)),
        }
    }

    pub(crate) fn emit_binop_rm(&mut self, op: BinOp, dst: Reg, base: Reg, disp: i32, size: OperandSize) {
        let (d, b) = (dst.hw_enc(), base.hw_enc());
        match (op, size) {
            (BinOp::Add, OperandSize::S64) => dynasm!(self.ops ; add Rq(d), [Rq(b) + disp]),
            (BinOp::Add, OperandSize::S32) => dynasm!(self.ops ; add Rd(d), [Rq(b) + disp]),
            (BinOp::Sub, OperandSize::S64) => dynasm!(self.ops ; sub Rq(d), [Rq(b) + disp]),
            (BinOp::Sub, OperandSize::S32) => dynasm!(self.ops ; sub Rd(d), [Rq(b) + disp]),
            (BinOp::Mul, OperandSize::S64) => dynasm!(self.ops ; imul Rq(d), [Rq(b) + disp]),
            (BinOp::Mul, OperandSize::S32) => dynasm!(self.ops ; imul Rd(d), [Rq(b) + disp]),
        }
    }

    pub(crate) fn emit_binop_ri(&mut self, op: BinOp, dst: Reg, imm: i32, size: OperandSize) {
        let d = dst.hw_enc();
        match (op, size) {
            (BinOp::Add, OperandSize::S64) => dynasm!(self.ops ; add Rq(d), imm),
            (BinOp::Add, OperandSize::S32) => dynasm!(self.ops ; add Rd(d), imm),
            (BinOp::Sub, OperandSize::S64) => dynasm!(self.ops ; sub Rq(d), imm),
            (BinOp::Sub, OperandSize::S32) => dynasm!(self.ops ; sub Rd(d), imm),
            (BinOp::Mul, OperandSize::S64) => dynasm!(self.ops ; imul Rq(d), Rq(d), imm),
            (BinOp::Mul, OperandSize::S32) => dynasm!(self.ops ; imul Rd(d), Rd(d), imm),
        }
    }

    /// Emit an immediate `add` into `dst`, used to fold a collapsed
    /// `FieldPointer` offset into an address register.
    pub(crate) fn emit_add_imm(&mut self, dst: Reg, imm: i64) {
        let d = dst.hw_enc();
        dynasm!(self.ops ; add Rq(d), imm as i32);
    }

    pub(crate) fn emit_cmp_rr(&mut self, lhs: Reg, rhs: Reg, size: OperandSize) {
        let (l, r) = (lhs.hw_enc(), rhs.hw_enc());
        match size {
            OperandSize::S64 => dynasm!(self.ops ; cmp Rq(l), Rq(r)),
            OperandSize::S32 => dynasm!(self.ops ; cmp Rd(l), Rd(r)),
        }
    }

    pub(crate) fn emit_cmp_ri(&mut self, lhs: Reg, imm: i32, size: OperandSize) {
        let l = lhs.hw_enc();
        match size {
            OperandSize::S64 => dynasm!(self.ops ; cmp Rq(l), imm),
            OperandSize::S32 => dynasm!(self.ops ; cmp Rd(l), imm),
        }
    }

    pub(crate) fn emit_cmp_rm(&mut self, lhs: Reg, base: Reg, disp: i32, size: OperandSize) {
        let (l, b) = (lhs.hw_enc(), base.hw_enc());
        match size {
            OperandSize::S64 => dynasm!(self.ops ; cmp Rq(l), [Rq(b) + disp]),
            OperandSize::S32 => dynasm!(self.ops ; cmp Rd(l), [Rq(b) + disp]),
        }
    }

    pub(crate) fn emit_conditional_jump(&mut self, cc: Cc, label: Label) {
        match cc {
            Cc::Eq => dynasm!(self.ops ; je => label.0),
            Cc::Ne => dynasm!(self.ops ; jne => label.0),
            Cc::LtS => dynasm!(self.ops ; jl => label.0),
            Cc::LtU => dynasm!(self.ops ; jb => label.0),
            Cc::GtS => dynasm!(self.ops ; jg => label.0),
            Cc::GtU => dynasm!(self.ops ; ja => label.0),
            Cc::LeS => dynasm!(self.ops ; jle => label.0),
            Cc::LeU => dynasm!(self.ops ; jbe => label.0),
            Cc::GeS => dynasm!(self.ops ; jge => label.0),
            Cc::GeU => dynasm!(self.ops ; jae => label.0),
        }
    }

    pub(crate) fn emit_unconditional_jump(&mut self, label: Label) {
        dynasm!(self.ops ; jmp => label.0);
    }

    pub(crate) fn finalize(self) -> ExecutableBuffer {
        self.ops.finalize().expect("failed to make JIT buffer executable")
    }
}
