//! System V AMD64 ABI details. Adapted from `winch-codegen`'s
//! `isa::x64::abi::X64ABI`: same shape (a zero-sized ABI marker type plus a
//! register-index environment), minus the Windows fastcall and
//! floating-point argument handling this crate has no use for -- there is
//! exactly one calling convention here and no float lowering.

use super::regs;
use crate::abi::Abi;
use crate::isa::reg::Reg;
use smallvec::SmallVec;

#[derive(Default)]
pub(crate) struct X64Abi;

impl Abi for X64Abi {
    fn stack_align() -> u8 {
        16
    }

    fn arg_base_offset() -> u32 {
        // Two 8-byte slots: the return address pushed by `call`, and the
        // saved caller frame pointer pushed by our own prologue.
        16
    }

    fn word_bytes() -> u32 {
        8
    }

    fn int_arg_reg(index: usize) -> Option<Reg> {
        regs::INT_ARG_REGS.get(index).copied()
    }

    fn result_reg() -> Reg {
        regs::result_reg()
    }

    fn frame_base() -> Reg {
        regs::frame_base()
    }

    fn callee_saved() -> SmallVec<[Reg; 5]> {
        regs::callee_saved()
    }
}
