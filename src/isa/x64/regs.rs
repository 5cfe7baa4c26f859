//! Named x86-64 general-purpose registers and the System V register classes
//! the ABI and register allocator care about.

use crate::isa::reg::Reg;
use smallvec::SmallVec;

pub(crate) const fn rax() -> Reg {
    Reg::new(0)
}
pub(crate) const fn rcx() -> Reg {
    Reg::new(1)
}
pub(crate) const fn rdx() -> Reg {
    Reg::new(2)
}
pub(crate) const fn rbx() -> Reg {
    Reg::new(3)
}
pub(crate) const fn rsp() -> Reg {
    Reg::new(4)
}
pub(crate) const fn rbp() -> Reg {
    Reg::new(5)
}
pub(crate) const fn rsi() -> Reg {
    Reg::new(6)
}
pub(crate) const fn rdi() -> Reg {
    Reg::new(7)
}
pub(crate) const fn r8() -> Reg {
    Reg::new(8)
}
pub(crate) const fn r9() -> Reg {
    Reg::new(9)
}
pub(crate) const fn r10() -> Reg {
    Reg::new(10)
}
pub(crate) const fn r11() -> Reg {
    Reg::new(11)
}
pub(crate) const fn r12() -> Reg {
    Reg::new(12)
}
pub(crate) const fn r13() -> Reg {
    Reg::new(13)
}
pub(crate) const fn r14() -> Reg {
    Reg::new(14)
}
pub(crate) const fn r15() -> Reg {
    Reg::new(15)
}

/// The frame-pointer register; never handed out by the register allocator.
pub(crate) const fn frame_base() -> Reg {
    rbp()
}

/// A scratch register reserved for the assembler's own use (e.g. materializing
/// large immediates mid-instruction); never handed out by the allocator.
pub(crate) const fn scratch() -> Reg {
    r10()
}

/// The ABI result register for integer and pointer returns.
pub(crate) const fn result_reg() -> Reg {
    rax()
}

/// The general-purpose registers available to the register allocator for
/// node storage, in allocation-priority order (caller-saved first, since
/// this crate doesn't track per-register dirty bits across calls -- there
/// are no calls in a compiled expression).
pub(crate) fn allocatable() -> SmallVec<[Reg; 14]> {
    SmallVec::from_slice(&[
        rax(),
        rcx(),
        rdx(),
        rsi(),
        rdi(),
        r8(),
        r9(),
        r11(),
        rbx(),
        r12(),
        r13(),
        r14(),
        r15(),
    ])
}

/// Registers that System V requires a callee to preserve. Saved
/// unconditionally in the prologue and restored in the epilogue, rather than
/// tracked for dirtiness -- see DESIGN.md.
pub(crate) fn callee_saved() -> SmallVec<[Reg; 5]> {
    SmallVec::from_slice(&[rbx(), r12(), r13(), r14(), r15()])
}

/// Integer argument registers, in System V order.
pub(crate) const INT_ARG_REGS: [Reg; 6] = [rdi(), rsi(), rdx(), rcx(), r8(), r9()];
