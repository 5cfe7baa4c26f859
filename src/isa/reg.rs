//! Register identities, independent of calling convention. Mirrors the
//! `isa::reg::Reg` seam the teacher uses to keep the ABI layer and the
//! assembler agreeing on a single representation of "which register".

use std::fmt;

/// A general-purpose x86-64 register, identified by its ModRM/REX encoding
/// (0 = rax, .. 15 = r15). The crate only ever hands out GPRs: there is no
/// floating-point lowering (see Non-goals).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Reg(pub(crate) u8);

impl Reg {
    pub(crate) const fn new(encoding: u8) -> Self {
        debug_assert!(encoding < 16);
        Reg(encoding)
    }

    /// The raw register encoding, as consumed by the instruction emitter.
    pub(crate) fn hw_enc(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 16] = [
            "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11",
            "r12", "r13", "r14", "r15",
        ];
        write!(f, "%{}", NAMES[self.0 as usize])
    }
}
