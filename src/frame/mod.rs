//! Stack frame layout: argument slots plus the spill area the register
//! allocator draws on. Adapted from `winch-codegen`'s `frame::Frame`, which
//! computes WebAssembly local slots up front from a locals table; this
//! crate has no locals table, only the parameter nodes constructed against
//! the factory and the spill demand the labeling pass (`ExpressionTree`
//! phase 1) reports for the root before any code-gen happens.

use crate::abi::{align_to, Abi, AbiArg, LocalSlot, OperandSize};
use crate::isa::reg::Reg;
use smallvec::SmallVec;

/// Per-function stack frame: parameter spill slots (one per
/// `Parameter<T>` node, in construction order) followed by a contiguous
/// spill area for the register allocator.
pub(crate) struct Frame {
    /// Slots for each `parameter::<T>()` node, in the order they were
    /// constructed. Every argument -- register or stack-passed -- gets a
    /// slot; register arguments are copied into theirs during the prologue
    /// (see `Frame::spill_incoming_args`), mirroring
    /// `CodeGen::spill_register_arguments` in the teacher.
    pub(crate) arg_slots: SmallVec<[LocalSlot; 8]>,

    /// Size, in bytes, of the register-allocator spill area that follows
    /// the argument slots.
    pub(crate) spill_area_size: u32,

    /// Total size of the locals area (arguments + spill area), aligned per
    /// the ABI's stack-alignment requirement. Does *not* include
    /// `saved_regs_size` -- that space is already carved out by the
    /// prologue's own `push`es, not by the `sub rsp` this size feeds.
    pub(crate) locals_size: u32,

    /// Bytes the prologue's callee-saved-register `push`es already occupy
    /// below the frame base (`[rbp-8]..[rbp-saved_regs_size]`). Every
    /// argument/spill slot offset starts past this region so neither
    /// clobbers the saved registers the epilogue later `pop`s back.
    saved_regs_size: u32,
}

impl Frame {
    /// Build a frame for `arg_sizes` (one entry per parameter node, in
    /// construction order) given `spill_slots_needed` computed from the
    /// Sethi-Ullman number of the root (see `ExpressionTree::finalize`).
    pub(crate) fn new<A: Abi>(arg_sizes: &[OperandSize], spill_slots_needed: u32) -> Self {
        let word = A::word_bytes();
        // The prologue (`Assembler::prologue`) pushes the callee-saved
        // registers directly below `rbp` before the `sub rsp` that reserves
        // this frame's locals; slot offsets must start past that region or
        // `spill_incoming_args`/`spill_one` would overwrite the saved
        // registers the epilogue restores.
        let saved_regs_size = A::callee_saved().len() as u32 * word;

        let mut next = saved_regs_size;
        let arg_slots: SmallVec<[LocalSlot; 8]> = arg_sizes
            .iter()
            .map(|&size| {
                next = align_to(next, size.bytes()) + size.bytes();
                LocalSlot::new(size, next)
            })
            .collect();

        let spill_area_size = spill_slots_needed * word;
        let locals_size =
            align_to(next + spill_area_size - saved_regs_size, A::stack_align() as u32);

        Self {
            arg_slots,
            spill_area_size,
            locals_size,
            saved_regs_size,
        }
    }

    pub(crate) fn arg_slot(&self, index: usize) -> LocalSlot {
        self.arg_slots[index]
    }

    /// Allocate the next free spill slot inside the reserved spill area.
    /// `cursor` is bytes already handed out; callers own the cursor (the
    /// register allocator) since slots are reused as registers free up.
    pub(crate) fn spill_slot<A: Abi>(&self, cursor: u32) -> LocalSlot {
        let base = self.arg_slots.last().map(|s| s.offset).unwrap_or(self.saved_regs_size);
        LocalSlot::new(OperandSize::S64, base + cursor + A::word_bytes())
    }

    /// Build the `AbiArg` descriptors (register or stack) for `arg_sizes`
    /// given the target's integer argument registers, so the prologue knows
    /// which incoming registers to spill.
    pub(crate) fn abi_args<A: Abi>(arg_sizes: &[OperandSize]) -> SmallVec<[AbiArg; 8]> {
        let mut stack_offset = A::arg_base_offset();
        let mut gpr_index = 0usize;
        arg_sizes
            .iter()
            .map(|&size| match A::int_arg_reg(gpr_index) {
                Some(reg) => {
                    gpr_index += 1;
                    AbiArg::Reg { size, reg }
                }
                None => {
                    let offset = stack_offset;
                    stack_offset += size.bytes();
                    AbiArg::Stack { size, offset }
                }
            })
            .collect()
    }
}

/// Address of a local slot relative to the frame base register.
pub(crate) fn slot_address<A: Abi>(slot: LocalSlot) -> (Reg, i32) {
    (A::frame_base(), -(slot.offset as i32))
}
