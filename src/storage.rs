//! Storage cells: where a node's computed value currently lives.

use crate::abi::OperandSize;
use crate::error::Result;
use crate::isa::reg::Reg;
use crate::tree::ExpressionTree;

/// A tagged value describing where a node's result currently resides.
///
/// `Direct` and `Indirect` both name a register that the register file is
/// tracking a reservation for (the base register, in the `Indirect` case);
/// `Immediate` names none. See invariant #4 in the spec's testable
/// properties: the number of live `StorageCell`s naming register `R` must
/// equal `R`'s reservation refcount in the register file.
#[derive(Copy, Clone, Debug)]
pub(crate) enum StorageCell {
    /// The value lives in `Reg`.
    Direct(Reg),
    /// The value lives at `[base + displacement]`.
    Indirect(Reg, i32),
    /// The value is a compile-time constant, not yet realized in a register.
    Immediate(i64),
}

impl StorageCell {
    /// Force materialization into a register.
    ///
    /// When `preserve_address` is true the storage is known to describe an
    /// *address* (e.g. the collapsed base of a `FieldPointer`): the base
    /// register is kept and, if there's a nonzero displacement, an
    /// immediate `add` folds it in, so the register keeps meaning "pointer
    /// value" rather than becoming "pointed-to value". When false, an
    /// `Indirect` storage is loaded: a fresh register is reserved, the value
    /// at `[base + displacement]` is loaded into it, and the base register
    /// is released since nothing still needs the address.
    pub(crate) fn to_direct(
        self,
        tree: &mut ExpressionTree<'_>,
        size: OperandSize,
        preserve_address: bool,
    ) -> Result<StorageCell> {
        Ok(match self {
            StorageCell::Direct(_) => self,
            StorageCell::Indirect(base, disp) => {
                if preserve_address {
                    if disp != 0 {
                        tree.asm_mut().emit_add_imm(base, disp as i64);
                    }
                    StorageCell::Direct(base)
                } else {
                    let dst = tree.reserve_register()?;
                    tree.asm_mut().emit_load(dst, base, disp, size);
                    tree.release_register(base);
                    StorageCell::Direct(dst)
                }
            }
            StorageCell::Immediate(value) => {
                let dst = tree.reserve_register()?;
                tree.asm_mut().emit_mov_imm(dst, value);
                StorageCell::Direct(dst)
            }
        })
    }

    /// The register this storage currently keeps reserved, if any.
    pub(crate) fn register(&self) -> Option<Reg> {
        match self {
            StorageCell::Direct(r) | StorageCell::Indirect(r, _) => Some(*r),
            StorageCell::Immediate(_) => None,
        }
    }
}
