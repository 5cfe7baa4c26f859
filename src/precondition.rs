//! Execution-precondition statement: `if (cond) { body } else return k`,
//! applied once at the top of the generated function so a cheap guard can
//! bypass the whole expression without forcing an `If` node into the general
//! tree (which would need to pre-evaluate shared subtrees on both arms).
//!
//! A precondition's condition and failure value are evaluated *before* the
//! labeling/code-gen of the main expression (see
//! `ExpressionTree::finalize`), and are type-erased to a bare `OperandSize`
//! here so a `Vec<Precondition>` can hold preconditions built against
//! different scalar types.

use crate::error::Result;
use crate::isa::x64::asm::Cc;
use crate::node::RawNode;
use crate::tree::ExpressionTree;

/// A comparison operator over two same-typed nodes, producing CPU flags
/// rather than a value. Not part of the general node tree (see §3's Binary
/// variant, which covers only add/sub/mul) -- conditions are a separate,
/// lightweight construct used solely by preconditions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CmpOp {
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

impl CmpOp {
    /// The condition code that should jump to `continue` when the
    /// precondition *holds* -- i.e. the same sense as this comparison.
    fn jump_if_true(self) -> Cc {
        match self {
            CmpOp::Eq => Cc::Eq,
            CmpOp::Ne => Cc::Ne,
            CmpOp::LtS => Cc::LtS,
            CmpOp::LtU => Cc::LtU,
            CmpOp::GtS => Cc::GtS,
            CmpOp::GtU => Cc::GtU,
            CmpOp::LeS => Cc::LeS,
            CmpOp::LeU => Cc::LeU,
            CmpOp::GeS => Cc::GeS,
            CmpOp::GeU => Cc::GeU,
        }
    }
}

/// A registered comparison awaiting use as a precondition's guard. Opaque --
/// the only thing a caller can do with one is pass it to
/// [`crate::driver::Compiler::add_precondition`].
pub struct Condition<'a> {
    lhs: &'a RawNode<'a>,
    op: CmpOp,
    rhs: &'a RawNode<'a>,
}

impl<'a> Condition<'a> {
    pub(crate) fn new(lhs: &'a RawNode<'a>, op: CmpOp, rhs: &'a RawNode<'a>) -> Self {
        Self { lhs, op, rhs }
    }

    fn label(&self) {
        self.lhs.label();
        self.rhs.label();
    }

    /// Emit the comparison, leaving CPU flags set. Each operand's register
    /// is only released once that operand itself has no parents left to
    /// read it -- a condition never outlives itself, but its operands may
    /// be shared subtrees still awaited elsewhere (see `claim_register` in
    /// `crate::node` for the same rule applied to binary arithmetic).
    ///
    /// The rhs is consumed directly in whatever form `code_gen_value`
    /// returns -- `Direct`, `Indirect`, or `Immediate` -- the same way
    /// `RawNode::code_gen_binary` consumes its second operand, rather than
    /// forcing it into a register first. This matters beyond instruction
    /// selection: `lhs_reg` is unpinned as soon as the rhs's *storage* is
    /// known, before any further register is reserved, so an `Indirect`
    /// rhs must never need a fresh allocation (which could spill and pick
    /// the now-unpinned `lhs_reg` as its own victim).
    fn emit(&self, tree: &mut ExpressionTree<'a>) -> Result<Cc> {
        use crate::storage::StorageCell;

        let lhs = self.lhs.value(tree)?;
        let lhs_reg = lhs.register().expect("condition lhs must be in a register");
        tree.pin(lhs_reg);
        let rhs = self.rhs.code_gen_value(tree)?;
        tree.unpin(lhs_reg);

        match rhs {
            StorageCell::Direct(r) => {
                tree.asm_mut().emit_cmp_rr(lhs_reg, r, self.lhs.header.size);
                if self.rhs.parent_count() == 0 && r != lhs_reg {
                    tree.release_register(r);
                }
            }
            StorageCell::Immediate(v) => {
                tree.asm_mut()
                    .emit_cmp_ri(lhs_reg, v as i32, self.lhs.header.size);
            }
            StorageCell::Indirect(base, disp) => {
                tree.asm_mut()
                    .emit_cmp_rm(lhs_reg, base, disp, self.rhs.header.size);
                if self.rhs.parent_count() == 0 && base != lhs_reg {
                    tree.release_register(base);
                }
            }
        }
        if self.lhs.parent_count() == 0 {
            tree.release_register(lhs_reg);
        }
        Ok(self.op.jump_if_true())
    }
}

/// An execution-precondition statement: guard `condition`, returning
/// `otherwise` (always an `Immediate` node, per §4.5's neutrality
/// requirement) without running the main expression when the guard fails.
pub(crate) struct Precondition<'a> {
    condition: Condition<'a>,
    otherwise: &'a RawNode<'a>,
}

impl<'a> Precondition<'a> {
    pub(crate) fn new(condition: Condition<'a>, otherwise: &'a RawNode<'a>) -> Self {
        Self {
            condition,
            otherwise,
        }
    }

    pub(crate) fn label(&self) {
        self.condition.label();
        self.otherwise.label();
    }

    /// Emit the guarded early-return sequence described in §4.5, steps 1-6.
    pub(crate) fn emit(&self, tree: &mut ExpressionTree<'a>) -> Result<()> {
        use crate::storage::StorageCell;

        let continue_label = tree.asm_mut().allocate_label();
        let cc = self.condition.emit(tree)?;
        tree.asm_mut().emit_conditional_jump(cc, continue_label);

        // Step 4: materialize the failure immediate. Per the invariant that
        // an Immediate never perturbs the register file, this is safe to
        // emit on a path that may not execute.
        let failure = self.otherwise.value(tree)?;
        let result_reg = tree.result_register();
        match failure {
            StorageCell::Direct(r) if r == result_reg => {}
            StorageCell::Direct(r) => {
                tree.asm_mut()
                    .emit_mov_reg(result_reg, r, self.otherwise.header.size);
                if self.otherwise.parent_count() == 0 {
                    tree.release_register(r);
                }
            }
            _ => unreachable!("value() always yields Direct storage"),
        }
        let epilogue = tree.epilogue_label();
        tree.asm_mut().emit_unconditional_jump(epilogue);

        tree.asm_mut().place_label(continue_label);
        Ok(())
    }
}
