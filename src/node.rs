//! Expression-tree vertices.
//!
//! Nodes are a tagged sum (`NodeKind`) over a shared header (id, parent
//! count, reference flag, Sethi-Ullman label, cached storage), matching the
//! "polymorphism via value-carrying variants" framing in the design notes:
//! the tree dispatches on tag for labeling and code-gen rather than through
//! virtual dispatch. Not every variant implements every capability -- a
//! binary arithmetic node has no notion of `code_gen_as_base`; only
//! pointer-producing nodes (`FieldPointer`) do.
//!
//! Nodes never destroy themselves (see `crate::arena`); state transitions
//! (`Constructed` -> `Labeled` -> `Evaluated` -> `Released`) are derived from
//! the header fields rather than tracked as an explicit enum.

use crate::abi::OperandSize;
use crate::error::Result;
use crate::isa::reg::Reg;
use crate::isa::x64::asm::BinOp;
use crate::storage::StorageCell;
use crate::tree::ExpressionTree;
use std::cell::Cell;

/// Claim `reg` (just produced by evaluating `child`) for a caller that wants
/// to either overwrite it in place or retarget its reservation outright.
///
/// Safe to do unconditionally only when `child` has no parents left after
/// this consumption -- otherwise `child`'s own cached storage still points
/// at `reg` and a later parent reading that cache would see this caller's
/// clobber instead of `child`'s own value. When `child` is still shared,
/// a fresh register is reserved and `reg` is copied into it instead,
/// leaving `child`'s reservation untouched.
fn claim_register<'a>(
    tree: &mut ExpressionTree<'a>,
    child: &RawNode<'a>,
    reg: Reg,
    size: OperandSize,
) -> Result<Reg> {
    if child.parent_count() > 0 {
        tree.pin(reg);
        let fresh = tree.reserve_register()?;
        tree.unpin(reg);
        tree.asm_mut().emit_mov_reg(fresh, reg, size);
        Ok(fresh)
    } else {
        Ok(reg)
    }
}

/// A node's position in its state machine, derived from header fields.
/// Exposed for tests that assert on invariants rather than on emitted bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeState {
    Constructed,
    Labeled,
    Evaluated,
    Released,
}

pub(crate) struct NodeHeader {
    pub(crate) id: u32,
    pub(crate) size: OperandSize,
    parent_count: Cell<u32>,
    referenced: Cell<bool>,
    label: Cell<Option<u32>>,
    storage: Cell<Option<StorageCell>>,
}

impl NodeHeader {
    fn new(id: u32, size: OperandSize, initial_parent_count: u32) -> Self {
        Self {
            id,
            size,
            parent_count: Cell::new(initial_parent_count),
            referenced: Cell::new(false),
            label: Cell::new(None),
            storage: Cell::new(None),
        }
    }
}

/// The per-variant payload. See §3 of the design for the field-by-field
/// rationale; in particular `FieldPointer` carries both the original
/// base/offset (diagnostics only) and the collapsed base/offset actually
/// used by code-gen (invariant 3).
pub(crate) enum NodeKind<'a> {
    Immediate(i64),
    /// Index into `ExpressionTree`'s parameter list, in construction order.
    Parameter(usize),
    Indirect {
        ptr: &'a RawNode<'a>,
        offset: i32,
    },
    FieldPointer {
        #[allow(dead_code)] // diagnostics only, per invariant 3
        base: &'a RawNode<'a>,
        #[allow(dead_code)]
        orig_offset: i32,
        collapsed_base: &'a RawNode<'a>,
        collapsed_offset: i32,
    },
    Binary {
        op: BinOp,
        left: &'a RawNode<'a>,
        right: &'a RawNode<'a>,
    },
    Return {
        value: &'a RawNode<'a>,
    },
}

pub(crate) struct RawNode<'a> {
    pub(crate) header: NodeHeader,
    pub(crate) kind: NodeKind<'a>,
}

impl<'a> RawNode<'a> {
    pub(crate) fn new(id: u32, size: OperandSize, kind: NodeKind<'a>) -> Self {
        Self {
            header: NodeHeader::new(id, size, 0),
            kind,
        }
    }

    pub(crate) fn bump_parent_count(&self) {
        self.header.parent_count.set(self.header.parent_count.get() + 1);
    }

    pub(crate) fn mark_referenced(&self) {
        self.header.referenced.set(true);
    }

    pub fn is_referenced(&self) -> bool {
        self.header.referenced.get()
    }

    pub fn parent_count(&self) -> u32 {
        self.header.parent_count.get()
    }

    pub fn register_count(&self) -> Option<u32> {
        self.header.label.get()
    }

    /// Rewrite this node's cached storage after its register was spilled.
    /// Called only from `ExpressionTree::spill_one`.
    pub(crate) fn set_spilled_storage(&self, storage: StorageCell) {
        self.header.storage.set(Some(storage));
    }

    pub fn state(&self) -> NodeState {
        if self.header.referenced.get() && self.header.label.get().is_some() {
            return NodeState::Released;
        }
        match (self.header.label.get(), self.header.storage.get()) {
            (None, _) => NodeState::Constructed,
            (Some(_), None) => NodeState::Labeled,
            (Some(_), Some(_)) if self.header.parent_count.get() == 0 => NodeState::Released,
            (Some(_), Some(_)) => NodeState::Evaluated,
        }
    }

    /// Phase 1: the Sethi-Ullman register-count labeling pass. Idempotent --
    /// a node is labeled at most once (invariant 4); later calls return the
    /// cached number. `FieldPointer` labels through its *collapsed* base,
    /// since the intermediate nodes it bypasses are never independently
    /// walked (see invariant 3 and the field-pointer factory in
    /// `crate::driver`).
    pub(crate) fn label(&self) -> u32 {
        if let Some(l) = self.header.label.get() {
            return l;
        }
        let l = match &self.kind {
            NodeKind::Immediate(_) | NodeKind::Parameter(_) => 1,
            NodeKind::Indirect { ptr, .. } => ptr.label(),
            NodeKind::FieldPointer { collapsed_base, .. } => collapsed_base.label(),
            NodeKind::Binary { left, right, .. } => {
                let l = left.label();
                let r = right.label();
                if l == r {
                    l + 1
                } else {
                    l.max(r)
                }
            }
            NodeKind::Return { value } => value.label(),
        };
        self.header.label.set(Some(l));
        l
    }

    /// Whether this node's *value* is itself a computed address (only true
    /// for `FieldPointer`). Used to decide whether materializing the value
    /// should load memory (ordinary nodes) or merely fold a pending
    /// displacement into an already-resident base register (see
    /// `RawNode::value`).
    fn produces_address(&self) -> bool {
        matches!(self.kind, NodeKind::FieldPointer { .. })
    }

    /// Fetch this node's (possibly cached) storage without forcing it into
    /// a register. Every call here is one parent consuming the node, so the
    /// parent-count bookkeeping (invariant 1, testable property 2) happens
    /// unconditionally, whether this is a first evaluation or a
    /// cache-shared subsequent one.
    pub(crate) fn code_gen_value(&self, tree: &mut ExpressionTree<'a>) -> Result<StorageCell> {
        debug_assert!(
            self.header.label.get().is_some(),
            "node #{} code-generated before labeling",
            self.header.id
        );
        debug_assert!(
            !self.header.referenced.get(),
            "node #{} is address-only (referenced) and must never be code-generated directly",
            self.header.id
        );
        let pc = self.header.parent_count.get();
        debug_assert!(
            pc > 0,
            "node #{} consumed more times than its recorded parent count",
            self.header.id
        );
        self.header.parent_count.set(pc - 1);

        if let Some(s) = self.header.storage.get() {
            // No retain here: the register (if any) backing `s` has been
            // reserved, untouched, since this node's first materialization --
            // every consumer after the first just re-reads the same cached
            // cell. The reservation is only ever adjusted by whichever
            // consumer turns out to be the *last* one (parent count reaches
            // zero), which either releases it or adopts it outright; see
            // `code_gen_binary`, `claim_register`, and `value`'s memoizing
            // write-back below.
            return Ok(s);
        }

        let storage = match &self.kind {
            NodeKind::Immediate(v) => StorageCell::Immediate(*v),
            NodeKind::Parameter(slot) => tree.parameter_storage(*slot),
            NodeKind::Indirect { ptr, offset } => {
                let base = ptr.value(tree)?;
                let reg = base
                    .register()
                    .expect("pointer value must resolve to a register");
                let reg = claim_register(tree, ptr, reg, ptr.header.size)?;
                StorageCell::Indirect(reg, *offset)
            }
            NodeKind::FieldPointer { .. } => self.code_gen_as_base(tree)?,
            NodeKind::Binary { op, left, right } => self.code_gen_binary(tree, *op, left, right)?,
            NodeKind::Return { .. } => unreachable!("Return has no value storage of its own"),
        };
        // The register (if any) backing this storage now belongs to this
        // node's cache entry, not whichever child's evaluation first
        // reserved it -- retarget so a later spill rewrites the right
        // node's cache (testable property 4).
        if let Some(r) = storage.register() {
            tree.retarget_register_owner(r, self.header.id);
        }
        self.header.storage.set(Some(storage));
        Ok(storage)
    }

    /// Materialize this node's value into a register, honoring the
    /// `FieldPointer` collapsing rule from §4.3: a `FieldPointer`'s storage
    /// already represents a computed address (a base register plus a
    /// pending displacement) and must only have that displacement folded
    /// in, never be treated as a memory cell to load from.
    ///
    /// The converted result is written back into this node's own cache,
    /// replacing whatever `code_gen_value` had stored there. That is what
    /// makes repeated calls to `value` on a shared node safe: an `Indirect`
    /// cell's base would otherwise be released (or, for a `FieldPointer`,
    /// have its displacement folded in) again on every subsequent call,
    /// which corrupts the second and later reads. Once converted, nothing
    /// ever needs the pre-conversion cell again, so overwriting it is
    /// always sound regardless of how many parents remain.
    pub(crate) fn value(&self, tree: &mut ExpressionTree<'a>) -> Result<StorageCell> {
        let storage = self.code_gen_value(tree)?;
        let direct = storage.to_direct(tree, self.header.size, self.produces_address())?;
        self.header.storage.set(Some(direct));
        Ok(direct)
    }

    fn code_gen_as_base(&self, tree: &mut ExpressionTree<'a>) -> Result<StorageCell> {
        match &self.kind {
            NodeKind::FieldPointer {
                collapsed_base,
                collapsed_offset,
                ..
            } => {
                let base = collapsed_base.value(tree)?;
                let reg = base
                    .register()
                    .expect("collapsed field-pointer base must resolve to a register");
                let reg = claim_register(tree, collapsed_base, reg, collapsed_base.header.size)?;
                Ok(StorageCell::Indirect(reg, *collapsed_offset))
            }
            _ => unreachable!("code_gen_as_base is only meaningful for FieldPointer nodes"),
        }
    }

    fn code_gen_binary(
        &self,
        tree: &mut ExpressionTree<'a>,
        op: BinOp,
        left: &'a RawNode<'a>,
        right: &'a RawNode<'a>,
    ) -> Result<StorageCell> {
        // Heavier child first, left breaking ties (§4.3 edge cases); the
        // *evaluation order* only affects register pressure, never which
        // register ends up as the destination -- that is always left's.
        // Whichever operand is evaluated first has its register pinned
        // while the second is evaluated, so the second operand's own
        // register demand can never spill a value still awaiting the
        // binop that consumes it.
        let (left_storage, right_storage) = if left.label() >= right.label() {
            let l = left.value(tree)?;
            if let Some(r) = l.register() {
                tree.pin(r);
            }
            let r = right.code_gen_value(tree)?;
            if let Some(r) = l.register() {
                tree.unpin(r);
            }
            (l, r)
        } else {
            let r = right.code_gen_value(tree)?;
            if let Some(reg) = r.register() {
                tree.pin(reg);
            }
            let l = left.value(tree)?;
            if let Some(reg) = r.register() {
                tree.unpin(reg);
            }
            (l, r)
        };

        let left_reg = left_storage
            .register()
            .expect("left operand must be materialized to a register");

        // The op below overwrites its destination register in place. That's
        // only safe when this was the *last* consumer of `left` (invariant
        // 1: storage is released once parent count reaches zero) -- if
        // `left` is a shared DAG subtree with other parents still to come,
        // those parents will later hit `left`'s cached storage and expect
        // it to still hold `left`'s own value, not this node's result.
        // `claim_register` copies to a fresh register in that case instead,
        // leaving `left`'s register (and its cache entry) untouched. When it
        // does need a fresh register, reserving one can itself provoke a
        // spill; `right_storage`'s register (if any) must stay pinned across
        // that call; otherwise the spiller is free to pick it as a victim,
        // handing its own just-freed register back as `fresh` and leaving
        // this binop reading `left`'s copy in place of the right operand.
        if let Some(r) = right_storage.register() {
            tree.pin(r);
        }
        let dst = claim_register(tree, left, left_reg, self.header.size)?;
        if let Some(r) = right_storage.register() {
            tree.unpin(r);
        }

        match right_storage {
            StorageCell::Direct(r) => tree.asm_mut().emit_binop_rr(op, dst, r, self.header.size),
            StorageCell::Indirect(base, disp) => tree
                .asm_mut()
                .emit_binop_rm(op, dst, base, disp, self.header.size),
            StorageCell::Immediate(v) => {
                tree.asm_mut()
                    .emit_binop_ri(op, dst, v as i32, self.header.size)
            }
        }
        // Only free `right`'s register once `right` itself has no more
        // parents left to read it -- and never if it turns out to *be*
        // `dst` (e.g. `add(x, x)`, where left and right are the same
        // shared node and the op's own result now lives there).
        if let Some(r) = right_storage.register() {
            if right.parent_count() == 0 && r != dst {
                tree.release_register(r);
            }
        }
        Ok(StorageCell::Direct(dst))
    }

    /// Code-gen the terminal `Return` node: materialize its value, move it
    /// into the ABI result register unless already resident there, and jump
    /// to the shared epilogue. Called directly by `ExpressionTree::finalize`
    /// rather than through `code_gen_value` -- a return produces no reusable
    /// storage for further parents, it has none.
    pub(crate) fn code_gen_return(&self, tree: &mut ExpressionTree<'a>) -> Result<()> {
        let value = match &self.kind {
            NodeKind::Return { value } => *value,
            _ => unreachable!("code_gen_return called on a non-Return node"),
        };
        let storage = value.value(tree)?;
        let result_reg = tree.result_register();
        match storage {
            StorageCell::Direct(r) if r == result_reg => {}
            StorageCell::Direct(r) => {
                tree.asm_mut().emit_mov_reg(result_reg, r, self.header.size);
                if value.parent_count() == 0 {
                    tree.release_register(r);
                }
            }
            _ => unreachable!("value() always yields Direct storage"),
        }
        let epilogue = tree.epilogue_label();
        tree.asm_mut().emit_unconditional_jump(epilogue);
        Ok(())
    }
}
