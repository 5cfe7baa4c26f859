//! The register file: allocation, refcounted release, and spill-victim
//! selection. Adapted from the shape of `winch-codegen`'s `RegAlloc`
//! (referenced throughout `masm.rs` as `crate::regalloc::RegAlloc`, not
//! itself part of the retrieved source) -- a small bitset-backed allocator,
//! generalized here to track a refcount and an owning node per register so
//! that a spill can rewrite the one cached storage slot that depends on it.

use crate::isa::reg::Reg;
use crate::isa::x64::regs;
use log::trace;

const NUM_GPR: usize = 16;

/// Tracks which of the 16 GPR encodings are available to the allocator, how
/// many live [`crate::storage::StorageCell`]s currently name each one, and
/// which node's cached storage is responsible for a reservation (used to
/// retarget that node's cache entry on spill).
pub(crate) struct RegisterFile {
    free: u16,
    refcount: [u16; NUM_GPR],
    owner: [Option<u32>; NUM_GPR],
    allocatable_mask: u16,
}

impl RegisterFile {
    pub(crate) fn new() -> Self {
        let mut mask = 0u16;
        for r in regs::allocatable() {
            mask |= 1 << r.hw_enc();
        }
        Self {
            free: mask,
            refcount: [0; NUM_GPR],
            owner: [None; NUM_GPR],
            allocatable_mask: mask,
        }
    }

    /// The maximum number of registers the allocator can ever hand out
    /// simultaneously; used by `ExpressionTree::finalize` to size the spill
    /// area ahead of code-gen from the root's Sethi-Ullman number.
    pub(crate) fn capacity() -> u32 {
        regs::allocatable().len() as u32
    }

    /// Reserve an unused register, associating it with `owner` (the id of
    /// the node whose cached storage now depends on it). Returns `None` when
    /// the allocatable set is exhausted; the caller must spill a victim
    /// first.
    pub(crate) fn try_reserve(&mut self, owner: u32) -> Option<Reg> {
        if self.free == 0 {
            return None;
        }
        let idx = self.free.trailing_zeros() as u8;
        self.free &= !(1 << idx);
        let reg = Reg::new(idx);
        self.refcount[idx as usize] = 1;
        self.owner[idx as usize] = Some(owner);
        trace!("reserve {reg:?} for node #{owner}");
        Some(reg)
    }

    /// Share an already-reserved register with an additional consumer (a
    /// second parent reading a node's cached storage). Bumps the refcount;
    /// see testable property #4.
    pub(crate) fn retain(&mut self, reg: Reg) {
        self.refcount[reg.hw_enc() as usize] += 1;
    }

    /// Release one consumer's claim on `reg`. Frees it back to the pool once
    /// the refcount reaches zero. Returns `true` if the register was freed.
    pub(crate) fn release(&mut self, reg: Reg) -> bool {
        let idx = reg.hw_enc() as usize;
        debug_assert!(self.refcount[idx] > 0, "releasing an unreserved register");
        self.refcount[idx] -= 1;
        if self.refcount[idx] == 0 {
            self.free |= 1 << idx;
            self.owner[idx] = None;
            trace!("free {reg:?}");
            true
        } else {
            false
        }
    }

    /// Pick a spill victim among the currently-reserved, allocatable,
    /// non-`exclude`d registers. Deterministic: the lowest-encoded eligible
    /// register, so that identical trees always produce byte-identical
    /// code (see the ordering guarantees in the concurrency model).
    /// `exclude` carries the caller's currently pinned registers -- those
    /// mid-use by an operand still awaiting consumption (see
    /// `crate::node::RawNode::code_gen_binary`) -- which must never be
    /// chosen, or a live value would be silently clobbered.
    pub(crate) fn pick_spill_victim(&self, exclude: u16) -> Option<(Reg, u32)> {
        let reserved = self.allocatable_mask & !self.free & !exclude;
        if reserved == 0 {
            return None;
        }
        let idx = reserved.trailing_zeros() as usize;
        self.owner[idx].map(|owner| (Reg::new(idx as u8), owner))
    }

    /// Reassign which node's cached storage a reservation belongs to.
    /// Used when a register's meaning transfers from a child node to its
    /// parent after the parent caches its own result in the same register
    /// (e.g. a `Binary` node reusing its left child's register).
    pub(crate) fn set_owner(&mut self, reg: Reg, owner: u32) {
        self.owner[reg.hw_enc() as usize] = Some(owner);
    }

    /// Retarget `reg`'s reservation to a new owner after its cached storage
    /// has been rewritten to an `Indirect` spill-slot form, but the register
    /// itself is about to be repurposed by whoever caused the spill.
    pub(crate) fn clear_owner(&mut self, reg: Reg) {
        self.owner[reg.hw_enc() as usize] = None;
        self.free |= 1 << reg.hw_enc();
        self.refcount[reg.hw_enc() as usize] = 0;
    }

    pub(crate) fn is_reserved(&self, reg: Reg) -> bool {
        self.free & (1 << reg.hw_enc()) == 0
    }
}
