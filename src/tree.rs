//! The expression tree: owns the node arena handle, the register file, the
//! instruction emitter, the stack frame, and the registered precondition
//! statements. Orchestrates the two-phase lower (`finalize`) and is the
//! "tree" nodes borrow back into via `&mut ExpressionTree` whenever they
//! need to allocate a register, reach the emitter, or consult the ABI
//! result register -- the operations listed in §4.2 of the design.

use crate::abi::{Abi, OperandSize};
use crate::arena::Arena;
use crate::error::{CompileError, Result};
use crate::frame::{slot_address, Frame};
use crate::isa::reg::Reg;
use crate::isa::x64::abi::X64Abi;
use crate::isa::x64::asm::{Assembler, Label};
use crate::isa::x64::regs;
use crate::node::{NodeKind, RawNode};
use crate::options::JitOptions;
use crate::precondition::Precondition;
use crate::regalloc::RegisterFile;
use crate::storage::StorageCell;
use log::{debug, trace};
use std::cell::RefCell;

/// A finalized, callable compiled function. Owns the executable buffer; the
/// address of its entry point is valid for as long as this value lives.
pub struct Compiled {
    buffer: dynasmrt::ExecutableBuffer,
    entry: dynasmrt::AssemblyOffset,
}

impl Compiled {
    pub fn as_ptr(&self) -> *const u8 {
        self.buffer.ptr(self.entry)
    }

    /// The raw emitted bytes, for tests and tooling that want to disassemble
    /// the compiled function rather than only invoke it.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Reinterpret the compiled entry point as a concrete function-pointer
    /// type.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` (System V) function-pointer type whose
    /// parameter list matches the sequence of `parameter::<T>()` nodes used
    /// to build this function, and whose return type matches the node
    /// passed to `return_of`.
    pub unsafe fn cast<F: Copy>(&self) -> F {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<usize>(),
            "F must be a thin function pointer"
        );
        let ptr = self.as_ptr();
        std::mem::transmute_copy(&ptr)
    }
}

pub(crate) struct ExpressionTree<'a> {
    #[allow(dead_code)]
    arena: &'a Arena,
    asm: Assembler,
    regalloc: RegisterFile,
    frame: Option<Frame>,
    arg_sizes: Vec<OperandSize>,
    preconditions: Vec<Precondition<'a>>,
    nodes: RefCell<Vec<&'a RawNode<'a>>>,
    spill_cursor: u32,
    epilogue: Option<Label>,
    finalized: bool,
    /// Registers currently pinned against spilling because a node's code-gen
    /// is mid-way through consuming a second operand while still holding the
    /// first (see `pin`/`unpin`).
    pinned: u16,
    #[allow(dead_code)]
    options: JitOptions,
}

/// Sentinel passed to `RegisterFile::try_reserve` for registers whose final
/// owner isn't yet known; every such reservation is retargeted to its real
/// owning node before control returns to that node's caller (see
/// `RawNode::code_gen_value`), so this should never surface in a completed
/// spill.
const TRANSIENT_OWNER: u32 = u32::MAX;

impl<'a> ExpressionTree<'a> {
    pub(crate) fn new(arena: &'a Arena, options: JitOptions) -> Self {
        Self {
            arena,
            asm: Assembler::new(),
            regalloc: RegisterFile::new(),
            frame: None,
            arg_sizes: Vec::new(),
            preconditions: Vec::new(),
            nodes: RefCell::new(Vec::new()),
            spill_cursor: 0,
            epilogue: None,
            finalized: false,
            pinned: 0,
            options,
        }
    }

    /// The id the next registered node will receive. Callers construct a
    /// `RawNode` with this id *before* allocating it (a node's id must be
    /// baked into its header at construction time), then hand the arena
    /// reference to [`register`](Self::register) once it exists.
    pub(crate) fn next_node_id(&self) -> u32 {
        self.nodes.borrow().len() as u32
    }

    /// Record a freshly arena-allocated node in the tree's registry, so a
    /// later spill can look its cache entry up by id (see `spill_one`).
    pub(crate) fn register(&self, node: &'a RawNode<'a>) {
        self.nodes.borrow_mut().push(node);
    }

    /// Bind the next free ABI parameter slot of `size`, returning its index
    /// in construction order. Called by `crate::driver::Compiler::parameter`.
    pub(crate) fn bind_parameter(&mut self, size: OperandSize) -> usize {
        self.arg_sizes.push(size);
        self.arg_sizes.len() - 1
    }

    pub(crate) fn add_precondition(&mut self, precondition: Precondition<'a>) {
        self.preconditions.push(precondition);
    }

    pub(crate) fn asm_mut(&mut self) -> &mut Assembler {
        &mut self.asm
    }

    pub(crate) fn result_register(&self) -> Reg {
        X64Abi::result_reg()
    }

    pub(crate) fn epilogue_label(&self) -> Label {
        self.epilogue.expect("epilogue label requested before finalize began")
    }

    fn frame(&self) -> &Frame {
        self.frame.as_ref().expect("frame requested before finalize began")
    }

    /// Storage for a bound parameter: always the frame slot it was spilled
    /// into during the prologue (see `spill_incoming_args`), whether it
    /// originally arrived in a register or on the caller's stack.
    pub(crate) fn parameter_storage(&self, slot: usize) -> StorageCell {
        let arg_slot = self.frame().arg_slot(slot);
        let (base, disp) = slot_address::<X64Abi>(arg_slot);
        StorageCell::Indirect(base, disp)
    }

    /// Reserve a register, spilling a victim if the file is exhausted. The
    /// reservation starts out owned by the `TRANSIENT_OWNER` sentinel;
    /// `RawNode::code_gen_value` retargets it to the node whose cache entry
    /// actually holds it before returning, so no other allocation can
    /// observe the sentinel in between (single-threaded, synchronous).
    pub(crate) fn reserve_register(&mut self) -> Result<Reg> {
        if let Some(r) = self.regalloc.try_reserve(TRANSIENT_OWNER) {
            trace!("reserve {r:?}");
            return Ok(r);
        }
        self.spill_one()?;
        let reg = self
            .regalloc
            .try_reserve(TRANSIENT_OWNER)
            .ok_or(CompileError::RegisterExhausted {
                needed: RegisterFile::capacity() + 1,
                available: RegisterFile::capacity(),
            })?;
        trace!("reserve {reg:?} after spill");
        Ok(reg)
    }

    pub(crate) fn retarget_register_owner(&mut self, reg: Reg, owner: u32) {
        if reg != regs::frame_base() {
            self.regalloc.set_owner(reg, owner);
        }
    }

    pub(crate) fn release_register(&mut self, reg: Reg) {
        if reg != regs::frame_base() {
            self.regalloc.release(reg);
        }
    }

    /// Pin `reg` against spilling: it is mid-use by an in-flight operand
    /// that a second, still-to-be-evaluated operand's code-gen must not be
    /// allowed to evict (see `RawNode::code_gen_binary`).
    pub(crate) fn pin(&mut self, reg: Reg) {
        if reg != regs::frame_base() {
            self.pinned |= 1 << reg.hw_enc();
        }
    }

    pub(crate) fn unpin(&mut self, reg: Reg) {
        self.pinned &= !(1 << reg.hw_enc());
    }

    /// Spill the deterministically-chosen victim register to a fresh slot
    /// in the frame's spill area, rewriting the owning node's cached
    /// storage to point at it (testable property 4).
    fn spill_one(&mut self) -> Result<()> {
        let (victim, owner_id) = self
            .regalloc
            .pick_spill_victim(self.pinned)
            .ok_or(CompileError::RegisterExhausted {
                needed: RegisterFile::capacity() + 1,
                available: RegisterFile::capacity(),
            })?;

        let word = X64Abi::word_bytes();
        let cursor = self.spill_cursor;
        if cursor + word > self.frame().spill_area_size {
            return Err(CompileError::RegisterExhausted {
                needed: cursor + word,
                available: self.frame().spill_area_size,
            });
        }
        let slot = self.frame().spill_slot::<X64Abi>(cursor);
        self.spill_cursor += word;

        let (base, disp) = slot_address::<X64Abi>(slot);
        self.asm.emit_store(base, disp, victim, OperandSize::S64);

        if owner_id != TRANSIENT_OWNER {
            if let Some(node) = self.nodes.borrow().get(owner_id as usize) {
                node.set_spilled_storage(StorageCell::Indirect(base, disp));
            }
        }
        self.regalloc.clear_owner(victim);
        debug!("spilled {victim:?} (owned by node #{owner_id}) to frame slot {disp}");
        Ok(())
    }

    /// Copy every incoming argument into its frame slot, mirroring
    /// `CodeGen::spill_register_arguments` in the teacher: the body below
    /// the prologue only ever reads parameters from their home slots. A
    /// register-passed argument is stored directly; a stack-passed one (the
    /// 7th+ integer parameter, past System V's six argument registers) is
    /// first loaded from the caller's frame through the scratch register,
    /// since a store needs a register source and the caller's slot is never
    /// itself writable as the parameter's home.
    fn spill_incoming_args(&mut self) {
        let abi_args = Frame::abi_args::<X64Abi>(&self.arg_sizes);
        for (index, arg) in abi_args.iter().enumerate() {
            let slot = self.frame().arg_slot(index);
            let (base, disp) = slot_address::<X64Abi>(slot);
            match *arg {
                crate::abi::AbiArg::Reg { size, reg } => {
                    self.asm.emit_store(base, disp, reg, size);
                }
                crate::abi::AbiArg::Stack { size, offset } => {
                    let scratch = regs::scratch();
                    self.asm
                        .emit_load(scratch, regs::frame_base(), offset as i32, size);
                    self.asm.emit_store(base, disp, scratch, size);
                }
            }
        }
    }

    /// Perform the two-phase lower and commit the buffer as executable.
    pub(crate) fn finalize(mut self, root: &'a RawNode<'a>) -> Result<Compiled> {
        if self.finalized {
            return Err(CompileError::DoubleFinalize);
        }
        self.finalized = true;

        // Phase 1: labeling. Preconditions first (registration order is
        // irrelevant here, labeling is purely functional), then the root.
        for p in &self.preconditions {
            p.label();
        }
        let demand = root.label();
        trace!("root register demand: {demand}");

        let capacity = RegisterFile::capacity();
        let spill_slots = demand.saturating_sub(capacity);
        let frame = Frame::new::<X64Abi>(&self.arg_sizes, spill_slots);
        self.frame = Some(frame);
        self.epilogue = Some(self.asm.allocate_label());

        self.asm
            .prologue(self.frame().locals_size, &X64Abi::callee_saved());
        self.spill_incoming_args();

        // Phase 2: preconditions in registration order, then the root.
        for i in 0..self.preconditions.len() {
            // Preconditions don't borrow `self` mutably while held in
            // `self.preconditions`, so temporarily take the vector out.
            let mut taken = std::mem::take(&mut self.preconditions);
            taken[i].emit(&mut self)?;
            self.preconditions = taken;
        }

        root.code_gen_return(&mut self)?;

        let epilogue = self.epilogue_label();
        self.asm
            .epilogue(epilogue, self.frame().locals_size, &X64Abi::callee_saved());

        let buffer = self.asm.finalize();
        Ok(Compiled {
            buffer,
            entry: dynasmrt::AssemblyOffset(0),
        })
    }
}
