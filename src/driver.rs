//! Driver / API facade (§4.6): the only front end this crate has. There is
//! no textual input language -- callers build an expression by calling
//! typed factory methods on a [`Compiler`], each of which allocates a node
//! in the backing [`Arena`] and returns a small `Copy` handle.

use crate::abi::OperandSize;
use crate::arena::Arena;
use crate::error::Result as CoreResult;
use crate::isa::x64::asm::BinOp;
use crate::node::{NodeKind, RawNode};
use crate::options::JitOptions;
use crate::precondition::{CmpOp, Condition, Precondition};
use crate::tree::{Compiled, ExpressionTree};
use std::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// A type a [`Node`] may carry: fixes the `OperandSize` the storage/codegen
/// layer needs without exposing the core's internal size representation to
/// callers.
pub trait Repr: sealed::Sealed {
    #[doc(hidden)]
    const SIZE: OperandSize;
}

/// The subset of [`Repr`] types that arithmetic (`add`/`sub`/`mul`),
/// `parameter`, `immediate` and `compare` accept: the plain scalars, not
/// pointer types (pointer arithmetic goes through
/// [`Compiler::add_ptr`], which desugars at construction time per §4.3).
pub trait Scalar: Repr {}

impl sealed::Sealed for i32 {}
impl sealed::Sealed for i64 {}
impl sealed::Sealed for u64 {}
impl Repr for i32 {
    const SIZE: OperandSize = OperandSize::S32;
}
impl Repr for i64 {
    const SIZE: OperandSize = OperandSize::S64;
}
impl Repr for u64 {
    const SIZE: OperandSize = OperandSize::S64;
}
impl Scalar for i32 {}
impl Scalar for i64 {}

/// Type-level marker for `T*`: a `Node<'a, Ptr<T>>` is a typed pointer node.
/// Never instantiated -- it exists purely so the factory API can express
/// "a pointer to T" as a Rust type.
pub struct Ptr<T>(PhantomData<T>);
impl<T> sealed::Sealed for Ptr<T> {}
impl<T> Repr for Ptr<T> {
    const SIZE: OperandSize = OperandSize::S64;
}

/// A handle to a node of type `T` in the tree being built. `Copy` --
/// handles are cheap references into the arena, not owners.
pub struct Node<'a, T> {
    raw: &'a RawNode<'a>,
    _marker: PhantomData<T>,
}

impl<'a, T> Node<'a, T> {
    fn new(raw: &'a RawNode<'a>) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }
}

impl<'a, T> Clone for Node<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<'a, T> Copy for Node<'a, T> {}

/// A node known, at the Rust type level, to be an [`crate::node::NodeKind::Immediate`].
/// The only value [`Compiler::add_precondition`] accepts as a failure value,
/// enforcing §4.5's neutrality requirement (an arbitrary subexpression may
/// never stand in for the precondition's failure constant) at compile time
/// rather than by a runtime check.
pub struct Immediate<'a, T>(Node<'a, T>);

impl<'a, T> Immediate<'a, T> {
    /// View this immediate as an ordinary node, usable anywhere a `Node<T>`
    /// is expected.
    pub fn node(self) -> Node<'a, T> {
        self.0
    }
}
impl<'a, T> Clone for Immediate<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<'a, T> Copy for Immediate<'a, T> {}

/// The terminal node produced by [`Compiler::return_of`]; the only thing
/// [`Compiler::finalize`] accepts.
pub struct ReturnNode<'a> {
    raw: &'a RawNode<'a>,
}

/// The driver: creates typed nodes against an arena, records a return,
/// finalizes compilation, and yields a typed callable.
pub struct Compiler<'a> {
    tree: ExpressionTree<'a>,
    arena: &'a Arena,
}

impl<'a> Compiler<'a> {
    pub fn new(arena: &'a Arena) -> Self {
        Self::with_options(arena, JitOptions::default())
    }

    pub fn with_options(arena: &'a Arena, options: JitOptions) -> Self {
        Self {
            tree: ExpressionTree::new(arena, options),
            arena,
        }
    }

    fn alloc(&mut self, kind: NodeKind<'a>, size: OperandSize) -> CoreResult<&'a RawNode<'a>> {
        // A node's id must match its position in the tree's registry (the
        // `spill_one` lookup indexes by id), so it is read before the node
        // is constructed and the node is registered immediately after.
        let id = self.tree.next_node_id();
        let node: &'a RawNode<'a> = self.arena.alloc(RawNode::new(id, size, kind))?;
        self.tree.register(node);
        Ok(node)
    }

    /// A compile-time constant of type `T`.
    pub fn immediate<T: Scalar>(&mut self, value: i64) -> anyhow::Result<Immediate<'a, T>> {
        let raw = self.alloc(NodeKind::Immediate(value), T::SIZE)?;
        Ok(Immediate(Node::new(raw)))
    }

    /// A function parameter, bound to the next free ABI input slot of `T`'s
    /// class in construction order.
    pub fn parameter<T: Repr>(&mut self) -> anyhow::Result<Node<'a, T>> {
        let slot = self.tree.bind_parameter(T::SIZE);
        let raw = self.alloc(NodeKind::Parameter(slot), T::SIZE)?;
        Ok(Node::new(raw))
    }

    /// The value at `*ptr`.
    pub fn deref<T: Repr>(&mut self, ptr: Node<'a, Ptr<T>>) -> anyhow::Result<Node<'a, T>> {
        ptr.raw.bump_parent_count();
        let raw = self.alloc(
            NodeKind::Indirect {
                ptr: ptr.raw,
                offset: 0,
            },
            T::SIZE,
        )?;
        Ok(Node::new(raw))
    }

    /// A typed pointer derived from `base` by adding a compile-time field
    /// offset. Implements the chained-offset collapsing rule (invariant 3):
    /// if `base` is itself a `FieldPointer`, the new node folds through to
    /// `base`'s own collapsed base/offset and marks `base` as address-only
    /// (`referenced`), so `base` is never independently code-generated and
    /// only one `add` of the summed offset is ever emitted.
    pub fn field_pointer<O, F>(
        &mut self,
        base: Node<'a, Ptr<O>>,
        field_offset: u32,
    ) -> anyhow::Result<Node<'a, Ptr<F>>> {
        let (collapsed_base, collapsed_offset) = match &base.raw.kind {
            NodeKind::FieldPointer {
                collapsed_base,
                collapsed_offset,
                ..
            } => {
                base.raw.mark_referenced();
                (*collapsed_base, *collapsed_offset + field_offset as i32)
            }
            _ => (base.raw, field_offset as i32),
        };
        collapsed_base.bump_parent_count();
        let raw = self.alloc(
            NodeKind::FieldPointer {
                base: base.raw,
                orig_offset: field_offset as i32,
                collapsed_base,
                collapsed_offset,
            },
            OperandSize::S64,
        )?;
        Ok(Node::new(raw))
    }

    fn binary<T: Scalar>(
        &mut self,
        op: BinOp,
        left: Node<'a, T>,
        right: Node<'a, T>,
    ) -> CoreResult<Node<'a, T>> {
        left.raw.bump_parent_count();
        right.raw.bump_parent_count();
        let raw = self.alloc(
            NodeKind::Binary {
                op,
                left: left.raw,
                right: right.raw,
            },
            T::SIZE,
        )?;
        Ok(Node::new(raw))
    }

    pub fn add<T: Scalar>(&mut self, l: Node<'a, T>, r: Node<'a, T>) -> anyhow::Result<Node<'a, T>> {
        Ok(self.binary(BinOp::Add, l, r)?)
    }
    pub fn sub<T: Scalar>(&mut self, l: Node<'a, T>, r: Node<'a, T>) -> anyhow::Result<Node<'a, T>> {
        Ok(self.binary(BinOp::Sub, l, r)?)
    }
    pub fn mul<T: Scalar>(&mut self, l: Node<'a, T>, r: Node<'a, T>) -> anyhow::Result<Node<'a, T>> {
        Ok(self.binary(BinOp::Mul, l, r)?)
    }

    /// Pointer-plus-scaled-index (`p + i` for `p: T*`): desugars at
    /// construction time into `add(p, mul(i, elem_size))` using a fresh
    /// immediate node, per §4.3.
    pub fn add_ptr<T>(
        &mut self,
        p: Node<'a, Ptr<T>>,
        index: Node<'a, u64>,
        elem_size: u32,
    ) -> anyhow::Result<Node<'a, Ptr<T>>> {
        let scale = self.immediate::<u64>(elem_size as i64)?.node();
        index.raw.bump_parent_count();
        scale.raw.bump_parent_count();
        let scaled_raw = self.alloc(
            NodeKind::Binary {
                op: BinOp::Mul,
                left: index.raw,
                right: scale.raw,
            },
            OperandSize::S64,
        )?;
        let scaled: Node<'a, u64> = Node::new(scaled_raw);

        p.raw.bump_parent_count();
        scaled.raw.bump_parent_count();
        let raw = self.alloc(
            NodeKind::Binary {
                op: BinOp::Add,
                left: p.raw,
                right: scaled.raw,
            },
            OperandSize::S64,
        )?;
        Ok(Node::new(raw))
    }

    /// A flag-producing comparison of two same-typed nodes, for use as a
    /// precondition's guard (§4.5). Not itself a `Node` -- conditions never
    /// appear inside the general expression tree.
    pub fn compare<T: Scalar>(
        &mut self,
        lhs: Node<'a, T>,
        op: CmpOp,
        rhs: Node<'a, T>,
    ) -> Condition<'a> {
        lhs.raw.bump_parent_count();
        rhs.raw.bump_parent_count();
        Condition::new(lhs.raw, op, rhs.raw)
    }

    /// Register an execution-precondition statement (§4.5): when
    /// `condition` fails at runtime, the compiled function returns
    /// `otherwise` immediately, never running the rest of the body.
    /// Preconditions run in registration order, before the main
    /// expression's code-gen.
    pub fn add_precondition<R: Scalar>(&mut self, condition: Condition<'a>, otherwise: Immediate<'a, R>) {
        otherwise.0.raw.bump_parent_count();
        self.tree
            .add_precondition(Precondition::new(condition, otherwise.0.raw));
    }

    /// Record the function's return value, consuming `value`.
    pub fn return_of<T: Scalar>(&mut self, value: Node<'a, T>) -> anyhow::Result<ReturnNode<'a>> {
        value.raw.bump_parent_count();
        let raw = self.alloc(NodeKind::Return { value: value.raw }, T::SIZE)?;
        Ok(ReturnNode { raw })
    }

    /// Label the root, evaluate preconditions, code-generate the root, and
    /// commit the buffer as executable. Consumes the compiler: a tree may
    /// only be finalized once (double-finalize is a `CompileError`, caught
    /// by `self.tree` having already consumed itself by value).
    pub fn finalize(self, root: ReturnNode<'a>) -> anyhow::Result<Compiled> {
        Ok(self.tree.finalize(root.raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Outer;
    struct Inner;

    /// Invariant 3 / testable property 5: chaining `field_pointer` over an
    /// already-`FieldPointer` base must fold into a single collapsed
    /// base/offset and mark the intermediate node as address-only, rather
    /// than keeping two independently code-generated pointer nodes.
    #[test]
    fn chained_field_pointers_collapse_into_one() {
        let arena = Arena::new();
        let mut c = Compiler::new(&arena);
        let p = c.parameter::<Ptr<Outer>>().unwrap();
        let mid = c.field_pointer::<Outer, Inner>(p, 8).unwrap();
        assert!(
            !mid.raw.is_referenced(),
            "a field-pointer not yet folded into anything must not be referenced"
        );

        let inner = c.field_pointer::<Inner, i64>(mid, 16).unwrap();
        assert!(
            mid.raw.is_referenced(),
            "the intermediate field-pointer must be marked referenced once collapsed through"
        );
        match &inner.raw.kind {
            NodeKind::FieldPointer {
                collapsed_base,
                collapsed_offset,
                ..
            } => {
                assert!(std::ptr::eq(*collapsed_base, p.raw), "collapsed base must be the original root pointer");
                assert_eq!(*collapsed_offset, 8 + 16, "collapsed offset must be the sum of both hops");
            }
            _ => panic!("expected a FieldPointer node"),
        }
    }

    /// A single (non-chained) `field_pointer` call has nothing to collapse
    /// through: its collapsed base/offset are just its own.
    #[test]
    fn single_field_pointer_is_its_own_collapsed_base() {
        let arena = Arena::new();
        let mut c = Compiler::new(&arena);
        let p = c.parameter::<Ptr<Outer>>().unwrap();
        let field = c.field_pointer::<Outer, Inner>(p, 24).unwrap();
        match &field.raw.kind {
            NodeKind::FieldPointer {
                collapsed_base,
                collapsed_offset,
                ..
            } => {
                assert!(std::ptr::eq(*collapsed_base, p.raw));
                assert_eq!(*collapsed_offset, 24);
            }
            _ => panic!("expected a FieldPointer node"),
        }
    }

    /// Pointer-plus-index desugars at construction time into
    /// `add(p, mul(index, elem_size))`, per §4.3.
    #[test]
    fn add_ptr_desugars_into_mul_then_add() {
        let arena = Arena::new();
        let mut c = Compiler::new(&arena);
        let p = c.parameter::<Ptr<i64>>().unwrap();
        let idx = c.parameter::<u64>().unwrap();
        let result = c.add_ptr(p, idx, 8).unwrap();
        match &result.raw.kind {
            NodeKind::Binary { op: BinOp::Add, left, right } => {
                assert!(std::ptr::eq(*left, p.raw));
                match &right.kind {
                    NodeKind::Binary { op: BinOp::Mul, left, .. } => {
                        assert!(std::ptr::eq(*left, idx.raw));
                    }
                    _ => panic!("expected the scaled index to be a Mul node"),
                }
            }
            _ => panic!("expected an Add node at the top"),
        }
    }

    /// Every factory call bumps the referenced child's parent count, so a
    /// value used twice (e.g. as both sides of an addition) is consumed
    /// exactly that many times during code-gen.
    #[test]
    fn sharing_a_node_across_two_parents_bumps_its_parent_count_twice() {
        let arena = Arena::new();
        let mut c = Compiler::new(&arena);
        let a = c.parameter::<i64>().unwrap();
        assert_eq!(a.raw.parent_count(), 0);
        let _ = c.add(a, a).unwrap();
        assert_eq!(a.raw.parent_count(), 2);
    }
}
