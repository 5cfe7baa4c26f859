//! Node lifetime management.
//!
//! Nodes never destroy themselves; they live in a [`bumpalo::Bump`] scoped to
//! the owning [`crate::tree::ExpressionTree`] and are freed wholesale when the
//! tree is dropped. No node destructor needs to run for correctness -- nodes
//! hold no external resource beyond register reservations, which are
//! released through parent-count bookkeeping during code-gen, not `Drop`.

use crate::error::{CompileError, Result};
use bumpalo::Bump;

/// Backing store for every node in an [`crate::tree::ExpressionTree`].
///
/// Owned by the caller (not the tree) so that node references can carry the
/// arena's lifetime without making the tree self-referential.
pub struct Arena {
    bump: Bump,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    pub fn new() -> Self {
        Self { bump: Bump::new() }
    }

    /// An arena whose backing allocator refuses to grow past `limit` bytes.
    /// Exists so callers (chiefly tests) can force `CompileError::ArenaOverflow`
    /// deterministically instead of needing to build a tree large enough to
    /// exhaust an unbounded arena.
    pub fn with_allocation_limit(limit: usize) -> Self {
        let mut bump = Bump::new();
        bump.set_allocation_limit(Some(limit));
        Self { bump }
    }

    /// Allocate `value` in the arena, returning a reference whose lifetime is
    /// tied to the arena itself rather than to this call.
    pub fn alloc<'a, T>(&'a self, value: T) -> Result<&'a T> {
        // `bumpalo` aborts on allocator failure by default; `try_alloc` lets
        // us surface it as a compile error instead, matching the "Arena
        // overflow" fatal condition.
        self.bump
            .try_alloc(value)
            .map_err(|_| CompileError::ArenaOverflow)
    }
}
