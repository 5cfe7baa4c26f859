//! Error types surfaced by compilation. Per the design, nothing here is ever
//! produced by *running* a compiled function -- only by building one.

use thiserror::Error;

/// Fatal conditions detected while lowering an expression tree to machine code.
///
/// Every variant here is raised at compile time; a caller that hits one drops
/// the [`crate::tree::ExpressionTree`] and starts over, per the crate's
/// recovery policy (there is no partial-compile recovery).
#[derive(Debug, Error)]
pub enum CompileError {
    /// A subtree's Sethi-Ullman register count exceeds what the register file
    /// plus the spill area reserved ahead of code-gen can accommodate.
    #[error("expression requires {needed} simultaneous registers, only {available} (plus spill budget) are available")]
    RegisterExhausted { needed: u32, available: u32 },

    /// The compiled function was invoked before [`crate::tree::ExpressionTree::finalize`].
    #[error("attempted to call a node tree that has not been finalized")]
    UseBeforeFinalize,

    /// `finalize` was called a second time on the same tree.
    #[error("tree has already been finalized")]
    DoubleFinalize,

    /// The arena backing node storage ran out of space.
    #[error("arena allocator exhausted")]
    ArenaOverflow,
}

/// Result alias used throughout the compile-time half of the crate.
pub type Result<T> = std::result::Result<T, CompileError>;
