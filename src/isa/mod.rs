//! Target-architecture layer. Unlike the teacher, which looks up one of
//! several backends at runtime from a target triple, this crate hard-codes
//! x86-64 (see Non-goals: cross-architecture backends are explicitly out of
//! scope), so there is no `lookup`/`TargetIsa` dispatch layer here -- just
//! the x64 submodules the rest of the crate names directly.

pub(crate) mod reg;
pub(crate) mod x64;
