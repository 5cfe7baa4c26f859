//! A just-in-time compiler for a small tree of scalar arithmetic, pointer
//! and comparison expressions, emitting x86-64 machine code directly
//! through `dynasmrt`.
//!
//! There is no parser and no textual surface syntax. Callers build an
//! expression by calling typed factory methods on a
//! [`driver::Compiler`] against a caller-owned [`arena::Arena`], then call
//! [`driver::Compiler::finalize`] to get back a [`tree::Compiled`] function
//! that can be cast to a concrete `extern "C"` function pointer and called
//! directly.
//!
//! ```ignore
//! use vesuvius::{Arena, Compiler};
//!
//! let arena = Arena::new();
//! let mut c = Compiler::new(&arena);
//! let a = c.parameter::<i64>().unwrap();
//! let b = c.parameter::<i64>().unwrap();
//! let sum = c.add(a, b).unwrap();
//! let ret = c.return_of(sum).unwrap();
//! let compiled = c.finalize(ret).unwrap();
//! let f: extern "C" fn(i64, i64) -> i64 = unsafe { compiled.cast() };
//! assert_eq!(f(2, 3), 5);
//! ```

mod abi;
mod arena;
mod cpu;
mod driver;
mod error;
mod frame;
mod isa;
mod node;
mod options;
mod precondition;
mod regalloc;
mod storage;
mod tree;

pub use arena::Arena;
pub use cpu::is_popcnt_supported;
pub use driver::{Compiler, Immediate, Node, Ptr, Repr, ReturnNode, Scalar};
pub use error::{CompileError, Result};
pub use node::NodeState;
pub use options::JitOptions;
pub use precondition::{CmpOp, Condition};
pub use tree::Compiled;
