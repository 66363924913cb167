//! minnow — an embedded S-expression runtime for memory-constrained hosts.
//!
//! The runtime is built around four tightly coupled pieces:
//!
//! - a **tagged-value memory model**: every value is one fixed-shape cell
//!   in a [`pool`] of `VALUE_POOL_SIZE` slots, with cross-cell references
//!   compressed to 16-bit indices ([`cell::CellRef`]);
//! - a **mark-and-sweep collector** ([`gc`]) rooted at the context
//!   registers, the operand stack, the globals tree, and explicitly
//!   [`ctx::Protected`] values;
//! - a **reader and tree-walking evaluator** ([`reader`], [`eval`]) with
//!   read-time macro expansion, lexical scoping, and errors-as-values;
//! - a **bytecode VM** ([`vm`]) with tail-call optimization, fed either by
//!   an external compiler or by [`loader`]-installed modules of
//!   position-independent bytecode.
//!
//! The embedding host supplies scratch buffers and a fatal handler through
//! the [`host::Host`] trait; all runtime state lives in a [`Context`]
//! passed explicitly to every entry point.
//!
//! ```
//! use minnow::{dostring, Context, StdHost};
//!
//! let mut ctx = Context::new(Box::new(StdHost::new()));
//! let result = dostring(&mut ctx, "(+ 1 2 3)", |_, _| {});
//! assert_eq!(ctx.integer_value(result), 6);
//! ```

pub mod builder;
mod builtins;
pub mod bytecode;
pub mod cell;
pub mod ctx;
pub mod eval;
pub mod gc;
pub mod globals;
pub mod host;
pub mod intern;
pub mod loader;
pub mod pool;
pub mod print;
pub mod reader;
pub mod vm;

#[cfg(test)]
mod props;

pub use builder::ListBuilder;
pub use bytecode::{disassemble, BytecodeWriter, Opcode};
pub use cell::{Cell, CellKind, CellRef, ErrorCode, FunctionKind, NativeFn};
pub use ctx::{Context, Protected, OPERAND_STACK_CAPACITY};
pub use eval::{dostring, eval, funcall};
pub use gc::run_gc;
pub use host::{Host, IntegralConstant, ScratchBuffer, StdHost, SCRATCH_BUFFER_SIZE};
pub use intern::{InternRef, InternTable, INTERN_TABLE_SIZE};
pub use loader::{load_module, ModuleError};
pub use pool::{ValuePool, VALUE_POOL_SIZE};
pub use print::format_value;
pub use reader::read;
pub use vm::vm_execute;

/// One-time setup: build a runtime bound to the given host.
pub fn init(host: Box<dyn Host>) -> Context {
    Context::new(host)
}
