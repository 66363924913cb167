//! Cell representation — the universal tagged object of the runtime.
//!
//! Every runtime value is one fixed-shape [`Cell`] living in the value pool.
//! Cross-cell references inside payloads are stored compressed as
//! [`CellRef`] (a 16-bit pool index); the pool base plus the index recovers
//! the slot.

use crate::host::ScratchBuffer;
use crate::intern::InternRef;

/// Compressed reference to a pool cell: an index into the value pool.
///
/// Only meaningful relative to the pool that produced it; never portable
/// across runs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef(pub(crate) u16);

impl CellRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for CellRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CellRef({})", self.0)
    }
}

/// A native (host-side) primitive: receives the context and an argument
/// count, reads its arguments from the top of the operand stack, and
/// returns one cell.
pub type NativeFn = fn(&mut crate::ctx::Context, u8) -> CellRef;

/// The three function flavors, selected by what the original kept in the
/// header's mode bits.
#[derive(Clone)]
pub enum FunctionKind {
    /// Host callable.
    Native(NativeFn),
    /// Expression list plus the captured lexical-binding chain.
    Interpreted { code: CellRef, bindings: CellRef },
    /// Cons of (start-offset integer . data-buffer) plus the captured
    /// lexical-binding chain.
    Bytecode { bytecode: CellRef, bindings: CellRef },
}

/// Error kinds carried by error cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    OutOfMemory,
    MismatchedParentheses,
    UndefinedVariableAccess,
    InvalidArgc,
    InvalidArgumentType,
    ValueNotCallable,
    InvalidSyntax,
}

/// Payload variants, one per type tag.
#[derive(Clone)]
pub enum CellKind {
    /// Free cell on the allocator free list. Never observable to user code.
    HeapNode { next: Option<CellRef> },
    Nil,
    Integer(i32),
    Cons { car: CellRef, cdr: CellRef },
    Function(FunctionKind),
    Error { code: ErrorCode, context: CellRef },
    /// Interned name. The constructor distinguishes already-interned
    /// offsets from names that still need interning; once built, only the
    /// offset matters.
    Symbol(InternRef),
    /// Opaque host pointer.
    UserData(*mut ()),
    /// Exclusive owner of one host scratch buffer. Dropping the payload
    /// releases the buffer handle — that is the finalizer.
    DataBuffer(ScratchBuffer),
    /// Shared view into a data buffer, starting at `offset`.
    String { buffer: CellRef, offset: u16 },
    /// Reserved for future use.
    Character(u8),
}

impl CellKind {
    /// Name used by the `type` builtin.
    pub fn type_name(&self) -> &'static str {
        match self {
            CellKind::HeapNode { .. } => "heap-node",
            CellKind::Nil => "nil",
            CellKind::Integer(_) => "integer",
            CellKind::Cons { .. } => "pair",
            CellKind::Function(_) => "function",
            CellKind::Error { .. } => "error",
            CellKind::Symbol(_) => "symbol",
            CellKind::UserData(_) => "ud",
            CellKind::DataBuffer(_) => "databuffer",
            CellKind::String { .. } => "string",
            CellKind::Character(_) => "character",
        }
    }
}

/// One slot of the value pool: a liveness bit, the GC mark bit, and the
/// tagged payload.
pub struct Cell {
    pub(crate) alive: bool,
    pub(crate) mark: bool,
    pub(crate) kind: CellKind,
}

impl Cell {
    pub fn kind(&self) -> &CellKind {
        &self.kind
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_nil_kind(&self) -> bool {
        matches!(self.kind, CellKind::Nil)
    }

    pub fn is_cons(&self) -> bool {
        matches!(self.kind, CellKind::Cons { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, CellKind::Error { .. })
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self.kind, CellKind::Symbol(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.kind, CellKind::Integer(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, CellKind::Function(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self.kind, CellKind::String { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_ref_compression_is_an_index() {
        let r = CellRef(4321);
        assert_eq!(r.index(), 4321);
        assert_eq!(r, CellRef(4321));
    }

    #[test]
    fn error_code_names() {
        assert_eq!(ErrorCode::OutOfMemory.to_string(), "out_of_memory");
        assert_eq!(
            ErrorCode::UndefinedVariableAccess.to_string(),
            "undefined_variable_access"
        );
        let s: &'static str = ErrorCode::ValueNotCallable.into();
        assert_eq!(s, "value_not_callable");
    }

    #[test]
    fn type_names() {
        assert_eq!(CellKind::Nil.type_name(), "nil");
        assert_eq!(CellKind::Integer(3).type_name(), "integer");
        assert_eq!(
            CellKind::Cons {
                car: CellRef(0),
                cdr: CellRef(0)
            }
            .type_name(),
            "pair"
        );
    }
}
