//! Runtime context — every piece of per-runtime state, passed explicitly.
//!
//! The context owns the value pool, the intern arena, the operand stack,
//! the protected-root stack, and the handful of registers the evaluator and
//! VM share (`this`, the lexical binding chain, the argument break
//! location). Public entry points take `&mut Context`; nothing lives in
//! module-level state.

use crate::cell::{Cell, CellKind, CellRef, ErrorCode, FunctionKind, NativeFn};
use crate::host::{Host, IntegralConstant, ScratchBuffer, SCRATCH_BUFFER_SIZE};
use crate::intern::{InternRef, InternTable};
use crate::pool::ValuePool;

/// Initial operand stack capacity. The stack is seeded with two nils so the
/// first few entries can be read without size checks.
pub const OPERAND_STACK_CAPACITY: usize = 497;

/// A registered GC root whose lifetime is bound to an enclosing scope.
///
/// Roots are released in LIFO order via [`Context::unprotect`]; the type is
/// deliberately not `Copy`/`Clone` so a slot cannot be released twice.
pub struct Protected {
    slot: usize,
}

/// Names the evaluator and reader compare against, interned once at init.
pub(crate) struct WellKnownSyms {
    pub(crate) quote: InternRef,
    pub(crate) quasiquote: InternRef,
    pub(crate) unquote: InternRef,
    pub(crate) splice: InternRef,
    pub(crate) if_: InternRef,
    pub(crate) lambda: InternRef,
    pub(crate) let_: InternRef,
    pub(crate) macro_: InternRef,
    pub(crate) quote_named: InternRef,
    pub(crate) quasiquote_named: InternRef,
}

pub struct Context {
    pub(crate) pool: ValuePool,
    pub(crate) interns: InternTable,
    pub(crate) operand_stack: Vec<CellRef>,
    pub(crate) protected: Vec<CellRef>,

    pub(crate) nil: CellRef,
    pub(crate) oom: CellRef,
    /// Most recent string buffer, tracked for tail-packing new strings.
    pub(crate) string_buffer: CellRef,
    pub(crate) globals_tree: CellRef,
    pub(crate) lexical_bindings: CellRef,
    pub(crate) macros: CellRef,
    pub(crate) this_fn: CellRef,

    pub(crate) arguments_break_loc: u16,
    pub(crate) current_fn_argc: u8,
    pub(crate) interp_entry_count: i32,

    pub(crate) constants: &'static [IntegralConstant],
    pub(crate) syms: WellKnownSyms,
    pub(crate) host: Box<dyn Host>,
}

impl Context {
    /// One-time setup: thread the pool, allocate the nil and OOM
    /// singletons, seed the operand stack, run the compression self-test,
    /// and install the built-in library.
    pub fn new(mut host: Box<dyn Host>) -> Self {
        let mut pool = ValuePool::new();

        let nil = match pool.alloc() {
            Some(r) => r,
            None => host.fatal("value pool empty at init"),
        };
        pool.get_mut(nil).kind = CellKind::Nil;

        let oom = match pool.alloc() {
            Some(r) => r,
            None => host.fatal("value pool empty at init"),
        };
        pool.get_mut(oom).kind = CellKind::Error {
            code: ErrorCode::OutOfMemory,
            context: nil,
        };

        let mut interns = InternTable::new();
        let mut named = |table: &mut InternTable, name: &str| match table.intern(name) {
            Some(r) => r,
            None => host.fatal("string intern table full"),
        };
        let syms = WellKnownSyms {
            quote: named(&mut interns, "'"),
            quasiquote: named(&mut interns, "`"),
            unquote: named(&mut interns, ","),
            splice: named(&mut interns, "@"),
            if_: named(&mut interns, "if"),
            lambda: named(&mut interns, "lambda"),
            let_: named(&mut interns, "let"),
            macro_: named(&mut interns, "macro"),
            quote_named: named(&mut interns, "quote"),
            quasiquote_named: named(&mut interns, "quasiquote"),
        };

        let mut ctx = Context {
            pool,
            interns,
            operand_stack: Vec::with_capacity(OPERAND_STACK_CAPACITY),
            protected: Vec::new(),
            nil,
            oom,
            string_buffer: nil,
            globals_tree: nil,
            lexical_bindings: nil,
            macros: nil,
            this_fn: nil,
            arguments_break_loc: 0,
            current_fn_argc: 0,
            interp_entry_count: 0,
            constants: &[],
            syms,
            host,
        };

        // A couple of nils at the bottom allow reading the first stack
        // entries without size checks.
        ctx.push_op(nil);
        ctx.push_op(nil);

        // Compression self-test: a reference must decompress to the slot it
        // was compressed from.
        let round_trip = CellRef(ctx.nil.0);
        if !std::ptr::eq(ctx.pool.get(round_trip), ctx.pool.get(ctx.nil)) {
            ctx.host.fatal("pointer compression test failed");
        }
        if !ctx.pool.get(ctx.nil).is_nil_kind() {
            ctx.host.fatal("pointer compression test failed");
        }

        crate::builtins::install(&mut ctx);
        ctx
    }

    // -----------------------------------------------------------------------
    // Singletons and cell access
    // -----------------------------------------------------------------------

    #[inline]
    pub fn nil(&self) -> CellRef {
        self.nil
    }

    #[inline]
    pub fn oom(&self) -> CellRef {
        self.oom
    }

    #[inline]
    pub fn cell(&self, r: CellRef) -> &Cell {
        self.pool.get(r)
    }

    #[inline]
    pub fn kind(&self, r: CellRef) -> &CellKind {
        &self.pool.get(r).kind
    }

    pub fn car(&self, r: CellRef) -> CellRef {
        match self.kind(r) {
            CellKind::Cons { car, .. } => *car,
            other => panic!("car of non-cons ({})", other.type_name()),
        }
    }

    pub fn cdr(&self, r: CellRef) -> CellRef {
        match self.kind(r) {
            CellKind::Cons { cdr, .. } => *cdr,
            other => panic!("cdr of non-cons ({})", other.type_name()),
        }
    }

    pub fn set_car(&mut self, r: CellRef, value: CellRef) {
        match &mut self.pool.get_mut(r).kind {
            CellKind::Cons { car, .. } => *car = value,
            other => panic!("set_car of non-cons ({})", other.type_name()),
        }
    }

    pub fn set_cdr(&mut self, r: CellRef, value: CellRef) {
        match &mut self.pool.get_mut(r).kind {
            CellKind::Cons { cdr, .. } => *cdr = value,
            other => panic!("set_cdr of non-cons ({})", other.type_name()),
        }
    }

    pub fn integer_value(&self, r: CellRef) -> i32 {
        match self.kind(r) {
            CellKind::Integer(v) => *v,
            other => panic!("integer payload of non-integer ({})", other.type_name()),
        }
    }

    pub fn symbol_intern(&self, r: CellRef) -> InternRef {
        match self.kind(r) {
            CellKind::Symbol(name) => *name,
            other => panic!("symbol name of non-symbol ({})", other.type_name()),
        }
    }

    pub fn symbol_name(&self, r: CellRef) -> &str {
        self.interns.resolve(self.symbol_intern(r))
    }

    pub fn error_code(&self, r: CellRef) -> ErrorCode {
        match self.kind(r) {
            CellKind::Error { code, .. } => *code,
            other => panic!("error code of non-error ({})", other.type_name()),
        }
    }

    pub fn error_context(&self, r: CellRef) -> CellRef {
        match self.kind(r) {
            CellKind::Error { context, .. } => *context,
            other => panic!("error context of non-error ({})", other.type_name()),
        }
    }

    pub(crate) fn databuffer_handle(&self, r: CellRef) -> ScratchBuffer {
        match self.kind(r) {
            CellKind::DataBuffer(handle) => handle.clone(),
            other => panic!("data buffer of non-databuffer ({})", other.type_name()),
        }
    }

    /// Copy a string cell's bytes (offset up to the first NUL) out of its
    /// backing buffer.
    pub fn string_value(&self, r: CellRef) -> String {
        let (buffer, offset) = match self.kind(r) {
            CellKind::String { buffer, offset } => (*buffer, *offset as usize),
            other => panic!("string payload of non-string ({})", other.type_name()),
        };
        self.databuffer_handle(buffer).with(|data| {
            let tail = &data[offset..];
            let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
            String::from_utf8_lossy(&tail[..end]).into_owned()
        })
    }

    // -----------------------------------------------------------------------
    // Predicates and list helpers
    // -----------------------------------------------------------------------

    #[inline]
    pub fn is_nil(&self, r: CellRef) -> bool {
        r == self.nil
    }

    /// Boolean truth: any non-zero integer, or any non-integer value other
    /// than nil.
    pub fn is_boolean_true(&self, r: CellRef) -> bool {
        match self.kind(r) {
            CellKind::Integer(v) => *v != 0,
            _ => r != self.nil,
        }
    }

    /// True for nil and proper cons chains ending in nil.
    pub fn is_list(&self, r: CellRef) -> bool {
        let mut cursor = r;
        while cursor != self.nil {
            match self.kind(cursor) {
                CellKind::Cons { cdr, .. } => cursor = *cdr,
                _ => return false,
            }
        }
        true
    }

    /// Length of a proper list; 0 for nil or any malformed chain.
    pub fn list_length(&self, r: CellRef) -> i32 {
        if r == self.nil {
            return 0;
        }
        let mut len = 0;
        let mut cursor = r;
        loop {
            match self.kind(cursor) {
                CellKind::Cons { cdr, .. } => {
                    len += 1;
                    cursor = *cdr;
                }
                _ => return 0,
            }
            if cursor == self.nil {
                return len;
            }
            if !self.cell(cursor).is_cons() {
                return 0;
            }
        }
    }

    /// Element at `position`, or nil when the walk runs off the list.
    pub fn get_list(&self, list: CellRef, position: u32) -> CellRef {
        let mut cursor = list;
        for _ in 0..position {
            match self.kind(cursor) {
                CellKind::Cons { cdr, .. } => cursor = *cdr,
                _ => return self.nil,
            }
        }
        match self.kind(cursor) {
            CellKind::Cons { car, .. } => *car,
            _ => self.nil,
        }
    }

    /// Overwrite the element at `position`; out-of-range writes are dropped.
    pub fn set_list(&mut self, list: CellRef, position: u32, value: CellRef) {
        let mut cursor = list;
        for _ in 0..position {
            match self.kind(cursor) {
                CellKind::Cons { cdr, .. } => cursor = *cdr,
                _ => return,
            }
        }
        if self.cell(cursor).is_cons() {
            self.set_car(cursor, value);
        }
    }

    /// Walk a proper list, invoking `f` on each car. The caller must keep
    /// `list` rooted if `f` can allocate.
    pub(crate) fn for_each_list(
        &mut self,
        list: CellRef,
        mut f: impl FnMut(&mut Context, CellRef),
    ) {
        let mut cursor = list;
        while cursor != self.nil {
            let (car, cdr) = match self.kind(cursor) {
                CellKind::Cons { car, cdr } => (*car, *cdr),
                _ => return,
            };
            f(self, car);
            cursor = cdr;
        }
    }

    /// Structural equality with a recursion guard; reference identity for
    /// functions, user data, and buffers.
    pub fn equal_value(&self, a: CellRef, b: CellRef, depth: usize) -> bool {
        if depth > 4096 {
            return false;
        }
        match (self.kind(a), self.kind(b)) {
            (CellKind::Nil, CellKind::Nil) => true,
            (CellKind::Integer(x), CellKind::Integer(y)) => x == y,
            (CellKind::Symbol(x), CellKind::Symbol(y)) => x == y,
            (CellKind::String { .. }, CellKind::String { .. }) => {
                self.string_value(a) == self.string_value(b)
            }
            (CellKind::Cons { .. }, CellKind::Cons { .. }) => {
                if a == b {
                    return true;
                }
                self.equal_value(self.car(a), self.car(b), depth + 1)
                    && self.equal_value(self.cdr(a), self.cdr(b), depth + 1)
            }
            (CellKind::UserData(x), CellKind::UserData(y)) => x == y,
            (CellKind::Function(_), CellKind::Function(_))
            | (CellKind::DataBuffer(_), CellKind::DataBuffer(_)) => a == b,
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Operand stack
    // -----------------------------------------------------------------------

    #[inline]
    pub fn push_op(&mut self, value: CellRef) {
        self.operand_stack.push(value);
    }

    #[inline]
    pub fn pop_op(&mut self) {
        debug_assert!(!self.operand_stack.is_empty(), "operand stack underflow");
        self.operand_stack.pop();
    }

    #[inline]
    pub fn get_op0(&self) -> CellRef {
        *self.operand_stack.last().expect("operand stack underflow")
    }

    #[inline]
    pub fn get_op1(&self) -> CellRef {
        self.operand_stack[self.operand_stack.len() - 2]
    }

    /// Entry `offset` below the top; nil when out of range.
    pub fn get_op(&self, offset: u32) -> CellRef {
        let offset = offset as usize;
        if offset >= self.operand_stack.len() {
            return self.nil;
        }
        self.operand_stack[self.operand_stack.len() - 1 - offset]
    }

    pub fn stack_depth(&self) -> usize {
        self.operand_stack.len()
    }

    // -----------------------------------------------------------------------
    // Protected roots
    // -----------------------------------------------------------------------

    /// Register a scoped GC root. Must be released with [`Self::unprotect`]
    /// in LIFO order.
    pub fn protect(&mut self, value: CellRef) -> Protected {
        self.protected.push(value);
        Protected {
            slot: self.protected.len() - 1,
        }
    }

    pub fn protected_get(&self, p: &Protected) -> CellRef {
        self.protected[p.slot]
    }

    /// Re-point a protected root at a different cell.
    pub fn protected_set(&mut self, p: &Protected, value: CellRef) {
        self.protected[p.slot] = value;
    }

    pub fn unprotect(&mut self, p: Protected) {
        debug_assert_eq!(
            p.slot,
            self.protected.len() - 1,
            "protected roots must be released in LIFO order"
        );
        self.protected.truncate(p.slot);
    }

    // -----------------------------------------------------------------------
    // Lexical frames
    // -----------------------------------------------------------------------

    pub(crate) fn lexical_frame_push(&mut self) {
        let nil = self.nil;
        self.lexical_bindings = self.make_cons(nil, self.lexical_bindings);
    }

    pub(crate) fn lexical_frame_pop(&mut self) {
        self.lexical_bindings = self.cdr(self.lexical_bindings);
    }

    /// Prepend a (symbol . value) pair onto the innermost frame. The pair
    /// must be rooted by the caller.
    pub(crate) fn lexical_frame_store(&mut self, kvp: CellRef) {
        let frame = self.car(self.lexical_bindings);
        let new_frame = self.make_cons(kvp, frame);
        self.set_car(self.lexical_bindings, new_frame);
    }

    // -----------------------------------------------------------------------
    // Call frame registers
    // -----------------------------------------------------------------------

    /// Positional argument `n` of the current call frame.
    pub fn get_arg(&self, n: u16) -> CellRef {
        let br = self.arguments_break_loc as usize;
        let argc = self.current_fn_argc as usize;
        let back = argc.wrapping_sub(1).wrapping_sub(n as usize);
        if argc > n as usize && br >= back {
            self.operand_stack[br - back]
        } else {
            self.nil
        }
    }

    pub fn get_argc(&self) -> u8 {
        self.current_fn_argc
    }

    /// The currently-executing function cell.
    pub fn get_this(&self) -> CellRef {
        self.this_fn
    }

    /// True while an `eval`/`dostring` entry is on the host call stack.
    pub fn is_executing(&self) -> bool {
        self.interp_entry_count > 0
    }

    // -----------------------------------------------------------------------
    // Interning
    // -----------------------------------------------------------------------

    /// Intern a name; intern-table overflow is fatal.
    pub fn intern(&mut self, name: &str) -> InternRef {
        match self.interns.intern(name) {
            Some(r) => r,
            None => self.host.fatal("string intern table full"),
        }
    }

    pub fn intern_name(&self, r: InternRef) -> &str {
        self.interns.resolve(r)
    }

    /// Visit every interned name, then every host constant name.
    pub fn get_interns(&self, mut f: impl FnMut(&str)) {
        self.interns.for_each(&mut f);
        for k in self.constants {
            f(k.name);
        }
    }

    /// Visit the name of every global binding, then every host constant.
    pub fn get_env(&mut self, mut f: impl FnMut(&mut Context, InternRef)) {
        let mut names = Vec::new();
        crate::globals::traverse(self, |ctx, kvp, _node| {
            names.push(ctx.symbol_intern(ctx.car(kvp)));
        });
        for name in names {
            f(self, name);
        }
        for k in self.constants {
            let name = self.intern(k.name);
            f(self, name);
        }
    }

    /// Visit every live cell in the pool.
    pub fn live_values(&self, mut f: impl FnMut(CellRef, &Cell)) {
        self.pool.for_each_live(&mut f);
    }

    /// Register the host constants table consulted after globals lookup
    /// misses.
    pub fn set_constants(&mut self, table: &'static [IntegralConstant]) {
        self.constants = table;
    }

    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Pop a slot from the pool, collecting once on exhaustion. `None`
    /// means the pool is truly full; constructors translate that into the
    /// OOM sentinel.
    fn alloc_value(&mut self) -> Option<CellRef> {
        if let Some(r) = self.pool.alloc() {
            return Some(r);
        }
        crate::gc::run_gc(self);
        self.pool.alloc()
    }

    pub fn make_cons(&mut self, car: CellRef, cdr: CellRef) -> CellRef {
        match self.alloc_value() {
            Some(r) => {
                self.pool.get_mut(r).kind = CellKind::Cons { car, cdr };
                r
            }
            None => self.oom,
        }
    }

    pub fn make_integer(&mut self, value: i32) -> CellRef {
        match self.alloc_value() {
            Some(r) => {
                self.pool.get_mut(r).kind = CellKind::Integer(value);
                r
            }
            None => self.oom,
        }
    }

    /// Symbol from a name that still needs interning.
    pub fn make_symbol(&mut self, name: &str) -> CellRef {
        let interned = self.intern(name);
        self.make_symbol_interned(interned)
    }

    /// Symbol from an already-interned name (the "stable pointer" mode of
    /// the constructor).
    pub fn make_symbol_interned(&mut self, name: InternRef) -> CellRef {
        match self.alloc_value() {
            Some(r) => {
                self.pool.get_mut(r).kind = CellKind::Symbol(name);
                r
            }
            None => self.oom,
        }
    }

    pub fn make_error(&mut self, code: ErrorCode, context: CellRef) -> CellRef {
        match self.alloc_value() {
            Some(r) => {
                self.pool.get_mut(r).kind = CellKind::Error { code, context };
                r
            }
            None => self.oom,
        }
    }

    pub fn make_userdata(&mut self, obj: *mut ()) -> CellRef {
        match self.alloc_value() {
            Some(r) => {
                self.pool.get_mut(r).kind = CellKind::UserData(obj);
                r
            }
            None => self.oom,
        }
    }

    /// Native (host-side) function.
    pub fn make_function(&mut self, imp: NativeFn) -> CellRef {
        match self.alloc_value() {
            Some(r) => {
                self.pool.get_mut(r).kind = CellKind::Function(FunctionKind::Native(imp));
                r
            }
            None => self.oom,
        }
    }

    /// Interpreted function: captures the current lexical-binding chain.
    pub fn make_lisp_function(&mut self, code: CellRef) -> CellRef {
        let bindings = self.lexical_bindings;
        match self.alloc_value() {
            Some(r) => {
                self.pool.get_mut(r).kind =
                    CellKind::Function(FunctionKind::Interpreted { code, bindings });
                r
            }
            None => self.oom,
        }
    }

    /// Bytecode function: `bytecode` is a cons of (start-offset integer .
    /// data-buffer). Captures the current lexical-binding chain.
    pub fn make_bytecode_function(&mut self, bytecode: CellRef) -> CellRef {
        let bindings = self.lexical_bindings;
        match self.alloc_value() {
            Some(r) => {
                self.pool.get_mut(r).kind =
                    CellKind::Function(FunctionKind::Bytecode { bytecode, bindings });
                r
            }
            None => self.oom,
        }
    }

    /// Acquire a scratch buffer from the host, pre-collecting when the host
    /// reports none remaining.
    pub fn make_databuffer(&mut self) -> CellRef {
        if self.host.scratch_buffers_remaining() == 0 {
            crate::gc::run_gc(self);
        }
        match self.alloc_value() {
            Some(r) => {
                let buffer = self.host.make_scratch_buffer();
                self.pool.get_mut(r).kind = CellKind::DataBuffer(buffer);
                r
            }
            None => self.oom,
        }
    }

    /// An n-element nil-filled list. The head is kept on the operand stack
    /// between allocations so a collection cannot reclaim it.
    pub fn make_list(&mut self, length: u32) -> CellRef {
        if length == 0 {
            return self.nil;
        }
        let nil = self.nil;
        let mut head = self.make_cons(nil, nil);
        for _ in 1..length {
            self.push_op(head);
            let cell = self.make_cons(nil, head);
            self.pop_op();
            head = cell;
        }
        head
    }

    /// Allocate a string, packing into the unused tail of the most recent
    /// string buffer when it fits.
    pub fn make_string(&mut self, s: &str) -> CellRef {
        let len = s.len();

        let mut existing = None;
        if self.string_buffer != self.nil {
            let buffer = self.string_buffer;
            let free = self.databuffer_handle(buffer).with(|data| {
                let mut free = 0;
                for i in (1..SCRATCH_BUFFER_SIZE).rev() {
                    if data[i] == 0 {
                        free += 1;
                    } else {
                        break;
                    }
                }
                free
            });
            if free > len + 1 {
                existing = Some((buffer, free));
            } else {
                self.string_buffer = self.nil;
            }
        }

        if let Some((buffer, free)) = existing {
            let offset = (SCRATCH_BUFFER_SIZE - free) + 1;
            self.databuffer_handle(buffer).with_mut(|data| {
                data[offset..offset + len].copy_from_slice(s.as_bytes());
            });
            match self.alloc_value() {
                Some(r) => {
                    self.pool.get_mut(r).kind = CellKind::String {
                        buffer,
                        offset: offset as u16,
                    };
                    r
                }
                None => self.oom,
            }
        } else {
            if len + 1 > SCRATCH_BUFFER_SIZE {
                return self.make_error(ErrorCode::InvalidArgumentType, self.nil);
            }
            let buffer = self.make_databuffer();
            if buffer == self.oom {
                return self.oom;
            }
            let p = self.protect(buffer);
            self.string_buffer = buffer;
            self.databuffer_handle(buffer).with_mut(|data| {
                data.fill(0);
                data[..len].copy_from_slice(s.as_bytes());
            });
            let result = match self.alloc_value() {
                Some(r) => {
                    self.pool.get_mut(r).kind = CellKind::String { buffer, offset: 0 };
                    r
                }
                None => self.oom,
            };
            self.unprotect(p);
            result
        }
    }

    // -----------------------------------------------------------------------
    // Variable lookup
    // -----------------------------------------------------------------------

    /// Resolve a symbol: `$`-shorthands, then the lexical chain, then the
    /// globals tree, then the host constants table.
    pub fn get_var(&mut self, symbol: CellRef) -> CellRef {
        // `$V` yields the current arguments as a list; `$N` the N-th one.
        enum Shorthand {
            None,
            AllArgs,
            Arg(u16),
        }
        let shorthand = {
            let name = self.symbol_name(symbol);
            if let Some(rest) = name.strip_prefix('$') {
                if rest == "V" {
                    Shorthand::AllArgs
                } else if let Ok(n) = rest.parse::<u16>() {
                    Shorthand::Arg(n)
                } else {
                    Shorthand::None
                }
            } else {
                Shorthand::None
            }
        };
        match shorthand {
            Shorthand::AllArgs => {
                let mut builder = crate::builder::ListBuilder::new(self);
                for i in 0..self.current_fn_argc as u16 {
                    let arg = self.get_arg(i);
                    builder.push_back(self, arg);
                }
                return builder.result(self);
            }
            Shorthand::Arg(n) => return self.get_arg(n),
            Shorthand::None => {}
        }

        let target = self.symbol_intern(symbol);
        if let Some(found) = self.lexical_lookup(target) {
            return self.cdr(found);
        }

        let found = crate::globals::find(self, symbol);
        if !self.cell(found).is_error() {
            return found;
        }

        let name = self.symbol_name(symbol);
        if let Some(value) = self
            .constants
            .iter()
            .find(|k| k.name == name)
            .map(|k| k.value)
        {
            return self.make_integer(value);
        }
        found
    }

    /// Assign a symbol: overwrite a lexical binding when one exists,
    /// otherwise insert into the globals tree. Returns nil.
    pub fn set_var(&mut self, symbol: CellRef, value: CellRef) -> CellRef {
        let target = self.symbol_intern(symbol);
        if let Some(kvp) = self.lexical_lookup(target) {
            self.set_cdr(kvp, value);
            return self.nil;
        }
        crate::globals::insert(self, symbol, value);
        self.nil
    }

    /// Innermost (symbol . value) pair bound to `target`, if any.
    fn lexical_lookup(&self, target: InternRef) -> Option<CellRef> {
        let mut stack = self.lexical_bindings;
        while stack != self.nil {
            let mut bindings = self.car(stack);
            while bindings != self.nil {
                let kvp = self.car(bindings);
                if self.symbol_intern(self.car(kvp)) == target {
                    return Some(kvp);
                }
                bindings = self.cdr(bindings);
            }
            stack = self.cdr(stack);
        }
        None
    }

    /// By-name variants for the embedder.
    pub fn set_var_named(&mut self, name: &str, value: CellRef) {
        let p = self.protect(value);
        let symbol = self.make_symbol(name);
        let ps = self.protect(symbol);
        self.set_var(symbol, value);
        self.unprotect(ps);
        self.unprotect(p);
    }

    pub fn get_var_named(&mut self, name: &str) -> CellRef {
        let symbol = self.make_symbol(name);
        let p = self.protect(symbol);
        let result = self.get_var(symbol);
        self.unprotect(p);
        result
    }

    /// Variable lookup by interned name, used by resolved bytecode.
    pub(crate) fn get_var_interned(&mut self, name: InternRef) -> CellRef {
        let symbol = self.make_symbol_interned(name);
        let p = self.protect(symbol);
        let result = self.get_var(symbol);
        self.unprotect(p);
        result
    }
}
