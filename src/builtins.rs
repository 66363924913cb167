//! Built-in primitive library, installed as global bindings at init.
//!
//! Every builtin is a native function: it reads its pre-evaluated
//! arguments from the top of the operand stack (argument 0 deepest) and
//! returns one cell. The caller pops the arguments and pushes the result.
//! Validation failures come back as error cells, never panics.

use crate::builder::ListBuilder;
use crate::cell::{CellKind, CellRef, ErrorCode, NativeFn};
use crate::ctx::Context;
use crate::eval;
use crate::gc::run_gc;
use crate::globals;
use crate::print;

macro_rules! expect_argc {
    ($ctx:expr, $argc:expr, $want:expr) => {
        if $argc != $want {
            let nil = $ctx.nil();
            return $ctx.make_error(ErrorCode::InvalidArgc, nil);
        }
    };
}

macro_rules! expect_op {
    ($ctx:expr, $offset:expr, $pred:ident) => {{
        let v = $ctx.get_op($offset);
        if !$ctx.cell(v).$pred() {
            return $ctx.make_error(ErrorCode::InvalidArgumentType, v);
        }
    }};
}

/// Install every builtin into the globals tree.
pub(crate) fn install(ctx: &mut Context) {
    const TABLE: &[(&str, NativeFn)] = &[
        ("set", bi_set),
        ("cons", bi_cons),
        ("car", bi_car),
        ("cdr", bi_cdr),
        ("list", bi_list),
        ("arg", bi_arg),
        ("progn", bi_progn),
        ("any-true", bi_any_true),
        ("all-true", bi_all_true),
        ("not", bi_not),
        ("equal", bi_equal),
        ("apply", bi_apply),
        ("fill", bi_fill),
        ("gen", bi_gen),
        ("length", bi_length),
        ("<", bi_less),
        (">", bi_greater),
        ("+", bi_add),
        ("-", bi_sub),
        ("*", bi_mul),
        ("/", bi_div),
        ("interp-stat", bi_interp_stat),
        ("range", bi_range),
        ("unbind", bi_unbind),
        ("symbol", bi_symbol),
        ("type", bi_type),
        ("string", bi_string),
        ("bound", bi_bound),
        ("filter", bi_filter),
        ("map", bi_map),
        ("reverse", bi_reverse),
        ("select", bi_select),
        ("gc", bi_gc),
        ("get", bi_get),
        ("read", bi_read),
        ("eval", bi_eval),
        ("globals", bi_globals),
        ("this", bi_this),
        ("argc", bi_argc),
        ("env", bi_env),
    ];

    for &(name, imp) in TABLE {
        let function = ctx.make_function(imp);
        ctx.set_var_named(name, function);
    }
}

// ---------------------------------------------------------------------------
// Core data primitives
// ---------------------------------------------------------------------------

fn bi_set(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    expect_op!(ctx, 1, is_symbol);
    let symbol = ctx.get_op1();
    let value = ctx.get_op0();
    ctx.set_var(symbol, value)
}

fn bi_cons(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    let car = ctx.get_op1();
    let cdr = ctx.get_op0();

    // An error argument propagates instead of being consed into structure.
    if ctx.cell(car).is_error() {
        return car;
    }
    if ctx.cell(cdr).is_error() {
        return cdr;
    }

    ctx.make_cons(car, cdr)
}

fn bi_car(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 1);
    expect_op!(ctx, 0, is_cons);
    ctx.car(ctx.get_op0())
}

fn bi_cdr(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 1);
    expect_op!(ctx, 0, is_cons);
    ctx.cdr(ctx.get_op0())
}

fn bi_list(ctx: &mut Context, argc: u8) -> CellRef {
    let lat = ctx.make_list(argc as u32);
    for i in 0..argc as u32 {
        let value = ctx.get_op((argc as u32 - 1) - i);
        if ctx.cell(value).is_error() {
            return value;
        }
        ctx.set_list(lat, i, value);
    }
    lat
}

fn bi_arg(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 1);
    expect_op!(ctx, 0, is_integer);
    let n = ctx.integer_value(ctx.get_op0()).max(0) as u16;
    ctx.get_arg(n)
}

fn bi_progn(ctx: &mut Context, _argc: u8) -> CellRef {
    // Arguments were already evaluated in order; the last one is the value.
    ctx.get_op(0)
}

fn bi_any_true(ctx: &mut Context, argc: u8) -> CellRef {
    for i in 0..argc as u32 {
        let v = ctx.get_op(i);
        if ctx.is_boolean_true(v) {
            return v;
        }
    }
    ctx.nil()
}

fn bi_all_true(ctx: &mut Context, argc: u8) -> CellRef {
    for i in 0..argc as u32 {
        let v = ctx.get_op(i);
        if !ctx.is_boolean_true(v) {
            return ctx.nil();
        }
    }
    ctx.make_integer(1)
}

fn bi_not(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 1);
    let v = ctx.get_op0();
    let value = !ctx.is_boolean_true(v);
    ctx.make_integer(value as i32)
}

fn bi_equal(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    let a = ctx.get_op1();
    let b = ctx.get_op0();
    let equal = ctx.equal_value(a, b, 0);
    ctx.make_integer(equal as i32)
}

fn bi_apply(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    expect_op!(ctx, 0, is_cons);
    expect_op!(ctx, 1, is_function);

    let mut lat = ctx.get_op0();
    let function = ctx.get_op1();

    let mut apply_argc: u8 = 0;
    while !ctx.is_nil(lat) {
        if !ctx.cell(lat).is_cons() {
            for _ in 0..apply_argc {
                ctx.pop_op();
            }
            return ctx.make_error(ErrorCode::InvalidArgumentType, lat);
        }
        let value = ctx.car(lat);
        ctx.push_op(value);
        apply_argc += 1;
        lat = ctx.cdr(lat);
    }

    eval::funcall(ctx, function, apply_argc);
    let result = ctx.get_op0();
    ctx.pop_op();
    result
}

// ---------------------------------------------------------------------------
// List utilities
// ---------------------------------------------------------------------------

fn bi_fill(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    expect_op!(ctx, 1, is_integer);

    let count = ctx.integer_value(ctx.get_op1()).max(0) as u32;
    let value = ctx.get_op0();
    let result = ctx.make_list(count);
    for i in 0..count {
        ctx.set_list(result, i, value);
    }
    result
}

fn bi_gen(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    expect_op!(ctx, 1, is_integer);

    let count = ctx.integer_value(ctx.get_op1()).max(0) as u32;
    let function = ctx.get_op0();
    let result = ctx.make_list(count);
    ctx.push_op(result);
    for i in 0..count {
        let index = ctx.make_integer(i as i32);
        ctx.push_op(index);
        eval::funcall(ctx, function, 1);
        let value = ctx.get_op0();
        ctx.set_list(result, i, value);
        ctx.pop_op(); // funcall result
    }
    ctx.pop_op(); // result
    result
}

fn bi_length(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 1);
    if ctx.is_nil(ctx.get_op0()) {
        return ctx.make_integer(0);
    }
    expect_op!(ctx, 0, is_cons);
    let len = ctx.list_length(ctx.get_op0());
    ctx.make_integer(len)
}

fn bi_filter(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    expect_op!(ctx, 0, is_cons);
    expect_op!(ctx, 1, is_function);

    let function = ctx.get_op1();
    let mut kept = ListBuilder::new(ctx);

    let mut lat = ctx.get_op0();
    while !ctx.is_nil(lat) && ctx.cell(lat).is_cons() {
        let value = ctx.car(lat);
        ctx.push_op(value);
        eval::funcall(ctx, function, 1);
        let verdict = ctx.get_op0();
        if ctx.is_boolean_true(verdict) {
            kept.push_back(ctx, value);
        }
        ctx.pop_op(); // funcall result
        lat = ctx.cdr(lat);
    }

    kept.result(ctx)
}

fn bi_map(ctx: &mut Context, argc: u8) -> CellRef {
    if argc < 2 {
        return ctx.nil();
    }

    let function = ctx.get_op(argc as u32 - 1);
    if !ctx.cell(function).is_function() {
        let nil = ctx.nil();
        return ctx.make_error(ErrorCode::InvalidArgumentType, nil);
    }

    let list_count = (argc - 1) as u32;
    if list_count > 6 {
        let nil = ctx.nil();
        return ctx.make_error(ErrorCode::InvalidArgc, nil);
    }

    // Operand offsets run newest-first, so offset 0 is the *last* list.
    let mut cursors: Vec<CellRef> = Vec::with_capacity(list_count as usize);
    for i in 0..list_count {
        expect_op!(ctx, i, is_cons);
        cursors.push(ctx.get_op(i));
    }

    let len = ctx.list_length(cursors[0]);
    if len == 0 {
        return ctx.nil();
    }
    for lat in &cursors {
        if ctx.list_length(*lat) != len {
            return ctx.nil();
        }
    }

    let result = ctx.make_list(len as u32);
    ctx.push_op(result); // keep reachable across the funcalls

    for index in 0..len as u32 {
        // Arguments go in source order: the first list's element first.
        for cursor in cursors.iter_mut().rev() {
            let value = ctx.car(*cursor);
            ctx.push_op(value);
            *cursor = ctx.cdr(*cursor);
        }
        eval::funcall(ctx, function, list_count as u8);
        let value = ctx.get_op0();
        ctx.set_list(result, index, value);
        ctx.pop_op();
    }

    ctx.pop_op(); // result
    result
}

fn bi_reverse(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 1);
    expect_op!(ctx, 0, is_cons);

    let mut result = ctx.nil();
    let mut lat = ctx.get_op0();
    while !ctx.is_nil(lat) && ctx.cell(lat).is_cons() {
        let value = ctx.car(lat);
        ctx.push_op(result);
        result = ctx.make_cons(value, result);
        ctx.pop_op();
        lat = ctx.cdr(lat);
    }
    result
}

fn bi_select(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    expect_op!(ctx, 0, is_cons);
    expect_op!(ctx, 1, is_cons);

    let input = ctx.get_op1();
    let selection = ctx.get_op0();

    let len = ctx.list_length(input);
    if len == 0 || len != ctx.list_length(selection) {
        return ctx.nil();
    }

    let mut result = ctx.nil();
    for i in (0..len as u32).rev() {
        let selected = ctx.get_list(selection, i);
        if ctx.is_boolean_true(selected) {
            let value = ctx.get_list(input, i);
            ctx.push_op(result);
            result = ctx.make_cons(value, result);
            ctx.pop_op();
        }
    }
    result
}

fn bi_range(ctx: &mut Context, argc: u8) -> CellRef {
    let (start, end, incr) = match argc {
        1 => {
            expect_op!(ctx, 0, is_integer);
            (0, ctx.integer_value(ctx.get_op0()), 1)
        }
        2 => {
            expect_op!(ctx, 1, is_integer);
            expect_op!(ctx, 0, is_integer);
            (
                ctx.integer_value(ctx.get_op1()),
                ctx.integer_value(ctx.get_op0()),
                1,
            )
        }
        3 => {
            expect_op!(ctx, 2, is_integer);
            expect_op!(ctx, 1, is_integer);
            expect_op!(ctx, 0, is_integer);
            (
                ctx.integer_value(ctx.get_op(2)),
                ctx.integer_value(ctx.get_op1()),
                ctx.integer_value(ctx.get_op0()),
            )
        }
        _ => {
            let nil = ctx.nil();
            return ctx.make_error(ErrorCode::InvalidArgc, nil);
        }
    };

    if incr == 0 {
        return ctx.nil();
    }

    let mut lat = ListBuilder::new(ctx);
    let mut i = start;
    while i < end {
        let cell = ctx.make_integer(i);
        ctx.push_op(cell);
        lat.push_back(ctx, cell);
        ctx.pop_op();
        i += incr;
    }
    lat.result(ctx)
}

fn bi_get(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    expect_op!(ctx, 1, is_cons);
    expect_op!(ctx, 0, is_integer);
    let position = ctx.integer_value(ctx.get_op0()).max(0) as u32;
    ctx.get_list(ctx.get_op1(), position)
}

// ---------------------------------------------------------------------------
// Arithmetic and comparison
// ---------------------------------------------------------------------------

fn bi_less(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    expect_op!(ctx, 0, is_integer);
    expect_op!(ctx, 1, is_integer);
    let value = ctx.integer_value(ctx.get_op1()) < ctx.integer_value(ctx.get_op0());
    ctx.make_integer(value as i32)
}

fn bi_greater(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    expect_op!(ctx, 0, is_integer);
    expect_op!(ctx, 1, is_integer);
    let value = ctx.integer_value(ctx.get_op1()) > ctx.integer_value(ctx.get_op0());
    ctx.make_integer(value as i32)
}

fn bi_add(ctx: &mut Context, argc: u8) -> CellRef {
    let mut accum: i32 = 0;
    for i in 0..argc as u32 {
        expect_op!(ctx, i, is_integer);
        accum = accum.wrapping_add(ctx.integer_value(ctx.get_op(i)));
    }
    ctx.make_integer(accum)
}

fn bi_sub(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    expect_op!(ctx, 1, is_integer);
    expect_op!(ctx, 0, is_integer);
    let value = ctx
        .integer_value(ctx.get_op1())
        .wrapping_sub(ctx.integer_value(ctx.get_op0()));
    ctx.make_integer(value)
}

fn bi_mul(ctx: &mut Context, argc: u8) -> CellRef {
    let mut accum: i32 = 1;
    for i in 0..argc as u32 {
        expect_op!(ctx, i, is_integer);
        accum = accum.wrapping_mul(ctx.integer_value(ctx.get_op(i)));
    }
    ctx.make_integer(accum)
}

fn bi_div(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 2);
    expect_op!(ctx, 1, is_integer);
    expect_op!(ctx, 0, is_integer);
    let divisor = ctx.integer_value(ctx.get_op0());
    if divisor == 0 {
        let v = ctx.get_op0();
        return ctx.make_error(ErrorCode::InvalidArgumentType, v);
    }
    let value = ctx.integer_value(ctx.get_op1()) / divisor;
    ctx.make_integer(value)
}

// ---------------------------------------------------------------------------
// Symbols, strings, types
// ---------------------------------------------------------------------------

fn bi_unbind(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 1);
    expect_op!(ctx, 0, is_symbol);
    let symbol = ctx.get_op0();
    globals::erase(ctx, symbol);
    ctx.nil()
}

fn bi_symbol(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 1);
    expect_op!(ctx, 0, is_string);
    let name = ctx.string_value(ctx.get_op0());
    ctx.make_symbol(&name)
}

fn bi_type(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 1);
    let name = ctx.cell(ctx.get_op0()).kind().type_name();
    ctx.make_symbol(name)
}

fn bi_string(ctx: &mut Context, argc: u8) -> CellRef {
    let mut out = String::new();
    for i in (0..argc as u32).rev() {
        let value = ctx.get_op(i);
        if ctx.cell(value).is_string() {
            out.push_str(&ctx.string_value(value));
        } else {
            out.push_str(&print::format_value(ctx, value));
        }
    }
    ctx.make_string(&out)
}

fn bi_bound(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 1);
    expect_op!(ctx, 0, is_symbol);
    let symbol = ctx.get_op0();
    let found = globals::find(ctx, symbol);
    let bound = !ctx.is_nil(found) && !ctx.cell(found).is_error();
    ctx.make_integer(bound as i32)
}

// ---------------------------------------------------------------------------
// Interpreter access
// ---------------------------------------------------------------------------

fn bi_gc(ctx: &mut Context, _argc: u8) -> CellRef {
    let collected = run_gc(ctx) as i32;
    ctx.make_integer(collected)
}

fn bi_read(ctx: &mut Context, argc: u8) -> CellRef {
    expect_argc!(ctx, argc, 1);
    expect_op!(ctx, 0, is_string);
    let source = ctx.string_value(ctx.get_op0());
    crate::reader::read(ctx, source.as_bytes());
    let result = ctx.get_op0();
    ctx.pop_op();
    result
}

fn bi_eval(ctx: &mut Context, argc: u8) -> CellRef {
    if argc < 1 {
        let nil = ctx.nil();
        return ctx.make_error(ErrorCode::InvalidArgc, nil);
    }
    let form = ctx.get_op0();
    eval::eval(ctx, form);
    let result = ctx.get_op0();
    ctx.pop_op();
    result
}

fn bi_globals(ctx: &mut Context, _argc: u8) -> CellRef {
    ctx.globals_tree
}

fn bi_this(ctx: &mut Context, _argc: u8) -> CellRef {
    // Native calls don't reassign the frame, so this is the enclosing
    // interpreted or bytecode function.
    ctx.get_this()
}

fn bi_argc(ctx: &mut Context, _argc: u8) -> CellRef {
    let argc = ctx.get_argc() as i32;
    ctx.make_integer(argc)
}

fn bi_env(ctx: &mut Context, _argc: u8) -> CellRef {
    let mut names = Vec::new();
    globals::traverse(ctx, |ctx, kvp, _node| {
        names.push(ctx.symbol_intern(ctx.car(kvp)));
    });
    for k in ctx.constants {
        names.push(ctx.intern(k.name));
    }

    let mut lat = ListBuilder::new(ctx);
    for name in names {
        let symbol = ctx.make_symbol_interned(name);
        ctx.push_op(symbol);
        lat.push_back(ctx, symbol);
        ctx.pop_op();
    }
    lat.result(ctx)
}

fn bi_interp_stat(ctx: &mut Context, _argc: u8) -> CellRef {
    let mut vars = 0;
    globals::traverse(ctx, |_, _, _| vars += 1);
    let stack = ctx.stack_depth() as i32;
    let interned = ctx.interns.used() as i32;
    let free = ctx.pool.free_count() as i32;
    let mut buffers = 0;
    ctx.live_values(|_, cell| {
        if matches!(cell.kind(), CellKind::DataBuffer(_)) {
            buffers += 1;
        }
    });

    let mut lat = ListBuilder::new(ctx);
    for (name, value) in [
        ("vars", vars),
        ("stk", stack),
        ("internb", interned),
        ("free", free),
        ("sbr", buffers),
    ] {
        let pair = make_stat(ctx, name, value);
        ctx.push_op(pair);
        lat.push_front(ctx, pair);
        ctx.pop_op();
    }
    lat.result(ctx)
}

fn make_stat(ctx: &mut Context, name: &str, value: i32) -> CellRef {
    let nil = ctx.nil();
    let pair = ctx.make_cons(nil, nil);
    if pair == ctx.oom() {
        return pair;
    }
    ctx.push_op(pair);
    let symbol = ctx.make_symbol(name);
    ctx.set_car(pair, symbol);
    let count = ctx.make_integer(value);
    ctx.set_cdr(pair, count);
    ctx.pop_op();
    pair
}
