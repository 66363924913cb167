//! Reader — recursive-descent parsing from source bytes to cell structure.
//!
//! `read` consumes a byte slice and returns how many bytes it ate; the
//! parsed value is pushed on the operand stack (nil at end of input).
//! Identifiers and strings are plain byte sequences — there is no Unicode
//! processing. Once a list has been read, macro expansion rewrites it in
//! place on the stack.

use crate::builder::ListBuilder;
use crate::cell::{CellRef, ErrorCode};
use crate::ctx::Context;
use crate::host::SCRATCH_BUFFER_SIZE;

/// Byte at `i`, with everything past the end reading as NUL.
#[inline]
fn at(code: &[u8], i: usize) -> u8 {
    code.get(i).copied().unwrap_or(0)
}

fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// Read one form. Returns the number of bytes consumed; the result (or an
/// error cell, or nil at end of input) is left on the operand stack.
pub fn read(ctx: &mut Context, code: &[u8]) -> usize {
    let mut i = 0;

    let nil = ctx.nil();
    ctx.push_op(nil);

    loop {
        match at(code, i) {
            0 => return i,

            b'[' | b'(' => {
                i += 1;
                ctx.pop_op();
                i += read_list(ctx, &code[i.min(code.len())..]);
                macroexpand(ctx);
                // list now at stack top
                return i;
            }

            b';' => {
                while !matches!(at(code, i), 0 | b'\r' | b'\n') {
                    i += 1;
                }
            }

            b'-' => {
                if at(code, i + 1).is_ascii_digit() {
                    i += 1;
                    ctx.pop_op();
                    i += read_number(ctx, &code[i..], true);
                    return i;
                }
                ctx.pop_op();
                i += read_symbol(ctx, &code[i..]);
                return i;
            }

            b'0'..=b'9' => {
                ctx.pop_op();
                i += read_number(ctx, &code[i..], false);
                return i;
            }

            b if is_ws(b) => i += 1,

            b'"' => {
                ctx.pop_op();
                i += 1;
                i += read_string(ctx, &code[i.min(code.len())..]);
                return i;
            }

            _ => {
                ctx.pop_op();
                i += read_symbol(ctx, &code[i..]);
                // symbol now at stack top

                // Quoted values outside an s-expression are wrapped as a
                // (quote-symbol . expr) pair so the evaluator can recognize
                // them.
                let top = ctx.get_op0();
                let sugar = ctx.cell(top).is_symbol() && {
                    let name = ctx.symbol_intern(top);
                    name == ctx.syms.quote || name == ctx.syms.quasiquote
                };
                if sugar {
                    let nil = ctx.nil();
                    let pair = ctx.make_cons(top, nil);
                    ctx.push_op(pair);
                    i += read(ctx, &code[i.min(code.len())..]);
                    let quoted = ctx.get_op0();
                    ctx.set_cdr(pair, quoted);
                    ctx.pop_op(); // read result
                    ctx.pop_op(); // pair
                    ctx.pop_op(); // symbol
                    ctx.push_op(pair);
                }
                return i;
            }
        }
    }
}

/// Read list elements up to the matching close delimiter. `code` starts
/// just past the open delimiter.
fn read_list(ctx: &mut Context, code: &[u8]) -> usize {
    let mut i = 0;

    let nil = ctx.nil();
    let mut result = nil;
    ctx.push_op(nil);

    let mut dotted_pair = false;

    loop {
        match at(code, i) {
            b if is_ws(b) => i += 1,

            b'.' => {
                i += 1;
                if dotted_pair || result == nil {
                    ctx.pop_op();
                    let err = ctx.make_error(ErrorCode::MismatchedParentheses, nil);
                    ctx.push_op(err);
                    return i;
                }
                dotted_pair = true;
                i += read(ctx, &code[i.min(code.len())..]);
                let tail = ctx.get_op0();
                ctx.set_cdr(result, tail);
                ctx.pop_op();
            }

            b';' => {
                while !matches!(at(code, i), 0 | b'\r' | b'\n') {
                    i += 1;
                }
            }

            b']' | b')' => {
                i += 1;
                return i;
            }

            0 => {
                ctx.pop_op();
                let err = ctx.make_error(ErrorCode::MismatchedParentheses, nil);
                ctx.push_op(err);
                return i;
            }

            _ => {
                if dotted_pair {
                    ctx.pop_op();
                    let err = ctx.make_error(ErrorCode::MismatchedParentheses, nil);
                    ctx.push_op(err);
                    return i;
                }
                i += read(ctx, &code[i.min(code.len())..]);

                if result == nil {
                    let head = ctx.get_op0();
                    result = ctx.make_cons(head, nil);
                    ctx.pop_op(); // the result from read()
                    ctx.pop_op(); // placeholder nil
                    ctx.push_op(result);
                } else {
                    let item = ctx.get_op0();
                    let next = ctx.make_cons(item, nil);
                    ctx.pop_op();
                    ctx.set_cdr(result, next);
                    result = next;
                }
            }
        }
    }
}

/// Read string contents up to the closing quote. `code` starts just past
/// the opening quote. No escape processing.
fn read_string(ctx: &mut Context, code: &[u8]) -> usize {
    let mut i = 0;
    loop {
        match at(code, i) {
            b'"' => break,
            0 => {
                let nil = ctx.nil();
                let err = ctx.make_error(ErrorCode::InvalidSyntax, nil);
                ctx.push_op(err);
                return i;
            }
            _ => {
                if i == SCRATCH_BUFFER_SIZE - 1 {
                    let nil = ctx.nil();
                    let err = ctx.make_error(ErrorCode::InvalidSyntax, nil);
                    ctx.push_op(err);
                    return i;
                }
                i += 1;
            }
        }
    }

    let contents = String::from_utf8_lossy(&code[..i]).into_owned();
    i += 1; // closing quote
    let cell = ctx.make_string(&contents);
    ctx.push_op(cell);
    i
}

/// Read a symbol token. `'`, `` ` ``, `,`, `@` are single-character
/// symbols; everything else runs to the next delimiter. The token `nil`
/// reads as the nil singleton.
fn read_symbol(ctx: &mut Context, code: &[u8]) -> usize {
    if matches!(at(code, 0), b'\'' | b'`' | b',' | b'@') {
        let name = [at(code, 0)];
        let name = std::str::from_utf8(&name).expect("single ascii byte");
        let sym = ctx.make_symbol(name);
        ctx.push_op(sym);
        return 1;
    }

    let mut i = 0;
    loop {
        match at(code, i) {
            b'[' | b']' | b'(' | b')' | b';' | 0 => break,
            b if is_ws(b) => break,
            _ => i += 1,
        }
    }

    let token = String::from_utf8_lossy(&code[..i]).into_owned();
    if token == "nil" {
        let nil = ctx.nil();
        ctx.push_op(nil);
    } else {
        let sym = ctx.make_symbol(&token);
        ctx.push_op(sym);
    }
    i
}

/// Read a run of number bytes: decimal, or hex with a `0x` prefix.
fn read_number(ctx: &mut Context, code: &[u8], negative: bool) -> usize {
    let mut i = 0;
    while matches!(at(code, i), b'0'..=b'9' | b'a'..=b'f' | b'x') {
        i += 1;
    }

    let token = std::str::from_utf8(&code[..i]).unwrap_or("");
    let parsed = if token.len() > 1 && token.as_bytes()[1] == b'x' {
        i32::from_str_radix(&token[2..], 16)
    } else {
        token.parse::<i32>()
    };

    match parsed {
        Ok(v) => {
            let value = if negative { -v } else { v };
            let cell = ctx.make_integer(value);
            ctx.push_op(cell);
        }
        Err(_) => {
            let nil = ctx.nil();
            let err = ctx.make_error(ErrorCode::InvalidSyntax, nil);
            ctx.push_op(err);
        }
    }
    i
}

// ---------------------------------------------------------------------------
// Macro expansion
// ---------------------------------------------------------------------------

/// Expand the list at the top of the operand stack if its head names a
/// registered macro, replacing it with the expansion.
pub(crate) fn macroexpand(ctx: &mut Context) {
    let lat = ctx.get_op0();
    if !ctx.cell(lat).is_cons() {
        return;
    }
    let head = ctx.car(lat);
    if !ctx.cell(head).is_symbol() {
        return;
    }
    let head_name = ctx.symbol_intern(head);

    let mut macros = ctx.macros;
    while !ctx.is_nil(macros) {
        let entry = ctx.car(macros); // (NAME (PARAMS...) BODY)
        if ctx.symbol_intern(ctx.car(entry)) == head_name {
            expand_entry(ctx, lat, entry);
            return;
        }
        macros = ctx.cdr(macros);
    }
}

/// Rewrite one macro call: bind each parameter to its quoted, unevaluated
/// argument (the last parameter takes all remaining arguments as a list),
/// evaluate the synthesized `let`, and expand the result recursively.
fn expand_entry(ctx: &mut Context, lat: CellRef, entry: CellRef) {
    let supplied = ctx.cdr(lat);
    let definition = ctx.cdr(entry); // ((PARAMS...) BODY)
    let macro_args = ctx.car(definition);

    if ctx.list_length(macro_args) > ctx.list_length(supplied) {
        ctx.pop_op();
        let msg = ctx.make_string("invalid arguments passed to macro");
        let pm = ctx.protect(msg);
        let err = ctx.make_error(ErrorCode::InvalidSyntax, msg);
        ctx.unprotect(pm);
        ctx.push_op(err);
        return;
    }

    let quote = ctx.make_symbol_interned(ctx.syms.quote);
    let pq = ctx.protect(quote);

    let mut bindings = ListBuilder::new(ctx);
    let mut args = macro_args;
    let mut sup = supplied;
    while !ctx.is_nil(args) {
        // (param (quote-symbol . arg)) — the quote pair keeps the argument
        // unevaluated through the synthetic let.
        let quoted = if ctx.is_nil(ctx.cdr(args)) {
            ctx.make_cons(quote, sup)
        } else {
            let arg = ctx.car(sup);
            ctx.make_cons(quote, arg)
        };
        let pqd = ctx.protect(quoted);
        let param = ctx.car(args);

        let mut assoc = ListBuilder::new(ctx);
        assoc.push_front(ctx, quoted);
        assoc.push_front(ctx, param);
        let assoc_list = assoc.result(ctx);
        ctx.unprotect(pqd);

        let pa = ctx.protect(assoc_list);
        bindings.push_back(ctx, assoc_list);
        ctx.unprotect(pa);

        args = ctx.cdr(args);
        if !ctx.is_nil(sup) {
            sup = ctx.cdr(sup);
        }
    }

    let binding_list = bindings.result(ctx);
    let pb = ctx.protect(binding_list);
    let body = ctx.car(ctx.cdr(definition));
    let mut synthetic_let = ListBuilder::new(ctx);
    synthetic_let.push_front(ctx, body);
    synthetic_let.push_front(ctx, binding_list);
    let let_form = synthetic_let.result(ctx);
    ctx.unprotect(pb);

    let pl = ctx.protect(let_form);
    crate::eval::eval_let(ctx, let_form);
    ctx.unprotect(pl);

    let result = ctx.get_op0();
    ctx.pop_op(); // result of eval_let
    ctx.pop_op(); // input list
    ctx.push_op(result);
    ctx.unprotect(pq);

    // The expansion may itself contain macro calls.
    macroexpand_nested(ctx);
}

/// Walk the expanded list at the top of the stack, expanding macros inside
/// every sublist.
pub(crate) fn macroexpand_nested(ctx: &mut Context) {
    let lat = ctx.get_op0();
    if !ctx.cell(lat).is_cons() {
        return;
    }

    let mut result = ListBuilder::new(ctx);
    let mut cursor = lat;
    while !ctx.is_nil(cursor) && ctx.cell(cursor).is_cons() {
        let item = ctx.car(cursor);
        if ctx.cell(item).is_cons() && ctx.is_list(item) {
            ctx.push_op(item);
            macroexpand_nested(ctx);
            macroexpand(ctx);
            let expanded = ctx.get_op0();
            result.push_back(ctx, expanded);
            ctx.pop_op();
        } else {
            result.push_back(ctx, item);
        }
        cursor = ctx.cdr(cursor);
    }

    ctx.pop_op(); // input
    let list = result.result(ctx);
    ctx.push_op(list);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellKind;
    use crate::host::StdHost;

    fn ctx() -> Context {
        Context::new(Box::new(StdHost::new()))
    }

    /// Read one form and hand back the parsed cell (popped off the stack).
    fn read1(ctx: &mut Context, src: &str) -> CellRef {
        let consumed = read(ctx, src.as_bytes());
        assert!(consumed <= src.len());
        let v = ctx.get_op0();
        ctx.pop_op();
        v
    }

    #[test]
    fn reads_integers() {
        let mut ctx = ctx();
        let v = read1(&mut ctx, "42");
        assert_eq!(ctx.integer_value(v), 42);
        let v = read1(&mut ctx, "-17");
        assert_eq!(ctx.integer_value(v), -17);
        let v = read1(&mut ctx, "0x1f");
        assert_eq!(ctx.integer_value(v), 31);
    }

    #[test]
    fn reads_symbols_and_nil() {
        let mut ctx = ctx();
        let v = read1(&mut ctx, "foo-bar");
        assert_eq!(ctx.symbol_name(v), "foo-bar");
        let v = read1(&mut ctx, "nil");
        assert!(ctx.is_nil(v));
        // `-` alone is a symbol, not a number.
        let v = read1(&mut ctx, "- ");
        assert_eq!(ctx.symbol_name(v), "-");
    }

    #[test]
    fn reads_strings() {
        let mut ctx = ctx();
        let v = read1(&mut ctx, "\"hello world\"");
        assert_eq!(ctx.string_value(v), "hello world");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let mut ctx = ctx();
        let v = read1(&mut ctx, "\"oops");
        assert_eq!(ctx.error_code(v), ErrorCode::InvalidSyntax);
    }

    #[test]
    fn reads_lists_and_brackets() {
        let mut ctx = ctx();
        let v = read1(&mut ctx, "(1 2 3)");
        assert_eq!(ctx.list_length(v), 3);
        assert_eq!(ctx.integer_value(ctx.get_list(v, 2)), 3);

        let v = read1(&mut ctx, "[4 5]");
        assert_eq!(ctx.list_length(v), 2);
    }

    #[test]
    fn reads_nested_lists() {
        let mut ctx = ctx();
        let v = read1(&mut ctx, "(1 (2 (3)) 4)");
        assert_eq!(ctx.list_length(v), 3);
        let inner = ctx.get_list(v, 1);
        assert_eq!(ctx.list_length(inner), 2);
    }

    #[test]
    fn reads_dotted_pairs() {
        let mut ctx = ctx();
        let v = read1(&mut ctx, "(1 . 2)");
        assert!(ctx.cell(v).is_cons());
        assert_eq!(ctx.integer_value(ctx.car(v)), 1);
        assert_eq!(ctx.integer_value(ctx.cdr(v)), 2);

        // A longer chain keeps its improper tail.
        let v = read1(&mut ctx, "(1 2 . 3)");
        assert_eq!(ctx.integer_value(ctx.car(v)), 1);
        let second = ctx.cdr(v);
        assert!(ctx.cell(second).is_cons());
        assert_eq!(ctx.integer_value(ctx.car(second)), 2);
        assert_eq!(ctx.integer_value(ctx.cdr(second)), 3);
    }

    #[test]
    fn mismatched_parens_error() {
        let mut ctx = ctx();
        let v = read1(&mut ctx, "(1 2");
        assert_eq!(ctx.error_code(v), ErrorCode::MismatchedParentheses);
        let v = read1(&mut ctx, "(. 2)");
        assert_eq!(ctx.error_code(v), ErrorCode::MismatchedParentheses);
    }

    #[test]
    fn comments_are_skipped() {
        let mut ctx = ctx();
        let v = read1(&mut ctx, "; leading comment\n7");
        assert_eq!(ctx.integer_value(v), 7);
        let v = read1(&mut ctx, "(1 ; inline\n 2)");
        assert_eq!(ctx.list_length(v), 2);
    }

    #[test]
    fn quote_sugar_wraps_pair() {
        let mut ctx = ctx();
        let v = read1(&mut ctx, "'x");
        assert!(ctx.cell(v).is_cons());
        assert_eq!(ctx.symbol_name(ctx.car(v)), "'");
        assert_eq!(ctx.symbol_name(ctx.cdr(v)), "x");

        let v = read1(&mut ctx, "'(1 2)");
        assert_eq!(ctx.symbol_name(ctx.car(v)), "'");
        assert_eq!(ctx.list_length(ctx.cdr(v)), 2);
    }

    #[test]
    fn unquote_reads_as_bare_symbols() {
        let mut ctx = ctx();
        // `,` and `@` are ordinary single-character symbols inside a list.
        let v = read1(&mut ctx, "(a , b , @ c)");
        assert_eq!(ctx.list_length(v), 6);
        assert_eq!(ctx.symbol_name(ctx.get_list(v, 1)), ",");
        assert_eq!(ctx.symbol_name(ctx.get_list(v, 3)), ",");
        assert_eq!(ctx.symbol_name(ctx.get_list(v, 4)), "@");
    }

    #[test]
    fn end_of_input_pushes_nil() {
        let mut ctx = ctx();
        let consumed = read(&mut ctx, b"   ");
        assert_eq!(consumed, 3);
        assert!(ctx.is_nil(ctx.get_op0()));
        ctx.pop_op();
    }

    #[test]
    fn reader_reports_consumed_bytes() {
        let mut ctx = ctx();
        let src = b"(+ 1 2) (9)";
        let consumed = read(&mut ctx, src);
        ctx.pop_op();
        assert_eq!(&src[..consumed], b"(+ 1 2)");
        let v = read1(&mut ctx, std::str::from_utf8(&src[consumed..]).unwrap());
        match ctx.kind(v) {
            CellKind::Cons { .. } => {}
            other => panic!("expected list, got {}", other.type_name()),
        }
    }
}
