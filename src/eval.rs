//! Evaluator — special forms, function application, and top-level driving.
//!
//! Results travel on the operand stack: `eval` consumes nothing and leaves
//! exactly one value; `funcall` consumes the arguments sitting on top of
//! the stack and replaces them with the call's result. Errors are values —
//! an error cell propagates up and, when its context is nil, picks up the
//! nearest enclosing form on the way.

use crate::builder::ListBuilder;
use crate::cell::{CellKind, CellRef, ErrorCode, FunctionKind};
use crate::ctx::Context;

/// Evaluate one form, pushing the result on the operand stack.
pub fn eval(ctx: &mut Context, code: CellRef) {
    ctx.interp_entry_count += 1;

    // Keep the form itself reachable for the duration, in case the caller
    // didn't bother.
    ctx.push_op(code);

    if ctx.cell(code).is_symbol() {
        let value = ctx.get_var(code);
        ctx.pop_op();
        ctx.push_op(value);
    } else if ctx.cell(code).is_cons() {
        eval_form(ctx, code);
    } else {
        // Self-evaluating: the protective push is the result.
    }

    ctx.interp_entry_count -= 1;
}

/// Evaluate a cons form: dispatch on special-form heads, otherwise funcall.
/// The form sits on top of the operand stack and is replaced by the result.
fn eval_form(ctx: &mut Context, code: CellRef) {
    let head = ctx.car(code);
    if ctx.cell(head).is_symbol() {
        let name = ctx.symbol_intern(head);
        let s_if = ctx.syms.if_;
        let s_lambda = ctx.syms.lambda;
        let s_quote = ctx.syms.quote;
        let s_quote_named = ctx.syms.quote_named;
        let s_quasi = ctx.syms.quasiquote;
        let s_quasi_named = ctx.syms.quasiquote_named;
        let s_let = ctx.syms.let_;
        let s_macro = ctx.syms.macro_;

        if name == s_if {
            let rest = ctx.cdr(code);
            eval_if(ctx, rest);
            finish_form(ctx);
            return;
        }
        if name == s_lambda {
            let rest = ctx.cdr(code);
            let function = ctx.make_lisp_function(rest);
            ctx.pop_op(); // code
            ctx.push_op(function);
            return;
        }
        if name == s_quote {
            let quoted = ctx.cdr(code);
            ctx.pop_op();
            ctx.push_op(quoted);
            return;
        }
        if name == s_quote_named {
            // (quote x) — unwrap the argument list.
            let rest = ctx.cdr(code);
            let quoted = if ctx.cell(rest).is_cons() {
                ctx.car(rest)
            } else {
                rest
            };
            ctx.pop_op();
            ctx.push_op(quoted);
            return;
        }
        if name == s_quasi {
            let rest = ctx.cdr(code);
            eval_quasiquote(ctx, rest);
            finish_form(ctx);
            return;
        }
        if name == s_quasi_named {
            let rest = ctx.cdr(code);
            let template = if ctx.cell(rest).is_cons() {
                ctx.car(rest)
            } else {
                rest
            };
            eval_quasiquote(ctx, template);
            finish_form(ctx);
            return;
        }
        if name == s_let {
            let rest = ctx.cdr(code);
            eval_let(ctx, rest);
            finish_form(ctx);
            return;
        }
        if name == s_macro {
            let rest = ctx.cdr(code);
            eval_macro(ctx, rest);
            finish_form(ctx);
            return;
        }
    }

    // General funcall: evaluate the head, then each argument left to right.
    eval(ctx, head);
    let function = ctx.get_op0();
    let pf = ctx.protect(function);
    ctx.pop_op();

    let mut argc: u8 = 0;
    let mut arg_list = ctx.cdr(code);
    loop {
        if ctx.is_nil(arg_list) {
            break;
        }
        if !ctx.cell(arg_list).is_cons() {
            let err = ctx.make_error(ErrorCode::ValueNotCallable, arg_list);
            for _ in 0..argc {
                ctx.pop_op();
            }
            ctx.unprotect(pf);
            ctx.pop_op(); // code
            ctx.push_op(err);
            return;
        }
        let arg = ctx.car(arg_list);
        eval(ctx, arg);
        argc += 1;
        arg_list = ctx.cdr(arg_list);
    }

    funcall(ctx, function, argc);
    ctx.unprotect(pf);

    // Errors without a context pick up the enclosing form, so traces point
    // at a user-visible expression.
    let result = ctx.get_op0();
    if ctx.cell(result).is_error() && ctx.is_nil(ctx.error_context(result)) {
        if let CellKind::Error { context, .. } = &mut ctx.pool.get_mut(result).kind {
            *context = code;
        }
    }
    finish_form(ctx);
}

/// The stack holds [form, result]; collapse to [result].
fn finish_form(ctx: &mut Context) {
    let result = ctx.get_op0();
    ctx.pop_op(); // result
    ctx.pop_op(); // form
    ctx.push_op(result);
}

fn eval_if(ctx: &mut Context, code: CellRef) {
    if !ctx.cell(code).is_cons() {
        let nil = ctx.nil();
        let err = ctx.make_error(ErrorCode::MismatchedParentheses, nil);
        ctx.push_op(err);
        return;
    }

    let cond = ctx.car(code);
    let mut true_branch = ctx.nil();
    let mut false_branch = ctx.nil();

    let rest = ctx.cdr(code);
    if ctx.cell(rest).is_cons() {
        true_branch = ctx.car(rest);
        let rest2 = ctx.cdr(rest);
        if ctx.cell(rest2).is_cons() {
            false_branch = ctx.car(rest2);
        }
    }

    eval(ctx, cond);
    let taken = if ctx.is_boolean_true(ctx.get_op0()) {
        true_branch
    } else {
        false_branch
    };
    eval(ctx, taken);

    let result = ctx.get_op0();
    ctx.pop_op(); // branch result
    ctx.pop_op(); // condition result
    ctx.push_op(result);
}

/// `(let ((sym expr)...) body...)` — open a frame, bind eagerly in order,
/// evaluate body forms, return the last value.
///
/// Bindings land in the frame as they are evaluated (the same sequence the
/// VM's `LexicalFramePush`/`LexicalDef` opcodes produce), so a lambda
/// created in the binding list can see sibling bindings — including itself,
/// which is what makes self-recursive `let` functions work.
pub(crate) fn eval_let(ctx: &mut Context, code: CellRef) {
    if !ctx.cell(code).is_cons() {
        let nil = ctx.nil();
        let err = ctx.make_error(ErrorCode::MismatchedParentheses, nil);
        ctx.push_op(err);
        return;
    }

    let bindings = ctx.car(code);
    let nil = ctx.nil();
    let p_result = ctx.protect(nil);

    ctx.lexical_frame_push();

    let mut cursor = bindings;
    let mut malformed = false;
    while !ctx.is_nil(cursor) {
        if !ctx.cell(cursor).is_cons() {
            malformed = true;
            break;
        }
        let binding = ctx.car(cursor);
        cursor = ctx.cdr(cursor);

        if !ctx.cell(binding).is_cons() {
            malformed = true;
            break;
        }
        let sym = ctx.car(binding);
        let bind = ctx.cdr(binding);
        if !ctx.cell(sym).is_symbol() || !ctx.cell(bind).is_cons() {
            malformed = true;
            break;
        }

        let expr = ctx.car(bind);
        eval(ctx, expr);
        let value = ctx.get_op0();
        let kvp = ctx.make_cons(sym, value);
        ctx.pop_op(); // binding value
        let pk = ctx.protect(kvp);
        ctx.lexical_frame_store(kvp);
        ctx.unprotect(pk);
    }

    if malformed {
        ctx.lexical_frame_pop();
        ctx.unprotect(p_result);
        let err = ctx.make_error(ErrorCode::MismatchedParentheses, nil);
        ctx.push_op(err);
        return;
    }

    let mut body = ctx.cdr(code);
    while !ctx.is_nil(body) && ctx.cell(body).is_cons() {
        let form = ctx.car(body);
        eval(ctx, form);
        let value = ctx.get_op0();
        ctx.protected_set(&p_result, value);
        ctx.pop_op();
        body = ctx.cdr(body);
    }

    ctx.lexical_frame_pop();

    let result = ctx.protected_get(&p_result);
    ctx.unprotect(p_result);
    ctx.push_op(result);
}

/// `(macro NAME (PARAMS...) BODY)` — prepend onto the macro list.
fn eval_macro(ctx: &mut Context, code: CellRef) {
    if ctx.cell(code).is_cons() && ctx.cell(ctx.car(code)).is_symbol() {
        ctx.macros = ctx.make_cons(code, ctx.macros);
        let nil = ctx.nil();
        ctx.push_op(nil);
    } else {
        let nil = ctx.nil();
        let err = ctx.make_error(ErrorCode::InvalidSyntax, nil);
        ctx.push_op(err);
    }
}

/// Quasiquote walk: copy structure, evaluating `,` forms and splicing `,@`
/// forms into the enclosing list.
fn eval_quasiquote(ctx: &mut Context, code: CellRef) {
    let mut builder = ListBuilder::new(ctx);
    let mut code = code;

    while !ctx.is_nil(code) {
        if !ctx.cell(code).is_cons() {
            break;
        }
        let head = ctx.car(code);
        let head_is_unquote =
            ctx.cell(head).is_symbol() && ctx.symbol_intern(head) == ctx.syms.unquote;

        if head_is_unquote {
            code = ctx.cdr(code);
            if !ctx.cell(code).is_cons() {
                let _ = builder.result(ctx);
                quasiquote_error(ctx);
                return;
            }

            let next = ctx.car(code);
            let is_splice =
                ctx.cell(next).is_symbol() && ctx.symbol_intern(next) == ctx.syms.splice;

            if is_splice {
                code = ctx.cdr(code); // skip over the @ symbol
                if !ctx.cell(code).is_cons() {
                    let _ = builder.result(ctx);
                    quasiquote_error(ctx);
                    return;
                }
                let expr = ctx.car(code);
                eval(ctx, expr);
                let result = ctx.get_op0(); // rooted while we splice
                if ctx.is_list(result) {
                    let mut item = result;
                    while !ctx.is_nil(item) {
                        let car = ctx.car(item);
                        builder.push_back(ctx, car);
                        item = ctx.cdr(item);
                    }
                } else {
                    builder.push_back(ctx, result);
                }
                ctx.pop_op();
            } else {
                let expr = ctx.car(code);
                eval(ctx, expr);
                let result = ctx.get_op0();
                builder.push_back(ctx, result);
                ctx.pop_op();
            }
        } else if ctx.cell(head).is_cons() {
            // Expand unquotes in nested lists.
            eval_quasiquote(ctx, head);
            let inner = ctx.get_op0();
            builder.push_back(ctx, inner);
            ctx.pop_op();
        } else {
            builder.push_back(ctx, head);
        }

        code = ctx.cdr(code);
    }

    let list = builder.result(ctx);
    ctx.push_op(list);
}

fn quasiquote_error(ctx: &mut Context) {
    let msg = ctx.make_string("extraneous unquote");
    let pm = ctx.protect(msg);
    let err = ctx.make_error(ErrorCode::InvalidSyntax, msg);
    ctx.unprotect(pm);
    ctx.push_op(err);
}

// ---------------------------------------------------------------------------
// Funcall
// ---------------------------------------------------------------------------

/// True for nil or a proper list consisting entirely of symbols — the shape
/// of a lambda parameter list.
fn is_parameter_list(ctx: &Context, r: CellRef) -> bool {
    let mut cursor = r;
    while !ctx.is_nil(cursor) {
        match ctx.kind(cursor) {
            CellKind::Cons { car, cdr } => {
                if !ctx.cell(*car).is_symbol() {
                    return false;
                }
                cursor = *cdr;
            }
            _ => return false,
        }
    }
    true
}

/// Apply `obj` to `argc` arguments sitting on top of the operand stack
/// (last argument on top). The arguments are consumed and replaced with the
/// result. The caller must keep `obj` rooted.
pub fn funcall(ctx: &mut Context, obj: CellRef, argc: u8) {
    let prev_this = ctx.this_fn;
    let prev_bindings = ctx.lexical_bindings;
    let prev_break_loc = ctx.arguments_break_loc;
    let prev_argc = ctx.current_fn_argc;

    let function = match ctx.kind(obj) {
        CellKind::Function(kind) => Some(kind.clone()),
        _ => None,
    };

    match function {
        None => {
            let nil = ctx.nil();
            let err = ctx.make_error(ErrorCode::ValueNotCallable, nil);
            for _ in 0..argc {
                if ctx.stack_depth() == 0 {
                    break;
                }
                ctx.pop_op();
            }
            ctx.push_op(err);
            return;
        }

        Some(kind) => {
            if ctx.stack_depth() < argc as usize {
                let err = ctx.make_error(ErrorCode::InvalidArgc, obj);
                for _ in 0..argc {
                    if ctx.stack_depth() == 0 {
                        break;
                    }
                    ctx.pop_op();
                }
                ctx.push_op(err);
                return;
            }

            match kind {
                FunctionKind::Native(imp) => {
                    let result = imp(ctx, argc);
                    for _ in 0..argc {
                        ctx.pop_op();
                    }
                    ctx.push_op(result);
                }

                FunctionKind::Interpreted { code, bindings } => {
                    ctx.lexical_bindings = bindings;
                    let break_loc = (ctx.stack_depth() - 1) as u16;
                    ctx.arguments_break_loc = break_loc;
                    ctx.current_fn_argc = argc;
                    ctx.this_fn = obj;

                    // A leading list of symbols is the parameter list; bind
                    // each name to its positional argument in a fresh frame.
                    let mut body = code;
                    if ctx.cell(code).is_cons() {
                        let first = ctx.car(code);
                        let params_shaped =
                            ctx.is_nil(first) || (ctx.cell(first).is_cons() && is_parameter_list(ctx, first));
                        if params_shaped {
                            body = ctx.cdr(code);
                            ctx.lexical_frame_push();
                            let mut param = first;
                            let mut index: u16 = 0;
                            while !ctx.is_nil(param) {
                                let sym = ctx.car(param);
                                let arg = ctx.get_arg(index);
                                let kvp = ctx.make_cons(sym, arg);
                                let pk = ctx.protect(kvp);
                                ctx.lexical_frame_store(kvp);
                                ctx.unprotect(pk);
                                param = ctx.cdr(param);
                                index += 1;
                            }
                        }
                    }

                    let nil = ctx.nil();
                    let p_result = ctx.protect(nil);
                    let mut expr = body;
                    while !ctx.is_nil(expr) && ctx.cell(expr).is_cons() {
                        ctx.arguments_break_loc = break_loc;
                        ctx.current_fn_argc = argc;
                        ctx.this_fn = obj;
                        let form = ctx.car(expr);
                        eval(ctx, form);
                        let value = ctx.get_op0();
                        ctx.protected_set(&p_result, value);
                        ctx.pop_op();
                        expr = ctx.cdr(expr);
                    }
                    let result = ctx.protected_get(&p_result);
                    ctx.unprotect(p_result);
                    for _ in 0..argc {
                        ctx.pop_op();
                    }
                    ctx.push_op(result);
                }

                FunctionKind::Bytecode { bytecode, bindings } => {
                    let break_loc = (ctx.stack_depth() - 1) as u16;
                    ctx.arguments_break_loc = break_loc;
                    ctx.current_fn_argc = argc;
                    ctx.this_fn = obj;
                    ctx.lexical_bindings = bindings;

                    let buffer = ctx.cdr(bytecode);
                    let offset = ctx.integer_value(ctx.car(bytecode)) as usize;
                    crate::vm::vm_execute(ctx, buffer, offset);

                    let result = ctx.get_op0();
                    ctx.pop_op();
                    for _ in 0..argc {
                        ctx.pop_op();
                    }
                    ctx.push_op(result);
                }
            }
        }
    }

    ctx.this_fn = prev_this;
    ctx.lexical_bindings = prev_bindings;
    ctx.arguments_break_loc = prev_break_loc;
    ctx.current_fn_argc = prev_argc;
}

// ---------------------------------------------------------------------------
// Top-level driving
// ---------------------------------------------------------------------------

/// Read every top-level form from `code`, evaluating each in order. Returns
/// the last result; stops at the first error, handing the error cell to
/// `on_error` first.
pub fn dostring(
    ctx: &mut Context,
    code: &str,
    mut on_error: impl FnMut(&mut Context, CellRef),
) -> CellRef {
    ctx.interp_entry_count += 1;

    let bytes = code.as_bytes();
    let mut i = 0;

    let nil = ctx.nil();
    let p_result = ctx.protect(nil);

    loop {
        i += crate::reader::read(ctx, &bytes[i.min(bytes.len())..]);
        let reader_result = ctx.get_op0();
        if ctx.is_nil(reader_result) {
            ctx.pop_op();
            break;
        }
        eval(ctx, reader_result);
        let expr_result = ctx.get_op0();
        ctx.protected_set(&p_result, expr_result);
        ctx.pop_op(); // expression result
        ctx.pop_op(); // reader result

        if ctx.cell(expr_result).is_error() {
            tracing::debug!(
                code = %ctx.error_code(expr_result),
                "top-level form evaluated to an error; stopping"
            );
            ctx.push_op(expr_result);
            on_error(ctx, expr_result);
            ctx.pop_op();
            break;
        }
    }

    ctx.interp_entry_count -= 1;

    let result = ctx.protected_get(&p_result);
    ctx.unprotect(p_result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StdHost;

    fn ctx() -> Context {
        Context::new(Box::new(StdHost::new()))
    }

    fn run(ctx: &mut Context, src: &str) -> CellRef {
        dostring(ctx, src, |_, _| {})
    }

    fn run_int(ctx: &mut Context, src: &str) -> i32 {
        let v = run(ctx, src);
        assert!(
            ctx.cell(v).is_integer(),
            "expected integer from {src}, got {}",
            crate::print::format_value(ctx, v)
        );
        ctx.integer_value(v)
    }

    #[test]
    fn self_evaluating_values() {
        let mut ctx = ctx();
        assert_eq!(run_int(&mut ctx, "42"), 42);
        let v = run(&mut ctx, "\"str\"");
        assert_eq!(ctx.string_value(v), "str");
    }

    #[test]
    fn arithmetic() {
        let mut ctx = ctx();
        assert_eq!(run_int(&mut ctx, "(+ 1 2 3)"), 6);
        assert_eq!(run_int(&mut ctx, "(- 10 4)"), 6);
        assert_eq!(run_int(&mut ctx, "(* 2 3 4)"), 24);
        assert_eq!(run_int(&mut ctx, "(/ 9 3)"), 3);
    }

    #[test]
    fn if_evaluates_one_branch() {
        let mut ctx = ctx();
        assert_eq!(run_int(&mut ctx, "(if 1 10 20)"), 10);
        assert_eq!(run_int(&mut ctx, "(if 0 10 20)"), 20);
        assert_eq!(run_int(&mut ctx, "(if nil 10 20)"), 20);
        // Side effects only happen in the taken branch.
        assert_eq!(
            run_int(
                &mut ctx,
                "(set 'hits 0)
                 (if 1 nil (set 'hits (+ hits 1)))
                 hits"
            ),
            0
        );
    }

    #[test]
    fn quote_and_quasiquote() {
        let mut ctx = ctx();
        let v = run(&mut ctx, "'(1 2 3)");
        assert_eq!(ctx.list_length(v), 3);
        let v = run(&mut ctx, "(quote abc)");
        assert_eq!(ctx.symbol_name(v), "abc");
        assert_eq!(run_int(&mut ctx, "(equal `(1 2) '(1 2))"), 1);
    }

    #[test]
    fn quasiquote_unquote_and_splice() {
        let mut ctx = ctx();
        assert_eq!(
            run_int(
                &mut ctx,
                "(equal (let ((x 3)) `(1 ,x ,@(list 4 5) 6)) '(1 3 4 5 6))"
            ),
            1
        );
    }

    #[test]
    fn let_binds_lexically() {
        let mut ctx = ctx();
        assert_eq!(run_int(&mut ctx, "(let ((x 3) (y 4)) (+ x y))"), 7);
        // Inner shadows outer; outer restored.
        assert_eq!(
            run_int(&mut ctx, "(let ((x 1)) (+ (let ((x 10)) x) x))"),
            11
        );
    }

    #[test]
    fn lambda_captures_environment() {
        let mut ctx = ctx();
        assert_eq!(
            run_int(
                &mut ctx,
                "(let ((n 5)) (set 'add-n (lambda (x) (+ x n)))) (add-n 3)"
            ),
            8
        );
    }

    #[test]
    fn positional_argument_shorthands() {
        let mut ctx = ctx();
        assert_eq!(run_int(&mut ctx, "((lambda (a b) (+ $0 $1)) 3 4)"), 7);
        assert_eq!(run_int(&mut ctx, "(length ((lambda () $V) 1 2 3))"), 3);
    }

    #[test]
    fn let_bound_lambda_can_recurse() {
        let mut ctx = ctx();
        assert_eq!(
            run_int(
                &mut ctx,
                "(let ((f (lambda (n) (if (< n 1) 0 (+ n (f (- n 1))))))) (f 10))"
            ),
            55
        );
    }

    #[test]
    fn map_filter_range_scenarios() {
        let mut ctx = ctx();
        assert_eq!(
            run_int(
                &mut ctx,
                "(equal (map (lambda (x) (* x x)) '(1 2 3 4)) '(1 4 9 16))"
            ),
            1
        );
        assert_eq!(
            run_int(
                &mut ctx,
                "(equal (filter (lambda (x) (> x 2)) '(1 2 3 4)) '(3 4))"
            ),
            1
        );
        assert_eq!(run_int(&mut ctx, "(length (range 0 10 2))"), 5);
    }

    #[test]
    fn structural_equal_scenario() {
        let mut ctx = ctx();
        assert_eq!(
            run_int(
                &mut ctx,
                "(equal '(1 (2 3)) (cons 1 (cons (cons 2 (cons 3 nil)) nil)))"
            ),
            1
        );
    }

    #[test]
    fn errors_propagate_and_reach_the_handler() {
        let mut ctx = ctx();
        let mut reported = None;
        // `cons` propagates an error argument untouched.
        let v = dostring(&mut ctx, "(cons no-such 1)", |_ctx, e| {
            reported = Some(e);
        });
        assert!(ctx.cell(v).is_error());
        assert_eq!(reported, Some(v));
        assert_eq!(ctx.error_code(v), ErrorCode::UndefinedVariableAccess);
    }

    #[test]
    fn context_free_errors_pick_up_enclosing_form() {
        let mut ctx = ctx();
        // Calling a non-function produces an error with no context; eval
        // attaches the offending form on the way out.
        let v = dostring(&mut ctx, "(no-such-fn)", |_, _| {});
        assert_eq!(ctx.error_code(v), ErrorCode::ValueNotCallable);
        let context = ctx.error_context(v);
        assert!(ctx.cell(context).is_cons());
        assert_eq!(ctx.symbol_name(ctx.car(context)), "no-such-fn");
    }

    #[test]
    fn error_stops_top_level_evaluation() {
        let mut ctx = ctx();
        let mut calls = 0;
        let _ = dostring(&mut ctx, "(set 'a 1) (no-such-fn) (set 'a 2)", |_, _| {
            calls += 1
        });
        assert_eq!(calls, 1);
        assert_eq!(run_int(&mut ctx, "a"), 1);
    }

    #[test]
    fn calling_a_non_function_is_an_error() {
        let mut ctx = ctx();
        let v = run(&mut ctx, "(3 4)");
        assert!(ctx.cell(v).is_error());
        assert_eq!(ctx.error_code(v), ErrorCode::ValueNotCallable);
    }

    #[test]
    fn macros_rewrite_at_read_time() {
        let mut ctx = ctx();
        assert_eq!(
            run_int(
                &mut ctx,
                "(macro when (c body) `(if ,c ,@body nil))
                 (when 1 (+ 2 3))"
            ),
            5
        );
    }

    #[test]
    fn nested_macros_expand_in_sublists() {
        let mut ctx = ctx();
        assert_eq!(
            run_int(
                &mut ctx,
                "(macro twice (e) `(+ ,@e ,@e))
                 (macro quad (e) `(+ (twice ,@e) (twice ,@e)))
                 (quad 3)"
            ),
            12
        );
    }

    #[test]
    fn dostring_returns_last_value() {
        let mut ctx = ctx();
        assert_eq!(run_int(&mut ctx, "1 2 3"), 3);
    }

    #[test]
    fn entry_counter_tracks_reentrancy() {
        let mut ctx = ctx();
        assert!(!ctx.is_executing());
        run(&mut ctx, "(set 'x 1)");
        assert!(!ctx.is_executing());
    }

    #[test]
    fn gc_safety_under_pressure() {
        let mut ctx = ctx();
        // Generate garbage until well past the pool size; live data must
        // survive the implied collections.
        for _ in 0..60 {
            assert_eq!(run_int(&mut ctx, "(let ((x (range 100))) (length x))"), 100);
        }
        assert_eq!(
            ctx.pool.free_count() + ctx.pool.live_count(),
            crate::pool::VALUE_POOL_SIZE
        );
    }
}
