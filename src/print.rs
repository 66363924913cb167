//! Value formatting — renders cells back to Lisp text.
//!
//! Top-level compound values are rendered with a leading quote so the
//! output reads back as the same structure.

use crate::cell::{CellKind, CellRef, FunctionKind};
use crate::ctx::Context;

/// Format a value as Lisp text.
pub fn format_value(ctx: &Context, value: CellRef) -> String {
    let mut out = String::new();
    format_impl(ctx, value, &mut out, 0);
    out
}

fn format_impl(ctx: &Context, value: CellRef, out: &mut String, depth: u32) {
    match ctx.kind(value) {
        CellKind::HeapNode { .. } => {
            unreachable!("direct access to heap node");
        }

        CellKind::Nil => {
            if depth == 0 {
                out.push_str("'()");
            } else {
                out.push_str("()");
            }
        }

        CellKind::Character(_) => {}

        CellKind::String { .. } => {
            out.push('"');
            out.push_str(&ctx.string_value(value));
            out.push('"');
        }

        CellKind::Symbol(name) => {
            out.push_str(ctx.intern_name(*name));
        }

        CellKind::Integer(v) => {
            out.push_str(&v.to_string());
        }

        CellKind::Cons { .. } => {
            if depth == 0 {
                out.push('\'');
            }
            out.push('(');
            format_impl(ctx, ctx.car(value), out, depth + 1);

            let first_cdr = ctx.cdr(value);
            if ctx.is_nil(first_cdr) {
                // single-element list
            } else if !ctx.cell(first_cdr).is_cons() {
                out.push_str(" . ");
                format_impl(ctx, first_cdr, out, depth + 1);
            } else {
                let mut current = value;
                loop {
                    let cdr = ctx.cdr(current);
                    if ctx.cell(cdr).is_cons() {
                        out.push(' ');
                        format_impl(ctx, ctx.car(cdr), out, depth + 1);
                        current = cdr;
                    } else if !ctx.is_nil(cdr) {
                        // Improper tail: keep the dot so the text reads
                        // back as the same structure.
                        out.push_str(" . ");
                        format_impl(ctx, cdr, out, depth + 1);
                        break;
                    } else {
                        break;
                    }
                }
            }
            out.push(')');
        }

        CellKind::Function(kind) => match kind {
            FunctionKind::Native(_) => out.push_str("<lambda>"),
            FunctionKind::Interpreted { .. } => out.push_str("<lambda>"),
            FunctionKind::Bytecode { .. } => out.push_str("<lambda>"),
        },

        CellKind::UserData(_) => out.push_str("<ud>"),

        CellKind::Error { code, context } => {
            out.push_str("[ERR: ");
            out.push_str(&code.to_string());
            out.push_str(" : ");
            format_impl(ctx, *context, out, 0);
            out.push(']');
        }

        CellKind::DataBuffer(_) => out.push_str("<sbr>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::dostring;
    use crate::host::StdHost;

    fn ctx() -> Context {
        Context::new(Box::new(StdHost::new()))
    }

    fn run(ctx: &mut Context, src: &str) -> CellRef {
        dostring(ctx, src, |_, _| {})
    }

    #[test]
    fn formats_atoms() {
        let mut ctx = ctx();
        let v = ctx.make_integer(42);
        assert_eq!(format_value(&ctx, v), "42");
        let v = ctx.make_integer(-3);
        assert_eq!(format_value(&ctx, v), "-3");
        let v = ctx.make_symbol("foo");
        assert_eq!(format_value(&ctx, v), "foo");
        let v = ctx.make_string("bar");
        assert_eq!(format_value(&ctx, v), "\"bar\"");
        assert_eq!(format_value(&ctx, ctx.nil()), "'()");
    }

    #[test]
    fn formats_lists_with_leading_quote() {
        let mut ctx = ctx();
        let v = run(&mut ctx, "'(1 2 3)");
        assert_eq!(format_value(&ctx, v), "'(1 2 3)");
    }

    #[test]
    fn formats_dotted_pair() {
        let mut ctx = ctx();
        let v = run(&mut ctx, "'(1 . 2)");
        assert_eq!(format_value(&ctx, v), "'(1 . 2)");
    }

    #[test]
    fn formats_multi_element_dotted_chain() {
        let mut ctx = ctx();
        let v = run(&mut ctx, "(cons 1 (cons 2 3))");
        assert_eq!(format_value(&ctx, v), "'(1 2 . 3)");

        // The formatted text reads back as the same structure, not as a
        // proper three-element list.
        let p = ctx.protect(v);
        let back = run(&mut ctx, "'(1 2 . 3)");
        assert!(ctx.equal_value(v, back, 0));
        let proper = run(&mut ctx, "'(1 2 3)");
        assert!(!ctx.equal_value(v, proper, 0));
        ctx.unprotect(p);
    }

    #[test]
    fn formats_nested_structure() {
        let mut ctx = ctx();
        let v = run(&mut ctx, "'(1 (2 3) ())");
        assert_eq!(format_value(&ctx, v), "'(1 (2 3) ())");
    }

    #[test]
    fn formats_errors_with_context() {
        let mut ctx = ctx();
        let v = run(&mut ctx, "missing-thing");
        let text = format_value(&ctx, v);
        assert!(
            text.starts_with("[ERR: undefined_variable_access : "),
            "got {text}"
        );
        assert!(text.contains("[var: missing-thing]"), "got {text}");
    }

    #[test]
    fn formats_functions_opaquely() {
        let mut ctx = ctx();
        let v = run(&mut ctx, "(lambda (x) x)");
        assert_eq!(format_value(&ctx, v), "<lambda>");
    }

    #[test]
    fn format_read_round_trip() {
        let mut ctx = ctx();
        for src in ["'(1 2 3)", "'(1 . 2)", "'(1 2 . 3)", "'(1 (2 (3)) 4)"] {
            let v = run(&mut ctx, src);
            let text = format_value(&ctx, v);
            let p = ctx.protect(v);
            // Evaluating the formatted text (its leading quote included)
            // must reproduce the value structurally.
            let back = run(&mut ctx, &text);
            assert!(
                ctx.equal_value(v, back, 0),
                "round trip failed: {src} → {text}"
            );
            ctx.unprotect(p);
        }
    }
}
