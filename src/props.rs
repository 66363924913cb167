//! Property suites for the runtime's quantified invariants: pool
//! conservation, symbol identity, reader round-trips, and string packing.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::cell::CellRef;
    use crate::ctx::Context;
    use crate::eval::dostring;
    use crate::host::StdHost;
    use crate::pool::VALUE_POOL_SIZE;
    use crate::print::format_value;

    fn mk_ctx() -> Context {
        Context::new(Box::new(StdHost::new()))
    }

    /// A literal s-expression: rendered to text for the reader, and built
    /// directly through the constructors for comparison.
    #[derive(Clone, Debug)]
    enum Lit {
        Int(i32),
        Str(String),
        Symbol(String),
        List(Vec<Lit>),
        /// Improper chain: head elements then a non-list tail.
        Dotted(Vec<Lit>, Box<Lit>),
    }

    fn symbol_name_strategy() -> impl Strategy<Value = String> {
        // `nil` reads as the nil singleton, never as a symbol.
        "[a-z][a-z0-9-]{0,8}".prop_filter("nil is not a symbol", |s| s != "nil")
    }

    fn leaf_strategy() -> impl Strategy<Value = Lit> {
        prop_oneof![
            (-100_000i32..100_000).prop_map(Lit::Int),
            "[a-z0-9 ]{0,12}".prop_map(Lit::Str),
            symbol_name_strategy().prop_map(Lit::Symbol),
        ]
    }

    fn lit_strategy() -> impl Strategy<Value = Lit> {
        leaf_strategy().prop_recursive(3, 24, 5, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..5).prop_map(Lit::List),
                (prop::collection::vec(inner, 1..4), leaf_strategy())
                    .prop_map(|(head, tail)| Lit::Dotted(head, Box::new(tail))),
            ]
        })
    }

    fn render(lit: &Lit) -> String {
        match lit {
            Lit::Int(v) => v.to_string(),
            Lit::Str(s) => format!("\"{s}\""),
            Lit::Symbol(s) => s.clone(),
            Lit::List(items) => {
                let parts: Vec<String> = items.iter().map(render).collect();
                format!("({})", parts.join(" "))
            }
            Lit::Dotted(items, tail) => {
                let parts: Vec<String> = items.iter().map(render).collect();
                format!("({} . {})", parts.join(" "), render(tail))
            }
        }
    }

    fn construct(ctx: &mut Context, lit: &Lit) -> CellRef {
        match lit {
            Lit::Int(v) => ctx.make_integer(*v),
            Lit::Str(s) => ctx.make_string(s),
            Lit::Symbol(s) => ctx.make_symbol(s),
            Lit::List(items) => construct_chain(ctx, items, None),
            Lit::Dotted(items, tail) => construct_chain(ctx, items, Some(tail)),
        }
    }

    fn construct_chain(ctx: &mut Context, items: &[Lit], tail: Option<&Lit>) -> CellRef {
        let mut result = match tail {
            Some(tail) => construct(ctx, tail),
            None => ctx.nil(),
        };
        for item in items.iter().rev() {
            let pr = ctx.protect(result);
            let child = construct(ctx, item);
            let pc = ctx.protect(child);
            let rest = ctx.protected_get(&pr);
            let cell = ctx.make_cons(child, rest);
            ctx.unprotect(pc);
            ctx.unprotect(pr);
            result = cell;
        }
        result
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Reading a rendered literal produces the same structure the
        /// constructors build, and `eval (read (format v))` reproduces `v`.
        #[test]
        fn reader_round_trip(lit in lit_strategy()) {
            let mut ctx = mk_ctx();

            let text = format!("'{}", render(&lit));
            let parsed = dostring(&mut ctx, &text, |_, _| {});
            let pp = ctx.protect(parsed);

            let built = construct(&mut ctx, &lit);
            let pb = ctx.protect(built);
            prop_assert!(
                ctx.equal_value(parsed, built, 0),
                "parse mismatch for {text}"
            );

            // format → read → eval round trip. A bare symbol formats
            // without the quote it needs to survive evaluation, so
            // re-quote that one case.
            let formatted = format_value(&ctx, parsed);
            let reread = if matches!(lit, Lit::Symbol(_)) {
                format!("'{formatted}")
            } else {
                formatted.clone()
            };
            let again = dostring(&mut ctx, &reread, |_, _| {});
            prop_assert!(
                ctx.equal_value(parsed, again, 0),
                "format round trip failed: {text} → {formatted}"
            );

            ctx.unprotect(pb);
            ctx.unprotect(pp);
        }

        /// Same spelling → same intern offset, and symbols built from the
        /// same name are equal.
        #[test]
        fn symbol_identity(name in "[a-z][a-z0-9-]{0,8}") {
            let mut ctx = mk_ctx();
            let a = ctx.intern(&name);
            let b = ctx.intern(&name);
            prop_assert_eq!(a, b);

            let sa = ctx.make_symbol(&name);
            let pa = ctx.protect(sa);
            let sb = ctx.make_symbol(&name);
            prop_assert_eq!(ctx.symbol_intern(sa), ctx.symbol_intern(sb));
            prop_assert!(ctx.equal_value(sa, sb, 0));
            ctx.unprotect(pa);
        }

        /// Free plus live cells always account for the whole pool, and a
        /// collection never shrinks the free list.
        #[test]
        fn pool_conservation(values in prop::collection::vec(-1000i32..1000, 0..40)) {
            let mut ctx = mk_ctx();

            let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            let program = format!("(length (list {}))", rendered.join(" "));
            let result = dostring(&mut ctx, &program, |_, _| {});
            prop_assert_eq!(ctx.integer_value(result) as usize, values.len());
            prop_assert_eq!(
                ctx.pool.free_count() + ctx.pool.live_count(),
                VALUE_POOL_SIZE
            );

            let free_before = ctx.pool.free_count();
            let collected = crate::gc::run_gc(&mut ctx);
            prop_assert!(ctx.pool.free_count() >= free_before);
            prop_assert_eq!(
                ctx.pool.free_count() + ctx.pool.live_count(),
                VALUE_POOL_SIZE
            );
            prop_assert!(collected <= VALUE_POOL_SIZE);
        }

        /// Strings packed into a shared buffer never overlap and never lose
        /// their contents, no matter how allocation interleaves.
        #[test]
        fn string_packing_is_isolated(contents in prop::collection::vec("[a-z]{0,40}", 1..30)) {
            let mut ctx = mk_ctx();

            let mut cells = Vec::new();
            for s in &contents {
                let cell = ctx.make_string(s);
                ctx.push_op(cell); // root every string
                cells.push(cell);
            }
            for (cell, expected) in cells.iter().zip(contents.iter()) {
                prop_assert_eq!(ctx.string_value(*cell), expected.clone());
            }
            for _ in &cells {
                ctx.pop_op();
            }
        }
    }
}
