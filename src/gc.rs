//! Mark-and-sweep collector.
//!
//! Non-moving, stop-the-world. The mark phase traces from the context's
//! singletons, the lexical binding chain, the macro list, the operand
//! stack, the globals tree, the current `this`, and every protected root.
//! Marking is driven by an explicit worklist, so arbitrarily long cdr
//! chains and cyclic structures cost no call-stack depth; a marked cell is
//! never revisited.
//!
//! The sweep phase walks the pool linearly. Every live, unmarked cell is
//! finalized (returning the slot drops the payload, which releases a data
//! buffer's scratch handle) and relinked onto the free list; survivors have
//! their mark bit cleared for the next cycle.

use crate::cell::{CellKind, CellRef, FunctionKind};
use crate::ctx::Context;
use crate::pool::VALUE_POOL_SIZE;

/// Run one full collection cycle. Returns the number of cells collected.
pub fn run_gc(ctx: &mut Context) -> usize {
    mark(ctx);
    let collected = sweep(ctx);
    tracing::trace!(collected, free = ctx.pool.free_count(), "gc cycle");
    collected
}

fn mark(ctx: &mut Context) {
    let mut work: Vec<CellRef> = Vec::with_capacity(128);

    work.push(ctx.nil);
    work.push(ctx.oom);
    work.push(ctx.lexical_bindings);
    work.push(ctx.macros);
    work.push(ctx.this_fn);
    work.push(ctx.globals_tree);
    work.extend_from_slice(&ctx.operand_stack);
    work.extend_from_slice(&ctx.protected);

    while let Some(r) = work.pop() {
        let cell = ctx.pool.get_mut(r);
        if cell.mark {
            continue;
        }
        cell.mark = true;

        match &cell.kind {
            CellKind::Cons { car, cdr } => {
                work.push(*car);
                work.push(*cdr);
            }
            CellKind::Function(FunctionKind::Interpreted { code, bindings }) => {
                work.push(*code);
                work.push(*bindings);
            }
            CellKind::Function(FunctionKind::Bytecode { bytecode, bindings }) => {
                work.push(*bytecode);
                work.push(*bindings);
            }
            CellKind::String { buffer, .. } => work.push(*buffer),
            CellKind::Error { context, .. } => work.push(*context),
            _ => {}
        }
    }
}

fn sweep(ctx: &mut Context) -> usize {
    // If nothing kept the current string packing buffer alive, drop the
    // tail-packing pointer so future strings start a fresh buffer.
    if !ctx.pool.get(ctx.string_buffer).mark {
        ctx.string_buffer = ctx.nil;
    }

    let mut collected = 0;
    for i in 0..VALUE_POOL_SIZE {
        let r = CellRef(i as u16);
        let cell = ctx.pool.get_mut(r);
        if cell.alive {
            if cell.mark {
                cell.mark = false;
            } else {
                // Returning the slot drops the payload — the per-type
                // finalizer.
                ctx.pool.free(r);
                collected += 1;
            }
        }
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StdHost;
    use crate::pool::VALUE_POOL_SIZE;

    fn ctx() -> Context {
        Context::new(Box::new(StdHost::new()))
    }

    #[test]
    fn unreachable_cells_are_collected() {
        let mut ctx = ctx();
        let live_before = ctx.pool.live_count();
        for i in 0..10 {
            let v = ctx.make_integer(i);
            let _ = ctx.make_cons(v, v);
        }
        let collected = run_gc(&mut ctx);
        assert!(collected >= 20);
        assert_eq!(ctx.pool.live_count(), live_before);
    }

    #[test]
    fn operand_stack_roots_survive() {
        let mut ctx = ctx();
        let v = ctx.make_integer(99);
        ctx.push_op(v);
        run_gc(&mut ctx);
        assert_eq!(ctx.integer_value(ctx.get_op0()), 99);
        ctx.pop_op();
    }

    #[test]
    fn protected_roots_survive() {
        let mut ctx = ctx();
        let v = ctx.make_integer(5);
        let inner = ctx.make_cons(v, v);
        let p = ctx.protect(inner);
        run_gc(&mut ctx);
        assert_eq!(ctx.integer_value(ctx.car(ctx.protected_get(&p))), 5);
        ctx.unprotect(p);
        run_gc(&mut ctx);
    }

    #[test]
    fn cycles_do_not_hang_and_are_reclaimed() {
        let mut ctx = ctx();
        let live_before = ctx.pool.live_count();
        let nil = ctx.nil();
        let one = ctx.make_integer(1);
        let a = ctx.make_cons(one, nil);
        let b = ctx.make_cons(one, a);
        ctx.set_cdr(a, b); // a <-> b cycle

        let p = ctx.protect(a);
        run_gc(&mut ctx);
        assert!(ctx.cell(a).is_alive());
        assert!(ctx.cell(b).is_alive());
        ctx.unprotect(p);

        run_gc(&mut ctx);
        assert_eq!(ctx.pool.live_count(), live_before);
    }

    #[test]
    fn globals_survive_collection() {
        let mut ctx = ctx();
        let v = ctx.make_integer(123);
        ctx.set_var_named("keep-me", v);
        run_gc(&mut ctx);
        let got = ctx.get_var_named("keep-me");
        assert_eq!(ctx.integer_value(got), 123);
    }

    #[test]
    fn pool_conservation_holds() {
        let mut ctx = ctx();
        for i in 0..200 {
            let _ = ctx.make_integer(i);
        }
        assert_eq!(
            ctx.pool.free_count() + ctx.pool.live_count(),
            VALUE_POOL_SIZE
        );
        let free_before = ctx.pool.free_count();
        run_gc(&mut ctx);
        assert!(ctx.pool.free_count() >= free_before);
        assert_eq!(
            ctx.pool.free_count() + ctx.pool.live_count(),
            VALUE_POOL_SIZE
        );
    }

    #[test]
    fn string_packing_buffer_dropped_when_unreferenced() {
        let mut ctx = ctx();
        let s = ctx.make_string("transient");
        assert!(!ctx.is_nil(ctx.string_buffer));
        let _ = s; // not rooted
        run_gc(&mut ctx);
        assert!(ctx.is_nil(ctx.string_buffer));
    }

    #[test]
    fn marked_string_buffer_survives() {
        let mut ctx = ctx();
        let s = ctx.make_string("kept");
        let p = ctx.protect(s);
        run_gc(&mut ctx);
        assert!(!ctx.is_nil(ctx.string_buffer));
        assert_eq!(ctx.string_value(s), "kept");
        ctx.unprotect(p);
    }

    #[test]
    fn collector_reports_count() {
        let mut ctx = ctx();
        for _ in 0..5 {
            let nil = ctx.nil();
            let _ = ctx.make_cons(nil, nil);
        }
        assert!(run_gc(&mut ctx) >= 5);
    }
}
