//! Globals tree — top-level bindings in an unbalanced binary search tree.
//!
//! Each binding costs three cells, shaped `((key . value) . (left . right))`.
//! Keys are interned-symbol cells; ordering compares intern offsets, which
//! is sound because two symbols with the same spelling always share one
//! offset. The shape therefore depends on intern order, not on textual
//! order — the tree is unbalanced on purpose, and the whole structure is
//! plain cons cells the collector already knows how to trace.

use crate::cell::{CellRef, ErrorCode};
use crate::ctx::Context;

fn left_subtree(ctx: &Context, node: CellRef) -> CellRef {
    ctx.car(ctx.cdr(node))
}

fn right_subtree(ctx: &Context, node: CellRef) -> CellRef {
    ctx.cdr(ctx.cdr(node))
}

fn set_left_subtree(ctx: &mut Context, node: CellRef, value: CellRef) {
    let children = ctx.cdr(node);
    ctx.set_car(children, value);
}

fn set_right_subtree(ctx: &mut Context, node: CellRef, value: CellRef) {
    let children = ctx.cdr(node);
    ctx.set_cdr(children, value);
}

/// Build a fresh leaf node around a protected kvp. Returns the node, which
/// is unrooted — the caller attaches it immediately.
fn make_node(ctx: &mut Context, kvp: CellRef) -> CellRef {
    let nil = ctx.nil();
    let children = ctx.make_cons(nil, nil);
    ctx.push_op(children);
    let node = ctx.make_cons(kvp, children);
    ctx.pop_op();
    node
}

/// Insert or overwrite a binding. `key` and `value` must be rooted by the
/// caller.
pub fn insert(ctx: &mut Context, key: CellRef, value: CellRef) {
    let kvp = ctx.make_cons(key, value);
    let p_kvp = ctx.protect(kvp);

    if ctx.is_nil(ctx.globals_tree) {
        let node = make_node(ctx, kvp);
        ctx.globals_tree = node;
        ctx.unprotect(p_kvp);
        return;
    }

    let target = ctx.symbol_intern(key);
    let mut current = ctx.globals_tree;
    let mut prev = current;
    let mut insert_left = true;

    while !ctx.is_nil(current) {
        let current_key = ctx.car(ctx.car(current));
        let current_offset = ctx.symbol_intern(current_key);

        if current_offset == target {
            // Key already bound; overwrite in place.
            let existing_kvp = ctx.car(current);
            ctx.set_cdr(existing_kvp, value);
            ctx.unprotect(p_kvp);
            return;
        }

        prev = current;
        if current_offset < target {
            insert_left = true;
            current = left_subtree(ctx, current);
        } else {
            insert_left = false;
            current = right_subtree(ctx, current);
        }
    }

    let node = make_node(ctx, kvp);
    if insert_left {
        set_left_subtree(ctx, prev, node);
    } else {
        set_right_subtree(ctx, prev, node);
    }
    ctx.unprotect(p_kvp);
}

/// Look up a binding. On a miss, returns an `undefined_variable_access`
/// error whose context is a `"[var: <name>]"` string.
pub fn find(ctx: &mut Context, key: CellRef) -> CellRef {
    let target = ctx.symbol_intern(key);
    let mut current = ctx.globals_tree;

    while !ctx.is_nil(current) {
        let current_key = ctx.car(ctx.car(current));
        let current_offset = ctx.symbol_intern(current_key);
        if current_offset == target {
            return ctx.cdr(ctx.car(current));
        }
        if current_offset < target {
            current = left_subtree(ctx, current);
        } else {
            current = right_subtree(ctx, current);
        }
    }

    let hint = format!("[var: {}]", ctx.intern_name(target));
    let context = ctx.make_string(&hint);
    let p = ctx.protect(context);
    let err = ctx.make_error(ErrorCode::UndefinedVariableAccess, context);
    ctx.unprotect(p);
    err
}

/// Remove a binding, reattaching both subtrees of the removed node.
pub fn erase(ctx: &mut Context, key: CellRef) {
    if ctx.is_nil(ctx.globals_tree) {
        return;
    }

    let target = ctx.symbol_intern(key);
    let mut current = ctx.globals_tree;
    let mut prev = current;
    let mut erase_left = true;

    while !ctx.is_nil(current) {
        let current_key = ctx.car(ctx.car(current));
        let current_offset = ctx.symbol_intern(current_key);

        if current_offset == target {
            let erased = ctx.protect(current);

            if current == prev {
                let nil = ctx.nil();
                ctx.globals_tree = nil;
            } else if erase_left {
                let nil = ctx.nil();
                set_left_subtree(ctx, prev, nil);
            } else {
                let nil = ctx.nil();
                set_right_subtree(ctx, prev, nil);
            }

            // Reinsertion allocates fresh nodes for every binding in both
            // detached subtrees; the erased node stays protected so a
            // collection mid-way cannot reclaim what is left to move.
            let left = left_subtree(ctx, current);
            if !ctx.is_nil(left) {
                traverse_from(ctx, left, |ctx, kvp, _node| {
                    let k = ctx.car(kvp);
                    let v = ctx.cdr(kvp);
                    insert(ctx, k, v);
                });
            }
            let right = right_subtree(ctx, current);
            if !ctx.is_nil(right) {
                traverse_from(ctx, right, |ctx, kvp, _node| {
                    let k = ctx.car(kvp);
                    let v = ctx.cdr(kvp);
                    insert(ctx, k, v);
                });
            }

            ctx.unprotect(erased);
            return;
        }

        prev = current;
        if current_offset < target {
            erase_left = true;
            current = left_subtree(ctx, current);
        } else {
            erase_left = false;
            current = right_subtree(ctx, current);
        }
    }
}

/// Visit every (key . value) pair in the tree rooted at the context's
/// globals without allocating.
pub fn traverse(ctx: &mut Context, f: impl FnMut(&mut Context, CellRef, CellRef)) {
    let root = ctx.globals_tree;
    if ctx.is_nil(root) {
        return;
    }
    traverse_from(ctx, root, f);
}

/// In-place Morris traversal: threads right-subtree pointers through the
/// tree while descending and restores them afterwards, so no stack or heap
/// space is needed. The visitor receives the kvp and its node.
pub fn traverse_from(
    ctx: &mut Context,
    root: CellRef,
    mut f: impl FnMut(&mut Context, CellRef, CellRef),
) {
    let mut current = root;

    while !ctx.is_nil(current) {
        if ctx.is_nil(left_subtree(ctx, current)) {
            let kvp = ctx.car(current);
            f(ctx, kvp, current);
            current = right_subtree(ctx, current);
        } else {
            let mut prev = left_subtree(ctx, current);
            while !ctx.is_nil(right_subtree(ctx, prev)) && right_subtree(ctx, prev) != current {
                prev = right_subtree(ctx, prev);
            }

            if ctx.is_nil(right_subtree(ctx, prev)) {
                set_right_subtree(ctx, prev, current);
                current = left_subtree(ctx, current);
            } else {
                let nil = ctx.nil();
                set_right_subtree(ctx, prev, nil);
                let kvp = ctx.car(current);
                f(ctx, kvp, current);
                current = right_subtree(ctx, current);
            }
        }
    }
}
