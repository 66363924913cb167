//! Incremental list construction that stays GC-safe.
//!
//! The head of the list under construction is held as a protected root, so
//! every `make_cons` along the way can trigger a collection without losing
//! the cells already linked. Callers must release the builder (via
//! [`ListBuilder::result`]) in LIFO order with any other protected roots
//! they hold.

use crate::cell::CellRef;
use crate::ctx::{Context, Protected};

pub struct ListBuilder {
    head: Protected,
    tail: CellRef,
}

impl ListBuilder {
    pub fn new(ctx: &mut Context) -> Self {
        let nil = ctx.nil();
        Self {
            head: ctx.protect(nil),
            tail: nil,
        }
    }

    /// Prepend a value.
    pub fn push_front(&mut self, ctx: &mut Context, value: CellRef) {
        let head = ctx.protected_get(&self.head);
        let cell = ctx.make_cons(value, head);
        if !ctx.cell(cell).is_cons() {
            // Allocation failed; surface the OOM sentinel as the result.
            ctx.protected_set(&self.head, cell);
            return;
        }
        ctx.protected_set(&self.head, cell);
        if self.tail == ctx.nil() {
            self.tail = cell;
        }
    }

    /// Append a value.
    pub fn push_back(&mut self, ctx: &mut Context, value: CellRef) {
        let nil = ctx.nil();
        let cell = ctx.make_cons(value, nil);
        if !ctx.cell(cell).is_cons() {
            ctx.protected_set(&self.head, cell);
            return;
        }
        if ctx.protected_get(&self.head) == nil {
            ctx.protected_set(&self.head, cell);
            self.tail = cell;
        } else if ctx.cell(self.tail).is_cons() {
            ctx.set_cdr(self.tail, cell);
            self.tail = cell;
        }
    }

    /// Release the protected root and return the built list.
    pub fn result(self, ctx: &mut Context) -> CellRef {
        let head = ctx.protected_get(&self.head);
        ctx.unprotect(self.head);
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StdHost;

    fn ctx() -> Context {
        Context::new(Box::new(StdHost::new()))
    }

    #[test]
    fn push_back_builds_in_order() {
        let mut ctx = ctx();
        let mut b = ListBuilder::new(&mut ctx);
        for i in 1..=3 {
            let v = ctx.make_integer(i);
            b.push_back(&mut ctx, v);
        }
        let list = b.result(&mut ctx);
        assert_eq!(ctx.list_length(list), 3);
        assert_eq!(ctx.integer_value(ctx.get_list(list, 0)), 1);
        assert_eq!(ctx.integer_value(ctx.get_list(list, 2)), 3);
    }

    #[test]
    fn push_front_reverses() {
        let mut ctx = ctx();
        let mut b = ListBuilder::new(&mut ctx);
        for i in 1..=3 {
            let v = ctx.make_integer(i);
            b.push_front(&mut ctx, v);
        }
        let list = b.result(&mut ctx);
        assert_eq!(ctx.integer_value(ctx.get_list(list, 0)), 3);
        assert_eq!(ctx.integer_value(ctx.get_list(list, 2)), 1);
    }

    #[test]
    fn empty_builder_yields_nil() {
        let mut ctx = ctx();
        let b = ListBuilder::new(&mut ctx);
        let list = b.result(&mut ctx);
        assert!(ctx.is_nil(list));
    }

    #[test]
    fn mixed_front_and_back() {
        let mut ctx = ctx();
        let mut b = ListBuilder::new(&mut ctx);
        let two = ctx.make_integer(2);
        b.push_back(&mut ctx, two);
        let one = ctx.make_integer(1);
        b.push_front(&mut ctx, one);
        let three = ctx.make_integer(3);
        b.push_back(&mut ctx, three);
        let list = b.result(&mut ctx);
        let rendered: Vec<i32> = (0..3)
            .map(|i| ctx.integer_value(ctx.get_list(list, i)))
            .collect();
        assert_eq!(rendered, vec![1, 2, 3]);
    }
}
