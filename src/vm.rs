//! Bytecode virtual machine — a stack machine over a data-buffer.
//!
//! The program counter is a byte offset into the buffer; all jump targets
//! are relative to the executing function's start offset. The VM shares the
//! operand stack, call-frame registers, and funcall convention with the
//! tree-walking evaluator, so bytecode and interpreted functions call each
//! other freely.

use crate::bytecode::{read_i32, read_u16, read_u8, Opcode};
use crate::cell::{CellRef, ErrorCode};
use crate::ctx::Context;
use crate::eval::funcall;
use crate::intern::InternRef;

/// Execute bytecode from `code_buffer` (a data-buffer cell) starting at
/// `start_offset`. Returns with the result on top of the operand stack.
pub fn vm_execute(ctx: &mut Context, code_buffer: CellRef, start_offset: usize) {
    let code = ctx.databuffer_handle(code_buffer);
    let mut pc = start_offset;

    // Lexical frames opened since entry. A self tail-call must unwind them
    // all, because the restart never reaches the LexicalFramePop
    // instructions that would otherwise close them.
    let mut nested_scope: u32 = 0;

    loop {
        let op = code.with(|data| Opcode::from_byte(data[pc]));
        let Some(op) = op else {
            ctx.host.fatal("vm: undecodable opcode");
        };
        pc += 1;

        match op {
            Opcode::JumpIfFalse => {
                let offset = code.with(|data| read_u16(data, pc));
                pc += 2;
                if !ctx.is_boolean_true(ctx.get_op(0)) {
                    pc = start_offset + offset as usize;
                }
                ctx.pop_op();
            }

            Opcode::Jump => {
                let offset = code.with(|data| read_u16(data, pc));
                pc = start_offset + offset as usize;
            }

            Opcode::SmallJumpIfFalse => {
                let offset = code.with(|data| read_u8(data, pc));
                pc += 1;
                if !ctx.is_boolean_true(ctx.get_op(0)) {
                    pc = start_offset + offset as usize;
                }
                ctx.pop_op();
            }

            Opcode::SmallJump => {
                let offset = code.with(|data| read_u8(data, pc));
                pc = start_offset + offset as usize;
            }

            Opcode::LoadVar => {
                let offset = code.with(|data| read_u16(data, pc));
                pc += 2;
                let value = ctx.get_var_interned(InternRef::from_offset(offset));
                ctx.push_op(value);
            }

            Opcode::LoadVarRelocatable => {
                // Only resolved bytecode may execute; the loader rewrites
                // these before a function cell ever points at the buffer.
                ctx.host.fatal("vm: unresolved relocatable instruction");
            }

            Opcode::Dup => {
                let top = ctx.get_op(0);
                ctx.push_op(top);
            }

            Opcode::Not => {
                let input = ctx.get_op(0);
                let value = !ctx.is_boolean_true(input);
                ctx.pop_op();
                let cell = ctx.make_integer(value as i32);
                ctx.push_op(cell);
            }

            Opcode::PushNil => {
                let nil = ctx.nil();
                ctx.push_op(nil);
            }

            Opcode::PushInteger => {
                let value = code.with(|data| read_i32(data, pc));
                pc += 4;
                let cell = ctx.make_integer(value);
                ctx.push_op(cell);
            }

            Opcode::Push0 => {
                let cell = ctx.make_integer(0);
                ctx.push_op(cell);
            }

            Opcode::Push1 => {
                let cell = ctx.make_integer(1);
                ctx.push_op(cell);
            }

            Opcode::Push2 => {
                let cell = ctx.make_integer(2);
                ctx.push_op(cell);
            }

            Opcode::PushSmallInteger => {
                let value = code.with(|data| read_u8(data, pc));
                pc += 1;
                let cell = ctx.make_integer(value as i32);
                ctx.push_op(cell);
            }

            Opcode::PushSymbol => {
                let offset = code.with(|data| read_u16(data, pc));
                pc += 2;
                let cell = ctx.make_symbol_interned(InternRef::from_offset(offset));
                ctx.push_op(cell);
            }

            Opcode::PushSymbolRelocatable => {
                ctx.host.fatal("vm: unresolved relocatable instruction");
            }

            Opcode::PushString => {
                let len = code.with(|data| read_u8(data, pc)) as usize;
                pc += 1;
                let text = code.with(|data| {
                    let body = &data[pc..pc + len.saturating_sub(1)];
                    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
                    String::from_utf8_lossy(&body[..end]).into_owned()
                });
                pc += len;
                let cell = ctx.make_string(&text);
                ctx.push_op(cell);
            }

            Opcode::TailCall => {
                let argc = code.with(|data| read_u8(data, pc));
                pc += 1;
                tail_call(ctx, &mut pc, start_offset, &mut nested_scope, argc);
            }

            Opcode::TailCall1 => {
                tail_call(ctx, &mut pc, start_offset, &mut nested_scope, 1);
            }

            Opcode::TailCall2 => {
                tail_call(ctx, &mut pc, start_offset, &mut nested_scope, 2);
            }

            Opcode::TailCall3 => {
                tail_call(ctx, &mut pc, start_offset, &mut nested_scope, 3);
            }

            Opcode::Funcall => {
                let argc = code.with(|data| read_u8(data, pc));
                pc += 1;
                call_top(ctx, argc);
            }

            Opcode::Funcall1 => call_top(ctx, 1),
            Opcode::Funcall2 => call_top(ctx, 2),
            Opcode::Funcall3 => call_top(ctx, 3),

            Opcode::Arg => {
                let index = ctx.get_op(0);
                if ctx.cell(index).is_integer() {
                    let value = ctx.get_arg(ctx.integer_value(index) as u16);
                    ctx.pop_op();
                    ctx.push_op(value);
                } else {
                    ctx.pop_op();
                    let nil = ctx.nil();
                    let err = ctx.make_error(ErrorCode::InvalidArgumentType, nil);
                    ctx.push_op(err);
                }
            }

            Opcode::Arg0 => {
                let value = ctx.get_arg(0);
                ctx.push_op(value);
            }

            Opcode::Arg1 => {
                let value = ctx.get_arg(1);
                ctx.push_op(value);
            }

            Opcode::Arg2 => {
                let value = ctx.get_arg(2);
                ctx.push_op(value);
            }

            Opcode::MakePair => {
                let car = ctx.get_op(1);
                let cdr = ctx.get_op(0);
                let pair = ctx.make_cons(car, cdr);
                ctx.pop_op();
                ctx.pop_op();
                ctx.push_op(pair);
            }

            Opcode::First => {
                let arg = ctx.get_op(0);
                ctx.pop_op();
                if ctx.cell(arg).is_cons() {
                    let car = ctx.car(arg);
                    ctx.push_op(car);
                } else {
                    let nil = ctx.nil();
                    let err = ctx.make_error(ErrorCode::InvalidArgumentType, nil);
                    ctx.push_op(err);
                }
            }

            Opcode::Rest => {
                let arg = ctx.get_op(0);
                ctx.pop_op();
                if ctx.cell(arg).is_cons() {
                    let cdr = ctx.cdr(arg);
                    ctx.push_op(cdr);
                } else {
                    let nil = ctx.nil();
                    let err = ctx.make_error(ErrorCode::InvalidArgumentType, nil);
                    ctx.push_op(err);
                }
            }

            Opcode::Pop => {
                ctx.pop_op();
            }

            Opcode::EarlyRet | Opcode::Ret => return,

            Opcode::PushLambda => {
                let end = code.with(|data| read_u16(data, pc));
                pc += 2;
                // The lambda body starts right here; record it and skip.
                let offset = ctx.make_integer(pc as i32);
                let po = ctx.protect(offset);
                if ctx.cell(offset).is_integer() {
                    let bytecode = ctx.make_cons(offset, code_buffer);
                    if ctx.cell(bytecode).is_cons() {
                        let pb = ctx.protect(bytecode);
                        let function = ctx.make_bytecode_function(bytecode);
                        ctx.unprotect(pb);
                        ctx.push_op(function);
                    } else {
                        ctx.push_op(bytecode);
                    }
                } else {
                    ctx.push_op(offset);
                }
                ctx.unprotect(po);
                pc = start_offset + end as usize;
            }

            Opcode::PushList => {
                let count = code.with(|data| read_u8(data, pc));
                pc += 1;
                let list = ctx.make_list(count as u32);
                let pl = ctx.protect(list);
                for i in 0..count as u32 {
                    let value = ctx.get_op(count as u32 - 1 - i);
                    ctx.set_list(list, i, value);
                }
                for _ in 0..count {
                    ctx.pop_op();
                }
                ctx.unprotect(pl);
                ctx.push_op(list);
            }

            Opcode::PushThis => {
                let this = ctx.get_this();
                ctx.push_op(this);
            }

            Opcode::LexicalDef => {
                let offset = code.with(|data| read_u16(data, pc));
                pc += 2;
                let sym = ctx.make_symbol_interned(InternRef::from_offset(offset));
                let ps = ctx.protect(sym);
                let value = ctx.get_op(0);
                let kvp = ctx.make_cons(sym, value);
                ctx.unprotect(ps);
                let pk = ctx.protect(kvp);
                ctx.pop_op(); // value
                ctx.lexical_frame_store(kvp);
                ctx.unprotect(pk);
            }

            Opcode::LexicalDefRelocatable => {
                ctx.host.fatal("vm: unresolved relocatable instruction");
            }

            Opcode::LexicalFramePush => {
                ctx.lexical_frame_push();
                nested_scope += 1;
            }

            Opcode::LexicalFramePop => {
                ctx.lexical_frame_pop();
                nested_scope = nested_scope.saturating_sub(1);
            }

            Opcode::LexicalVarLoad => {
                // Pop a symbol, resolve it against the lexical chain only.
                let sym = ctx.get_op(0);
                ctx.pop_op();
                let value = lexical_only_lookup(ctx, sym);
                ctx.push_op(value);
            }

            Opcode::Fatal => {
                ctx.host.fatal("vm: fatal instruction");
            }
        }
    }
}

/// Pop the callee off the stack and funcall it, keeping it rooted across
/// the call.
fn call_top(ctx: &mut Context, argc: u8) {
    let function = ctx.get_op(0);
    let pf = ctx.protect(function);
    ctx.pop_op();
    funcall(ctx, function, argc);
    ctx.unprotect(pf);
}

/// Tail call: when the callee is the currently-executing function and the
/// argument count matches the current frame, overwrite the positional
/// arguments in place, unwind any opened lexical frames, and restart from
/// the function's first instruction — no stack growth. Anything else is an
/// ordinary funcall.
fn tail_call(
    ctx: &mut Context,
    pc: &mut usize,
    start_offset: usize,
    nested_scope: &mut u32,
    argc: u8,
) {
    let function = ctx.get_op(0);

    if function == ctx.get_this() && argc == ctx.get_argc() {
        ctx.pop_op(); // function

        let break_loc = ctx.arguments_break_loc as usize;
        let argc = argc as usize;
        // New arguments sit on top of the stack (last on top); the frame's
        // current arguments end at break_loc. Copy over, then drop the
        // temporaries.
        for i in 0..argc {
            let value = ctx.get_op((argc - 1 - i) as u32);
            let slot = break_loc - (argc - 1) + i;
            ctx.operand_stack[slot] = value;
        }
        for _ in 0..argc {
            ctx.pop_op();
        }

        while *nested_scope > 0 {
            ctx.lexical_frame_pop();
            *nested_scope -= 1;
        }
        *pc = start_offset;
    } else {
        call_top(ctx, argc);
    }
}

fn lexical_only_lookup(ctx: &mut Context, symbol: CellRef) -> CellRef {
    if !ctx.cell(symbol).is_symbol() {
        let nil = ctx.nil();
        return ctx.make_error(ErrorCode::InvalidArgumentType, nil);
    }
    let target = ctx.symbol_intern(symbol);
    let mut stack = ctx.lexical_bindings;
    while !ctx.is_nil(stack) {
        let mut bindings = ctx.car(stack);
        while !ctx.is_nil(bindings) {
            let kvp = ctx.car(bindings);
            if ctx.symbol_intern(ctx.car(kvp)) == target {
                return ctx.cdr(kvp);
            }
            bindings = ctx.cdr(bindings);
        }
        stack = ctx.cdr(stack);
    }
    let hint = format!("[var: {}]", ctx.symbol_name(symbol));
    let context = ctx.make_string(&hint);
    let pc = ctx.protect(context);
    let err = ctx.make_error(ErrorCode::UndefinedVariableAccess, context);
    ctx.unprotect(pc);
    err
}
