//! Module loader — installs precompiled bytecode modules.
//!
//! A module image is `[u16 symbol_count][u16 bytecode_length]` (host-endian,
//! reserved fields omitted), then `symbol_count` null-terminated symbol
//! names, then the bytecode body. Inside the body, relocatable opcodes
//! carry indices into that symbol table; loading interns each name and
//! rewrites the instruction into its resolved variant carrying the
//! intern-arena offset. The rewritten body is copied into a fresh data
//! buffer and wrapped in a bytecode-function cell.

use crate::bytecode::{instruction_len, read_u16, write_u16, Opcode};
use crate::cell::CellRef;
use crate::ctx::Context;
use crate::host::SCRATCH_BUFFER_SIZE;

/// Structural problems detected before any Lisp-level state changes.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("module image truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("module bytecode length {len} exceeds scratch buffer capacity")]
    BytecodeTooLong { len: usize },

    #[error("unterminated symbol table entry {index}")]
    UnterminatedSymbol { index: u16 },

    #[error("symbol table entry {index} is not valid utf-8")]
    BadSymbolName { index: u16 },

    #[error("relocation references symbol {index}, but the module has {count}")]
    SymbolIndexOutOfRange { index: u16, count: u16 },

    #[error("undecodable opcode {op:#04x} at bytecode offset {offset}")]
    UnknownOpcode { op: u8, offset: usize },
}

const HEADER_SIZE: usize = 4;

/// Load a module image: resolve its relocations and return (and leave on
/// the operand stack) a bytecode-function cell entering the body at offset
/// zero.
pub fn load_module(ctx: &mut Context, image: &[u8]) -> Result<CellRef, ModuleError> {
    if image.len() < HEADER_SIZE {
        return Err(ModuleError::Truncated {
            needed: HEADER_SIZE,
            have: image.len(),
        });
    }
    let symbol_count = read_u16(image, 0);
    let bytecode_length = read_u16(image, 2) as usize;

    if bytecode_length > SCRATCH_BUFFER_SIZE {
        return Err(ModuleError::BytecodeTooLong {
            len: bytecode_length,
        });
    }

    // Parse the symbol table.
    let mut symbols: Vec<&str> = Vec::with_capacity(symbol_count as usize);
    let mut cursor = HEADER_SIZE;
    for index in 0..symbol_count {
        let tail = &image[cursor.min(image.len())..];
        let Some(end) = tail.iter().position(|&b| b == 0) else {
            return Err(ModuleError::UnterminatedSymbol { index });
        };
        let name = std::str::from_utf8(&tail[..end])
            .map_err(|_| ModuleError::BadSymbolName { index })?;
        symbols.push(name);
        cursor += end + 1;
    }

    if image.len() < cursor + bytecode_length {
        return Err(ModuleError::Truncated {
            needed: cursor + bytecode_length,
            have: image.len(),
        });
    }
    let mut body = image[cursor..cursor + bytecode_length].to_vec();

    // Rewrite relocations. PushLambda nesting is tracked so the scan stops
    // at the outermost Ret.
    let resolve = |ctx: &mut Context, index: u16| -> Result<u16, ModuleError> {
        let name = symbols.get(index as usize).copied().ok_or(
            ModuleError::SymbolIndexOutOfRange {
                index,
                count: symbol_count,
            },
        )?;
        Ok(ctx.intern(name).offset())
    };

    let mut depth = 0u32;
    let mut pc = 0usize;
    while pc < body.len() {
        let Some(op) = Opcode::from_byte(body[pc]) else {
            return Err(ModuleError::UnknownOpcode {
                op: body[pc],
                offset: pc,
            });
        };
        let len = instruction_len(&body, pc);

        match op {
            Opcode::PushLambda => depth += 1,
            Opcode::Ret => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Opcode::LoadVarRelocatable => {
                let offset = resolve(ctx, read_u16(&body, pc + 1))?;
                body[pc] = Opcode::LoadVar as u8;
                write_u16(&mut body, pc + 1, offset);
            }
            Opcode::PushSymbolRelocatable => {
                let offset = resolve(ctx, read_u16(&body, pc + 1))?;
                body[pc] = Opcode::PushSymbol as u8;
                write_u16(&mut body, pc + 1, offset);
            }
            Opcode::LexicalDefRelocatable => {
                let offset = resolve(ctx, read_u16(&body, pc + 1))?;
                body[pc] = Opcode::LexicalDef as u8;
                write_u16(&mut body, pc + 1, offset);
            }
            _ => {}
        }
        pc += len;
    }

    tracing::debug!(
        symbols = symbol_count,
        bytes = bytecode_length,
        "module loaded"
    );

    // Wrap the resolved body: databuffer, (0 . buffer), bytecode function.
    let buffer = ctx.make_databuffer();
    if buffer == ctx.oom() {
        ctx.push_op(buffer);
        return Ok(buffer);
    }
    let pb = ctx.protect(buffer);
    ctx.databuffer_handle(buffer).with_mut(|data| {
        data[..body.len()].copy_from_slice(&body);
    });

    let zero = ctx.make_integer(0);
    let pz = ctx.protect(zero);
    let bytecode = ctx.make_cons(zero, buffer);
    ctx.unprotect(pz);
    let pbc = ctx.protect(bytecode);
    let function = ctx.make_bytecode_function(bytecode);
    ctx.unprotect(pbc);
    ctx.unprotect(pb);

    ctx.push_op(function);
    Ok(function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BytecodeWriter, Opcode};
    use crate::eval::funcall;
    use crate::host::StdHost;

    fn ctx() -> Context {
        Context::new(Box::new(StdHost::new()))
    }

    /// Assemble a module image from symbol names and a bytecode body.
    fn module_image(symbols: &[&str], body: &[u8]) -> Vec<u8> {
        let mut image = Vec::new();
        image.extend_from_slice(&(symbols.len() as u16).to_ne_bytes());
        image.extend_from_slice(&(body.len() as u16).to_ne_bytes());
        for s in symbols {
            image.extend_from_slice(s.as_bytes());
            image.push(0);
        }
        image.extend_from_slice(body);
        image
    }

    fn call0(ctx: &mut Context, function: CellRef) -> CellRef {
        let pf = ctx.protect(function);
        funcall(ctx, function, 0);
        ctx.unprotect(pf);
        let result = ctx.get_op0();
        ctx.pop_op();
        result
    }

    #[test]
    fn loads_and_runs_a_relocated_module() {
        let mut ctx = ctx();

        // (+ 20 22) with `+` referenced through the module symbol table.
        let mut w = BytecodeWriter::new();
        w.push_small_integer(20);
        w.push_small_integer(22);
        w.load_var_relocatable(0);
        w.funcall(2);
        w.op(Opcode::Ret);
        let image = module_image(&["+"], &w.finish());

        let function = load_module(&mut ctx, &image).unwrap();
        assert_eq!(ctx.get_op0(), function);
        ctx.pop_op();

        let r = call0(&mut ctx, function);
        assert_eq!(ctx.integer_value(r), 42);
    }

    #[test]
    fn relocations_inside_lambdas_resolve() {
        let mut ctx = ctx();

        // Outer pushes a lambda computing (* 3 4), calls it.
        let mut w = BytecodeWriter::new();
        let patch = w.pos() + 1;
        w.push_lambda(0);
        w.push_small_integer(3);
        w.push_small_integer(4);
        w.load_var_relocatable(0);
        w.funcall(2);
        w.op(Opcode::Ret);
        let end = w.pos() as u16;
        w.patch_u16(patch, end);
        w.funcall(0);
        w.op(Opcode::Ret);
        let image = module_image(&["*"], &w.finish());

        let function = load_module(&mut ctx, &image).unwrap();
        ctx.pop_op();
        let r = call0(&mut ctx, function);
        assert_eq!(ctx.integer_value(r), 12);
    }

    #[test]
    fn push_symbol_relocation_resolves_to_interned_name() {
        let mut ctx = ctx();

        let mut w = BytecodeWriter::new();
        w.push_symbol_relocatable(0);
        w.op(Opcode::Ret);
        let image = module_image(&["brand-new-name"], &w.finish());

        let function = load_module(&mut ctx, &image).unwrap();
        ctx.pop_op();
        let r = call0(&mut ctx, function);
        assert!(ctx.cell(r).is_symbol());
        assert_eq!(ctx.symbol_name(r), "brand-new-name");
    }

    #[test]
    fn truncated_header_is_rejected() {
        let mut ctx = ctx();
        let err = load_module(&mut ctx, &[1, 0]).unwrap_err();
        assert!(matches!(err, ModuleError::Truncated { .. }));
    }

    #[test]
    fn missing_body_is_rejected() {
        let mut ctx = ctx();
        let image = module_image(&[], &[Opcode::Ret as u8]);
        let err = load_module(&mut ctx, &image[..image.len() - 1]).unwrap_err();
        assert!(matches!(err, ModuleError::Truncated { .. }));
    }

    #[test]
    fn out_of_range_symbol_index_is_rejected() {
        let mut ctx = ctx();
        let mut w = BytecodeWriter::new();
        w.load_var_relocatable(7);
        w.op(Opcode::Ret);
        let image = module_image(&["only-one"], &w.finish());
        let err = load_module(&mut ctx, &image).unwrap_err();
        assert!(matches!(
            err,
            ModuleError::SymbolIndexOutOfRange { index: 7, count: 1 }
        ));
    }

    #[test]
    fn oversized_bytecode_is_rejected() {
        let mut ctx = ctx();
        let mut image = Vec::new();
        image.extend_from_slice(&0u16.to_ne_bytes());
        image.extend_from_slice(&(SCRATCH_BUFFER_SIZE as u16 + 1).to_ne_bytes());
        let err = load_module(&mut ctx, &image).unwrap_err();
        assert!(matches!(err, ModuleError::BytecodeTooLong { .. }));
    }
}
