//! Bytecode — the opcode set, instruction encoding, and decoding helpers.
//!
//! Instructions are variable-length records in a byte-addressed buffer: a
//! one-byte opcode followed by inline operands stored as host-endian
//! fixed-width integers. Jump offsets (and `PushLambda` end offsets) are
//! relative to the executing function's start offset, so one buffer can
//! hold many concatenated position-independent functions.
//!
//! `Fatal` is opcode zero on purpose: running off into zero-filled buffer
//! space aborts instead of executing junk.

use crate::intern::InternTable;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Fatal = 0,
    PushNil = 1,
    Push0 = 2,
    Push1 = 3,
    Push2 = 4,
    PushInteger = 5,
    PushSmallInteger = 6,
    PushSymbol = 7,
    PushSymbolRelocatable = 8,
    PushString = 9,
    PushList = 10,
    PushLambda = 11,
    PushThis = 12,
    LoadVar = 13,
    LoadVarRelocatable = 14,
    Arg = 15,
    Arg0 = 16,
    Arg1 = 17,
    Arg2 = 18,
    LexicalDef = 19,
    LexicalDefRelocatable = 20,
    LexicalFramePush = 21,
    LexicalFramePop = 22,
    LexicalVarLoad = 23,
    Funcall = 24,
    Funcall1 = 25,
    Funcall2 = 26,
    Funcall3 = 27,
    TailCall = 28,
    TailCall1 = 29,
    TailCall2 = 30,
    TailCall3 = 31,
    MakePair = 32,
    First = 33,
    Rest = 34,
    Not = 35,
    Dup = 36,
    Pop = 37,
    Jump = 38,
    JumpIfFalse = 39,
    SmallJump = 40,
    SmallJumpIfFalse = 41,
    EarlyRet = 42,
    Ret = 43,
}

impl Opcode {
    pub fn from_byte(b: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match b {
            0 => Fatal,
            1 => PushNil,
            2 => Push0,
            3 => Push1,
            4 => Push2,
            5 => PushInteger,
            6 => PushSmallInteger,
            7 => PushSymbol,
            8 => PushSymbolRelocatable,
            9 => PushString,
            10 => PushList,
            11 => PushLambda,
            12 => PushThis,
            13 => LoadVar,
            14 => LoadVarRelocatable,
            15 => Arg,
            16 => Arg0,
            17 => Arg1,
            18 => Arg2,
            19 => LexicalDef,
            20 => LexicalDefRelocatable,
            21 => LexicalFramePush,
            22 => LexicalFramePop,
            23 => LexicalVarLoad,
            24 => Funcall,
            25 => Funcall1,
            26 => Funcall2,
            27 => Funcall3,
            28 => TailCall,
            29 => TailCall1,
            30 => TailCall2,
            31 => TailCall3,
            32 => MakePair,
            33 => First,
            34 => Rest,
            35 => Not,
            36 => Dup,
            37 => Pop,
            38 => Jump,
            39 => JumpIfFalse,
            40 => SmallJump,
            41 => SmallJumpIfFalse,
            42 => EarlyRet,
            43 => Ret,
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Host-endian operand codecs
// ---------------------------------------------------------------------------

#[inline]
pub(crate) fn read_u8(code: &[u8], pc: usize) -> u8 {
    code[pc]
}

#[inline]
pub(crate) fn read_u16(code: &[u8], pc: usize) -> u16 {
    u16::from_ne_bytes([code[pc], code[pc + 1]])
}

#[inline]
pub(crate) fn read_i32(code: &[u8], pc: usize) -> i32 {
    i32::from_ne_bytes([code[pc], code[pc + 1], code[pc + 2], code[pc + 3]])
}

#[inline]
pub(crate) fn write_u16(code: &mut [u8], pc: usize, value: u16) {
    code[pc..pc + 2].copy_from_slice(&value.to_ne_bytes());
}

/// Total encoded length of the instruction at `pc`, operands included.
pub(crate) fn instruction_len(code: &[u8], pc: usize) -> usize {
    use Opcode::*;
    let Some(op) = Opcode::from_byte(code[pc]) else {
        return 1;
    };
    match op {
        PushInteger => 1 + 4,
        PushSymbol | PushSymbolRelocatable | LoadVar | LoadVarRelocatable | LexicalDef
        | LexicalDefRelocatable | PushLambda | Jump | JumpIfFalse => 1 + 2,
        PushSmallInteger | PushList | Funcall | TailCall | SmallJump | SmallJumpIfFalse => 1 + 1,
        PushString => 2 + read_u8(code, pc + 1) as usize,
        _ => 1,
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Assembles an instruction stream. The source→bytecode compiler lives
/// outside this crate; the writer is what tests and module authors use to
/// produce buffers the VM and loader accept.
pub struct BytecodeWriter {
    bytes: Vec<u8>,
}

impl BytecodeWriter {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Current write position — the offset the next instruction lands at.
    pub fn pos(&self) -> usize {
        self.bytes.len()
    }

    /// Emit an operand-less instruction.
    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.bytes.push(op as u8);
        self
    }

    pub fn push_integer(&mut self, value: i32) -> &mut Self {
        self.bytes.push(Opcode::PushInteger as u8);
        self.bytes.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub fn push_small_integer(&mut self, value: u8) -> &mut Self {
        self.bytes.push(Opcode::PushSmallInteger as u8);
        self.bytes.push(value);
        self
    }

    fn op_u16(&mut self, op: Opcode, operand: u16) -> &mut Self {
        self.bytes.push(op as u8);
        self.bytes.extend_from_slice(&operand.to_ne_bytes());
        self
    }

    pub fn push_symbol(&mut self, intern_offset: u16) -> &mut Self {
        self.op_u16(Opcode::PushSymbol, intern_offset)
    }

    pub fn push_symbol_relocatable(&mut self, symbol_index: u16) -> &mut Self {
        self.op_u16(Opcode::PushSymbolRelocatable, symbol_index)
    }

    pub fn load_var(&mut self, intern_offset: u16) -> &mut Self {
        self.op_u16(Opcode::LoadVar, intern_offset)
    }

    pub fn load_var_relocatable(&mut self, symbol_index: u16) -> &mut Self {
        self.op_u16(Opcode::LoadVarRelocatable, symbol_index)
    }

    pub fn lexical_def(&mut self, intern_offset: u16) -> &mut Self {
        self.op_u16(Opcode::LexicalDef, intern_offset)
    }

    pub fn lexical_def_relocatable(&mut self, symbol_index: u16) -> &mut Self {
        self.op_u16(Opcode::LexicalDefRelocatable, symbol_index)
    }

    /// Inline string: a u8 length counting the content bytes plus the
    /// trailing NUL, then the bytes themselves.
    pub fn push_string(&mut self, s: &str) -> &mut Self {
        debug_assert!(s.len() + 1 <= u8::MAX as usize, "inline string too long");
        self.bytes.push(Opcode::PushString as u8);
        self.bytes.push((s.len() + 1) as u8);
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        self
    }

    pub fn push_list(&mut self, element_count: u8) -> &mut Self {
        self.bytes.push(Opcode::PushList as u8);
        self.bytes.push(element_count);
        self
    }

    pub fn push_lambda(&mut self, end_offset: u16) -> &mut Self {
        self.op_u16(Opcode::PushLambda, end_offset)
    }

    pub fn funcall(&mut self, argc: u8) -> &mut Self {
        self.bytes.push(Opcode::Funcall as u8);
        self.bytes.push(argc);
        self
    }

    pub fn tail_call(&mut self, argc: u8) -> &mut Self {
        self.bytes.push(Opcode::TailCall as u8);
        self.bytes.push(argc);
        self
    }

    pub fn jump(&mut self, offset: u16) -> &mut Self {
        self.op_u16(Opcode::Jump, offset)
    }

    pub fn jump_if_false(&mut self, offset: u16) -> &mut Self {
        self.op_u16(Opcode::JumpIfFalse, offset)
    }

    pub fn small_jump(&mut self, offset: u8) -> &mut Self {
        self.bytes.push(Opcode::SmallJump as u8);
        self.bytes.push(offset);
        self
    }

    pub fn small_jump_if_false(&mut self, offset: u8) -> &mut Self {
        self.bytes.push(Opcode::SmallJumpIfFalse as u8);
        self.bytes.push(offset);
        self
    }

    /// Back-patch a u16 operand (for forward jump targets).
    pub fn patch_u16(&mut self, at: usize, value: u16) {
        write_u16(&mut self.bytes, at, value);
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Disassembler
// ---------------------------------------------------------------------------

/// Render resolved bytecode as text, one instruction per line. Stops at the
/// outermost `Ret` (nested `PushLambda` bodies are tracked by depth), at a
/// `Fatal`, or at an undecodable byte.
pub fn disassemble(interns: &InternTable, code: &[u8], start_offset: usize) -> String {
    use Opcode::*;

    let mut out = String::new();
    let mut depth = 0u32;
    let mut pc = start_offset;

    while pc < code.len() {
        let line_offset = pc - start_offset;
        let Some(op) = Opcode::from_byte(code[pc]) else {
            out.push_str(&format!("{line_offset:04}: ??\n"));
            return out;
        };

        out.push_str(&format!("{line_offset:04}: "));

        let sym = |offset: u16| -> &str {
            if interns.contains_offset(offset) {
                interns.resolve(crate::intern::InternRef::from_offset(offset))
            } else {
                "?"
            }
        };

        match op {
            Fatal => {
                out.push_str("FATAL\n");
                return out;
            }
            PushNil => out.push_str("PUSH_NIL"),
            Push0 => out.push_str("PUSH_0"),
            Push1 => out.push_str("PUSH_1"),
            Push2 => out.push_str("PUSH_2"),
            PushInteger => out.push_str(&format!("PUSH_INTEGER({})", read_i32(code, pc + 1))),
            PushSmallInteger => {
                out.push_str(&format!("PUSH_SMALL_INTEGER({})", read_u8(code, pc + 1)))
            }
            PushSymbol => out.push_str(&format!("PUSH_SYMBOL({})", sym(read_u16(code, pc + 1)))),
            PushSymbolRelocatable => out.push_str(&format!(
                "PUSH_SYMBOL_RELOCATABLE({})",
                read_u16(code, pc + 1)
            )),
            PushString => {
                let len = read_u8(code, pc + 1) as usize;
                let body = &code[pc + 2..pc + 2 + len.saturating_sub(1)];
                let text = String::from_utf8_lossy(body);
                out.push_str(&format!("PUSH_STRING(\"{}\")", text.trim_end_matches('\0')));
            }
            PushList => out.push_str(&format!("PUSH_LIST({})", read_u8(code, pc + 1))),
            PushLambda => {
                out.push_str(&format!("PUSH_LAMBDA({})", read_u16(code, pc + 1)));
                depth += 1;
            }
            PushThis => out.push_str("PUSH_THIS"),
            LoadVar => out.push_str(&format!("LOAD_VAR({})", sym(read_u16(code, pc + 1)))),
            LoadVarRelocatable => {
                out.push_str(&format!("LOAD_VAR_RELOCATABLE({})", read_u16(code, pc + 1)))
            }
            Arg => out.push_str("ARG"),
            Arg0 => out.push_str("ARG_0"),
            Arg1 => out.push_str("ARG_1"),
            Arg2 => out.push_str("ARG_2"),
            LexicalDef => out.push_str(&format!("LEXICAL_DEF({})", sym(read_u16(code, pc + 1)))),
            LexicalDefRelocatable => out.push_str(&format!(
                "LEXICAL_DEF_RELOCATABLE({})",
                read_u16(code, pc + 1)
            )),
            LexicalFramePush => out.push_str("LEXICAL_FRAME_PUSH"),
            LexicalFramePop => out.push_str("LEXICAL_FRAME_POP"),
            LexicalVarLoad => out.push_str("LEXICAL_VAR_LOAD"),
            Funcall => out.push_str(&format!("FUNCALL({})", read_u8(code, pc + 1))),
            Funcall1 => out.push_str("FUNCALL_1"),
            Funcall2 => out.push_str("FUNCALL_2"),
            Funcall3 => out.push_str("FUNCALL_3"),
            TailCall => out.push_str(&format!("TAIL_CALL({})", read_u8(code, pc + 1))),
            TailCall1 => out.push_str("TAIL_CALL_1"),
            TailCall2 => out.push_str("TAIL_CALL_2"),
            TailCall3 => out.push_str("TAIL_CALL_3"),
            MakePair => out.push_str("MAKE_PAIR"),
            First => out.push_str("FIRST"),
            Rest => out.push_str("REST"),
            Not => out.push_str("NOT"),
            Dup => out.push_str("DUP"),
            Pop => out.push_str("POP"),
            Jump => out.push_str(&format!("JUMP({})", read_u16(code, pc + 1))),
            JumpIfFalse => out.push_str(&format!("JUMP_IF_FALSE({})", read_u16(code, pc + 1))),
            SmallJump => out.push_str(&format!("SMALL_JUMP({})", read_u8(code, pc + 1))),
            SmallJumpIfFalse => {
                out.push_str(&format!("SMALL_JUMP_IF_FALSE({})", read_u8(code, pc + 1)))
            }
            EarlyRet => out.push_str("EARLY_RET"),
            Ret => {
                out.push_str("RET\n");
                if depth == 0 {
                    return out;
                }
                depth -= 1;
                pc += 1;
                continue;
            }
        }

        out.push('\n');
        pc += instruction_len(code, pc);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::InternTable;

    #[test]
    fn opcode_round_trip() {
        for b in 0..=43u8 {
            let op = Opcode::from_byte(b).unwrap();
            assert_eq!(op as u8, b);
        }
        assert!(Opcode::from_byte(200).is_none());
        assert_eq!(Opcode::from_byte(0), Some(Opcode::Fatal));
    }

    #[test]
    fn operand_codecs_are_host_endian() {
        let mut buf = vec![0u8; 8];
        write_u16(&mut buf, 1, 0xBEEF);
        assert_eq!(read_u16(&buf, 1), 0xBEEF);
        let value = (-123456i32).to_ne_bytes();
        buf[2..6].copy_from_slice(&value);
        assert_eq!(read_i32(&buf, 2), -123456);
    }

    #[test]
    fn writer_tracks_instruction_lengths() {
        let mut w = BytecodeWriter::new();
        w.op(Opcode::PushNil);
        assert_eq!(w.pos(), 1);
        w.push_integer(7);
        assert_eq!(w.pos(), 6);
        w.push_string("hi");
        assert_eq!(w.pos(), 6 + 2 + 3);
        let code = w.finish();
        assert_eq!(instruction_len(&code, 0), 1);
        assert_eq!(instruction_len(&code, 1), 5);
        assert_eq!(instruction_len(&code, 6), 5);
    }

    #[test]
    fn disassembles_a_simple_function() {
        let mut interns = InternTable::new();
        let plus = interns.intern("+").unwrap();

        let mut w = BytecodeWriter::new();
        w.push_small_integer(1);
        w.push_small_integer(2);
        w.load_var(plus.offset());
        w.funcall(2);
        w.op(Opcode::Ret);
        let code = w.finish();

        let text = disassemble(&interns, &code, 0);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].ends_with("PUSH_SMALL_INTEGER(1)"));
        assert!(lines[2].ends_with("LOAD_VAR(+)"));
        assert!(lines[3].ends_with("FUNCALL(2)"));
        assert!(lines[4].ends_with("RET"));
    }

    #[test]
    fn disassembler_descends_into_lambdas() {
        let mut w = BytecodeWriter::new();
        // PUSH_LAMBDA skips over a one-instruction body.
        let patch_at = w.pos() + 1;
        w.push_lambda(0);
        let body_start = w.pos();
        w.op(Opcode::PushNil);
        w.op(Opcode::Ret);
        let end = w.pos();
        w.patch_u16(patch_at, end as u16);
        w.op(Opcode::Ret);
        let _ = body_start;
        let code = w.finish();

        let text = disassemble(&InternTable::new(), &code, 0);
        // Inner Ret closes the lambda; outer Ret terminates.
        assert_eq!(text.lines().filter(|l| l.ends_with("RET")).count(), 2);
    }
}
