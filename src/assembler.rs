use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use log::debug;

use crate::error::AsmError;
use crate::mem::{MEM_SIZE, PROGRAM_CAPACITY};
use crate::opcode::Opcode;
use crate::operand::{classify, is_label, Operand, Target};

type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Address of every emitted byte → 1-based source line.
pub type LineMap = FxMap<u8, u32>;

/// Immutable result of one assembly run: the machine code trimmed to the
/// highest written address, and the address→line map for debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    code: Vec<u8>,
    line_map: LineMap,
}

impl Assembly {
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn line_map(&self) -> &LineMap {
        &self.line_map
    }

    /// Source line that produced the byte at `addr`, if any.
    pub fn line_for(&self, addr: u8) -> Option<u32> {
        self.line_map.get(&addr).copied()
    }
}

/// Translate assembly source into machine code.
///
/// Two passes: the first collects labels and emits code with placeholders
/// for label-valued operands, the second patches the placeholders. Pure
/// and reentrant; all state lives in the call.
pub fn assemble(source: &str) -> Result<Assembly, AsmError> {
    Assembler::new().run(source)
}

struct Assembler {
    code: [u8; MEM_SIZE],
    cursor: usize,
    high_water: usize,
    labels: FxMap<String, u8>,
    refs: Vec<(u8, String)>,
    line_map: LineMap,
}

/// The four addressing variants of a two-operand ALU mnemonic, in
/// immediate / register / direct-address / register-indirect order.
fn binary_table(mnemonic: &str) -> Option<[Opcode; 4]> {
    use Opcode::*;
    Some(match mnemonic {
        "ADD" => [AddNumToReg, AddRegToReg, AddAddrToReg, AddRegAddrToReg],
        "SUB" => [SubNumFromReg, SubRegFromReg, SubAddrFromReg, SubRegAddrFromReg],
        "CMP" => [CmpNumWithReg, CmpRegWithReg, CmpAddrWithReg, CmpRegAddrWithReg],
        "MUL" => [MulNumToReg, MulRegToReg, MulAddrToReg, MulRegAddrToReg],
        "DIV" => [DivNumFromReg, DivRegFromReg, DivAddrFromReg, DivRegAddrFromReg],
        "AND" => [AndNumWithReg, AndRegWithReg, AndAddrWithReg, AndRegAddrWithReg],
        "OR" => [OrNumWithReg, OrRegWithReg, OrAddrWithReg, OrRegAddrWithReg],
        "XOR" => [XorNumWithReg, XorRegWithReg, XorAddrWithReg, XorRegAddrWithReg],
        "SHL" => [ShlNumWithReg, ShlRegWithReg, ShlAddrWithReg, ShlRegAddrWithReg],
        "SHR" => [ShrNumWithReg, ShrRegWithReg, ShrAddrWithReg, ShrRegAddrWithReg],
        _ => return None,
    })
}

/// Direct-address and register forms of a control-flow mnemonic,
/// aliases included.
fn jump_table(mnemonic: &str) -> Option<(Opcode, Opcode)> {
    use Opcode::*;
    Some(match mnemonic {
        "JMP" => (JmpAddr, JmpRegAddr),
        "JC" | "JB" => (JcAddr, JcRegAddr),
        "JNC" | "JNB" | "JAE" => (JncAddr, JncRegAddr),
        "JZ" | "JE" => (JzAddr, JzRegAddr),
        "JNZ" | "JNE" => (JnzAddr, JnzRegAddr),
        "JA" | "JNBE" => (JaAddr, JaRegAddr),
        "JNA" | "JBE" => (JnaAddr, JnaRegAddr),
        "JS" => (JsAddr, JsRegAddr),
        "JNS" => (JnsAddr, JnsRegAddr),
        "CALL" => (CallAddr, CallRegAddr),
        _ => return None,
    })
}

fn unary_table(mnemonic: &str) -> Option<Opcode> {
    use Opcode::*;
    Some(match mnemonic {
        "INC" => IncReg,
        "DEC" => DecReg,
        "NEG" => NegReg,
        "NOT" => NotReg,
        "POP" => PopReg,
        _ => return None,
    })
}

fn bare_table(mnemonic: &str) -> Option<Opcode> {
    use Opcode::*;
    Some(match mnemonic {
        "HLT" => Hlt,
        "RET" => Ret,
        "PUSHF" => Pushf,
        "POPF" => Popf,
        _ => return None,
    })
}

fn unsupported(mnemonic: &str, line: u32) -> AsmError {
    AsmError::UnsupportedOperand {
        line,
        mnemonic: mnemonic.to_string(),
    }
}

fn syntax(line: u32, reason: impl Into<String>) -> AsmError {
    AsmError::Syntax {
        line,
        reason: reason.into(),
    }
}

fn split_operands<'a>(
    rest: &'a str,
    mnemonic: &str,
    line: u32,
) -> Result<(&'a str, &'a str), AsmError> {
    rest.split_once(',')
        .map(|(a, b)| (a.trim(), b.trim()))
        .ok_or_else(|| {
            syntax(
                line,
                format!("{mnemonic} requires two operands separated by a comma"),
            )
        })
}

impl Assembler {
    fn new() -> Self {
        Assembler {
            code: [0; MEM_SIZE],
            cursor: 0,
            high_water: 0,
            labels: IndexMap::with_hasher(FxBuildHasher::default()),
            refs: Vec::new(),
            line_map: IndexMap::with_hasher(FxBuildHasher::default()),
        }
    }

    fn run(mut self, source: &str) -> Result<Assembly, AsmError> {
        // First pass: collect labels, emit code with placeholders
        for (idx, raw) in source.lines().enumerate() {
            let line = idx as u32 + 1;
            let text = raw.split_once(';').map_or(raw, |(head, _)| head).trim();
            if text.is_empty() {
                continue;
            }
            let text = self.take_label(text, line)?;
            if text.is_empty() {
                continue;
            }
            let (mnemonic, rest) = match text.split_once(char::is_whitespace) {
                Some((m, r)) => (m, r.trim()),
                None => (text, ""),
            };
            self.statement(&mnemonic.to_ascii_uppercase(), rest, line)?;
        }
        debug!(
            "pass 1: {} bytes, {} labels, {} references",
            self.high_water,
            self.labels.len(),
            self.refs.len()
        );

        // Second pass: patch label placeholders
        for (addr, label) in &self.refs {
            match self.labels.get(label) {
                Some(target) => self.code[*addr as usize] = *target,
                None => {
                    let line = self.line_map.get(addr).copied().unwrap_or_default();
                    return Err(AsmError::UndefinedLabel {
                        line,
                        label: label.clone(),
                    });
                }
            }
        }

        Ok(Assembly {
            code: self.code[..self.high_water].to_vec(),
            line_map: self.line_map,
        })
    }

    /// Register a `label:` prefix at the current write address and return
    /// the rest of the line. Text before a colon that is not a valid label
    /// token is left for the instruction parser to reject.
    fn take_label<'a>(&mut self, text: &'a str, line: u32) -> Result<&'a str, AsmError> {
        if let Some((head, rest)) = text.split_once(':') {
            let head = head.trim_end();
            if is_label(head) {
                if self.labels.contains_key(head) {
                    return Err(AsmError::DuplicateLabel {
                        line,
                        label: head.to_string(),
                    });
                }
                self.labels.insert(head.to_string(), self.cursor as u8);
                return Ok(rest.trim_start());
            }
        }
        Ok(text)
    }

    fn statement(&mut self, mnemonic: &str, rest: &str, line: u32) -> Result<(), AsmError> {
        if let Some(table) = binary_table(mnemonic) {
            return self.binary(table, mnemonic, rest, line);
        }
        if let Some((addr_op, reg_op)) = jump_table(mnemonic) {
            return self.jump(addr_op, reg_op, mnemonic, rest, line);
        }
        if let Some(op) = unary_table(mnemonic) {
            return self.unary(op, mnemonic, rest, line);
        }
        if let Some(op) = bare_table(mnemonic) {
            return self.emit(op.into(), line);
        }
        match mnemonic {
            "MOV" => self.mov(rest, line),
            "PUSH" => self.push(rest, line),
            "ORG" => self.org(rest, line),
            "DB" => self.db(rest, line),
            "IN" => self.port(Opcode::InImm, "IN", rest, line),
            "OUT" => self.port(Opcode::OutImm, "OUT", rest, line),
            _ => Err(syntax(line, format!("invalid instruction: {mnemonic}"))),
        }
    }

    fn mov(&mut self, rest: &str, line: u32) -> Result<(), AsmError> {
        let (a, b) = split_operands(rest, "MOV", line)?;
        let op1 = classify(a, line)?;
        let op2 = classify(b, line)?;
        use Opcode::*;
        let opcode = match (&op1, &op2) {
            (Operand::Register(_), Operand::Register(_)) => MovRegToReg,
            (Operand::Register(_), Operand::Direct(_)) => MovAddrToReg,
            (Operand::Register(_), Operand::RegisterIndirect(_)) => MovRegAddrToReg,
            (Operand::Direct(_), Operand::Register(_)) => MovRegToAddr,
            (Operand::RegisterIndirect(_), Operand::Register(_)) => MovRegToRegAddr,
            (Operand::Register(_), Operand::Immediate(_)) => MovNumToReg,
            (Operand::Direct(_), Operand::Immediate(_)) => MovNumToAddr,
            (Operand::RegisterIndirect(_), Operand::Immediate(_)) => MovNumToRegAddr,
            (Operand::Register(_), Operand::StackOffset(_)) => MovStackOffsToReg,
            (Operand::StackOffset(_), Operand::Register(_)) => MovRegToStackOffs,
            _ => return Err(unsupported("MOV", line)),
        };
        self.emit(opcode.into(), line)?;
        self.emit_operand(&op1, line)?;
        self.emit_operand(&op2, line)
    }

    fn binary(
        &mut self,
        table: [Opcode; 4],
        mnemonic: &str,
        rest: &str,
        line: u32,
    ) -> Result<(), AsmError> {
        let (a, b) = split_operands(rest, mnemonic, line)?;
        let op1 = classify(a, line)?;
        let op2 = classify(b, line)?;
        let Operand::Register(dst) = op1 else {
            return Err(unsupported(mnemonic, line));
        };
        let opcode = match &op2 {
            Operand::Immediate(_) => table[0],
            Operand::Register(_) => table[1],
            Operand::Direct(_) => table[2],
            Operand::RegisterIndirect(_) => table[3],
            _ => return Err(unsupported(mnemonic, line)),
        };
        self.emit(opcode.into(), line)?;
        self.emit(dst, line)?;
        self.emit_operand(&op2, line)
    }

    fn jump(
        &mut self,
        addr_op: Opcode,
        reg_op: Opcode,
        mnemonic: &str,
        rest: &str,
        line: u32,
    ) -> Result<(), AsmError> {
        let op = classify(rest, line)?;
        match &op {
            Operand::Register(_) => self.emit(reg_op.into(), line)?,
            Operand::Immediate(_) | Operand::Label(_) => self.emit(addr_op.into(), line)?,
            _ => return Err(unsupported(mnemonic, line)),
        }
        self.emit_operand(&op, line)
    }

    fn unary(
        &mut self,
        opcode: Opcode,
        mnemonic: &str,
        rest: &str,
        line: u32,
    ) -> Result<(), AsmError> {
        let Operand::Register(reg) = classify(rest, line)? else {
            return Err(unsupported(mnemonic, line));
        };
        self.emit(opcode.into(), line)?;
        self.emit(reg, line)
    }

    fn push(&mut self, rest: &str, line: u32) -> Result<(), AsmError> {
        let op = classify(rest, line)?;
        use Opcode::*;
        let opcode = match &op {
            Operand::Register(_) => PushReg,
            Operand::RegisterIndirect(_) => PushRegAddr,
            Operand::Direct(_) | Operand::Label(_) => PushAddr,
            Operand::Immediate(_) => PushNum,
            _ => return Err(unsupported("PUSH", line)),
        };
        self.emit(opcode.into(), line)?;
        self.emit_operand(&op, line)
    }

    fn org(&mut self, rest: &str, line: u32) -> Result<(), AsmError> {
        match classify(rest, line)? {
            Operand::Immediate(addr) if (0..MEM_SIZE as i32).contains(&addr) => {
                self.cursor = addr as usize;
                Ok(())
            }
            Operand::Immediate(addr) => Err(AsmError::AddressOutOfBounds { line, addr }),
            _ => Err(syntax(line, "ORG requires a numeric address")),
        }
    }

    fn db(&mut self, rest: &str, line: u32) -> Result<(), AsmError> {
        match classify(rest, line)? {
            Operand::Immediate(value) => self.emit((value & 0xFF) as u8, line),
            Operand::Bytes(bytes) => {
                for byte in bytes {
                    self.emit(byte, line)?;
                }
                Ok(())
            }
            _ => Err(unsupported("DB", line)),
        }
    }

    fn port(
        &mut self,
        opcode: Opcode,
        mnemonic: &str,
        rest: &str,
        line: u32,
    ) -> Result<(), AsmError> {
        let Operand::Immediate(port) = classify(rest, line)? else {
            return Err(unsupported(mnemonic, line));
        };
        self.emit(opcode.into(), line)?;
        self.emit((port & 0xFF) as u8, line)
    }

    /// Write one byte at the cursor and record its source line.
    ///
    /// The display window is off limits to program bytes, which caps the
    /// output at 192 bytes.
    fn emit(&mut self, byte: u8, line: u32) -> Result<(), AsmError> {
        if self.cursor >= PROGRAM_CAPACITY {
            return Err(AsmError::AddressOutOfBounds {
                line,
                addr: self.cursor as i32,
            });
        }
        self.code[self.cursor] = byte;
        self.line_map.insert(self.cursor as u8, line);
        self.cursor += 1;
        self.high_water = self.high_water.max(self.cursor);
        Ok(())
    }

    /// Emit an operand payload byte. Label-valued operands write a zero
    /// placeholder and are recorded for the second pass.
    fn emit_operand(&mut self, op: &Operand, line: u32) -> Result<(), AsmError> {
        match op {
            Operand::Register(idx) | Operand::RegisterIndirect(idx) => self.emit(*idx, line),
            Operand::Immediate(value) => self.emit((value & 0xFF) as u8, line),
            Operand::StackOffset(offset) => self.emit(*offset as u8, line),
            Operand::Direct(Target::Addr(addr)) => self.emit(*addr, line),
            Operand::Direct(Target::Label(name)) | Operand::Label(name) => {
                let at = self.cursor as u8;
                self.emit(0, line)?;
                self.refs.push((at, name.clone()));
                Ok(())
            }
            Operand::Bytes(_) => Err(syntax(line, "string operand is only valid with DB")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(source: &str) -> Vec<u8> {
        assemble(source).unwrap().code().to_vec()
    }

    #[test]
    fn assembly_is_deterministic() {
        let source = "start: MOV AL, 10\nCMP AL, 10\nJE start\nHLT\n";
        assert_eq!(assemble(source).unwrap(), assemble(source).unwrap());
    }

    #[test]
    fn mov_all_ten_shapes() {
        let bytes = code(concat!(
            "MOV AL, 5\n",
            "MOV BL, AL\n",
            "MOV CL, [100]\n",
            "MOV DL, [AL]\n",
            "MOV AL, [SP+2]\n",
            "MOV [100], 7\n",
            "MOV [101], BL\n",
            "MOV [AL], 9\n",
            "MOV [BL], CL\n",
            "MOV [SP-1], DL\n",
        ));
        #[rustfmt::skip]
        assert_eq!(bytes, vec![
            1, 0, 5,
            2, 1, 0,
            3, 2, 100,
            4, 3, 0,
            5, 0, 2,
            6, 100, 7,
            7, 101, 1,
            8, 0, 9,
            9, 1, 2,
            10, 255, 3,
        ]);
    }

    #[test]
    fn binary_families_encode_all_four_variants() {
        let families = [
            ("ADD", 11u8),
            ("SUB", 15),
            ("CMP", 22),
            ("MUL", 54),
            ("DIV", 58),
            ("AND", 62),
            ("OR", 66),
            ("XOR", 70),
            ("SHL", 75),
            ("SHR", 79),
        ];
        for (mnemonic, base) in families {
            let source = format!(
                "{m} AL, 5\n{m} AL, BL\n{m} AL, [10]\n{m} AL, [BL]\n",
                m = mnemonic
            );
            #[rustfmt::skip]
            assert_eq!(code(&source), vec![
                base, 0, 5,
                base + 1, 0, 1,
                base + 2, 0, 10,
                base + 3, 0, 1,
            ], "family {mnemonic}");
        }
    }

    #[test]
    fn jumps_and_aliases_encode() {
        let jumps = [
            ("JMP", 26u8),
            ("JC", 28),
            ("JB", 28),
            ("JNC", 30),
            ("JNB", 30),
            ("JAE", 30),
            ("JZ", 32),
            ("JE", 32),
            ("JNZ", 34),
            ("JNE", 34),
            ("JA", 36),
            ("JNBE", 36),
            ("JNA", 38),
            ("JBE", 38),
            ("JS", 40),
            ("JNS", 42),
            ("CALL", 51),
        ];
        for (mnemonic, addr_op) in jumps {
            assert_eq!(
                code(&format!("{mnemonic} 10")),
                vec![addr_op, 10],
                "{mnemonic} to address"
            );
            assert_eq!(
                code(&format!("{mnemonic} AL")),
                vec![addr_op + 1, 0],
                "{mnemonic} through register"
            );
        }
    }

    #[test]
    fn push_variants_encode() {
        let bytes = code("PUSH 5\nPUSH AL\nPUSH [10]\nPUSH [AL]\nPUSH [SP]\n");
        assert_eq!(bytes, vec![44, 5, 45, 0, 46, 10, 47, 0, 47, 4]);
    }

    #[test]
    fn unary_and_bare_mnemonics_encode() {
        let bytes = code("INC AL\nDEC BL\nNEG CL\nNOT DL\nPOP CL\nPUSHF\nPOPF\nRET\nHLT\n");
        assert_eq!(
            bytes,
            vec![19, 0, 20, 1, 21, 2, 74, 3, 48, 2, 49, 50, 53, 0]
        );
    }

    #[test]
    fn ports_encode() {
        assert_eq!(code("IN 1\nOUT 2\n"), vec![84, 1, 83, 2]);
        assert!(matches!(
            assemble("OUT AL"),
            Err(AsmError::UnsupportedOperand { line: 1, .. })
        ));
    }

    #[test]
    fn labels_resolve_forward_and_backward() {
        let asm = assemble("start: MOV AL, 10\nJMP end\nJMP start\nend: HLT\n").unwrap();
        #[rustfmt::skip]
        assert_eq!(asm.code(), &[
            1, 0, 10,
            26, 7,
            26, 0,
            0,
        ]);
    }

    #[test]
    fn labels_resolve_inside_brackets() {
        let bytes = code("MOV AL, [value]\nHLT\nvalue: DB 42\n");
        assert_eq!(bytes, vec![3, 0, 4, 0, 42]);
    }

    #[test]
    fn undefined_label_names_the_referencing_line() {
        let err = assemble("MOV AL, 1\nJMP nowhere\n").unwrap_err();
        assert_eq!(
            err,
            AsmError::UndefinedLabel {
                line: 2,
                label: "nowhere".into()
            }
        );
        assert_eq!(err.line(), 2);
    }

    #[test]
    fn duplicate_label_names_the_second_definition() {
        let err = assemble("loop: HLT\nloop: HLT\n").unwrap_err();
        assert_eq!(
            err,
            AsmError::DuplicateLabel {
                line: 2,
                label: "loop".into()
            }
        );
    }

    #[test]
    fn labels_are_case_sensitive() {
        assert!(matches!(
            assemble("Loop: HLT\nJMP loop\n"),
            Err(AsmError::UndefinedLabel { line: 2, .. })
        ));
        // Differently-cased definitions are distinct labels
        assert!(assemble("Loop: HLT\nloop: HLT\nJMP Loop\nJMP loop\n").is_ok());
    }

    #[test]
    fn mnemonics_and_registers_ignore_case() {
        assert_eq!(code("mov al, 5\nhlt\n"), vec![1, 0, 5, 0]);
    }

    #[test]
    fn org_moves_the_cursor_and_db_emits() {
        let asm = assemble("ORG 10\nDB 0x41\nDB \"AB\"\nDB 'C'\n").unwrap();
        assert_eq!(asm.code().len(), 14);
        assert_eq!(&asm.code()[10..], &[0x41, 65, 66, 67]);
        assert_eq!(asm.line_for(10), Some(2));
        assert_eq!(asm.line_for(11), Some(3));
        assert_eq!(asm.line_for(12), Some(3));
        assert_eq!(asm.line_for(13), Some(4));
    }

    #[test]
    fn backward_org_cannot_truncate_earlier_code() {
        let asm = assemble("MOV AL, 1\nORG 1\nDB 9\n").unwrap();
        assert_eq!(asm.code(), &[1, 9, 1]);
    }

    #[test]
    fn org_out_of_bounds() {
        assert!(matches!(
            assemble("ORG 300"),
            Err(AsmError::AddressOutOfBounds { line: 1, addr: 300 })
        ));
    }

    #[test]
    fn emitting_into_the_display_window_is_rejected() {
        assert!(matches!(
            assemble("ORG 0xC0\nDB 1\n"),
            Err(AsmError::AddressOutOfBounds { line: 2, .. })
        ));
        // An instruction straddling the boundary fails too
        assert!(matches!(
            assemble("ORG 190\nMOV AL, 5\n"),
            Err(AsmError::AddressOutOfBounds { line: 2, .. })
        ));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let bytes = code("; just a comment\n\nMOV AL, 1 ; trailing\n   \nHLT\n");
        assert_eq!(bytes, vec![1, 0, 1, 0]);
    }

    #[test]
    fn label_only_lines_take_the_next_address() {
        let bytes = code("top:\nHLT\nJMP top\n");
        assert_eq!(bytes, vec![0, 26, 0]);
    }

    #[test]
    fn line_map_covers_every_emitted_byte() {
        let asm = assemble("MOV AL, 5\nHLT\n").unwrap();
        assert_eq!(asm.line_for(0), Some(1));
        assert_eq!(asm.line_for(1), Some(1));
        assert_eq!(asm.line_for(2), Some(1));
        assert_eq!(asm.line_for(3), Some(2));
        assert_eq!(asm.line_map().len(), 4);
    }

    #[test]
    fn unsupported_operand_combinations() {
        assert!(matches!(
            assemble("ADD [10], AL"),
            Err(AsmError::UnsupportedOperand { line: 1, .. })
        ));
        assert!(matches!(
            assemble("MOV 5, AL"),
            Err(AsmError::UnsupportedOperand { line: 1, .. })
        ));
        assert!(matches!(
            assemble("INC [AL]"),
            Err(AsmError::UnsupportedOperand { line: 1, .. })
        ));
        assert!(matches!(
            assemble("DB [10]"),
            Err(AsmError::UnsupportedOperand { line: 1, .. })
        ));
        assert!(matches!(
            assemble("MOV AL, label"),
            Err(AsmError::UnsupportedOperand { line: 1, .. })
        ));
    }

    #[test]
    fn syntax_errors() {
        assert!(matches!(
            assemble("FROB AL"),
            Err(AsmError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            assemble("MOV AL 5"),
            Err(AsmError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            assemble("HLT\nMOV AL, [5\n"),
            Err(AsmError::Syntax { line: 2, .. })
        ));
    }

    #[test]
    fn a_failed_assembly_does_not_poison_the_next() {
        assert!(assemble("JMP nowhere").is_err());
        assert!(assemble("HLT").is_ok());
    }
}
