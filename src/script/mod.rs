//! Bitcoin Script
//!
//! A `Script` is an immutable program plus its decoded instruction
//! sequence. Parsing handles the four push encodings; execution lives
//! in [`interpreter`]. Byte-exact instruction boundaries matter here:
//! signature checks splice programs by instruction, and advancing
//! wrongly over a push is a consensus bug.

pub mod interpreter;
pub mod num;
pub mod opcodes;

pub use interpreter::{correctly_spends, execute, SignatureHash, Stack};

use std::fmt;

use crate::error::ScriptError;
use self::opcodes::{OP_EQUAL, OP_HASH160, OP_PUSHDATA1, OP_PUSHDATA2, OP_PUSHDATA4};

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The instruction's leading byte: the opcode, or the length byte /
    /// PUSHDATA marker of a push.
    pub opcode: u8,
    /// The pushed bytes, for push instructions.
    pub data: Option<Vec<u8>>,
    /// Offset of the instruction's first byte in the program.
    pub offset: usize,
}

impl Chunk {
    pub fn is_push(&self) -> bool {
        self.data.is_some()
    }
}

/// An immutable script program with its parsed chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    program: Vec<u8>,
    chunks: Vec<Chunk>,
}

impl Script {
    /// Parse a program. Fails if a push runs past the end.
    pub fn new(program: Vec<u8>) -> Result<Self, ScriptError> {
        let chunks = parse(&program)?;
        Ok(Script { program, chunks })
    }

    pub fn program(&self) -> &[u8] {
        &self.program
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.program.len()
    }

    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }

    /// Whether this program has the pay-to-script-hash template:
    /// `OP_HASH160 <20 bytes> OP_EQUAL`, 23 bytes total.
    pub fn is_pay_to_script_hash(&self) -> bool {
        self.program.len() == 23
            && self.program[0] == OP_HASH160
            && self.program[1] == 0x14
            && self.program[22] == OP_EQUAL
    }

    /// Append the minimal push instruction for `data` to a program
    /// under construction.
    pub fn push_data(program: &mut Vec<u8>, data: &[u8]) {
        match data.len() {
            0..=0x4b => program.push(data.len() as u8),
            0x4c..=0xff => {
                program.push(OP_PUSHDATA1);
                program.push(data.len() as u8);
            }
            0x100..=0xffff => {
                program.push(OP_PUSHDATA2);
                program.extend_from_slice(&(data.len() as u16).to_le_bytes());
            }
            _ => {
                program.push(OP_PUSHDATA4);
                program.extend_from_slice(&(data.len() as u32).to_le_bytes());
            }
        }
        program.extend_from_slice(data);
    }

    /// Copy `program`, omitting every instruction whose starting bytes
    /// equal `pattern`.
    ///
    /// The scan advances instruction by instruction with exactly the
    /// parser's length rules, so a byte sequence that happens to appear
    /// inside someone else's push is never touched.
    pub fn remove_all_instances(program: &[u8], pattern: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(program.len());
        let mut cursor = 0;
        while cursor < program.len() {
            let matches = !pattern.is_empty() && program[cursor..].starts_with(pattern);
            let opcode = program[cursor];
            let mut additional = 0usize;
            match opcode {
                0x01..=0x4b => additional = opcode as usize,
                OP_PUSHDATA1 if cursor + 1 < program.len() => {
                    additional = 1 + program[cursor + 1] as usize;
                }
                OP_PUSHDATA2 if cursor + 2 < program.len() => {
                    let len = u16::from_le_bytes([program[cursor + 1], program[cursor + 2]]);
                    additional = 2 + len as usize;
                }
                OP_PUSHDATA4 if cursor + 4 < program.len() => {
                    let len = u32::from_le_bytes([
                        program[cursor + 1],
                        program[cursor + 2],
                        program[cursor + 3],
                        program[cursor + 4],
                    ]);
                    additional = 4 + len as usize;
                }
                _ => {}
            }
            let end = (cursor + 1 + additional).min(program.len());
            if !matches {
                out.extend_from_slice(&program[cursor..end]);
            }
            cursor = end;
        }
        out
    }
}

fn parse(program: &[u8]) -> Result<Vec<Chunk>, ScriptError> {
    let mut chunks = Vec::new();
    let mut cursor = 0;
    while cursor < program.len() {
        let offset = cursor;
        let opcode = program[cursor];
        cursor += 1;

        let data_len = match opcode {
            0x01..=0x4b => Some(opcode as usize),
            OP_PUSHDATA1 => {
                let len = read_le(program, &mut cursor, 1)?;
                Some(len)
            }
            OP_PUSHDATA2 => {
                let len = read_le(program, &mut cursor, 2)?;
                Some(len)
            }
            OP_PUSHDATA4 => {
                let len = read_le(program, &mut cursor, 4)?;
                Some(len)
            }
            _ => None,
        };

        let data = match data_len {
            Some(len) => {
                if cursor + len > program.len() {
                    return Err(ScriptError::Truncated);
                }
                let data = program[cursor..cursor + len].to_vec();
                cursor += len;
                Some(data)
            }
            None => None,
        };

        chunks.push(Chunk {
            opcode,
            data,
            offset,
        });
    }
    Ok(chunks)
}

/// Read an `n`-byte little-endian length field.
fn read_le(program: &[u8], cursor: &mut usize, n: usize) -> Result<usize, ScriptError> {
    if *cursor + n > program.len() {
        return Err(ScriptError::Truncated);
    }
    let mut value = 0usize;
    for i in 0..n {
        value |= (program[*cursor + i] as usize) << (8 * i);
    }
    *cursor += n;
    Ok(value)
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for chunk in &self.chunks {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            match &chunk.data {
                Some(data) => write!(f, "<{}>", hex::encode(data))?,
                None => write!(f, "{}", opcodes::name(chunk.opcode))?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::opcodes::*;
    use super::*;

    #[test]
    fn test_parse_direct_push() {
        let script = Script::new(vec![0x03, 0xaa, 0xbb, 0xcc, OP_DUP]).unwrap();
        assert_eq!(script.chunks().len(), 2);
        assert_eq!(script.chunks()[0].data.as_deref(), Some(&[0xaa, 0xbb, 0xcc][..]));
        assert_eq!(script.chunks()[0].offset, 0);
        assert_eq!(script.chunks()[1].opcode, OP_DUP);
        assert_eq!(script.chunks()[1].offset, 4);
    }

    #[test]
    fn test_parse_pushdata_forms() {
        let mut program = vec![OP_PUSHDATA1, 2, 0x01, 0x02];
        program.extend_from_slice(&[OP_PUSHDATA2, 3, 0, 0x0a, 0x0b, 0x0c]);
        program.extend_from_slice(&[OP_PUSHDATA4, 1, 0, 0, 0, 0xff]);
        let script = Script::new(program).unwrap();
        assert_eq!(script.chunks().len(), 3);
        assert_eq!(script.chunks()[0].data.as_deref(), Some(&[0x01, 0x02][..]));
        assert_eq!(script.chunks()[1].data.as_deref(), Some(&[0x0a, 0x0b, 0x0c][..]));
        assert_eq!(script.chunks()[1].offset, 4);
        assert_eq!(script.chunks()[2].data.as_deref(), Some(&[0xff][..]));
    }

    #[test]
    fn test_parse_truncated_push_fails() {
        assert_eq!(Script::new(vec![0x05, 0x01]), Err(ScriptError::Truncated));
        assert_eq!(Script::new(vec![OP_PUSHDATA1]), Err(ScriptError::Truncated));
        assert_eq!(
            Script::new(vec![OP_PUSHDATA2, 0x10]),
            Err(ScriptError::Truncated)
        );
        assert_eq!(
            Script::new(vec![OP_PUSHDATA4, 0x02, 0, 0, 0, 0xaa]),
            Err(ScriptError::Truncated)
        );
    }

    #[test]
    fn test_push_data_selects_minimal_encoding() {
        let mut p = Vec::new();
        Script::push_data(&mut p, &[0xab; 0x4b]);
        assert_eq!(p[0], 0x4b);

        let mut p = Vec::new();
        Script::push_data(&mut p, &[0xab; 0x4c]);
        assert_eq!(&p[..2], &[OP_PUSHDATA1, 0x4c]);

        let mut p = Vec::new();
        Script::push_data(&mut p, &[0xab; 0x100]);
        assert_eq!(&p[..3], &[OP_PUSHDATA2, 0x00, 0x01]);
    }

    #[test]
    fn test_p2sh_template() {
        let mut program = vec![OP_HASH160, 0x14];
        program.extend_from_slice(&[0u8; 20]);
        program.push(OP_EQUAL);
        assert!(Script::new(program).unwrap().is_pay_to_script_hash());

        let not_p2sh = Script::new(vec![OP_DUP, OP_HASH160]).unwrap();
        assert!(!not_p2sh.is_pay_to_script_hash());
    }

    #[test]
    fn test_remove_all_instances() {
        // push(01 02) OP_DUP push(01 02) -> OP_DUP
        let mut program = Vec::new();
        Script::push_data(&mut program, &[0x01, 0x02]);
        program.push(OP_DUP);
        Script::push_data(&mut program, &[0x01, 0x02]);

        let mut pattern = Vec::new();
        Script::push_data(&mut pattern, &[0x01, 0x02]);

        let cleaned = Script::remove_all_instances(&program, &pattern);
        assert_eq!(cleaned, vec![OP_DUP]);
    }

    #[test]
    fn test_remove_does_not_match_inside_pushes() {
        // The pattern bytes appear inside a longer push; the push must
        // survive untouched.
        let mut program = Vec::new();
        Script::push_data(&mut program, &[0x02, 0xaa, 0xbb]);
        let pattern = {
            let mut p = Vec::new();
            Script::push_data(&mut p, &[0xaa, 0xbb]);
            p
        };
        assert_eq!(Script::remove_all_instances(&program, &pattern), program);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut program = Vec::new();
        Script::push_data(&mut program, &[0x07; 5]);
        program.push(OP_CHECKSIG);
        Script::push_data(&mut program, &[0x07; 5]);
        let mut pattern = Vec::new();
        Script::push_data(&mut pattern, &[0x07; 5]);

        let once = Script::remove_all_instances(&program, &pattern);
        let twice = Script::remove_all_instances(&once, &pattern);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_remove_handles_truncated_tail() {
        // A dangling PUSHDATA1 with no length byte consumes to the end.
        let program = vec![OP_DUP, OP_PUSHDATA1];
        assert_eq!(
            Script::remove_all_instances(&program, &[OP_HASH160]),
            program
        );
    }

    #[test]
    fn test_display() {
        let mut program = vec![OP_DUP, OP_HASH160];
        Script::push_data(&mut program, &[0xde, 0xad]);
        let script = Script::new(program).unwrap();
        assert_eq!(script.to_string(), "OP_DUP OP_HASH160 <dead>");
    }
}
