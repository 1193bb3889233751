use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::AsmError;

/// The four general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reg {
    Al = 0,
    Bl,
    Cl,
    Dl,
}

impl Reg {
    pub const ALL: [Reg; 4] = [Reg::Al, Reg::Bl, Reg::Cl, Reg::Dl];

    /// Index as encoded in machine-code operand bytes.
    pub const fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(idx: u8) -> Option<Reg> {
        match idx {
            0 => Some(Reg::Al),
            1 => Some(Reg::Bl),
            2 => Some(Reg::Cl),
            3 => Some(Reg::Dl),
            _ => None,
        }
    }
}

impl FromStr for Reg {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AL" => Ok(Reg::Al),
            "BL" => Ok(Reg::Bl),
            "CL" => Ok(Reg::Cl),
            "DL" => Ok(Reg::Dl),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Al => f.write_str("AL"),
            Reg::Bl => f.write_str("BL"),
            Reg::Cl => f.write_str("CL"),
            Reg::Dl => f.write_str("DL"),
        }
    }
}

/// Encoded register index of SP in indirect operands. The general
/// registers occupy 0..=3; anything above selects the stack pointer.
pub(crate) const SP_INDEX: u8 = 4;

/// Direct-address payload: either resolved at classification time or a
/// label left for the second pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Addr(u8),
    Label(String),
}

/// One classified operand.
///
/// Immediates are carried wide so directives can range-check the raw
/// value; payload bytes are masked to 8 bits at emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// AL..DL by index.
    Register(u8),
    /// `[reg]`, encoded register index (SP allowed).
    RegisterIndirect(u8),
    /// `[addr]` or `[label]`.
    Direct(Target),
    /// Bare numeric or character literal.
    Immediate(i32),
    /// Bare label reference.
    Label(String),
    /// `[SP+off]` / `[SP-off]`, signed byte offset against SP.
    StackOffset(i8),
    /// Character codes of a string literal (DB only).
    Bytes(Vec<u8>),
}

lazy_static! {
    // Labels start with a letter or dot, then word characters.
    static ref LABEL_RE: Regex = Regex::new(r"^[.A-Za-z]\w*$").unwrap();
}

pub(crate) fn is_label(input: &str) -> bool {
    LABEL_RE.is_match(input)
}

/// Register name to encoded index, SP included. `None` if not a register.
pub(crate) fn register_index(input: &str) -> Option<u8> {
    match input.to_ascii_uppercase().as_str() {
        "AL" => Some(0),
        "BL" => Some(1),
        "CL" => Some(2),
        "DL" => Some(3),
        "SP" => Some(SP_INDEX),
        _ => None,
    }
}

fn syntax(line: u32, reason: impl Into<String>) -> AsmError {
    AsmError::Syntax {
        line,
        reason: reason.into(),
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal literal.
pub(crate) fn parse_number(input: &str, line: u32) -> Result<i32, AsmError> {
    let text = input.trim().to_ascii_lowercase();
    if text.is_empty() {
        return Err(syntax(line, "invalid number format: empty string"));
    }
    let parsed = if let Some(hex) = text.strip_prefix("0x") {
        i32::from_str_radix(hex, 16).ok()
    } else {
        text.parse::<i32>().ok()
    };
    parsed.ok_or_else(|| syntax(line, format!("invalid number format: '{input}'")))
}

/// Lexically classify a single operand.
pub(crate) fn classify(input: &str, line: u32) -> Result<Operand, AsmError> {
    if let Some(rest) = input.strip_prefix('[') {
        let inner = rest
            .strip_suffix(']')
            .ok_or_else(|| syntax(line, "missing `]` in memory operand"))?
            .trim();

        // [SP+off] / [SP-off]; plain [SP] falls through to the register arm
        if inner.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("sp")) {
            let tail = inner[2..].trim_start();
            let signed = match tail.chars().next() {
                Some('+') => Some(parse_number(&tail[1..], line)?),
                Some('-') => Some(-parse_number(&tail[1..], line)?),
                _ => None,
            };
            if let Some(offset) = signed {
                return i8::try_from(offset)
                    .map(Operand::StackOffset)
                    .map_err(|_| syntax(line, format!("stack offset {offset} out of range")));
            }
        }

        if let Some(idx) = register_index(inner) {
            return Ok(Operand::RegisterIndirect(idx));
        }
        return Ok(match parse_number(inner, line) {
            Ok(n) => Operand::Direct(Target::Addr((n & 0xFF) as u8)),
            // Not a number: resolved against the symbol table later
            Err(_) => Operand::Direct(Target::Label(inner.to_string())),
        });
    }

    if let Some(rest) = input.strip_prefix('"') {
        let text = rest
            .strip_suffix('"')
            .ok_or_else(|| syntax(line, "unterminated string literal"))?;
        return Ok(Operand::Bytes(
            text.chars().map(|c| (c as u32 & 0xFF) as u8).collect(),
        ));
    }

    if let Some(rest) = input.strip_prefix('\'') {
        let text = rest
            .strip_suffix('\'')
            .ok_or_else(|| syntax(line, "unterminated character literal"))?;
        let mut chars = text.chars();
        return match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Operand::Immediate(c as u32 as i32)),
            _ => Err(syntax(
                line,
                "exactly one character is allowed; use a string instead",
            )),
        };
    }

    if let Some(idx) = register_index(input) {
        if idx < SP_INDEX {
            return Ok(Operand::Register(idx));
        }
        return Err(syntax(line, "SP cannot be used as a register operand"));
    }
    if is_label(input) {
        return Ok(Operand::Label(input.to_string()));
    }
    Ok(Operand::Immediate(parse_number(input, line)?))
}
