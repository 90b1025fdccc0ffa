//! The instruction-stream representation detectors pattern-match against.
//!
//! This is not a disassembler. The host's metadata provider decodes method
//! bodies; the core only needs a faithful view of the opcodes its patterns
//! inspect - the `ldc.i4` family, string loads, calls and field accesses.

use strum::Display;

use crate::metadata::token::Token;

/// CIL opcodes the core inspects.
///
/// The `Display` form is the ECMA-335 mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[allow(missing_docs)] // variants are the ECMA-335 mnemonics they serialize to
pub enum Code {
    #[strum(serialize = "nop")]
    Nop,
    #[strum(serialize = "ldc.i4.m1")]
    LdcI4M1,
    #[strum(serialize = "ldc.i4.0")]
    LdcI4_0,
    #[strum(serialize = "ldc.i4.1")]
    LdcI4_1,
    #[strum(serialize = "ldc.i4.2")]
    LdcI4_2,
    #[strum(serialize = "ldc.i4.3")]
    LdcI4_3,
    #[strum(serialize = "ldc.i4.4")]
    LdcI4_4,
    #[strum(serialize = "ldc.i4.5")]
    LdcI4_5,
    #[strum(serialize = "ldc.i4.6")]
    LdcI4_6,
    #[strum(serialize = "ldc.i4.7")]
    LdcI4_7,
    #[strum(serialize = "ldc.i4.8")]
    LdcI4_8,
    #[strum(serialize = "ldc.i4.s")]
    LdcI4S,
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    #[strum(serialize = "ldstr")]
    Ldstr,
    #[strum(serialize = "ldnull")]
    Ldnull,
    #[strum(serialize = "ldtoken")]
    Ldtoken,
    #[strum(serialize = "ldftn")]
    Ldftn,
    #[strum(serialize = "ldsfld")]
    Ldsfld,
    #[strum(serialize = "stsfld")]
    Stsfld,
    #[strum(serialize = "call")]
    Call,
    #[strum(serialize = "callvirt")]
    Callvirt,
    #[strum(serialize = "newobj")]
    Newobj,
    #[strum(serialize = "dup")]
    Dup,
    #[strum(serialize = "pop")]
    Pop,
    #[strum(serialize = "br.s")]
    BrS,
    #[strum(serialize = "ret")]
    Ret,
}

impl Code {
    /// Returns true for every form of a constant 32-bit integer load.
    #[must_use]
    pub fn is_ldc_i4(self) -> bool {
        matches!(
            self,
            Self::LdcI4M1
                | Self::LdcI4_0
                | Self::LdcI4_1
                | Self::LdcI4_2
                | Self::LdcI4_3
                | Self::LdcI4_4
                | Self::LdcI4_5
                | Self::LdcI4_6
                | Self::LdcI4_7
                | Self::LdcI4_8
                | Self::LdcI4S
                | Self::LdcI4
        )
    }
}

/// Operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand.
    None,
    /// Inline 32-bit integer.
    Int32(i32),
    /// Inline 64-bit integer.
    Int64(i64),
    /// Inline string literal.
    String(String),
    /// Inline metadata token.
    Token(Token),
}

/// One decoded CIL instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The opcode.
    pub code: Code,
    /// The operand, [`Operand::None`] when the opcode takes none.
    pub operand: Operand,
}

impl Instruction {
    /// Creates an operand-less instruction.
    #[must_use]
    pub fn new(code: Code) -> Self {
        Self {
            code,
            operand: Operand::None,
        }
    }

    /// Creates a `ldc.i4` instruction with an inline operand.
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        Self {
            code: Code::LdcI4,
            operand: Operand::Int32(value),
        }
    }

    /// Creates a `ldstr` instruction.
    #[must_use]
    pub fn ldstr(value: &str) -> Self {
        Self {
            code: Code::Ldstr,
            operand: Operand::String(value.to_string()),
        }
    }

    /// Creates a `call` instruction targeting a token.
    #[must_use]
    pub fn call(target: Token) -> Self {
        Self {
            code: Code::Call,
            operand: Operand::Token(target),
        }
    }

    /// Creates a `callvirt` instruction targeting a token.
    #[must_use]
    pub fn callvirt(target: Token) -> Self {
        Self {
            code: Code::Callvirt,
            operand: Operand::Token(target),
        }
    }

    /// Creates an instruction with a token operand.
    #[must_use]
    pub fn with_token(code: Code, token: Token) -> Self {
        Self {
            code,
            operand: Operand::Token(token),
        }
    }

    /// Decodes the constant of any `ldc.i4` form, short and macro opcodes
    /// included.
    #[must_use]
    pub fn ldc_i4_value(&self) -> Option<i32> {
        match self.code {
            Code::LdcI4M1 => Some(-1),
            Code::LdcI4_0 => Some(0),
            Code::LdcI4_1 => Some(1),
            Code::LdcI4_2 => Some(2),
            Code::LdcI4_3 => Some(3),
            Code::LdcI4_4 => Some(4),
            Code::LdcI4_5 => Some(5),
            Code::LdcI4_6 => Some(6),
            Code::LdcI4_7 => Some(7),
            Code::LdcI4_8 => Some(8),
            Code::LdcI4S | Code::LdcI4 => match self.operand {
                Operand::Int32(v) => Some(v),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns the token operand, if any.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self.operand {
            Operand::Token(t) => Some(t),
            _ => None,
        }
    }

    /// Returns the string operand, if any.
    #[must_use]
    pub fn string(&self) -> Option<&str> {
        match &self.operand {
            Operand::String(s) => Some(s),
            _ => None,
        }
    }
}
