//! Method definitions, signatures and bodies of the host-module view.

use std::fmt;

use bitflags::bitflags;

use crate::{
    assembly::Instruction,
    metadata::{token::Token, types::PInvokeInfo},
};

bitflags! {
    /// Method attribute flags, as defined by ECMA-335 II.23.1.10.
    ///
    /// Only the bits this core inspects are named.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MethodFlags: u16 {
        /// The method is defined on the type rather than per instance.
        const STATIC = 0x0010;
        /// The method cannot be overridden.
        const FINAL = 0x0020;
        /// The method is virtual.
        const VIRTUAL = 0x0040;
        /// The method hides by name and signature.
        const HIDE_BY_SIG = 0x0080;
        /// The method name carries special meaning.
        const SPECIAL_NAME = 0x0800;
        /// The runtime interprets the special name (`.ctor`, `.cctor`).
        const RT_SPECIAL_NAME = 0x1000;
    }
}

/// A method signature expressed as full type names.
///
/// Signatures compare by their textual form, the same identity the rebind
/// protocol uses across module reloads, e.g.
/// `System.Void (System.Boolean,System.Boolean)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    /// Full name of the return type.
    pub return_type: String,
    /// Full names of the parameter types, in order.
    pub params: Vec<String>,
}

impl MethodSig {
    /// Creates a signature from a return type and parameter types.
    #[must_use]
    pub fn new(return_type: &str, params: &[&str]) -> Self {
        Self {
            return_type: return_type.to_string(),
            params: params.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    /// Checks the signature against the expected return and parameter types.
    #[must_use]
    pub fn matches(&self, return_type: &str, params: &[&str]) -> bool {
        self.return_type == return_type
            && self.params.len() == params.len()
            && self.params.iter().zip(params).all(|(a, b)| a == b)
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.return_type, self.params.join(","))
    }
}

/// An instruction-stream method body.
///
/// During detection, bodies are read-only views owned by the module. During
/// the per-method stage the host hands the core a mutable body from its own
/// rewriting representation; the same type serves both.
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    /// Decoded instructions in stream order.
    pub instructions: Vec<Instruction>,
}

impl MethodBody {
    /// Creates a body from an instruction list.
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }
}

/// A method definition of the host-module view.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Metadata token of the method.
    pub token: Token,
    /// Method name.
    pub name: String,
    /// Attribute flags.
    pub flags: MethodFlags,
    /// Signature in full-name form.
    pub signature: MethodSig,
    /// Body, absent for abstract and P/Invoke methods.
    pub body: Option<MethodBody>,
    /// P/Invoke information, when the method is an import stub.
    pub pinvoke: Option<PInvokeInfo>,
}

impl MethodDef {
    /// Creates a bodiless method definition.
    #[must_use]
    pub fn new(token: Token, name: &str, flags: MethodFlags, signature: MethodSig) -> Self {
        Self {
            token,
            name: name.to_string(),
            flags,
            signature,
            body: None,
            pinvoke: None,
        }
    }

    /// Attaches a body.
    #[must_use]
    pub fn with_body(mut self, instructions: Vec<Instruction>) -> Self {
        self.body = Some(MethodBody::new(instructions));
        self
    }

    /// Attaches P/Invoke information.
    #[must_use]
    pub fn with_pinvoke(mut self, module: &str, entry_point: &str) -> Self {
        self.pinvoke = Some(PInvokeInfo::new(module, entry_point));
        self
    }

    /// Returns true if the method is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Returns true if the method has a body.
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Returns true if this is a static constructor.
    #[must_use]
    pub fn is_cctor(&self) -> bool {
        self.name == ".cctor" && self.is_static()
    }

    /// Returns the body's instructions, or an empty slice when bodiless.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        self.body.as_ref().map_or(&[], |b| &b.instructions)
    }
}
