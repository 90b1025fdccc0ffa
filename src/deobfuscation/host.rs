//! Capabilities the host pipeline provides to the core.
//!
//! The core never executes code, writes files or touches metadata on its
//! own. Dynamic string decryption runs the obfuscator's own routine through
//! [`HostServices::invoke`]; extracted bundle assemblies are persisted
//! through [`HostServices::create_assembly_file`]. Whether invoking code
//! taken from an untrusted binary is sandboxed is host policy, not decided
//! here.

use crate::{metadata::identity::MemberId, Result};

/// An argument passed to a located method.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeArg {
    /// 32-bit integer argument.
    Int32(i32),
    /// 64-bit integer argument.
    Int64(i64),
    /// String argument.
    String(String),
}

/// A value returned from a located method.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeValue {
    /// The method returned void.
    Void,
    /// 32-bit integer return.
    Int32(i32),
    /// String return.
    String(String),
}

/// Host-provided services for one module session.
pub trait HostServices {
    /// Invokes a located method with arguments and returns its value.
    ///
    /// # Errors
    ///
    /// Returns an error when the method cannot be resolved or executed.
    fn invoke(&self, method: &MemberId, args: &[InvokeArg]) -> Result<InvokeValue>;

    /// Persists extracted bytes as a named file with an extension.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    fn create_assembly_file(&mut self, data: &[u8], simple_name: &str, extension: &str)
        -> Result<()>;

    /// Registers a located string-decrypt routine with the host's inliner.
    ///
    /// The host is expected to route constant-argument call sites of this
    /// method back through its own invoke capability at rewrite time.
    fn add_string_decrypter(&mut self, _method: &MemberId) {}

    /// Notifies the host that string-decryption hooks were added.
    fn string_decrypters_added(&mut self) {}
}
