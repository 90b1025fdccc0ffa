//! Location and dynamic execution of the in-binary string decrypter.
//!
//! The family varies its string algorithm across builds, so the core never
//! reimplements it. It locates the decrypt routine on the marker type,
//! extracts the constant arguments at call sites, and executes the routine
//! itself through the host's invoke capability - trading an execution
//! dependency for correctness on every build.

use crate::{
    assembly::{Code, Instruction},
    deobfuscation::{
        detector::Detector,
        host::{HostServices, InvokeArg, InvokeValue},
        maintype::MainType,
        utils::{is_call, ldc_i4_value, rva_fields},
    },
    metadata::{
        identity::MemberId,
        method::{MethodBody, MethodDef},
        module::Module,
        token::Token,
        types::{ElementType, FieldDef, TypeDef},
    },
    Result,
};

/// Locates the obfuscator's string-decrypt routine and executes it through
/// the host.
pub struct StringDecrypter<'m> {
    marker_type: Option<&'m TypeDef>,
    decrypt_method: Option<(&'m TypeDef, &'m MethodDef)>,
    table_field: Option<&'m FieldDef>,
    initialized: bool,
}

impl<'m> StringDecrypter<'m> {
    /// Creates a decrypter bound to the marker-type detector's findings.
    #[must_use]
    pub fn new(_module: &'m Module, main_type: &MainType<'m>) -> Self {
        Self {
            marker_type: main_type.type_ref(),
            decrypt_method: None,
            table_field: None,
            initialized: false,
        }
    }

    /// Rebinds against a freshly loaded module.
    ///
    /// The previously found decrypt method is re-resolved by identity; when
    /// it no longer resolves, the rebound decrypter reports not-detected.
    #[must_use]
    pub fn rebind(module: &'m Module, main_type: &MainType<'m>, old: &StringDecrypter<'_>) -> Self {
        let mut rebound = Self::new(module, main_type);
        if let Some((old_type, old_method)) = old.decrypt_method {
            rebound.decrypt_method =
                MemberId::of_method(old_type, old_method).resolve_method(module);
        }
        rebound
    }

    /// Returns the located decrypt method once detected.
    #[must_use]
    pub fn decrypt_method(&self) -> Option<&'m MethodDef> {
        self.decrypt_method.map(|(_, m)| m)
    }

    /// Returns the located decrypt method's token once detected.
    #[must_use]
    pub fn method_token(&self) -> Option<Token> {
        self.decrypt_method.map(|(_, m)| m.token)
    }

    /// Returns the located decrypt method's stable identity once detected.
    #[must_use]
    pub fn method_id(&self) -> Option<MemberId> {
        self.decrypt_method
            .map(|(ty, m)| MemberId::of_method(ty, m))
    }

    /// Prepares the constant lookup tables the routine needs.
    ///
    /// The decrypt routine indexes into a raw-data-backed byte blob on its
    /// declaring type; recording it here keeps `decrypt` allocation-free.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        if let Some((declaring_type, _)) = self.decrypt_method {
            self.table_field = rva_fields(declaring_type)
                .into_iter()
                .find(|f| f.element_type == ElementType::U1);
        }
    }

    /// Returns the constant-table field, when one was recorded.
    #[must_use]
    pub fn table_field(&self) -> Option<&'m FieldDef> {
        self.table_field
    }

    /// Decrypts one string id by executing the located routine.
    ///
    /// # Errors
    ///
    /// Returns an error when the decrypter is not detected, the host cannot
    /// invoke the routine, or the routine returns a non-string value.
    pub fn decrypt(&self, host: &dyn HostServices, id: i32) -> Result<String> {
        let Some((declaring_type, method)) = self.decrypt_method else {
            return Err(crate::Error::Invoke(
                "string decrypter is not detected".to_string(),
            ));
        };

        let identity = MemberId::of_method(declaring_type, method);
        match host.invoke(&identity, &[InvokeArg::Int32(id)])? {
            InvokeValue::String(value) => Ok(value),
            other => Err(crate::Error::Invoke(format!(
                "string decrypter returned {other:?} instead of a string"
            ))),
        }
    }

    /// Extracts the call sites of the decrypt routine with constant
    /// arguments.
    ///
    /// Returns `(instruction index of the call, argument)` pairs. Call sites
    /// whose argument is not a constant integer are skipped.
    #[must_use]
    pub fn decrypt_calls(&self, body: &MethodBody) -> Vec<(usize, i32)> {
        let Some((_, method)) = self.decrypt_method else {
            return Vec::new();
        };

        let mut calls = Vec::new();
        for index in 1..body.instructions.len() {
            let instr = &body.instructions[index];
            if !is_call(instr) || instr.token() != Some(method.token) {
                continue;
            }
            if let Some(argument) = ldc_i4_value(&body.instructions[index - 1]) {
                calls.push((index, argument));
            }
        }
        calls
    }

    /// Replaces every constant-argument call to the decrypt routine in
    /// `body` with the literal the routine returns.
    ///
    /// # Errors
    ///
    /// Returns an error when a host invocation fails; the body keeps any
    /// rewrites already applied before the failing site.
    pub fn inline_strings(&self, host: &dyn HostServices, body: &mut MethodBody) -> Result<usize> {
        let mut rewritten = 0;
        for (index, argument) in self.decrypt_calls(body) {
            let literal = self.decrypt(host, argument)?;
            body.instructions[index] = Instruction::ldstr(&literal);
            body.instructions[index - 1] = Instruction::new(Code::Nop);
            rewritten += 1;
        }
        Ok(rewritten)
    }
}

impl Detector for StringDecrypter<'_> {
    fn name(&self) -> &'static str {
        "string decrypter"
    }

    fn is_detected(&self) -> bool {
        self.decrypt_method.is_some()
    }

    fn find(&mut self) {
        let Some(marker) = self.marker_type else {
            return;
        };

        // The routine lives on the marker type itself or one of its nested
        // helper types, and always has the same shape.
        for ty in std::iter::once(marker).chain(marker.nested_types.iter()) {
            let candidate = ty.methods.iter().find(|m| {
                m.is_static()
                    && m.has_body()
                    && m.signature.matches("System.String", &["System.Int32"])
            });
            if let Some(method) = candidate {
                self.decrypt_method = Some((ty, method));
                return;
            }
        }
    }
}
