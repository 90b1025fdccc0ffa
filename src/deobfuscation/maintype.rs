//! Detection of the type the obfuscator injects into the assembly.
//!
//! The injected type is invoked exactly once, from `<Module>::.cctor`, as
//! `ldc.i4, ldc.i4, call init(bool, bool)`. Finding that call site yields
//! the marker type, its initializer, the obfuscator version, and - when
//! method encryption is in use - the image positions of the two bundled
//! payloads.

use crate::{
    deobfuscation::{
        detector::Detector,
        utils::{has_code_string, is_call, is_ldc_i4, rva_fields},
        version::ObfuscatorVersion,
    },
    metadata::{
        identity::{MemberId, TypeId},
        method::MethodDef,
        module::Module,
        types::TypeDef,
    },
};

/// Field types of the marker type as laid out by the 5.0 release, in
/// metadata order.
static FIELD_TYPES_V5: [&str; 3] = [
    "System.Byte[]",
    "System.Collections.Generic.List`1<System.Delegate>",
    "System.Runtime.InteropServices.GCHandle",
];

/// Detects the type the obfuscator adds to the assembly, called from
/// `<Module>::.cctor`.
pub struct MainType<'m> {
    module: &'m Module,
    the_type: Option<&'m TypeDef>,
    init_method: Option<&'m MethodDef>,
    version: ObfuscatorVersion,
    /// RVAs of the `_executive` and `_stub` payloads, when present.
    rvas: Vec<u32>,
}

impl<'m> MainType<'m> {
    /// Creates an unbound detector for the given module.
    #[must_use]
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            the_type: None,
            init_method: None,
            version: ObfuscatorVersion::Unknown,
            rvas: Vec::new(),
        }
    }

    /// Rebinds a previously run detector against a freshly loaded module.
    ///
    /// Members are re-resolved by identity. When either the type or the
    /// initializer no longer resolves, the rebound detector reports
    /// not-detected; it never keeps a stale reference.
    #[must_use]
    pub fn rebind(module: &'m Module, old: &MainType<'_>) -> Self {
        let mut rebound = Self::new(module);
        let (Some(old_type), Some(old_init)) = (old.the_type, old.init_method) else {
            return rebound;
        };

        let Some(ty) = TypeId::of(old_type).resolve(module) else {
            return rebound;
        };
        let Some((_, init)) = MemberId::of_method(old_type, old_init).resolve_method(module)
        else {
            return rebound;
        };

        rebound.the_type = Some(ty);
        rebound.init_method = Some(init);
        rebound.version = old.version;
        rebound.rvas = old.rvas.clone();
        rebound
    }

    /// Returns the marker type once detected.
    #[must_use]
    pub fn type_ref(&self) -> Option<&'m TypeDef> {
        self.the_type
    }

    /// Returns the marker type's initializer once detected.
    #[must_use]
    pub fn init_method(&self) -> Option<&'m MethodDef> {
        self.init_method
    }

    /// Returns the classified obfuscator version.
    #[must_use]
    pub fn version(&self) -> ObfuscatorVersion {
        self.version
    }

    /// Returns the recorded payload RVAs (`_executive`, `_stub`), empty when
    /// the module carries no encrypted methods.
    #[must_use]
    pub fn payload_rvas(&self) -> &[u32] {
        &self.rvas
    }

    fn find_candidate(&mut self) {
        let Some(cctor) = self.module.global_cctor() else {
            return;
        };

        let instrs = cctor.instructions();
        for window in 0..instrs.len().saturating_sub(2) {
            if !is_ldc_i4(&instrs[window]) || !is_ldc_i4(&instrs[window + 1]) {
                continue;
            }
            if !is_call(&instrs[window + 2]) {
                continue;
            }
            let Some(target) = instrs[window + 2].token() else {
                continue;
            };
            let Some((declaring_type, init)) = self.module.method(target) else {
                continue;
            };
            let Some(version) = Self::check_init_method(declaring_type, init) else {
                continue;
            };

            self.record_payload_rvas(declaring_type);
            self.version = version;
            self.the_type = Some(declaring_type);
            self.init_method = Some(init);
            break;
        }
    }

    /// Validates an initializer candidate and classifies its version.
    ///
    /// Classification rules are ordered; the first match wins, so a body
    /// containing both trust strings classifies as 4.x, never 3.x.
    fn check_init_method(
        declaring_type: &TypeDef,
        init: &MethodDef,
    ) -> Option<ObfuscatorVersion> {
        if !init.is_static() || !init.has_body() {
            return None;
        }
        if !init
            .signature
            .matches("System.Void", &["System.Boolean", "System.Boolean"])
        {
            return None;
        }

        if has_code_string(init, "E_FullTrust") {
            if declaring_type
                .pinvoke_method("user32", "CallWindowProcW")
                .is_some()
            {
                Some(ObfuscatorVersion::V41)
            } else {
                Some(ObfuscatorVersion::V40)
            }
        } else if has_code_string(init, "Full Trust Required") {
            Some(ObfuscatorVersion::V3)
        } else if declaring_type.has_nested_types() && Self::has_v5_fields(declaring_type) {
            Some(ObfuscatorVersion::V50)
        } else {
            None
        }
    }

    fn has_v5_fields(ty: &TypeDef) -> bool {
        ty.fields.len() == FIELD_TYPES_V5.len()
            && ty
                .fields
                .iter()
                .zip(FIELD_TYPES_V5)
                .all(|(field, expected)| field.type_name == expected)
    }

    /// Records the raw-data positions of the bundled payloads.
    ///
    /// The executive and stub RVAs are always present when methods are
    /// encrypted; fewer than two raw-data-backed fields just means there is
    /// nothing to decrypt.
    fn record_payload_rvas(&mut self, ty: &TypeDef) {
        let fields = rva_fields(ty);
        if fields.len() < 2 {
            return;
        }
        self.rvas = fields.iter().map(|f| f.rva).collect();
    }
}

impl Detector for MainType<'_> {
    fn name(&self) -> &'static str {
        "marker type"
    }

    fn is_detected(&self) -> bool {
        self.the_type.is_some()
    }

    fn find(&mut self) {
        self.find_candidate();
    }
}
