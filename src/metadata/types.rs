//! Type and field definitions of the host-module view.
//!
//! These are plain owned data structures describing what the external
//! metadata provider loaded. Detectors only ever borrow them; nothing in this
//! crate mutates a loaded module.

use crate::metadata::{method::MethodDef, token::Token};

/// Element type of a field, as encoded in its signature.
///
/// Only the subset this core inspects is modelled; everything else maps to
/// [`ElementType::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// `System.Void`
    Void,
    /// `System.Boolean`
    Boolean,
    /// `System.Byte`
    U1,
    /// `System.SByte`
    I1,
    /// `System.Int16`
    I2,
    /// `System.UInt16`
    U2,
    /// `System.Int32`
    I4,
    /// `System.UInt32`
    U4,
    /// `System.Int64`
    I8,
    /// `System.UInt64`
    U8,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// A reference type
    Class,
    /// A value type
    ValueType,
    /// A single-dimensional array
    SzArray,
    /// A generic instantiation
    GenericInst,
    /// Anything this core does not inspect
    Other,
}

/// A field definition owned by a [`TypeDef`].
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Metadata token of the field.
    pub token: Token,
    /// Field name.
    pub name: String,
    /// Full name of the declared field type (e.g. `System.Byte[]`).
    pub type_name: String,
    /// Element type of the declared field type.
    pub element_type: ElementType,
    /// RVA of the field's initial value when it is backed by raw data
    /// embedded in the image, `0` otherwise.
    pub rva: u32,
}

impl FieldDef {
    /// Creates a field with no raw-data backing.
    #[must_use]
    pub fn new(token: Token, name: &str, type_name: &str, element_type: ElementType) -> Self {
        Self {
            token,
            name: name.to_string(),
            type_name: type_name.to_string(),
            element_type,
            rva: 0,
        }
    }

    /// Sets the raw-data RVA of this field.
    #[must_use]
    pub fn with_rva(mut self, rva: u32) -> Self {
        self.rva = rva;
        self
    }

    /// Returns true if the field's initial value is embedded in the image.
    #[must_use]
    pub fn has_rva(&self) -> bool {
        self.rva != 0
    }
}

/// P/Invoke information attached to a method.
#[derive(Debug, Clone)]
pub struct PInvokeInfo {
    /// Name of the imported module (e.g. `user32` or `user32.dll`).
    pub module: String,
    /// Entry point name inside the imported module.
    pub entry_point: String,
}

impl PInvokeInfo {
    /// Creates new P/Invoke information.
    #[must_use]
    pub fn new(module: &str, entry_point: &str) -> Self {
        Self {
            module: module.to_string(),
            entry_point: entry_point.to_string(),
        }
    }

    /// Checks whether this import matches the given module and entry point.
    ///
    /// The module comparison ignores a trailing `.dll` and case, since
    /// metadata records both spellings in the wild.
    #[must_use]
    pub fn matches(&self, module: &str, entry_point: &str) -> bool {
        if self.entry_point != entry_point {
            return false;
        }
        let own = self
            .module
            .strip_suffix(".dll")
            .or_else(|| self.module.strip_suffix(".DLL"))
            .unwrap_or(&self.module);
        own.eq_ignore_ascii_case(module)
    }
}

/// A type definition of the host-module view.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Metadata token of the type.
    pub token: Token,
    /// Namespace, empty for the global `<Module>` type.
    pub namespace: String,
    /// Simple type name.
    pub name: String,
    /// Full name of the base type, `None` for interfaces and `<Module>`.
    pub base_type: Option<String>,
    /// Fields declared by this type, in metadata order.
    pub fields: Vec<FieldDef>,
    /// Methods declared by this type, in metadata order.
    pub methods: Vec<MethodDef>,
    /// Types nested inside this type.
    pub nested_types: Vec<TypeDef>,
}

impl TypeDef {
    /// Creates an empty type definition.
    #[must_use]
    pub fn new(token: Token, namespace: &str, name: &str) -> Self {
        Self {
            token,
            namespace: namespace.to_string(),
            name: name.to_string(),
            base_type: None,
            fields: Vec::new(),
            methods: Vec::new(),
            nested_types: Vec::new(),
        }
    }

    /// Sets the base type's full name.
    #[must_use]
    pub fn with_base_type(mut self, base_type: &str) -> Self {
        self.base_type = Some(base_type.to_string());
        self
    }

    /// Returns the namespace-qualified name of this type.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Returns true if this type has nested types.
    #[must_use]
    pub fn has_nested_types(&self) -> bool {
        !self.nested_types.is_empty()
    }

    /// Returns the static constructor of this type, if present.
    #[must_use]
    pub fn cctor(&self) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.is_cctor())
    }

    /// Returns the method with the given token, if declared by this type.
    #[must_use]
    pub fn method(&self, token: Token) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.token == token)
    }

    /// Returns the field with the given token, if declared by this type.
    #[must_use]
    pub fn field(&self, token: Token) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.token == token)
    }

    /// Returns a P/Invoke method imported from `module` with the given entry
    /// point, if this type declares one.
    #[must_use]
    pub fn pinvoke_method(&self, module: &str, entry_point: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| {
            m.pinvoke
                .as_ref()
                .is_some_and(|p| p.matches(module, entry_point))
        })
    }
}
