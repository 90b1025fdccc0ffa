//! Stable member identities for the reload/rebind protocol.
//!
//! The host pipeline rewrites modules in place and reloads them between
//! passes. Any reference into the old module is stale after that point, so
//! previously found members are carried across a reload as *identities* -
//! declaring-type full name plus member name plus signature - and re-resolved
//! against the freshly loaded module. A member whose identity no longer
//! resolves makes the owning detector report not-detected; it never falls
//! back to the stale reference.

use crate::metadata::{
    method::MethodDef,
    module::Module,
    types::{FieldDef, TypeDef},
};

/// Stable identity of a type: its namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeId {
    /// Namespace-qualified type name.
    pub full_name: String,
}

impl TypeId {
    /// Captures the identity of a type.
    #[must_use]
    pub fn of(ty: &TypeDef) -> Self {
        Self {
            full_name: ty.full_name(),
        }
    }

    /// Re-resolves this identity against a freshly loaded module.
    #[must_use]
    pub fn resolve<'m>(&self, module: &'m Module) -> Option<&'m TypeDef> {
        module.type_by_full_name(&self.full_name)
    }
}

/// Stable identity of a member: declaring type, name and signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberId {
    /// Namespace-qualified name of the declaring type.
    pub declaring_type: String,
    /// Member name.
    pub name: String,
    /// Textual signature (`Ret (A,B)` form for methods, the field type's
    /// full name for fields).
    pub signature: String,
}

impl MemberId {
    /// Captures the identity of a method.
    #[must_use]
    pub fn of_method(declaring_type: &TypeDef, method: &MethodDef) -> Self {
        Self {
            declaring_type: declaring_type.full_name(),
            name: method.name.clone(),
            signature: method.signature.to_string(),
        }
    }

    /// Captures the identity of a field.
    #[must_use]
    pub fn of_field(declaring_type: &TypeDef, field: &FieldDef) -> Self {
        Self {
            declaring_type: declaring_type.full_name(),
            name: field.name.clone(),
            signature: field.type_name.clone(),
        }
    }

    /// Re-resolves this identity to a method in a freshly loaded module.
    #[must_use]
    pub fn resolve_method<'m>(&self, module: &'m Module) -> Option<(&'m TypeDef, &'m MethodDef)> {
        let ty = module.type_by_full_name(&self.declaring_type)?;
        let method = ty
            .methods
            .iter()
            .find(|m| m.name == self.name && m.signature.to_string() == self.signature)?;
        Some((ty, method))
    }

    /// Re-resolves this identity to a field in a freshly loaded module.
    #[must_use]
    pub fn resolve_field<'m>(&self, module: &'m Module) -> Option<(&'m TypeDef, &'m FieldDef)> {
        let ty = module.type_by_full_name(&self.declaring_type)?;
        let field = ty
            .fields
            .iter()
            .find(|f| f.name == self.name && f.type_name == self.signature)?;
        Some((ty, field))
    }
}
