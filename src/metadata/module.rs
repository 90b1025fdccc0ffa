//! The loaded-module view the host hands to the core.
//!
//! A [`Module`] is created by the host before the core runs and outlives the
//! whole session. Its identity persists across a reload, but no reference
//! into it may be reused afterwards - the rebind protocol in
//! [`crate::metadata::identity`] re-resolves every previously found member
//! against the freshly loaded instance.

use std::{fs::File, path::PathBuf};

use memmap2::Mmap;

use crate::{
    metadata::{
        method::{MethodDef, MethodSig},
        token::Token,
        types::TypeDef,
    },
    Result,
};

/// Full name of the global type holding module-level members.
pub const GLOBAL_TYPE_NAME: &str = "<Module>";

/// A manifest resource embedded in the module.
#[derive(Debug, Clone)]
pub struct ModuleResource {
    /// Resource name.
    pub name: String,
    /// Raw resource bytes.
    pub data: Vec<u8>,
}

impl ModuleResource {
    /// Creates a resource from a name and its raw bytes.
    #[must_use]
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            data,
        }
    }
}

/// A reference to a member defined outside the module.
#[derive(Debug, Clone)]
pub struct MemberRef {
    /// Metadata token of the reference.
    pub token: Token,
    /// Full name of the declaring type.
    pub declaring_type: String,
    /// Member name.
    pub name: String,
    /// Signature of the referenced member.
    pub signature: MethodSig,
}

impl MemberRef {
    /// Creates a member reference.
    #[must_use]
    pub fn new(token: Token, declaring_type: &str, name: &str, signature: MethodSig) -> Self {
        Self {
            token,
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            signature,
        }
    }
}

/// The externally owned binary representation of one loaded module.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Module name.
    pub name: String,
    /// Top-level types; nested types are owned by their parents.
    pub types: Vec<TypeDef>,
    /// References to members defined outside the module.
    pub member_refs: Vec<MemberRef>,
    /// Manifest resources.
    pub resources: Vec<ModuleResource>,
    location: Option<PathBuf>,
    image: Option<Vec<u8>>,
}

impl Module {
    /// Creates an empty module with the given name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Sets the on-disk location backing [`Module::raw_image`].
    pub fn set_location(&mut self, location: impl Into<PathBuf>) {
        self.location = Some(location.into());
    }

    /// Sets an in-memory raw image, taking precedence over any location.
    pub fn set_image(&mut self, image: Vec<u8>) {
        self.image = Some(image);
    }

    /// Returns the module's raw byte image.
    ///
    /// Returns the in-memory image when one was supplied, otherwise maps the
    /// on-disk file.
    ///
    /// # Errors
    ///
    /// Returns an error when neither an image nor a location is available,
    /// or when reading the file fails.
    pub fn raw_image(&self) -> Result<Vec<u8>> {
        if let Some(image) = &self.image {
            return Ok(image.clone());
        }
        let Some(location) = &self.location else {
            return Err(crate::Error::Error(format!(
                "module '{}' has no raw image or backing file",
                self.name
            )));
        };

        let file = File::open(location)?;
        // SAFETY: the mapping is copied out immediately; the file handle
        // lives for the duration of the map.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(mmap.to_vec())
    }

    /// Iterates all types, including nested ones, depth first.
    #[must_use]
    pub fn all_types(&self) -> AllTypes<'_> {
        AllTypes {
            stack: self.types.iter().rev().collect(),
        }
    }

    /// Finds a type by its namespace-qualified name.
    #[must_use]
    pub fn type_by_full_name(&self, full_name: &str) -> Option<&TypeDef> {
        self.all_types().find(|t| t.full_name() == full_name)
    }

    /// Returns the global `<Module>` type, if present.
    #[must_use]
    pub fn global_type(&self) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name == GLOBAL_TYPE_NAME)
    }

    /// Returns the module's static initializer (`<Module>::.cctor`).
    #[must_use]
    pub fn global_cctor(&self) -> Option<&MethodDef> {
        self.global_type().and_then(TypeDef::cctor)
    }

    /// Resolves a method token to its declaring type and definition.
    #[must_use]
    pub fn method(&self, token: Token) -> Option<(&TypeDef, &MethodDef)> {
        self.all_types()
            .find_map(|t| t.method(token).map(|m| (t, m)))
    }

    /// Resolves a member reference token.
    #[must_use]
    pub fn member_ref(&self, token: Token) -> Option<&MemberRef> {
        self.member_refs.iter().find(|r| r.token == token)
    }

    /// Returns the resource with the given name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ModuleResource> {
        self.resources.iter().find(|r| r.name == name)
    }
}

/// Depth-first iterator over a module's types, nested types included.
pub struct AllTypes<'m> {
    stack: Vec<&'m TypeDef>,
}

impl<'m> Iterator for AllTypes<'m> {
    type Item = &'m TypeDef;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.nested_types.iter().rev());
        Some(next)
    }
}
