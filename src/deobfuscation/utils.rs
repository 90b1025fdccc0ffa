//! Shared pattern-scanning predicates and helpers.
//!
//! Every detector matches the same handful of micro-patterns - constant
//! integer loads, calls, string literals, raw-data-backed fields - so the
//! predicates live here rather than being duplicated per detector.

use crate::{
    assembly::{Code, Instruction},
    metadata::{
        method::MethodDef,
        types::{ElementType, FieldDef, TypeDef},
    },
};

/// Maximum method body size accepted from a decrypted payload.
///
/// Generous - most methods are under 1KB.
pub(crate) const MAX_METHOD_BODY_SIZE: usize = 65536;

/// Returns true if the instruction loads a constant 32-bit integer,
/// regardless of encoding form.
#[must_use]
pub fn is_ldc_i4(instr: &Instruction) -> bool {
    instr.code.is_ldc_i4()
}

/// Decodes the constant of any `ldc.i4` form.
#[must_use]
pub fn ldc_i4_value(instr: &Instruction) -> Option<i32> {
    instr.ldc_i4_value()
}

/// Returns true for an exact `call` instruction.
#[must_use]
pub fn is_call(instr: &Instruction) -> bool {
    instr.code == Code::Call
}

/// Returns true for any call form (`call`, `callvirt`).
#[must_use]
pub fn is_any_call(instr: &Instruction) -> bool {
    matches!(instr.code, Code::Call | Code::Callvirt)
}

/// Lazily yields every string literal referenced by a method body.
///
/// The sequence is finite and restartable - calling this again produces a
/// fresh iterator over the same body.
pub fn code_strings(method: &MethodDef) -> impl Iterator<Item = &str> {
    method.instructions().iter().filter_map(Instruction::string)
}

/// Returns true if the method body references the given string literal.
#[must_use]
pub fn has_code_string(method: &MethodDef, value: &str) -> bool {
    code_strings(method).any(|s| s == value)
}

/// Returns the fields of a type whose declared element type is a byte or a
/// 32-bit unsigned integer and whose initial value is backed by raw data
/// embedded in the image (non-zero RVA).
#[must_use]
pub fn rva_fields(ty: &TypeDef) -> Vec<&FieldDef> {
    ty.fields
        .iter()
        .filter(|f| {
            matches!(f.element_type, ElementType::U1 | ElementType::U4) && f.has_rva()
        })
        .collect()
}

/// Maps an RVA to a file offset within a raw image.
///
/// For PE images (MZ header present) the section table decides the mapping.
/// Images without an MZ header are treated as flat dumps where RVA and file
/// offset coincide; synthetic payload images used in tests take the same
/// path.
#[must_use]
pub fn rva_to_file_offset(image: &[u8], rva: u32) -> Option<usize> {
    if image.len() < 2 || &image[..2] != b"MZ" {
        let offset = rva as usize;
        return (offset < image.len()).then_some(offset);
    }

    let pe = goblin::pe::PE::parse(image).ok()?;
    for section in &pe.sections {
        let start = section.virtual_address;
        let size = section.virtual_size.max(section.size_of_raw_data);
        let end = start.checked_add(size)?;
        if rva >= start && rva < end {
            let offset = (rva - start).checked_add(section.pointer_to_raw_data)? as usize;
            return (offset < image.len()).then_some(offset);
        }
    }

    None
}
