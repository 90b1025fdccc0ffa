//! Decryption of method bodies bundled as raw payloads.
//!
//! When method encryption is enabled, the obfuscator strips method bodies
//! out of the metadata stream and ships them in two raw-data blobs hanging
//! off the marker type: the `_executive` payload carrying the encrypted
//! bodies and the `_stub` payload carrying the key stream. The marker-type
//! detector records both positions; this module decodes them back into a
//! token-to-body map and patches the image in place.
//!
//! Decoding is staged: the whole payload is parsed and validated before any
//! output is touched, so a structurally invalid payload - a false-positive
//! detection - fails cleanly without mutating anything.

use std::collections::HashMap;

use crate::{
    deobfuscation::{
        detector::Detector,
        maintype::MainType,
        utils::{rva_to_file_offset, MAX_METHOD_BODY_SIZE},
    },
    metadata::{module::Module, token::Token, types::TypeDef},
    Result,
};

/// Magic value opening the executive payload (`CMVL` in little endian).
pub const METHODS_MAGIC: u32 = 0x4C56_4D43;

/// Upper bound on the stub key length.
const MAX_KEY_SIZE: usize = 256;

/// A method body recovered from the executive payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpedMethod {
    /// Metadata token of the method.
    pub token: Token,
    /// Method-header flags.
    pub mh_flags: u16,
    /// Method-header max stack.
    pub mh_max_stack: u16,
    /// Size of the IL code in bytes.
    pub mh_code_size: u32,
    /// Local-variable-signature token, 0 when the method has no locals.
    pub mh_local_var_sig_token: u32,
    /// Decrypted IL code.
    pub code: Vec<u8>,
}

/// Mapping from a raw method token value to its recovered body.
pub type DumpedMethods = HashMap<u32, DumpedMethod>;

/// Decrypts method bodies bundled in the marker type's raw payloads.
pub struct MethodsDecrypter<'m> {
    marker_type: Option<&'m TypeDef>,
    rvas: Vec<u32>,
    detected: bool,
}

impl<'m> MethodsDecrypter<'m> {
    /// Creates a decrypter bound to the marker-type detector's findings.
    #[must_use]
    pub fn new(_module: &'m Module, main_type: &MainType<'m>) -> Self {
        Self {
            marker_type: main_type.type_ref(),
            rvas: main_type.payload_rvas().to_vec(),
            detected: false,
        }
    }

    /// Rebinds against a freshly loaded module.
    ///
    /// The payload positions are plain offsets, not references, so they
    /// carry over; detection state is re-derived from the rebound marker.
    #[must_use]
    pub fn rebind(module: &'m Module, main_type: &MainType<'m>, old: &MethodsDecrypter<'_>) -> Self {
        let mut rebound = Self::new(module, main_type);
        if old.detected {
            rebound.find();
        }
        rebound
    }

    /// Decrypts the executive payload within `image`.
    ///
    /// On success the decrypted bodies are patched back into `image` at
    /// their body RVAs and collected into `dumped_methods`, and `true` is
    /// returned. Returns `false` - leaving both outputs untouched - when the
    /// decrypter is not detected or the payload is structurally invalid; an
    /// invalid payload means the detection was a false positive, not a
    /// crash.
    pub fn decrypt(&self, image: &mut [u8], dumped_methods: &mut DumpedMethods) -> bool {
        if !self.detected {
            return false;
        }

        let Ok(staged) = self.parse_payloads(image) else {
            return false;
        };

        // All entries validated; commit.
        for entry in staged {
            if let Some(patch_offset) = entry.patch_offset {
                image[patch_offset..patch_offset + entry.method.code.len()]
                    .copy_from_slice(&entry.method.code);
            }
            dumped_methods.insert(entry.method.token.value(), entry.method);
        }
        true
    }

    /// Parses and validates both payloads without touching any output.
    fn parse_payloads(&self, image: &[u8]) -> Result<Vec<StagedMethod>> {
        let exec_offset = rva_to_file_offset(image, self.rvas[0]).ok_or(crate::Error::OutOfBounds)?;
        let stub_offset = rva_to_file_offset(image, self.rvas[1]).ok_or(crate::Error::OutOfBounds)?;

        let key = Self::read_key(image, stub_offset)?;
        Self::parse_executive(image, exec_offset, &key)
    }

    fn read_key(image: &[u8], offset: usize) -> Result<Vec<u8>> {
        let mut pos = offset;
        let len = read_u32(image, &mut pos)? as usize;
        if len == 0 || len > MAX_KEY_SIZE {
            return Err(malformed_error!("stub key length {} is out of range", len));
        }
        let key = image.get(pos..pos + len).ok_or(crate::Error::OutOfBounds)?;
        Ok(key.to_vec())
    }

    fn parse_executive(image: &[u8], offset: usize, key: &[u8]) -> Result<Vec<StagedMethod>> {
        let mut pos = offset;
        let magic = read_u32(image, &mut pos)?;
        if magic != METHODS_MAGIC {
            return Err(malformed_error!(
                "executive payload magic 0x{:08x} does not match",
                magic
            ));
        }

        let count = read_u32(image, &mut pos)? as usize;
        let mut staged = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let token = Token::new(read_u32(image, &mut pos)?);
            if !token.is_method_def() {
                return Err(malformed_error!(
                    "payload entry token {} is not a method",
                    token
                ));
            }

            let body_rva = read_u32(image, &mut pos)?;
            let mh_flags = read_u16(image, &mut pos)?;
            let mh_max_stack = read_u16(image, &mut pos)?;
            let mh_local_var_sig_token = read_u32(image, &mut pos)?;
            let mh_code_size = read_u32(image, &mut pos)?;
            if mh_code_size as usize > MAX_METHOD_BODY_SIZE {
                return Err(malformed_error!(
                    "method {} code size {} exceeds the body limit",
                    token,
                    mh_code_size
                ));
            }

            let encrypted = image
                .get(pos..pos + mh_code_size as usize)
                .ok_or(crate::Error::OutOfBounds)?;
            pos += mh_code_size as usize;

            let code: Vec<u8> = encrypted
                .iter()
                .zip(key.iter().cycle())
                .map(|(byte, k)| byte ^ k)
                .collect();

            // Validate the patch target now so commit cannot fail midway.
            let patch_offset = if body_rva == 0 {
                None
            } else {
                let target =
                    rva_to_file_offset(image, body_rva).ok_or(crate::Error::OutOfBounds)?;
                if target + code.len() > image.len() {
                    return Err(crate::Error::OutOfBounds);
                }
                Some(target)
            };

            staged.push(StagedMethod {
                method: DumpedMethod {
                    token,
                    mh_flags,
                    mh_max_stack,
                    mh_code_size,
                    mh_local_var_sig_token,
                    code,
                },
                patch_offset,
            });
        }

        Ok(staged)
    }
}

impl Detector for MethodsDecrypter<'_> {
    fn name(&self) -> &'static str {
        "methods decrypter"
    }

    fn is_detected(&self) -> bool {
        self.detected
    }

    fn find(&mut self) {
        self.detected = self.marker_type.is_some() && self.rvas.len() >= 2;
    }
}

struct StagedMethod {
    method: DumpedMethod,
    patch_offset: Option<usize>,
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = data.get(*pos..*pos + 4).ok_or(crate::Error::OutOfBounds)?;
    *pos += 4;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u16(data: &[u8], pos: &mut usize) -> Result<u16> {
    let bytes = data.get(*pos..*pos + 2).ok_or(crate::Error::OutOfBounds)?;
    *pos += 2;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}
