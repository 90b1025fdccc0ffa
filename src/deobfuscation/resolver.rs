//! Extraction of secondary assemblies bundled as module resources.
//!
//! The obfuscator can embed whole dependent assemblies into the protected
//! module: one resource holds the concatenated raw images, a companion XML
//! manifest describes each entry (simple name, file extension, offset and
//! length within the blob). Both resources are scheduled for removal once
//! every assembly has been extracted.
//!
//! This component is independent of the marker type; a module without a
//! bundle simply yields an empty result.

use quick_xml::{events::Event, Reader};

use crate::{
    deobfuscation::detector::Detector,
    metadata::module::{Module, ModuleResource},
};

/// Root element of the bundle manifest.
const MANIFEST_ROOT: &[u8] = b"assemblies";
/// Per-assembly element of the bundle manifest.
const MANIFEST_ENTRY: &[u8] = b"assembly";

/// One assembly extracted from the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedAssemblyInfo {
    /// Raw image of the embedded assembly.
    pub data: Vec<u8>,
    /// Simple name, without extension.
    pub simple_name: String,
    /// File extension (e.g. `dll`).
    pub extension: String,
}

/// A parsed manifest entry before its bytes are sliced out of the blob.
#[derive(Debug, Default)]
struct ManifestEntry {
    name: String,
    extension: String,
    offset: usize,
    length: usize,
}

/// Finds and extracts assemblies bundled in module resources.
pub struct AssemblyResolver<'m> {
    module: &'m Module,
    assemblies: Vec<EmbeddedAssemblyInfo>,
    bundle_data_resource: Option<&'m ModuleResource>,
    bundle_manifest_resource: Option<&'m ModuleResource>,
    initialized: bool,
}

impl<'m> AssemblyResolver<'m> {
    /// Creates a resolver for the given module.
    #[must_use]
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            assemblies: Vec::new(),
            bundle_data_resource: None,
            bundle_manifest_resource: None,
            initialized: false,
        }
    }

    /// Scans module resources for a bundle and extracts every embedded
    /// assembly.
    ///
    /// Absence of a bundle is not an error; a malformed manifest degrades to
    /// an empty result the same way.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        for resource in &self.module.resources {
            let Some((data_name, entries)) = Self::parse_manifest(&resource.data) else {
                continue;
            };
            let Some(blob) = self.module.resource(&data_name) else {
                continue;
            };

            let mut assemblies = Vec::with_capacity(entries.len());
            let mut valid = true;
            for entry in &entries {
                let Some(end) = entry.offset.checked_add(entry.length) else {
                    valid = false;
                    break;
                };
                let Some(bytes) = blob.data.get(entry.offset..end) else {
                    valid = false;
                    break;
                };
                assemblies.push(EmbeddedAssemblyInfo {
                    data: bytes.to_vec(),
                    simple_name: entry.name.clone(),
                    extension: entry.extension.clone(),
                });
            }
            if !valid {
                continue;
            }

            self.assemblies = assemblies;
            self.bundle_data_resource = Some(blob);
            self.bundle_manifest_resource = Some(resource);
            return;
        }
    }

    /// Parses a candidate manifest resource.
    ///
    /// Returns the blob resource name and the entry list, or `None` when the
    /// resource is not a bundle manifest.
    fn parse_manifest(data: &[u8]) -> Option<(String, Vec<ManifestEntry>)> {
        // Cheap pre-filter: manifests are XML documents.
        let start = data.iter().position(|b| !b.is_ascii_whitespace())?;
        if data[start] != b'<' {
            return None;
        }

        let mut reader = Reader::from_reader(data);
        let mut buf = Vec::new();
        let mut data_name: Option<String> = None;
        let mut entries = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e) | Event::Empty(e)) => {
                    if e.name().as_ref() == MANIFEST_ROOT {
                        for attr in e.attributes() {
                            let attr = attr.ok()?;
                            if attr.key.as_ref() == b"data" {
                                data_name = Some(attr.unescape_value().ok()?.into_owned());
                            }
                        }
                    } else if e.name().as_ref() == MANIFEST_ENTRY {
                        let mut entry = ManifestEntry::default();
                        for attr in e.attributes() {
                            let attr = attr.ok()?;
                            let value = attr.unescape_value().ok()?;
                            match attr.key.as_ref() {
                                b"name" => entry.name = value.into_owned(),
                                b"extension" => entry.extension = value.into_owned(),
                                b"offset" => entry.offset = value.parse().ok()?,
                                b"length" => entry.length = value.parse().ok()?,
                                _ => {}
                            }
                        }
                        if entry.name.is_empty() {
                            return None;
                        }
                        entries.push(entry);
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(_) => return None,
            }
            buf.clear();
        }

        data_name.map(|name| (name, entries))
    }

    /// Returns the extracted assemblies.
    #[must_use]
    pub fn assemblies(&self) -> &[EmbeddedAssemblyInfo] {
        &self.assemblies
    }

    /// Returns the bundle's blob resource once found.
    #[must_use]
    pub fn bundle_data_resource(&self) -> Option<&'m ModuleResource> {
        self.bundle_data_resource
    }

    /// Returns the bundle's manifest resource once found.
    #[must_use]
    pub fn bundle_manifest_resource(&self) -> Option<&'m ModuleResource> {
        self.bundle_manifest_resource
    }
}

impl Detector for AssemblyResolver<'_> {
    fn name(&self) -> &'static str {
        "assembly resolver"
    }

    fn is_detected(&self) -> bool {
        self.bundle_data_resource.is_some()
    }

    fn find(&mut self) {
        self.initialize();
    }
}
