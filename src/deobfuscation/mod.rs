//! Detection and deobfuscation of one commercial obfuscator family.
//!
//! The core answers three questions about a loaded module: was it processed
//! by this obfuscator, which version, and where does the injected
//! infrastructure live - precisely enough to drive the host's stripping and
//! restoration passes.
//!
//! # Architecture
//!
//! ```text
//! Deobfuscator (orchestrator, one per module load)
//!   ├─> MainType          - marker type, initializer, version, payload RVAs
//!   ├─> MethodsDecrypter  - encrypted method bodies in the raw image
//!   ├─> StringDecrypter   - in-binary decrypt routine, executed via host
//!   ├─> ProxyCallFixer    - call-indirection delegates
//!   └─> AssemblyResolver  - bundled secondary assemblies
//! ```
//!
//! Detectors are independent: each reports a per-aspect detected flag, and
//! the confidence score is a pure function of those flags. A missing aspect
//! lowers confidence, it never aborts the run.
//!
//! # Lifecycle
//!
//! ```text
//! scan ─> detect ─> begin ─> method_begin* ─> end ─> decrypted_module?
//!                                   │
//!            on_module_reloaded ────┘  (host rewrote the module: rebuild
//!                                       everything, rebind by identity)
//! ```
//!
//! The whole pipeline is single-threaded and run-to-completion. Detectors
//! hold non-owning borrows into the module, so a reload is a hard
//! synchronization point: the old orchestrator is discarded wholesale and
//! [`Deobfuscator::on_module_reloaded`] re-resolves every previously found
//! member by its stable identity.

pub mod cleanup;
pub mod config;
pub mod detection;
pub mod detector;
pub mod deobfuscator;
pub mod host;
pub mod maintype;
pub mod methods;
pub mod proxies;
pub mod resolver;
pub mod strings;
pub mod utils;
pub mod version;

pub use cleanup::{CleanupPlan, ResourceRemoval, TypeRemoval};
pub use config::{Options, StringDecryptMode};
pub use deobfuscator::{
    DecryptedModule, Deobfuscator, OBFUSCATOR_NAME, OBFUSCATOR_TYPE,
};
pub use detection::{DetectionEvidence, DetectionScore};
pub use detector::Detector;
pub use host::{HostServices, InvokeArg, InvokeValue};
pub use maintype::MainType;
pub use methods::{DumpedMethod, DumpedMethods, MethodsDecrypter};
pub use proxies::{ProxyCallFixer, ProxyInfo};
pub use resolver::{AssemblyResolver, EmbeddedAssemblyInfo};
pub use strings::StringDecrypter;
pub use version::ObfuscatorVersion;
