// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # veilstrip
//!
//! The detection-and-transformation core of a static deobfuscation tool for
//! .NET modules protected by the CodeVeil obfuscator family.
//!
//! Given a loaded module, the core decides with a numeric confidence score
//! whether the module was processed by this family and which version, and it
//! locates the obfuscator-injected infrastructure - marker type,
//! method-decryption payloads, string-decryption routine, call-indirection
//! proxies, bundled-assembly loader - precisely enough to drive the host
//! pipeline's stripping and restoration passes.
//!
//! The metadata provider itself is an external collaborator: the host loads,
//! parses and writes modules and hands this crate the
//! [`metadata::Module`] view to pattern-match against. The host also
//! supplies the capabilities in [`deobfuscation::HostServices`] - executing
//! a located method (dynamic string decryption), persisting extracted
//! assemblies, and acting on the removal schedule in
//! [`deobfuscation::CleanupPlan`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use veilstrip::{deobfuscation::Detector, Deobfuscator, Options};
//! # fn load_module() -> veilstrip::metadata::Module { unimplemented!() }
//!
//! let module = load_module(); // provided by the host's metadata layer
//! let deob = Deobfuscator::scan(&module, Options::new());
//!
//! println!("{}: confidence {}", deob.name(), deob.confidence());
//! for detector in deob.detectors() {
//!     println!("  {}: {}", detector.name(), detector.is_detected());
//! }
//! ```
//!
//! ## Reload and rebind
//!
//! The host pipeline rewrites modules in place and reloads them between
//! passes. References into the old module are stale at that point, so the
//! orchestrator is never patched: [`Deobfuscator::on_module_reloaded`]
//! constructs a fresh one, re-resolving every previously found member by its
//! stable identity (declaring-type name plus signature). A member that no
//! longer resolves degrades exactly its own detector to not-detected.
//!
//! ## Scope
//!
//! This crate encodes one family's signatures. The architecture -
//! independent detectors, additive scoring, a staged lifecycle, identity
//! rebinding - is the transferable part; the heuristics are deliberately
//! not generalized.

#[macro_use]
pub(crate) mod error;

pub(crate) mod events;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Instruction-stream representation detectors pattern-match against.
///
/// The host's metadata provider decodes method bodies; this module defines
/// the decoded view - [`assembly::Code`], [`assembly::Operand`] and
/// [`assembly::Instruction`].
pub mod assembly;

/// The host-module view: tokens, types, methods, fields, resources and the
/// stable member identities used by the reload/rebind protocol.
pub mod metadata;

/// The detectors, the orchestrator and the deobfuscation lifecycle.
pub mod deobfuscation;

/// `veilstrip` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type
/// is always [`Error`]. Used consistently throughout the crate for all
/// fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `veilstrip` Error type
///
/// The main error type for all operations in this crate. Detection itself
/// never fails - see [`deobfuscation::Detector`] - so errors only surface at
/// the edges: file I/O, PE parsing, host-side method invocation.
pub use error::Error;

/// The per-module orchestrator.
///
/// See [`deobfuscation::Deobfuscator`] for the lifecycle.
pub use deobfuscation::Deobfuscator;

/// Session configuration.
pub use deobfuscation::{Options, StringDecryptMode};

/// Diagnostics recorded during a session.
pub use events::{Event, EventKind, EventLog};
