//! The closed set of obfuscator versions this family ships.

/// Version of the obfuscator that processed a module.
///
/// Set exactly once, by the marker-type detector; read-only everywhere else.
/// The suffix formatter matches exhaustively, so adding a variant without a
/// suffix is a compile error rather than a runtime fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ObfuscatorVersion {
    /// No classification was possible.
    #[default]
    Unknown,
    /// 3.x
    V3,
    /// 4.0
    V40,
    /// 4.1
    V41,
    /// 5.0
    V50,
}

impl ObfuscatorVersion {
    /// Returns the human-readable version suffix, `None` when unknown.
    #[must_use]
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Unknown => None,
            Self::V3 => Some("3.x"),
            Self::V40 => Some("4.0"),
            Self::V41 => Some("4.1"),
            Self::V50 => Some("5.0"),
        }
    }
}
