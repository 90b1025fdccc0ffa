//! Options for one deobfuscation session.

/// How string decryption should be performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringDecryptMode {
    /// Leave encrypted strings in place.
    None,
    /// Decrypt statically where the algorithm is known.
    Static,
    /// Execute the obfuscator's own decrypt routine through the host.
    ///
    /// This family varies its string algorithm across builds, so dynamic
    /// execution is the default.
    #[default]
    Dynamic,
}

impl StringDecryptMode {
    /// Returns true unless the mode is [`StringDecryptMode::None`].
    #[must_use]
    pub fn is_enabled(self) -> bool {
        self != Self::None
    }
}

/// Configuration of one deobfuscation session.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Selected string-decryption mode.
    pub string_decrypt_mode: StringDecryptMode,
}

impl Options {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the string-decryption mode.
    #[must_use]
    pub fn with_string_decrypt_mode(mut self, mode: StringDecryptMode) -> Self {
        self.string_decrypt_mode = mode;
        self
    }
}
