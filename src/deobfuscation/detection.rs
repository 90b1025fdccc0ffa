//! Detection scoring and evidence for obfuscator identification.
//!
//! The score is a pure function of the per-aspect detected flags plus the
//! anti-tamper marker flag: with `n > 0` corroborating detectors the score is
//! `100 + 10 * (n - 1)`, and the marker adds another 10. Recomputing it on
//! the same state always yields the same value.

use std::fmt;

use crate::deobfuscation::version::ObfuscatorVersion;

/// Evidence that contributed to a detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionEvidence {
    /// One of the scored detector aspects reported detected.
    Aspect {
        /// Name of the detector aspect.
        name: &'static str,
    },

    /// The anti-tamper kill-type marker was found.
    KillType,

    /// A version was classified from the marker type.
    Version {
        /// The classified version.
        version: ObfuscatorVersion,
    },
}

impl DetectionEvidence {
    /// Generates a short description suitable for summaries.
    #[must_use]
    pub fn short_description(&self) -> String {
        match self {
            Self::Aspect { name } => format!("aspect:{name}"),
            Self::KillType => "kill-type".to_string(),
            Self::Version { version } => {
                format!("version:{}", version.suffix().unwrap_or("unknown"))
            }
        }
    }
}

/// Confidence score for obfuscator detection with the evidence behind it.
///
/// A score of 0 means nothing was found. 100 means one aspect corroborated;
/// each further aspect adds 10, the anti-tamper marker another 10.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionScore {
    score: u32,
    evidence: Vec<DetectionEvidence>,
}

impl DetectionScore {
    /// Creates an empty score with zero confidence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the score from the per-aspect detected flags.
    ///
    /// `aspects` pairs each scored aspect's name with its detected flag;
    /// `found_kill_type` is the anti-tamper marker flag. Pure and
    /// deterministic.
    #[must_use]
    pub fn from_aspects(
        aspects: &[(&'static str, bool)],
        found_kill_type: bool,
        version: ObfuscatorVersion,
    ) -> Self {
        let mut evidence = Vec::new();
        let mut detected = 0u32;
        for (name, is_detected) in aspects {
            if *is_detected {
                detected += 1;
                evidence.push(DetectionEvidence::Aspect { name });
            }
        }

        let mut score = 0;
        if detected > 0 {
            score += 100 + 10 * (detected - 1);
        }
        if found_kill_type {
            score += 10;
            evidence.push(DetectionEvidence::KillType);
        }
        if version != ObfuscatorVersion::Unknown {
            evidence.push(DetectionEvidence::Version { version });
        }

        Self { score, evidence }
    }

    /// Returns the confidence value.
    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    /// Returns an iterator over the evidence behind this score.
    pub fn evidence(&self) -> impl Iterator<Item = &DetectionEvidence> {
        self.evidence.iter()
    }

    /// Generates a summary string of all evidence.
    #[must_use]
    pub fn evidence_summary(&self) -> String {
        if self.evidence.is_empty() {
            return "no evidence".to_string();
        }
        self.evidence
            .iter()
            .map(DetectionEvidence::short_description)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for DetectionScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "score={} ({})", self.score, self.evidence_summary())
    }
}
