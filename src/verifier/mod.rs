//! Comparison of a produced answer file with the expected one.
//!
//! Built-in verifiers, by registry name:
//!
//! | Name       | Comparison                                                  |
//! |------------|-------------------------------------------------------------|
//! | `exact`    | byte for byte, no normalization (default)                   |
//! | `words`    | whitespace-separated tokens, line by line                   |
//! | `integers` | same, every token parsed as an integer                      |
//! | `floats`   | same, every token parsed as a floating point number         |
//!
//! The class-style names used by older problem configurations (`AnswerVerifier`,
//! `WordSequenceVerifier`, ...) are registered as aliases.

use std::path::Path;

use crate::{model::TestRun, registry::Registry, verdict::Verdict};

mod exact;
mod tokenized;

pub use exact::ExactVerifier;
pub use tokenized::{TokenKind, TokenizedVerifier};

/// Decides whether a run produced the right answer.
pub trait Verifier: Send + Sync {
    /// Compares `produced` against `expected`, returning Correct, WrongAnswer or FormatError.
    ///
    /// Errors are reserved for judge-side problems such as an unreadable expected file.
    fn judge(&self, expected: &Path, produced: &Path) -> anyhow::Result<Verdict>;

    /// Judges the run's answer file and stores the verdict on the run.
    fn verify(&self, run: &mut TestRun) -> anyhow::Result<bool> {
        let verdict = self.judge(&run.testcase.answer_path, &run.answer_path)?;
        let correct = verdict.is_correct();
        run.set_result(verdict)?;
        Ok(correct)
    }
}

pub type VerifierRegistry = Registry<dyn Verifier>;

/// Registry holding the built-in verifiers and their legacy aliases.
pub fn default_verifiers() -> VerifierRegistry {
    let mut registry = VerifierRegistry::new("verifier");
    for name in ["exact", "AnswerVerifier"] {
        registry.register(name, || Box::new(ExactVerifier));
    }
    for name in [
        "words",
        "WordSequenceVerifier",
        "SpaceCharacterSeparatedSequenceVerifier",
    ] {
        registry.register(name, || Box::new(TokenizedVerifier::words()));
    }
    for name in ["integers", "IntegerSequenceVerifier"] {
        registry.register(name, || Box::new(TokenizedVerifier::integers()));
    }
    for name in ["floats", "FloatSequenceVerifier"] {
        registry.register(name, || Box::new(TokenizedVerifier::floats()));
    }
    registry
}

/// Reads the produced answer file, a missing file is the candidate's fault.
pub(crate) fn read_produced(path: &Path) -> Result<Vec<u8>, Verdict> {
    std::fs::read(path).map_err(|e| Verdict::FormatError {
        message: format!("Cannot read the answer file: {e}"),
    })
}

#[cfg(test)]
mod verifier_tests {
    use super::*;

    #[test]
    fn every_builtin_name_resolves() {
        let verifiers = default_verifiers();
        for name in ["exact", "words", "integers", "floats", "IntegerSequenceVerifier"] {
            assert!(verifiers.create(name).is_ok(), "{name}");
        }
        let error = verifiers.create("fuzzy").err().unwrap().to_string();
        assert!(error.starts_with("Unknown verifier 'fuzzy'"));
        assert!(error.contains("exact"));
    }
}
