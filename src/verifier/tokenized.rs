use std::{fmt::Display, path::Path};

use anyhow::Context;

use super::{read_produced, Verifier};
use crate::verdict::Verdict;

/// How each whitespace-separated token is interpreted before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Integer,
    Float,
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Integer(i128),
    Float(f64),
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Word(word) => write!(f, "{word}"),
            Token::Integer(value) => write!(f, "{value}"),
            Token::Float(value) => write!(f, "{value}"),
        }
    }
}

/// Line-by-line comparison of whitespace-separated tokens.
///
/// Blank expected lines are not compared but still consume one produced line, so both files
/// need the same blank-line structure. Intra-line spacing and line endings are ignored.
#[derive(Debug, Clone, Copy)]
pub struct TokenizedVerifier {
    kind: TokenKind,
}

impl TokenizedVerifier {
    pub fn new(kind: TokenKind) -> Self {
        Self { kind }
    }

    pub fn words() -> Self {
        Self::new(TokenKind::Word)
    }

    pub fn integers() -> Self {
        Self::new(TokenKind::Integer)
    }

    pub fn floats() -> Self {
        Self::new(TokenKind::Float)
    }

    fn coerce(&self, raw: &str) -> Result<Token, String> {
        match self.kind {
            TokenKind::Word => Ok(Token::Word(raw.to_string())),
            TokenKind::Integer => raw
                .parse()
                .map(Token::Integer)
                .map_err(|e| format!("'{raw}' is not an integer: {e}")),
            TokenKind::Float => raw
                .parse()
                .map(Token::Float)
                .map_err(|e| format!("'{raw}' is not a number: {e}")),
        }
    }

    fn tokens(&self, line: &str, line_number: usize, file: &str) -> Result<Vec<Token>, Verdict> {
        line.split_whitespace()
            .map(|raw| self.coerce(raw))
            .collect::<Result<_, _>>()
            .map_err(|message| Verdict::FormatError {
                message: format!("Line {line_number} of the {file}: {message}"),
            })
    }

    fn compare(&self, expected: &str, produced: &str) -> Verdict {
        let mut produced_lines = produced.lines();
        for (index, expected_line) in expected.lines().enumerate() {
            let line_number = index + 1;
            let produced_line = produced_lines.next();
            if expected_line.trim().is_empty() {
                continue;
            }

            let expected_tokens = match self.tokens(expected_line, line_number, "expected answer") {
                Ok(tokens) => tokens,
                Err(verdict) => return verdict,
            };
            let Some(produced_line) = produced_line else {
                return Verdict::FormatError {
                    message: "The answer file contained less information than required."
                        .to_string(),
                };
            };
            let produced_tokens = match self.tokens(produced_line, line_number, "answer file") {
                Ok(tokens) => tokens,
                Err(verdict) => return verdict,
            };

            if expected_tokens != produced_tokens {
                return Verdict::WrongAnswer {
                    expected: quote(&expected_tokens),
                    actual: quote(&produced_tokens),
                };
            }
        }

        if produced_lines.any(|line| !line.trim().is_empty()) {
            return Verdict::FormatError {
                message: "The answer file contained more information than required.".to_string(),
            };
        }
        Verdict::Correct
    }
}

fn quote(tokens: &[Token]) -> String {
    let joined = tokens
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    format!("\"{joined}\"")
}

impl Verifier for TokenizedVerifier {
    fn judge(&self, expected: &Path, produced: &Path) -> anyhow::Result<Verdict> {
        let expected = std::fs::read_to_string(expected)
            .with_context(|| format!("could not read expected answer {}", expected.display()))?;
        let produced = match read_produced(produced) {
            Ok(bytes) => bytes,
            Err(verdict) => return Ok(verdict),
        };
        let produced = match String::from_utf8(produced) {
            Ok(text) => text,
            Err(e) => {
                return Ok(Verdict::FormatError {
                    message: format!("The answer file is not valid UTF-8: {e}"),
                })
            }
        };
        Ok(self.compare(&expected, &produced))
    }
}

#[cfg(test)]
mod tokenized_tests {
    use super::*;

    #[test]
    fn spacing_and_line_endings_are_ignored() {
        let verifier = TokenizedVerifier::words();
        assert_eq!(
            verifier.compare("1 2  3\nfoo bar\n", "1   2 3\r\nfoo\tbar"),
            Verdict::Correct
        );
    }

    #[test]
    fn single_differing_token_quotes_both_lines() {
        let verdict = TokenizedVerifier::words().compare("1 2 3\n", "1 5 3\n");
        assert_eq!(
            verdict,
            Verdict::WrongAnswer {
                expected: "\"1 2 3\"".into(),
                actual: "\"1 5 3\"".into(),
            }
        );
    }

    #[test]
    fn one_line_short_is_a_format_error() {
        let verdict = TokenizedVerifier::words().compare("1\n2\n", "1\n");
        assert!(
            matches!(&verdict, Verdict::FormatError { message } if message.contains("less")),
            "{verdict:?}"
        );
    }

    #[test]
    fn one_line_extra_is_a_format_error() {
        let verdict = TokenizedVerifier::words().compare("1\n2\n", "1\n2\n3\n");
        assert!(
            matches!(&verdict, Verdict::FormatError { message } if message.contains("more")),
            "{verdict:?}"
        );
        // trailing blank lines are fine
        assert_eq!(
            TokenizedVerifier::words().compare("1\n", "1\n\n  \n"),
            Verdict::Correct
        );
    }

    #[test]
    fn blank_expected_lines_consume_a_produced_line() {
        let verifier = TokenizedVerifier::words();
        assert_eq!(verifier.compare("a\n\nb\n", "a\n\nb\n"), Verdict::Correct);
        assert!(matches!(
            verifier.compare("a\n\nb\n", "a\nb\n"),
            Verdict::FormatError { .. }
        ));
    }

    #[test]
    fn integers_are_compared_by_value() {
        let verifier = TokenizedVerifier::integers();
        assert_eq!(verifier.compare("007 -3\n", "7 -3\n"), Verdict::Correct);
        assert!(matches!(
            verifier.compare("7\n", "seven\n"),
            Verdict::FormatError { message } if message.contains("'seven' is not an integer")
        ));
    }

    #[test]
    fn floats_are_compared_by_value() {
        let verifier = TokenizedVerifier::floats();
        assert_eq!(verifier.compare("1.50 2\n", "1.5 2.0\n"), Verdict::Correct);
        assert_eq!(
            verifier.compare("0.1\n", "0.10000001\n"),
            Verdict::WrongAnswer {
                expected: "\"0.1\"".into(),
                actual: "\"0.10000001\"".into(),
            }
        );
    }

    #[test]
    fn judging_twice_gives_the_same_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let (expected, produced) = (dir.path().join("e"), dir.path().join("p"));
        std::fs::write(&expected, "3 4\n").unwrap();
        std::fs::write(&produced, "3 5\n").unwrap();
        let verifier = TokenizedVerifier::integers();
        let first = verifier.judge(&expected, &produced).unwrap();
        assert_eq!(first, verifier.judge(&expected, &produced).unwrap());
        assert_eq!(first.status_code(), 'W');
    }

    #[test]
    fn invalid_utf8_answer_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let (expected, produced) = (dir.path().join("e"), dir.path().join("p"));
        std::fs::write(&expected, "1\n").unwrap();
        std::fs::write(&produced, [0xff, 0xfe, b'\n']).unwrap();
        let verdict = TokenizedVerifier::words().judge(&expected, &produced).unwrap();
        assert_eq!(verdict.status_code(), 'F');
    }
}
