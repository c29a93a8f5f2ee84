use std::path::Path;

use anyhow::Context;

use super::{read_produced, Verifier};
use crate::verdict::Verdict;

/// Byte-for-byte comparison. Trailing whitespace and line endings count.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactVerifier;

impl Verifier for ExactVerifier {
    fn judge(&self, expected: &Path, produced: &Path) -> anyhow::Result<Verdict> {
        let expected = std::fs::read(expected)
            .with_context(|| format!("could not read expected answer {}", expected.display()))?;
        let produced = match read_produced(produced) {
            Ok(bytes) => bytes,
            Err(verdict) => return Ok(verdict),
        };
        if expected == produced {
            return Ok(Verdict::Correct);
        }

        let (expected, actual) = first_difference(&expected, &produced);
        Ok(Verdict::WrongAnswer { expected, actual })
    }
}

/// Renders the first line (newline included) where the two contents differ.
fn first_difference(expected: &[u8], produced: &[u8]) -> (String, String) {
    let mut expected_lines = expected.split_inclusive(|b| *b == b'\n');
    let mut produced_lines = produced.split_inclusive(|b| *b == b'\n');
    let mut line = 1;
    loop {
        match (expected_lines.next(), produced_lines.next()) {
            (Some(e), Some(p)) if e == p => line += 1,
            (e, p) => return (render(line, e), render(line, p)),
        }
    }
}

fn render(line: usize, content: Option<&[u8]>) -> String {
    match content {
        Some(bytes) => format!("line {line}: {:?}", String::from_utf8_lossy(bytes)),
        None => format!("line {line}: <end of file>"),
    }
}

#[cfg(test)]
mod exact_tests {
    use std::fs;

    use super::*;

    fn judge(expected: &str, produced: &str) -> Verdict {
        let dir = tempfile::tempdir().unwrap();
        let (e, p) = (dir.path().join("expected"), dir.path().join("produced"));
        fs::write(&e, expected).unwrap();
        fs::write(&p, produced).unwrap();
        ExactVerifier.judge(&e, &p).unwrap()
    }

    #[test]
    fn identical_files_are_correct() {
        assert_eq!(judge("1 2 3\n4\n", "1 2 3\n4\n"), Verdict::Correct);
    }

    #[test]
    fn missing_trailing_newline_is_wrong() {
        assert_eq!(
            judge("42\n", "42"),
            Verdict::WrongAnswer {
                expected: "line 1: \"42\\n\"".into(),
                actual: "line 1: \"42\"".into(),
            }
        );
    }

    #[test]
    fn extra_line_is_reported_against_end_of_file() {
        assert_eq!(
            judge("a\n", "a\nb\n"),
            Verdict::WrongAnswer {
                expected: "line 2: <end of file>".into(),
                actual: "line 2: \"b\\n\"".into(),
            }
        );
        assert!(matches!(judge("a \n", "a\n"), Verdict::WrongAnswer { .. }));
        assert!(matches!(judge("a\n", "a\r\n"), Verdict::WrongAnswer { .. }));
    }

    #[test]
    fn missing_answer_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("expected");
        fs::write(&expected, "1\n").unwrap();
        let verdict = ExactVerifier
            .judge(&expected, &dir.path().join("nope"))
            .unwrap();
        assert_eq!(verdict.status_code(), 'F');
    }
}
