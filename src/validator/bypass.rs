//! Layer 6: bypass-technique signatures.
//!
//! Earlier layers judge what the code says; this layer judges how it says
//! it. Submissions that assemble dangerous names at runtime defeat token
//! and regex checks, so the source is also scanned in a collapsed form
//! with quotes, concatenation operators, and whitespace removed. A
//! dangerous name visible only after collapsing is itself the finding.

use once_cell::sync::Lazy;
use regex::Regex;

use super::violation::{Severity, Violation, ViolationKind};

/// Names whose appearance in collapsed text marks an assembly bypass
const ASSEMBLED_TARGETS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "os.system",
    "subprocess",
    "__subclasses__",
    "__builtins__",
    "__globals__",
    "child_process",
    "constructor",
];

static FRAGMENT_CONCAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["'][A-Za-z_.]{1,6}["']\s*\+\s*["']"#).unwrap());
static UNICODE_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\u[0-9a-fA-F]{4}").unwrap());
static BYTES_FROMHEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bbytes\s*\.\s*fromhex\b|\bbytearray\s*\.\s*fromhex\b").unwrap());
static CHAR_JOIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']{2}\s*\.\s*join\s*\("#).unwrap());
static SLICE_REVERSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']\s*\[\s*:\s*:\s*-\s*1\s*\]"#).unwrap());

/// Source with quotes, '+', and whitespace removed, lowercased. Fragment
/// assembly like `"ev" + "AL"` collapses to `eval`.
fn collapse(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace() && *c != '"' && *c != '\'' && *c != '+')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

pub fn check_bypass_signatures(code: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    let collapsed = collapse(code);
    for target in ASSEMBLED_TARGETS {
        // Only report assembly: targets visible in the raw text already
        // belong to the pattern and token layers.
        if collapsed.contains(target) && !code.to_lowercase().contains(target) {
            violations.push(Violation::new(
                ViolationKind::BypassSignature,
                Severity::Critical,
                format!("assembled dangerous name: {}", target),
            ));
        }
    }

    for (idx, line) in code.lines().enumerate() {
        let line_no = idx + 1;

        if FRAGMENT_CONCAT.is_match(line) {
            violations.push(
                Violation::new(
                    ViolationKind::Obfuscation,
                    Severity::High,
                    "short-fragment string concatenation",
                )
                .at_line(line_no),
            );
        }
        if UNICODE_ESCAPE.find_iter(line).count() >= 3 {
            violations.push(
                Violation::new(
                    ViolationKind::Obfuscation,
                    Severity::High,
                    "dense unicode escapes",
                )
                .at_line(line_no),
            );
        }
        if BYTES_FROMHEX.is_match(line) {
            violations.push(
                Violation::new(
                    ViolationKind::BypassSignature,
                    Severity::High,
                    "bytes.fromhex decoding",
                )
                .at_line(line_no),
            );
        }
        if CHAR_JOIN.is_match(line) {
            violations.push(
                Violation::new(
                    ViolationKind::Obfuscation,
                    Severity::Medium,
                    "empty-string join",
                )
                .at_line(line_no),
            );
        }
        if SLICE_REVERSE.is_match(line) {
            violations.push(
                Violation::new(
                    ViolationKind::Obfuscation,
                    Severity::High,
                    "string-literal reversal",
                )
                .at_line(line_no),
            );
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::violation::{decide, Verdict};

    fn verdict(code: &str) -> Verdict {
        decide(&check_bypass_signatures(code))
    }

    #[test]
    fn plain_code_accepted() {
        assert_eq!(verdict("total = sum(range(100))\nprint(total)"), Verdict::Accept);
    }

    #[test]
    fn fragment_assembly_of_eval_rejected() {
        let violations = check_bypass_signatures("f = 'ev' + 'al'");
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::BypassSignature));
        assert_eq!(decide(&violations), Verdict::Reject);
    }

    #[test]
    fn case_split_assembly_detected() {
        assert_eq!(verdict("name = 'EX' + 'ec'"), Verdict::Reject);
    }

    #[test]
    fn benign_concatenation_accepted() {
        assert_eq!(verdict("greeting = 'hello, ' + name"), Verdict::Accept);
    }

    #[test]
    fn raw_eval_not_reported_here() {
        // visible text is another layer's finding
        assert!(check_bypass_signatures("eval('1')")
            .iter()
            .all(|v| v.kind != ViolationKind::BypassSignature));
    }

    #[test]
    fn reversed_literal_rejected() {
        assert_eq!(verdict("f = 'lave'[::-1]"), Verdict::Reject);
    }

    #[test]
    fn fromhex_rejected() {
        assert_eq!(verdict("payload = bytes.fromhex('6f73')"), Verdict::Reject);
    }

    #[test]
    fn dense_unicode_escapes_rejected() {
        assert_eq!(
            verdict(r#"s = "\u0065\u0076\u0061\u006c""#),
            Verdict::Reject
        );
    }

    #[test]
    fn empty_join_is_medium_only() {
        let violations = check_bypass_signatures("s = ''.join(words)");
        assert!(violations.iter().all(|v| v.severity == Severity::Medium));
        assert_eq!(decide(&violations), Verdict::Accept);
    }
}
