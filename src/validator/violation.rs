//! Violation records and the accept/reject decision policy.
//!
//! Every validation layer reports findings as [`Violation`] values rather
//! than returning early, so a single submission surfaces everything wrong
//! with it at once. The final verdict is a pure function of the collected
//! severities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a single validation finding
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Logged for audit, never blocks on its own
    Medium,
    /// Blocks execution
    High,
    /// Blocks execution; reserved for direct sandbox-escape vectors
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Medium => f.write_str("MEDIUM"),
            Severity::High => f.write_str("HIGH"),
            Severity::Critical => f.write_str("CRITICAL"),
        }
    }
}

/// Closed set of finding categories. Layers map their detections onto these
/// kinds; the reporting surface never grows ad hoc strings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    EmptyCode,
    CodeTooLong,
    SuspiciousCharacter,
    Obfuscation,
    DangerousPattern,
    ForbiddenImport,
    WildcardImport,
    DynamicImport,
    DangerousCall,
    DangerousMethod,
    DangerousName,
    DangerousAttribute,
    DangerousSubscript,
    ForbiddenStatement,
    ComplexClass,
    DangerousDecorator,
    LambdaExpression,
    EncodedLiteral,
    BypassSignature,
    KnownExploit,
    SyntaxError,
    UnsupportedLanguage,
}

/// One finding from one validation layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    /// Human-readable description naming the offending construct
    pub message: String,
    /// 1-based source line, when the layer can attribute one
    pub line: Option<usize>,
}

impl Violation {
    pub fn new(kind: ViolationKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "[{}] line {}: {}", self.severity, line, self.message),
            None => write!(f, "[{}] {}", self.severity, self.message),
        }
    }
}

/// Outcome of running all validation layers over a submission.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// Reject iff any finding is Critical or High. Medium findings are audit
/// signal only.
pub fn decide(violations: &[Violation]) -> Verdict {
    let blocking = violations
        .iter()
        .any(|v| matches!(v.severity, Severity::Critical | Severity::High));
    if blocking {
        Verdict::Reject
    } else {
        Verdict::Accept
    }
}

/// Format blocking findings into the single-line rejection summary used in
/// result stderr.
pub fn rejection_summary(violations: &[Violation]) -> String {
    let blocking: Vec<String> = violations
        .iter()
        .filter(|v| matches!(v.severity, Severity::Critical | Severity::High))
        .map(|v| v.to_string())
        .collect();
    format!("SECURITY ERROR: {}", blocking.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_findings_accept() {
        assert_eq!(decide(&[]), Verdict::Accept);
    }

    #[test]
    fn medium_only_accepts() {
        let findings = vec![
            Violation::new(ViolationKind::EncodedLiteral, Severity::Medium, "large hex literal"),
            Violation::new(ViolationKind::Obfuscation, Severity::Medium, "dense escapes"),
        ];
        assert_eq!(decide(&findings), Verdict::Accept);
    }

    #[test]
    fn single_high_rejects() {
        let findings = vec![
            Violation::new(ViolationKind::EncodedLiteral, Severity::Medium, "large hex literal"),
            Violation::new(ViolationKind::DangerousCall, Severity::High, "call to eval"),
        ];
        assert_eq!(decide(&findings), Verdict::Reject);
    }

    #[test]
    fn critical_rejects() {
        let findings = vec![Violation::new(
            ViolationKind::DangerousPattern,
            Severity::Critical,
            "__subclasses__ walk",
        )];
        assert_eq!(decide(&findings), Verdict::Reject);
    }

    #[test]
    fn summary_skips_medium_findings() {
        let findings = vec![
            Violation::new(ViolationKind::EncodedLiteral, Severity::Medium, "hex literal"),
            Violation::new(ViolationKind::DangerousCall, Severity::High, "call to eval").at_line(3),
        ];
        let summary = rejection_summary(&findings);
        assert!(summary.starts_with("SECURITY ERROR:"));
        assert!(summary.contains("line 3"));
        assert!(!summary.contains("hex literal"));
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
    }
}
