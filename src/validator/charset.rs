//! Layer 2: character-level screening.
//!
//! Catches payloads that hide intent below the token level: raw control
//! characters, exotic codepoints used for homoglyph tricks, and whitespace
//! padding used to push malicious text out of review windows.

use super::violation::{Severity, Violation, ViolationKind};

/// Codepoints at or above this are outside every runtime's keyword and
/// builtin space; their only plausible use here is lookalike obfuscation.
const SUSPICIOUS_CODEPOINT: u32 = 0x1000;

/// Whitespace runs this long or longer are flagged as padding
const WHITESPACE_RUN_LIMIT: usize = 20;

pub fn check_characters(code: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (idx, line) in code.lines().enumerate() {
        let line_no = idx + 1;

        for ch in line.chars() {
            if ch.is_control() && ch != '\t' {
                violations.push(
                    Violation::new(
                        ViolationKind::SuspiciousCharacter,
                        Severity::Critical,
                        format!("control character U+{:04X}", ch as u32),
                    )
                    .at_line(line_no),
                );
            } else if (ch as u32) >= SUSPICIOUS_CODEPOINT {
                violations.push(
                    Violation::new(
                        ViolationKind::SuspiciousCharacter,
                        Severity::Critical,
                        format!("suspicious codepoint U+{:04X}", ch as u32),
                    )
                    .at_line(line_no),
                );
            }
        }

        // Interior padding only; leading indentation is legitimate.
        let body = line.trim_start();
        let mut run = 0usize;
        let mut flagged = false;
        for ch in body.chars() {
            if ch == ' ' || ch == '\t' {
                run += 1;
                if run >= WHITESPACE_RUN_LIMIT && !flagged {
                    violations.push(
                        Violation::new(
                            ViolationKind::Obfuscation,
                            Severity::Critical,
                            format!("whitespace run of {} characters", run),
                        )
                        .at_line(line_no),
                    );
                    flagged = true;
                }
            } else {
                run = 0;
            }
        }
    }

    violations
}
