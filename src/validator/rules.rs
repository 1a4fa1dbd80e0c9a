//! Layer 1 (input sanity) and the loadable rule overlay.
//!
//! The built-in deny/allow lists ship compiled in; deployments that need
//! to block a new payload before the next release load a [`RuleSet`] from
//! a JSON file and the validator applies it on top of the built-ins.
//! Overlay rules can only add findings, never relax the built-ins.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::exploits;
use super::violation::{Severity, Violation, ViolationKind};
use crate::config::types::{Result, SandboxError};

/// Check payload size bounds. `max_code_bytes` comes from
/// [`crate::config::types::SandboxConfig`].
pub fn check_input_sanity(code: &str, max_code_bytes: usize) -> Vec<Violation> {
    let mut violations = Vec::new();

    if code.trim().is_empty() {
        violations.push(Violation::new(
            ViolationKind::EmptyCode,
            Severity::Critical,
            "empty code submission",
        ));
        return violations;
    }

    if code.len() > max_code_bytes {
        violations.push(Violation::new(
            ViolationKind::CodeTooLong,
            Severity::Critical,
            format!(
                "code is {} bytes, limit is {} bytes",
                code.len(),
                max_code_bytes
            ),
        ));
    }

    violations
}

/// Deployment-supplied rule additions, deserialized from JSON.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuleSet {
    /// Monotonic version for audit trails
    #[serde(default)]
    pub version: u32,
    /// Extra regex denylist entries, matched per line
    #[serde(default)]
    pub dangerous_patterns: Vec<String>,
    /// Extra forbidden module roots, matched as whole words in any language
    #[serde(default)]
    pub forbidden_imports: Vec<String>,
    /// Extra exploit fingerprints over normalized source
    #[serde(default)]
    pub exploit_fingerprints: Vec<FingerprintEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub sha256: String,
    pub label: String,
}

impl RuleSet {
    pub fn load(path: &Path) -> Result<Self> {
        let payload = std::fs::read_to_string(path)?;
        serde_json::from_str(&payload)
            .map_err(|e| SandboxError::RuleSet(format!("{}: {}", path.display(), e)))
    }

    /// Compile the regex entries. A rule set with a bad pattern is refused
    /// whole; a partially applied overlay would be a silent hole.
    pub fn compile(&self) -> Result<CompiledRules> {
        let mut patterns = Vec::with_capacity(self.dangerous_patterns.len());
        for pattern in &self.dangerous_patterns {
            let regex = Regex::new(pattern)
                .map_err(|e| SandboxError::RuleSet(format!("pattern {:?}: {}", pattern, e)))?;
            patterns.push(regex);
        }

        let mut imports = Vec::with_capacity(self.forbidden_imports.len());
        for name in &self.forbidden_imports {
            let word = Regex::new(&format!(r"\b{}\b", regex::escape(name)))
                .map_err(|e| SandboxError::RuleSet(format!("import {:?}: {}", name, e)))?;
            imports.push((name.clone(), word));
        }

        Ok(CompiledRules {
            version: self.version,
            patterns,
            imports,
            fingerprints: self
                .exploit_fingerprints
                .iter()
                .map(|entry| (entry.sha256.to_ascii_lowercase(), entry.label.clone()))
                .collect(),
        })
    }
}

/// A [`RuleSet`] ready to apply.
#[derive(Clone, Debug)]
pub struct CompiledRules {
    pub version: u32,
    patterns: Vec<Regex>,
    imports: Vec<(String, Regex)>,
    fingerprints: Vec<(String, String)>,
}

impl CompiledRules {
    pub fn check(&self, code: &str) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (idx, line) in code.lines().enumerate() {
            for regex in &self.patterns {
                if regex.is_match(line) {
                    violations.push(
                        Violation::new(
                            ViolationKind::DangerousPattern,
                            Severity::Critical,
                            format!("rule set v{} pattern: {}", self.version, regex.as_str()),
                        )
                        .at_line(idx + 1),
                    );
                }
            }
            for (name, word) in &self.imports {
                if word.is_match(line) {
                    violations.push(
                        Violation::new(
                            ViolationKind::ForbiddenImport,
                            Severity::Critical,
                            format!("rule set v{} forbidden module: {}", self.version, name),
                        )
                        .at_line(idx + 1),
                    );
                }
            }
        }

        let fingerprint = exploits::fingerprint(code);
        for (hash, label) in &self.fingerprints {
            if *hash == fingerprint {
                violations.push(Violation::new(
                    ViolationKind::KnownExploit,
                    Severity::Critical,
                    format!("rule set v{} exploit: {}", self.version, label),
                ));
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::violation::{decide, Verdict};

    const LIMIT: usize = 5 * 1024;

    #[test]
    fn normal_code_passes() {
        assert!(check_input_sanity("print(1 + 1)", LIMIT).is_empty());
    }

    #[test]
    fn empty_code_is_critical() {
        let violations = check_input_sanity("", LIMIT);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Critical);
        assert_eq!(decide(&violations), Verdict::Reject);
    }

    #[test]
    fn whitespace_only_counts_as_empty() {
        let violations = check_input_sanity("   \n\t  ", LIMIT);
        assert_eq!(violations[0].kind, ViolationKind::EmptyCode);
    }

    #[test]
    fn one_byte_over_limit_rejects() {
        let code = "a".repeat(LIMIT + 1);
        let violations = check_input_sanity(&code, LIMIT);
        assert_eq!(violations[0].kind, ViolationKind::CodeTooLong);
        assert_eq!(decide(&violations), Verdict::Reject);
    }

    #[test]
    fn exactly_at_limit_passes() {
        let code = "a".repeat(LIMIT);
        assert!(check_input_sanity(&code, LIMIT).is_empty());
    }

    #[test]
    fn rule_set_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{
                "version": 7,
                "dangerous_patterns": ["\\bforbidden_fn\\s*\\("],
                "forbidden_imports": ["leftpad"],
                "exploit_fingerprints": []
            }"#,
        )
        .unwrap();

        let rules = RuleSet::load(&path).unwrap().compile().unwrap();
        assert_eq!(rules.version, 7);

        let violations = rules.check("import leftpad\nforbidden_fn()");
        assert_eq!(violations.len(), 2);
        assert_eq!(decide(&violations), Verdict::Reject);
    }

    #[test]
    fn bad_pattern_refuses_the_whole_set() {
        let rules = RuleSet {
            dangerous_patterns: vec!["([unclosed".to_string()],
            ..RuleSet::default()
        };
        assert!(rules.compile().is_err());
    }

    #[test]
    fn overlay_fingerprint_matches_normalized_source() {
        let payload = "novel_escape_primitive()";
        let rules = RuleSet {
            version: 1,
            exploit_fingerprints: vec![FingerprintEntry {
                sha256: exploits::fingerprint(payload),
                label: "novel escape".to_string(),
            }],
            ..RuleSet::default()
        }
        .compile()
        .unwrap();

        let hits = rules.check("  NOVEL_ESCAPE_PRIMITIVE()  ");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].message.contains("novel escape"));
    }

    #[test]
    fn empty_overlay_adds_nothing() {
        let rules = RuleSet::default().compile().unwrap();
        assert!(rules.check("import os").is_empty());
    }
}
