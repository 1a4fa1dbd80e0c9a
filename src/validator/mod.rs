//! Multi-layer static validation of untrusted source code.
//!
//! Seven layers run in order, each appending findings to one list:
//!
//! 1. input sanity (`rules`)
//! 2. character screening (`charset`)
//! 3. regex denylist (`patterns`)
//! 4. import policy (`imports`)
//! 5. per-language structure (`python` / `javascript` / `shell`)
//! 6. bypass signatures (`bypass`)
//! 7. known-exploit corpus (`exploits`)
//!
//! Only the sanity layer short-circuits; its failures mean later layers
//! would scan unbounded or empty input. Everything else always runs so a
//! rejection reports the full picture.

pub mod bypass;
pub mod charset;
pub mod exploits;
pub mod imports;
pub mod javascript;
pub mod patterns;
pub mod python;
pub mod rules;
pub mod shell;
pub mod violation;

pub use rules::{CompiledRules, RuleSet};
pub use violation::{decide, rejection_summary, Severity, Verdict, Violation, ViolationKind};

use crate::audit::events;
use crate::config::types::{Language, Result, SandboxConfig};

/// Language-specific structural analysis, layer 5 of the pipeline.
///
/// One implementation per supported language, dispatched through
/// [`analyzer_for`]. The shared layers run the same for every language;
/// this trait carries the part that has to understand the source.
pub trait Analyzer: Send + Sync {
    fn language(&self) -> Language;
    fn analyze(&self, code: &str) -> Vec<Violation>;
}

struct PythonAnalyzer;
struct JavaScriptAnalyzer;
struct ShellAnalyzer;

impl Analyzer for PythonAnalyzer {
    fn language(&self) -> Language {
        Language::Python
    }
    fn analyze(&self, code: &str) -> Vec<Violation> {
        python::check_python_structure(code)
    }
}

impl Analyzer for JavaScriptAnalyzer {
    fn language(&self) -> Language {
        Language::JavaScript
    }
    fn analyze(&self, code: &str) -> Vec<Violation> {
        javascript::check_javascript_structure(code)
    }
}

impl Analyzer for ShellAnalyzer {
    fn language(&self) -> Language {
        Language::Bash
    }
    fn analyze(&self, code: &str) -> Vec<Violation> {
        shell::check_shell_commands(code)
    }
}

static PYTHON_ANALYZER: PythonAnalyzer = PythonAnalyzer;
static JAVASCRIPT_ANALYZER: JavaScriptAnalyzer = JavaScriptAnalyzer;
static SHELL_ANALYZER: ShellAnalyzer = ShellAnalyzer;

/// Analyzer registry, mirroring the engine's runtime registry.
pub fn analyzer_for(language: Language) -> &'static dyn Analyzer {
    match language {
        Language::Python => &PYTHON_ANALYZER,
        Language::JavaScript => &JAVASCRIPT_ANALYZER,
        Language::Bash => &SHELL_ANALYZER,
    }
}

/// Outcome of validating one submission.
#[derive(Clone, Debug)]
pub struct Validation {
    pub verdict: Verdict,
    pub violations: Vec<Violation>,
}

impl Validation {
    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Accept
    }
}

/// Stateless validator; one instance serves every submission.
#[derive(Clone, Debug)]
pub struct CodeValidator {
    max_code_bytes: usize,
    extra_rules: Option<CompiledRules>,
}

impl CodeValidator {
    pub fn new(max_code_bytes: usize) -> Self {
        Self {
            max_code_bytes,
            extra_rules: None,
        }
    }

    /// Apply a deployment rule overlay on top of the built-in lists.
    pub fn with_rules(mut self, rules: CompiledRules) -> Self {
        self.extra_rules = Some(rules);
        self
    }

    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        let mut validator = Self::new(config.max_code_bytes);
        if let Some(path) = &config.rules_file {
            validator = validator.with_rules(RuleSet::load(path)?.compile()?);
        }
        Ok(validator)
    }

    /// Run every layer over `code` and decide. Medium findings are logged
    /// to the security log; they never block on their own.
    pub fn validate(&self, code: &str, language: Language) -> Validation {
        let mut violations = rules::check_input_sanity(code, self.max_code_bytes);
        if !violations.is_empty() {
            return self.finish(violations, language);
        }

        violations.extend(charset::check_characters(code));
        violations.extend(patterns::check_patterns(code));
        violations.extend(imports::check_imports(code, language));
        violations.extend(analyzer_for(language).analyze(code));
        violations.extend(bypass::check_bypass_signatures(code));
        violations.extend(exploits::check_known_exploits(code));
        if let Some(extra) = &self.extra_rules {
            violations.extend(extra.check(code));
        }

        self.finish(violations, language)
    }

    fn finish(&self, violations: Vec<Violation>, language: Language) -> Validation {
        let verdict = decide(&violations);
        for violation in &violations {
            events::validation_finding(language, violation);
        }
        if verdict == Verdict::Reject {
            events::validation_rejected(language, &violations);
        }
        Validation {
            verdict,
            violations,
        }
    }
}

impl Default for CodeValidator {
    fn default() -> Self {
        Self::new(SandboxConfig::default().max_code_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> CodeValidator {
        CodeValidator::new(5 * 1024)
    }

    #[test]
    fn trivial_print_accepted() {
        let validation = validator().validate("print(1 + 1)", Language::Python);
        assert!(validation.is_accepted());
        assert!(validation.violations.is_empty());
    }

    #[test]
    fn allowed_imports_and_classes_accepted() {
        let code = "import math\nfrom collections import Counter\n\nclass Stats:\n    def __init__(self, xs):\n        self.xs = xs\n    def mean(self):\n        return sum(self.xs) / len(self.xs)\n\nprint(Stats([1, 2, 3]).mean())\n";
        assert!(validator().validate(code, Language::Python).is_accepted());
    }

    #[test]
    fn escape_chain_rejected_with_multiple_findings() {
        let code = "().__class__.__bases__[0].__subclasses__()";
        let validation = validator().validate(code, Language::Python);
        assert!(!validation.is_accepted());
        // pattern layer, token layer, and exploit corpus all fire
        assert!(validation.violations.len() >= 3);
    }

    #[test]
    fn oversize_short_circuits_before_content_layers() {
        let code = format!("eval('x')\n{}", "a = 1\n".repeat(2000));
        let validation = validator().validate(&code, Language::Python);
        assert!(!validation.is_accepted());
        assert_eq!(validation.violations.len(), 1);
        assert_eq!(validation.violations[0].kind, ViolationKind::CodeTooLong);
    }

    #[test]
    fn medium_only_code_accepted_with_findings_kept() {
        let validation =
            validator().validate("mask = 0xdeadbeefcafebabe\nprint(mask)", Language::Python);
        assert!(validation.is_accepted());
        assert!(validation
            .violations
            .iter()
            .all(|v| v.severity == Severity::Medium));
        assert!(!validation.violations.is_empty());
    }

    #[test]
    fn javascript_routes_to_js_layer() {
        let validation = validator().validate("process.exit(1)", Language::JavaScript);
        assert!(!validation.is_accepted());
    }

    #[test]
    fn bash_routes_to_shell_layer() {
        let validation = validator().validate("curl http://x", Language::Bash);
        assert!(!validation.is_accepted());
    }

    #[test]
    fn analyzer_registry_covers_every_language() {
        for language in [Language::Python, Language::JavaScript, Language::Bash] {
            assert_eq!(analyzer_for(language).language(), language);
        }
    }

    #[test]
    fn rule_overlay_blocks_otherwise_clean_code() {
        let rules = RuleSet {
            version: 2,
            dangerous_patterns: vec![r"\bturtles\b".to_string()],
            ..RuleSet::default()
        }
        .compile()
        .unwrap();
        let validator = validator().with_rules(rules);

        let validation = validator.validate("print('turtles')", Language::Python);
        assert!(!validation.is_accepted());
        assert!(validation
            .violations
            .iter()
            .any(|v| v.message.contains("rule set v2")));
    }

    #[test]
    fn rejection_summary_names_findings() {
        let validation = validator().validate("import os\nos.system('id')", Language::Python);
        let summary = rejection_summary(&validation.violations);
        assert!(summary.contains("SECURITY ERROR:"));
        assert!(summary.contains("os"));
    }
}
