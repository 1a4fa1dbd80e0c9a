//! Layer 5 (JavaScript): structural heuristics.
//!
//! No JS parser is carried, so this layer works on line-scoped signatures
//! for the constructs that matter in Node: code construction from strings,
//! constructor-chain escapes, runtime introspection, and dynamic module
//! loading. Module names themselves are the import layer's job.

use once_cell::sync::Lazy;
use regex::Regex;

use super::violation::{Severity, Violation, ViolationKind};

struct JsRule {
    regex: Regex,
    kind: ViolationKind,
    severity: Severity,
    label: &'static str,
}

macro_rules! js_rule {
    ($pattern:expr, $kind:ident, $severity:ident, $label:expr) => {
        JsRule {
            regex: Regex::new($pattern).unwrap(),
            kind: ViolationKind::$kind,
            severity: Severity::$severity,
            label: $label,
        }
    };
}

static JS_RULES: Lazy<Vec<JsRule>> = Lazy::new(|| {
    vec![
        js_rule!(r"\beval\s*\(", DangerousCall, Critical, "eval()"),
        js_rule!(
            r"\bnew\s+Function\b|\bFunction\s*\(",
            DangerousCall,
            Critical,
            "Function constructor"
        ),
        js_rule!(
            r"\.constructor\b|\bconstructor\s*\[",
            DangerousPattern,
            Critical,
            "constructor chain"
        ),
        js_rule!(
            r"\bprocess\s*[.\[]",
            DangerousPattern,
            Critical,
            "process object"
        ),
        js_rule!(
            r"\bglobalThis\b|\bglobal\s*[.\[]",
            DangerousPattern,
            High,
            "global object access"
        ),
        js_rule!(
            r"\bimport\s*\(",
            DynamicImport,
            Critical,
            "dynamic import()"
        ),
        js_rule!(
            r#"\brequire\s*\(\s*[^"'`\s)]"#,
            DynamicImport,
            Critical,
            "computed require()"
        ),
        js_rule!(r"\bReflect\b", DangerousPattern, High, "Reflect API"),
        js_rule!(r"\bProxy\s*\(", DangerousPattern, High, "Proxy construction"),
        js_rule!(
            r"\bWebAssembly\b",
            DangerousPattern,
            High,
            "WebAssembly access"
        ),
        js_rule!(
            r#"\b(setTimeout|setInterval)\s*\(\s*["'`]"#,
            DangerousCall,
            Critical,
            "string-argument timer"
        ),
        js_rule!(
            r#"Buffer\s*\.\s*from\s*\([^)]*["']base64["']"#,
            EncodedLiteral,
            High,
            "base64 buffer decode"
        ),
        js_rule!(
            r"\b__proto__\b|Object\s*\.\s*(getPrototypeOf|setPrototypeOf)\b",
            DangerousPattern,
            High,
            "prototype manipulation"
        ),
    ]
});

pub fn check_javascript_structure(code: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (idx, line) in code.lines().enumerate() {
        for rule in JS_RULES.iter() {
            if rule.regex.is_match(line) {
                violations.push(
                    Violation::new(
                        rule.kind,
                        rule.severity,
                        format!("dangerous construct: {}", rule.label),
                    )
                    .at_line(idx + 1),
                );
            }
        }
    }

    violations
}
