//! Layer 3: regex denylist.
//!
//! Textual signatures for constructs that are dangerous in any of the
//! supported languages. The table is data; adding a signature never touches
//! control flow. Patterns are compiled once and reused across submissions.

use once_cell::sync::Lazy;
use regex::Regex;

use super::violation::{Severity, Violation, ViolationKind};

struct PatternRule {
    regex: Regex,
    kind: ViolationKind,
    severity: Severity,
    label: &'static str,
}

macro_rules! rule {
    ($pattern:expr, $kind:ident, $severity:ident, $label:expr) => {
        PatternRule {
            // Table entries are static and verified by tests; a bad pattern
            // is a programming error, not runtime input.
            regex: Regex::new($pattern).unwrap(),
            kind: ViolationKind::$kind,
            severity: Severity::$severity,
            label: $label,
        }
    };
}

static PATTERN_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        // Interpreter escape hatches
        rule!(r"\beval\s*\(", DangerousCall, Critical, "eval()"),
        rule!(r"\bexec\s*\(", DangerousCall, Critical, "exec()"),
        rule!(r"\bcompile\s*\(", DangerousCall, Critical, "compile()"),
        rule!(r"__import__\s*\(", DynamicImport, Critical, "__import__()"),
        rule!(
            r"\bimportlib\b",
            DynamicImport,
            Critical,
            "importlib access"
        ),
        // Process / shell escape
        rule!(r"\bos\s*\.\s*system\b", DangerousCall, Critical, "os.system"),
        rule!(
            r"\bos\s*\.\s*(popen|exec[lv][pe]*|spawn[lv][pe]*|fork)\b",
            DangerousCall,
            Critical,
            "os process primitive"
        ),
        rule!(
            r"\bsubprocess\b",
            DangerousCall,
            Critical,
            "subprocess access"
        ),
        rule!(
            r"\bchild_process\b",
            DangerousCall,
            Critical,
            "child_process access"
        ),
        rule!(r"\bpty\s*\.", DangerousCall, Critical, "pty access"),
        // Introspection chains used for sandbox escape
        rule!(
            r"__subclasses__",
            DangerousPattern,
            Critical,
            "__subclasses__ walk"
        ),
        rule!(r"__globals__", DangerousPattern, Critical, "__globals__ access"),
        rule!(r"__builtins__", DangerousPattern, Critical, "__builtins__ access"),
        rule!(r"__bases__", DangerousPattern, Critical, "__bases__ access"),
        rule!(r"__mro__", DangerousPattern, Critical, "__mro__ access"),
        rule!(r"__loader__", DangerousPattern, Critical, "__loader__ access"),
        rule!(
            r"__getattribute__",
            DangerousPattern,
            Critical,
            "__getattribute__ access"
        ),
        rule!(
            r"\bgetattr\s*\(",
            DangerousCall,
            Critical,
            "getattr() indirection"
        ),
        rule!(
            r"\bsetattr\s*\(",
            DangerousCall,
            Critical,
            "setattr() indirection"
        ),
        rule!(r"\bvars\s*\(", DangerousCall, Critical, "vars() introspection"),
        rule!(
            r"\bglobals\s*\(",
            DangerousCall,
            Critical,
            "globals() introspection"
        ),
        rule!(
            r"\blocals\s*\(",
            DangerousCall,
            Critical,
            "locals() introspection"
        ),
        // Native memory access
        rule!(r"\bctypes\b", DangerousPattern, Critical, "ctypes access"),
        rule!(r"\bcffi\b", DangerousPattern, Critical, "cffi access"),
        // Network primitives
        rule!(r"\bsocket\b", DangerousPattern, Critical, "socket access"),
        rule!(
            r"\burllib\b|\brequests\b|\bhttp\.client\b|\bhttpx\b",
            DangerousPattern,
            Critical,
            "HTTP client access"
        ),
        rule!(
            r"\bfetch\s*\(|\bXMLHttpRequest\b",
            DangerousPattern,
            Critical,
            "JS network primitive"
        ),
        // Deserialization gadgets
        rule!(
            r"\bpickle\b|\bmarshal\b|\bshelve\b",
            DangerousPattern,
            Critical,
            "unsafe deserialization module"
        ),
        // Encoded-payload staging
        rule!(
            r"base64\s*\.\s*b64decode|\batob\s*\(",
            EncodedLiteral,
            Critical,
            "base64 decode"
        ),
        rule!(
            r"\bcodecs\s*\.\s*decode\b",
            EncodedLiteral,
            Critical,
            "codecs.decode"
        ),
        rule!(
            r#"\\x[0-9a-fA-F]{2}(\\x[0-9a-fA-F]{2}){7,}"#,
            Obfuscation,
            Critical,
            "long hex escape sequence"
        ),
        rule!(
            r"\bchr\s*\(\s*\d+\s*\)\s*\+\s*chr\s*\(",
            Obfuscation,
            Critical,
            "chr() concatenation"
        ),
        // Filesystem abuse
        rule!(
            r#"\bopen\s*\(\s*["'][^"']*["']\s*,\s*["'][wax]"#,
            DangerousCall,
            Critical,
            "file open for writing"
        ),
        rule!(
            r"/etc/(passwd|shadow|hosts|sudoers)",
            DangerousPattern,
            Critical,
            "sensitive system path"
        ),
        rule!(
            r"/proc/self|/proc/\d+",
            DangerousPattern,
            Critical,
            "procfs access"
        ),
        rule!(r"\bshutil\s*\.\s*rmtree\b", DangerousCall, Critical, "shutil.rmtree"),
        rule!(
            r"\brm\s+-[rRf]{1,2}\b",
            DangerousPattern,
            Critical,
            "recursive delete"
        ),
        // Environment and credentials
        rule!(
            r"\bos\s*\.\s*environ\b|\bprocess\s*\.\s*env\b",
            DangerousPattern,
            High,
            "environment access"
        ),
        // Resource exhaustion staging
        rule!(
            r"\bwhile\s+(True|1)\s*:",
            DangerousPattern,
            Medium,
            "unbounded loop"
        ),
        rule!(
            r"\bos\s*\.\s*kill\b|\bsignal\s*\.",
            DangerousCall,
            High,
            "signal manipulation"
        ),
    ]
});

/// Scan each source line against every rule. One violation per (rule, line)
/// hit; repeated hits of the same rule on one line collapse.
pub fn check_patterns(code: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (idx, line) in code.lines().enumerate() {
        for rule in PATTERN_RULES.iter() {
            if rule.regex.is_match(line) {
                violations.push(
                    Violation::new(
                        rule.kind,
                        rule.severity,
                        format!("dangerous pattern: {}", rule.label),
                    )
                    .at_line(idx + 1),
                );
            }
        }
    }

    violations
}
