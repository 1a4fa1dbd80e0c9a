//! Layer 5 (Python): token-level structural policy.
//!
//! The regex layer sees text; this layer sees tokens, so spacing and
//! comment tricks cannot hide a construct from it. Source is lexed with a
//! small purpose-built scanner (strings, comments, identifiers, numbers,
//! operators) and the token stream is walked with per-construct rules:
//! builtin calls, attribute access, string subscripts, statements,
//! decorators, and class bodies. A submission the scanner cannot tokenize
//! is rejected; code we cannot read is code we do not run.

use super::violation::{Severity, Violation, ViolationKind};

/// Builtins that compile or import code at runtime, or open host files
const CRITICAL_BUILTINS: &[&str] = &["eval", "exec", "compile", "__import__", "open"];

/// Builtins that reach the interpreter's internals or the host
const HIGH_BUILTINS: &[&str] = &[
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "globals",
    "locals",
    "vars",
    "dir",
    "input",
    "breakpoint",
    "help",
    "exit",
    "quit",
    "memoryview",
    "super",
];

/// Attributes that expose the object graph used in escape chains
const DANGEROUS_ATTRIBUTES: &[&str] = &[
    "__class__",
    "__bases__",
    "__mro__",
    "__subclasses__",
    "__globals__",
    "__builtins__",
    "__getattribute__",
    "__getattr__",
    "__setattr__",
    "__delattr__",
    "__dict__",
    "__code__",
    "__closure__",
    "__func__",
    "__self__",
    "__module__",
    "__loader__",
    "__spec__",
    "__import__",
    "__init_subclass__",
    "__reduce__",
    "__reduce_ex__",
];

/// Method names that operate processes, sockets, or the MRO
const DANGEROUS_METHODS: &[&str] = &[
    "system",
    "popen",
    "fork",
    "forkpty",
    "execv",
    "execve",
    "execvp",
    "spawnl",
    "spawnv",
    "check_output",
    "check_call",
    "communicate",
    "connect",
    "bind",
    "listen",
    "accept",
    "recv",
    "kill",
    "mro",
];

/// Decorators a sandboxed submission may legitimately use
const ALLOWED_DECORATORS: &[&str] = &[
    "staticmethod",
    "classmethod",
    "property",
    "dataclass",
    "functools",
    "wraps",
    "lru_cache",
    "cache",
    "cached_property",
    "total_ordering",
];

/// Dunder methods a class may define without tripping the class policy
const ALLOWED_DUNDER_DEFS: &[&str] = &[
    "__init__",
    "__repr__",
    "__str__",
    "__eq__",
    "__ne__",
    "__lt__",
    "__le__",
    "__gt__",
    "__ge__",
    "__hash__",
    "__len__",
    "__iter__",
    "__next__",
    "__contains__",
    "__getitem__",
    "__setitem__",
    "__enter__",
    "__exit__",
    "__add__",
    "__sub__",
    "__mul__",
    "__truediv__",
    "__call__",
    "__post_init__",
];

/// Bare dunder names that are harmless to reference
const ALLOWED_BARE_DUNDERS: &[&str] = &["__name__", "__doc__"];

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Num(String),
    Str(String),
    Op(char),
}

#[derive(Clone, Debug)]
struct Token {
    tok: Tok,
    line: usize,
}

/// Scan Python source into tokens. Comments and whitespace are dropped;
/// string contents are kept for the subscript check. Returns the line of
/// the failure when a string literal never terminates.
fn tokenize(code: &str) -> Result<Vec<Token>, usize> {
    let chars: Vec<char> = code.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;

    while i < chars.len() {
        let ch = chars[i];

        if ch == '\n' {
            line += 1;
            i += 1;
        } else if ch.is_whitespace() {
            i += 1;
        } else if ch == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if ch == '\\' && i + 1 < chars.len() && chars[i + 1] == '\n' {
            line += 1;
            i += 2;
        } else if ch == '"' || ch == '\'' {
            let quote = ch;
            let start_line = line;
            let triple = i + 2 < chars.len() && chars[i + 1] == quote && chars[i + 2] == quote;
            i += if triple { 3 } else { 1 };
            let mut value = String::new();
            let mut closed = false;
            while i < chars.len() {
                if chars[i] == '\\' && i + 1 < chars.len() {
                    if chars[i + 1] == '\n' {
                        line += 1;
                    }
                    value.push(chars[i]);
                    value.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if triple {
                    if chars[i] == quote
                        && i + 2 < chars.len()
                        && chars[i + 1] == quote
                        && chars[i + 2] == quote
                    {
                        i += 3;
                        closed = true;
                        break;
                    }
                } else if chars[i] == quote {
                    i += 1;
                    closed = true;
                    break;
                } else if chars[i] == '\n' {
                    return Err(start_line);
                }
                if chars[i] == '\n' {
                    line += 1;
                }
                value.push(chars[i]);
                i += 1;
            }
            if !closed {
                return Err(start_line);
            }
            tokens.push(Token {
                tok: Tok::Str(value),
                line: start_line,
            });
        } else if ch.is_alphabetic() || ch == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token {
                tok: Tok::Ident(chars[start..i].iter().collect()),
                line,
            });
        } else if ch.is_ascii_digit() {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            tokens.push(Token {
                tok: Tok::Num(chars[start..i].iter().collect()),
                line,
            });
        } else {
            tokens.push(Token { tok: Tok::Op(ch), line });
            i += 1;
        }
    }

    Ok(tokens)
}

fn ident_at(tokens: &[Token], idx: usize) -> Option<&str> {
    match tokens.get(idx).map(|t| &t.tok) {
        Some(Tok::Ident(name)) => Some(name.as_str()),
        _ => None,
    }
}

fn is_op(tokens: &[Token], idx: usize, op: char) -> bool {
    matches!(tokens.get(idx).map(|t| &t.tok), Some(Tok::Op(c)) if *c == op)
}

/// Hex/binary literals with this many payload digits or more look like
/// packed data rather than constants
const ENCODED_LITERAL_DIGITS: usize = 8;

pub fn check_python_structure(code: &str) -> Vec<Violation> {
    let tokens = match tokenize(code) {
        Ok(tokens) => tokens,
        Err(line) => {
            return vec![Violation::new(
                ViolationKind::SyntaxError,
                Severity::High,
                "unterminated string literal",
            )
            .at_line(line)]
        }
    };

    let mut violations = Vec::new();

    for idx in 0..tokens.len() {
        let token = &tokens[idx];
        match &token.tok {
            Tok::Ident(name) => {
                let after_dot = idx > 0 && is_op(&tokens, idx - 1, '.');
                // names being defined are judged by the def arm instead
                let after_def = idx > 0 && ident_at(&tokens, idx - 1) == Some("def");
                let called = is_op(&tokens, idx + 1, '(');

                if after_dot {
                    if DANGEROUS_ATTRIBUTES.contains(&name.as_str()) {
                        violations.push(
                            Violation::new(
                                ViolationKind::DangerousAttribute,
                                Severity::Critical,
                                format!("access to attribute {}", name),
                            )
                            .at_line(token.line),
                        );
                    } else if called && DANGEROUS_METHODS.contains(&name.as_str()) {
                        violations.push(
                            Violation::new(
                                ViolationKind::DangerousMethod,
                                Severity::High,
                                format!("call to method .{}()", name),
                            )
                            .at_line(token.line),
                        );
                    }
                    continue;
                }

                if called && !after_def && CRITICAL_BUILTINS.contains(&name.as_str()) {
                    violations.push(
                        Violation::new(
                            ViolationKind::DangerousCall,
                            Severity::Critical,
                            format!("call to builtin {}()", name),
                        )
                        .at_line(token.line),
                    );
                } else if called && !after_def && HIGH_BUILTINS.contains(&name.as_str()) {
                    violations.push(
                        Violation::new(
                            ViolationKind::DangerousCall,
                            Severity::High,
                            format!("call to builtin {}()", name),
                        )
                        .at_line(token.line),
                    );
                } else if !after_def
                    && name.starts_with("__")
                    && name.ends_with("__")
                    && !ALLOWED_BARE_DUNDERS.contains(&name.as_str())
                {
                    violations.push(
                        Violation::new(
                            ViolationKind::DangerousName,
                            Severity::High,
                            format!("reference to {}", name),
                        )
                        .at_line(token.line),
                    );
                } else {
                    match name.as_str() {
                        // scope manipulation and exception laundering:
                        // both are standard vectors for suppressing a
                        // blocked primitive
                        "global" | "nonlocal" | "del" | "try" | "except" | "finally"
                        | "with" => {
                            violations.push(
                                Violation::new(
                                    ViolationKind::ForbiddenStatement,
                                    Severity::High,
                                    format!("{} statement", name),
                                )
                                .at_line(token.line),
                            );
                        }
                        "lambda" => {
                            violations.push(
                                Violation::new(
                                    ViolationKind::LambdaExpression,
                                    Severity::High,
                                    "lambda expression",
                                )
                                .at_line(token.line),
                            );
                        }
                        "class" => {
                            // explicit bases mean live-hierarchy access;
                            // sandboxed classes stay flat
                            if ident_at(&tokens, idx + 1).is_some()
                                && is_op(&tokens, idx + 2, '(')
                                && !is_op(&tokens, idx + 3, ')')
                            {
                                violations.push(
                                    Violation::new(
                                        ViolationKind::ComplexClass,
                                        Severity::High,
                                        "class with explicit bases",
                                    )
                                    .at_line(token.line),
                                );
                            }
                        }
                        "def" => {
                            if let Some(fn_name) = ident_at(&tokens, idx + 1) {
                                let dunder =
                                    fn_name.starts_with("__") && fn_name.ends_with("__");
                                if dunder && !ALLOWED_DUNDER_DEFS.contains(&fn_name) {
                                    violations.push(
                                        Violation::new(
                                            ViolationKind::ComplexClass,
                                            Severity::High,
                                            format!("definition of {}", fn_name),
                                        )
                                        .at_line(token.line),
                                    );
                                } else if !dunder && fn_name.starts_with('_') {
                                    // private-style names mimic internals
                                    violations.push(
                                        Violation::new(
                                            ViolationKind::DangerousName,
                                            Severity::Medium,
                                            format!(
                                                "underscore-prefixed definition {}",
                                                fn_name
                                            ),
                                        )
                                        .at_line(token.line),
                                    );
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            Tok::Str(value) => {
                // obj["__class__"] and friends
                if idx > 0
                    && is_op(&tokens, idx - 1, '[')
                    && value.starts_with("__")
                {
                    violations.push(
                        Violation::new(
                            ViolationKind::DangerousSubscript,
                            Severity::Critical,
                            format!("dunder subscript \"{}\"", value),
                        )
                        .at_line(token.line),
                    );
                }
            }
            Tok::Num(literal) => {
                let lower = literal.to_ascii_lowercase();
                let payload = lower
                    .strip_prefix("0x")
                    .or_else(|| lower.strip_prefix("0b"))
                    .or_else(|| lower.strip_prefix("0o"));
                if let Some(digits) = payload {
                    if digits.chars().filter(|c| *c != '_').count() >= ENCODED_LITERAL_DIGITS {
                        violations.push(
                            Violation::new(
                                ViolationKind::EncodedLiteral,
                                Severity::Medium,
                                format!("packed numeric literal {}", literal),
                            )
                            .at_line(token.line),
                        );
                    }
                }
            }
            Tok::Op('@') => {
                // Decorator position: line start in logical terms; a
                // mid-expression @ is matrix multiply, which never has an
                // identifier operand on both sides here worth the risk.
                if let Some(name) = ident_at(&tokens, idx + 1) {
                    let decorated = idx == 0
                        || tokens[idx - 1].line < token.line;
                    if decorated && !ALLOWED_DECORATORS.contains(&name) {
                        violations.push(
                            Violation::new(
                                ViolationKind::DangerousDecorator,
                                Severity::High,
                                format!("decorator @{}", name),
                            )
                            .at_line(token.line),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::violation::{decide, Verdict};

    fn verdict(code: &str) -> Verdict {
        decide(&check_python_structure(code))
    }

    #[test]
    fn arithmetic_accepted() {
        assert_eq!(verdict("print(1 + 1)"), Verdict::Accept);
    }

    #[test]
    fn allowed_stdlib_usage_accepted() {
        let code = "import math\nvalues = [math.sqrt(n) for n in range(10)]\nprint(values)\n";
        assert_eq!(verdict(code), Verdict::Accept);
    }

    #[test]
    fn eval_call_is_critical() {
        let violations = check_python_structure("eval('1+1')");
        assert_eq!(violations[0].severity, Severity::Critical);
    }

    #[test]
    fn spacing_does_not_hide_eval() {
        assert_eq!(verdict("eval    ('1+1')"), Verdict::Reject);
    }

    #[test]
    fn eval_mentioned_in_string_is_fine() {
        assert_eq!(verdict("print('use of eval() is banned')"), Verdict::Accept);
    }

    #[test]
    fn eval_in_comment_is_fine() {
        assert_eq!(verdict("x = 1  # eval(x) would be bad\nprint(x)"), Verdict::Accept);
    }

    #[test]
    fn class_attribute_chain_rejected() {
        assert_eq!(verdict("().__class__"), Verdict::Reject);
    }

    #[test]
    fn dunder_subscript_rejected() {
        let violations = check_python_structure("d['__class__']");
        assert_eq!(violations[0].kind, ViolationKind::DangerousSubscript);
        assert_eq!(decide(&violations), Verdict::Reject);
    }

    #[test]
    fn plain_subscript_accepted() {
        assert_eq!(verdict("d['total'] = 3"), Verdict::Accept);
    }

    #[test]
    fn getattr_blocked() {
        assert_eq!(verdict("getattr(obj, name)"), Verdict::Reject);
    }

    #[test]
    fn read_mode_open_is_critical() {
        // file-handle opening is a primary escape primitive regardless of
        // mode, so the finding must sit in the top tier
        let violations = check_python_structure("data = open('notes.txt').read()");
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::DangerousCall && v.severity == Severity::Critical));
        assert_eq!(decide(&violations), Verdict::Reject);
    }

    #[test]
    fn method_named_like_builtin_not_flagged_as_builtin() {
        // open is blocked as a builtin call, but a user method .open() on
        // an allowed object only matches the method table, which omits it
        assert_eq!(verdict("box.open()"), Verdict::Accept);
    }

    #[test]
    fn os_system_method_rejected() {
        assert_eq!(verdict("o.system('id')"), Verdict::Reject);
    }

    #[test]
    fn del_statement_rejected() {
        assert_eq!(verdict("del x"), Verdict::Reject);
    }

    #[test]
    fn lambda_rejected() {
        let violations = check_python_structure("sorted(xs, key=lambda p: p[1])");
        assert_eq!(violations[0].kind, ViolationKind::LambdaExpression);
        assert_eq!(decide(&violations), Verdict::Reject);
    }

    #[test]
    fn try_except_rejected() {
        let code = "try:\n    x = 1\nexcept Exception:\n    pass\n";
        assert_eq!(verdict(code), Verdict::Reject);
    }

    #[test]
    fn with_statement_rejected() {
        assert_eq!(verdict("with ctx() as c:\n    pass\n"), Verdict::Reject);
    }

    #[test]
    fn inherited_class_rejected() {
        let code = "class Evil(BaseException):\n    pass\n";
        let violations = check_python_structure(code);
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::ComplexClass));
        assert_eq!(decide(&violations), Verdict::Reject);
    }

    #[test]
    fn empty_parens_class_accepted() {
        assert_eq!(verdict("class P():\n    pass\n"), Verdict::Accept);
    }

    #[test]
    fn plain_class_accepted() {
        let code = "class Point:\n    def __init__(self, x):\n        self.x = x\n    def norm(self):\n        return abs(self.x)\n";
        assert_eq!(verdict(code), Verdict::Accept);
    }

    #[test]
    fn reduce_definition_rejected() {
        let code = "class P:\n    def __reduce__(self):\n        return (print, ())\n";
        assert_eq!(verdict(code), Verdict::Reject);
    }

    #[test]
    fn underscore_definition_is_medium_only() {
        let violations = check_python_structure("def _helper(x):\n    return x\n");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Medium);
        assert_eq!(decide(&violations), Verdict::Accept);
    }

    #[test]
    fn unknown_decorator_rejected() {
        assert_eq!(verdict("@magic\ndef f():\n    return 1\n"), Verdict::Reject);
    }

    #[test]
    fn allowed_decorator_accepted() {
        assert_eq!(
            verdict("@staticmethod\ndef f():\n    return 1\n"),
            Verdict::Accept
        );
    }

    #[test]
    fn unterminated_string_rejected() {
        let violations = check_python_structure("x = 'oops");
        assert_eq!(violations[0].kind, ViolationKind::SyntaxError);
        assert_eq!(decide(&violations), Verdict::Reject);
    }

    #[test]
    fn packed_hex_literal_is_medium() {
        let violations = check_python_structure("key = 0xdeadbeefcafe");
        assert_eq!(violations[0].severity, Severity::Medium);
        assert_eq!(decide(&violations), Verdict::Accept);
    }

    #[test]
    fn small_hex_literal_unflagged() {
        assert_eq!(verdict("mask = 0xff"), Verdict::Accept);
    }

    #[test]
    fn dunder_name_main_guard_accepted() {
        let code = "if __name__ == '__main__':\n    print('hi')\n";
        assert_eq!(verdict(code), Verdict::Accept);
    }

    #[test]
    fn fstring_contents_scanned() {
        // The scanner treats the f prefix as an identifier; the string body
        // still cannot smuggle a bare dangerous call past the walk
        assert_eq!(verdict("name = f'value {x}'"), Verdict::Accept);
    }
}
