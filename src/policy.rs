//! Safety Gate: classifies a shell command before anything executes it.
//! Matching runs against a canonicalized form (shell quoting resolved,
//! whitespace collapsed) feeding static pattern tables, so extra spaces or
//! quoted flags cannot dodge a rule. Classification never runs the command.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub cwd: PathBuf,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    Allow,
    Block,
    /// Ambiguous: requires explicit user approval. Never remembered —
    /// the same command re-prompts every time.
    Confirm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    pub matched_rule: Option<String>,
    pub reason: String,
}

struct Rule {
    name: &'static str,
    pattern: Regex,
    reason: &'static str,
}

fn rule(name: &'static str, pattern: &str, reason: &'static str) -> Rule {
    Rule {
        name,
        // Table patterns are static and verified by tests
        pattern: Regex::new(pattern).expect("invalid policy rule pattern"),
        reason,
    }
}

lazy_static! {
    /// High-risk constructs. A match always blocks, safe mode or not.
    static ref DENY_RULES: Vec<Rule> = vec![
        rule(
            "recursive-delete-root",
            r"^rm\s+(?:-\S+\s+)*-\S*[rR]\S*\s+(?:-\S+\s+)*(?:/[^/\s]*/?|~/?|\$HOME/?)(?:\s|$)",
            "recursive delete of a root-level or home-level path",
        ),
        rule(
            "privilege-escalation",
            r"^(?:sudo|doas|su)(?:\s|$)",
            "privilege escalation",
        ),
        rule(
            "pipe-to-shell",
            r"\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:ba|z|da|fi)?sh\b",
            "unreviewed remote content piped into a shell",
        ),
        rule(
            "recursive-chmod-root",
            r"^(?:chmod|chown)\s+(?:-\S+\s+)*(?:-R|--recursive)\b.*\s/(?:\s|$)",
            "filesystem-wide permission or ownership change",
        ),
        rule(
            "chmod-root",
            r"^chmod\s+(?:-\S+\s+)*[0-7]{3,4}\s+/(?:\s|$)",
            "permission change on the filesystem root",
        ),
        rule(
            "raw-device-write",
            r"\bdd\b.*\bof=/dev/",
            "raw write to a block device",
        ),
        rule("mkfs", r"^mkfs(?:\.\S+)?(?:\s|$)", "filesystem creation"),
        rule("fork-bomb", r":\(\)\s*\{", "fork bomb"),
    ];

    /// Common read-only and build commands.
    static ref ALLOW_RULES: Vec<Rule> = vec![
        rule(
            "read-only-core",
            r"^(?:ls|cat|pwd|echo|head|tail|wc|grep|rg|find|which|env|du|df|stat|file|tree)(?:\s|$)",
            "read-only command",
        ),
        rule(
            "git-read",
            r"^git\s+(?:status|diff|log|show|branch)(?:\s|$)",
            "read-only git command",
        ),
        rule(
            "cargo-build",
            r"^cargo\s+(?:build|check|test|fmt|clippy)(?:\s|$)",
            "standard cargo build command",
        ),
    ];
}

/// Resolve shell quoting and escapes, then collapse whitespace: the
/// canonical form the rule tables match against.
pub fn canonicalize(raw: &str) -> String {
    tokenize(raw).join(" ")
}

/// Deterministic shell-style tokenizer: single quotes are literal, double
/// quotes allow backslash escapes, whitespace splits outside quotes.
/// Unbalanced quotes simply consume to end of input.
fn tokenize(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut started = false;
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                started = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                started = true;
            }
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    started = true;
                }
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if started {
                    tokens.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        tokens.push(current);
    }
    tokens
}

/// Classify a command. Pure: identical (canonicalized command, safe-mode
/// flag) inputs always yield the identical decision. Execution is the
/// caller's responsibility after an Allow or a user-approved Confirm.
pub fn classify(request: &CommandRequest, safe_mode: bool) -> PolicyDecision {
    let canonical = canonicalize(&request.command);
    let parts = segments(&canonical);

    // Deny rules run against the full command and every connector segment:
    // the anchored rules must still fire on `ls ; rm -rf /`.
    for rule in DENY_RULES.iter() {
        if rule.pattern.is_match(&canonical)
            || parts.iter().any(|seg| rule.pattern.is_match(seg))
        {
            return PolicyDecision {
                action: PolicyAction::Block,
                matched_rule: Some(rule.name.to_string()),
                reason: rule.reason.to_string(),
            };
        }
    }

    // Compound commands are only allowed when every segment is allowed:
    // `ls | sh` must not ride on the `ls` rule.
    if !parts.is_empty() && parts.iter().all(|seg| allow_rule_for(seg).is_some()) {
        if let Some(rule) = allow_rule_for(parts[0]) {
            return PolicyDecision {
                action: PolicyAction::Allow,
                matched_rule: Some(rule.name.to_string()),
                reason: rule.reason.to_string(),
            };
        }
    }

    if safe_mode {
        PolicyDecision {
            action: PolicyAction::Block,
            matched_rule: None,
            reason: "no rule matched; safe mode blocks unrecognized commands".to_string(),
        }
    } else {
        PolicyDecision {
            action: PolicyAction::Confirm,
            matched_rule: None,
            reason: "no rule matched; confirmation required".to_string(),
        }
    }
}

fn allow_rule_for(segment: &str) -> Option<&'static Rule> {
    ALLOW_RULES.iter().find(|rule| rule.pattern.is_match(segment))
}

/// Split a canonical command on shell connectors so each stage is vetted
/// independently.
fn segments(canonical: &str) -> Vec<&str> {
    canonical
        .split(['|', ';'])
        .flat_map(|part| part.split("&&"))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}
