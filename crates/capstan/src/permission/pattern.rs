//! Call signatures and the pattern abstractor.
//!
//! A **signature** is the deterministic string rendering of a concrete
//! call: the tool name plus its primary argument, e.g.
//! `Bash(command:git push origin main)`. A **pattern** is the abstracted
//! form used to match rules and to suggest new ones to the operator:
//! `Bash(command:git push*)`, `Read(file_path:**/*.ts)`,
//! `WebFetch(domain:example.com)`.
//!
//! Abstraction is a total function: any tool/argument combination produces
//! some pattern, falling back to the bare tool name when there is nothing
//! to abstract over.

use crate::tools::schema::NormalizedArgs;
use std::fmt;
use std::path::Path;

/// Argument fields considered "primary" for signature purposes, in
/// precedence order. The first present field wins.
const PRIMARY_FIELDS: &[&str] = &["command", "file_path", "path", "url", "domain"];

/// Package-manager heads that collapse to one shared pattern.
const NPM_FAMILY: &[&str] = &["npm", "pnpm", "yarn"];

// ── CallSignature ──────────────────────────────────────────────────

/// Deterministic rendering of a concrete call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallSignature {
    pub tool: String,
    /// The primary argument field, when the call has one.
    pub field: Option<String>,
    pub value: Option<String>,
}

impl CallSignature {
    /// Derive the signature from a concrete call.
    pub fn of(tool_name: &str, args: &NormalizedArgs) -> Self {
        for field in PRIMARY_FIELDS {
            if let Some(value) = args.str(field) {
                return Self {
                    tool: tool_name.to_string(),
                    field: Some(field.to_string()),
                    value: Some(value.to_string()),
                };
            }
        }
        Self {
            tool: tool_name.to_string(),
            field: None,
            value: None,
        }
    }

    /// A signature with no primary argument.
    pub fn bare(tool_name: &str) -> Self {
        Self {
            tool: tool_name.to_string(),
            field: None,
            value: None,
        }
    }
}

impl fmt::Display for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.field, &self.value) {
            (Some(field), Some(value)) => write!(f, "{}({field}:{value})", self.tool),
            _ => f.write_str(&self.tool),
        }
    }
}

// ── Abstraction ────────────────────────────────────────────────────

/// Abstract a signature into a rule pattern.
pub fn abstract_pattern(sig: &CallSignature) -> String {
    let (Some(field), Some(value)) = (&sig.field, &sig.value) else {
        return sig.tool.clone();
    };

    match field.as_str() {
        "command" => format!("{}(command:{})", sig.tool, abstract_command(value)),
        "file_path" | "path" => {
            format!("{}({field}:{})", sig.tool, abstract_path(value))
        }
        "url" => match url::Url::parse(value).ok().and_then(|u| u.host_str().map(String::from)) {
            Some(host) => format!("{}(domain:{host})", sig.tool),
            None => format!("{}(url:{value})", sig.tool),
        },
        "domain" => format!("{}(domain:{value})", sig.tool),
        _ => format!("{}({field}:{value})", sig.tool),
    }
}

/// Suggest an "always allow" rule string for a concrete call. This is what
/// the confirmation layer offers the operator next to the yes/no prompt.
pub fn suggest_rule(tool_name: &str, args: &NormalizedArgs) -> String {
    abstract_pattern(&CallSignature::of(tool_name, args))
}

/// Collapse a shell command line to a head pattern.
///
/// `npm|pnpm|yarn …` share one pattern because operators treat the package
/// managers interchangeably; `git <sub> …` keeps the subcommand because
/// `git status` and `git push` deserve different answers.
fn abstract_command(command: &str) -> String {
    let mut words = command.split_whitespace();
    let Some(head) = words.next() else {
        return "*".to_string();
    };
    let head_name = Path::new(head)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(head);

    if NPM_FAMILY.contains(&head_name) {
        return "*npm*".to_string();
    }
    if head_name == "git" {
        if let Some(sub) = words.next() {
            return format!("git {sub}*");
        }
        return "git*".to_string();
    }
    format!("{head_name}*")
}

/// Collapse a file path to an extension glob, or a basename glob when the
/// file has no extension.
fn abstract_path(path: &str) -> String {
    let p = Path::new(path);
    match p.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("**/*.{ext}"),
        None => match p.file_name().and_then(|n| n.to_str()) {
            Some(name) if !name.is_empty() => format!("**/{name}"),
            _ => "**".to_string(),
        },
    }
}

// ── Tests ──────────────────────────────────────────────────────────
