//! Permission rules, signatures, and pattern abstraction.
//!
//! The checker answers allow/ask/deny for a concrete call; the abstractor
//! turns concrete calls into the rule patterns operators write (and is the
//! source for "always allow this" suggestions).

pub mod pattern;
pub mod rules;

pub use pattern::{CallSignature, abstract_pattern, suggest_rule};
pub use rules::{
    PermissionCheck, PermissionChecker, PermissionDecision, PermissionRule, RuleSet,
};
