//! Constraint resolution against a registry's tag list
//!
//! Ranges use `semver` requirement syntax, extended with the forms plugin
//! authors tend to write: `||` alternatives, whitespace separated
//! comparators (`>=1.0 <2.0`), hyphen ranges (`1.0 - 2.0`), and bare
//! versions as exact pins. Tags may carry a leading `v`.

use std::cmp::Ordering;

use semver::{Version as Semver, VersionReq};
use thiserror::Error;

use super::PluginKey;
use crate::error::PluginError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("invalid constraint '{constraint}': {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    #[error("no version satisfies '{constraint}'")]
    NoSatisfyingVersion { constraint: String },
}

impl ResolveError {
    pub fn for_plugin(self, key: &PluginKey) -> PluginError {
        match self {
            Self::InvalidConstraint { constraint, reason } => PluginError::InvalidConstraint {
                key: key.to_string(),
                constraint,
                reason,
            },
            Self::NoSatisfyingVersion { constraint } => PluginError::NoSatisfyingVersion {
                key: key.to_string(),
                constraint,
            },
        }
    }
}

/// A parsed range: satisfied when any alternative matches
#[derive(Debug, Clone)]
pub struct Constraint {
    alternatives: Vec<VersionReq>,
}

impl Constraint {
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        let invalid = |reason: String| ResolveError::InvalidConstraint {
            constraint: raw.to_string(),
            reason,
        };

        let mut alternatives = Vec::new();
        for branch in raw.split("||") {
            let normalized = normalize_branch(branch).map_err(invalid)?;
            let req = VersionReq::parse(&normalized).map_err(|e| invalid(e.to_string()))?;
            alternatives.push(req);
        }

        Ok(Self { alternatives })
    }

    pub fn matches(&self, version: &Semver) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

/// Parse a registry tag as a semantic version, tolerating a `v` prefix
pub fn parse_tag(tag: &str) -> Option<Semver> {
    let trimmed = tag.trim();
    let bare = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    Semver::parse(bare).ok()
}

/// Pick the highest-precedence tag satisfying `constraint`.
///
/// Tags that are not semantic versions are ignored. Returns the tag exactly
/// as supplied.
pub fn resolve<S: AsRef<str>>(constraint: &str, candidates: &[S]) -> Result<String, ResolveError> {
    let parsed = Constraint::parse(constraint)?;

    let mut versions: Vec<(Semver, &str)> = candidates
        .iter()
        .filter_map(|tag| parse_tag(tag.as_ref()).map(|v| (v, tag.as_ref())))
        .collect();

    versions.sort_by(|(a, a_tag), (b, b_tag)| {
        cmp_precedence(b, a).then_with(|| tie_break(a, a_tag, b, b_tag))
    });

    versions
        .into_iter()
        .find(|(version, _)| parsed.matches(version))
        .map(|(_, tag)| tag.to_string())
        .ok_or_else(|| ResolveError::NoSatisfyingVersion {
            constraint: constraint.to_string(),
        })
}

/// Semver precedence: build metadata is ignored, a release outranks its
/// pre-releases.
fn cmp_precedence(a: &Semver, b: &Semver) -> Ordering {
    (a.major, a.minor, a.patch, &a.pre).cmp(&(b.major, b.minor, b.patch, &b.pre))
}

/// Among equal-precedence tags, the plain `x.y.z[-pre]` spelling first,
/// then byte order of the literal tag.
fn tie_break(a: &Semver, a_tag: &str, b: &Semver, b_tag: &str) -> Ordering {
    let a_plain = is_plain_spelling(a, a_tag);
    let b_plain = is_plain_spelling(b, b_tag);
    b_plain.cmp(&a_plain).then_with(|| a_tag.cmp(b_tag))
}

fn is_plain_spelling(version: &Semver, tag: &str) -> bool {
    let mut plain = format!("{}.{}.{}", version.major, version.minor, version.patch);
    if !version.pre.is_empty() {
        plain.push('-');
        plain.push_str(version.pre.as_str());
    }
    tag.trim() == plain
}

fn normalize_branch(branch: &str) -> Result<String, String> {
    let tokens: Vec<&str> = branch.split_whitespace().collect();
    if tokens.is_empty() {
        return Err("empty constraint".to_string());
    }

    // Hyphen range: `1.0 - 2.0`
    if tokens.len() == 3 && tokens[1] == "-" {
        return Ok(format!(">={}, <={}", strip_v(tokens[0]), strip_v(tokens[2])));
    }

    // Glue detached operators onto their version: `>= 1.0` -> `>=1.0`
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;
    for token in tokens {
        let token = token.trim_end_matches(',');
        if token.is_empty() {
            continue;
        }
        if is_operator(token) {
            pending_op = Some(token);
            continue;
        }
        let comparator = match pending_op.take() {
            Some(op) => format!("{}{}", op, strip_v(token)),
            None => strip_op_v(token),
        };
        comparators.push(comparator);
    }
    if let Some(op) = pending_op {
        return Err(format!("operator '{}' has no version", op));
    }

    // A single bare full version is an exact pin, not semver's implicit caret
    if comparators.len() == 1 && Semver::parse(&comparators[0]).is_ok() {
        return Ok(format!("={}", comparators[0]));
    }

    Ok(comparators.join(", "))
}

fn is_operator(token: &str) -> bool {
    matches!(token, "=" | ">" | ">=" | "<" | "<=" | "~" | "^")
}

fn strip_v(token: &str) -> &str {
    token
        .strip_prefix('v')
        .or_else(|| token.strip_prefix('V'))
        .unwrap_or(token)
}

/// `^v1.2` -> `^1.2`
fn strip_op_v(token: &str) -> String {
    let op_len = token
        .find(|c: char| !matches!(c, '=' | '>' | '<' | '~' | '^'))
        .unwrap_or(token.len());
    let (op, rest) = token.split_at(op_len);
    format!("{}{}", op, strip_v(rest))
}
