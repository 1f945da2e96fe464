//! Subscription path patterns.
//!
//! A pattern is one of:
//! - `/`: every path
//! - `/docs/report.txt`: that path, and everything beneath it if it names a directory
//! - `/docs/*`: direct children of `docs`
//! - `/docs/**`: `docs` itself and everything beneath it
//!
//! Wildcards are only valid as the final segment.

use std::fmt;
use thiserror::Error;

/// Why a raw pattern was rejected. The message is sent back to the observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// Missing, empty or non-string path.
    #[error("Invalid subscription path")]
    Invalid,

    /// Path does not start with `/`.
    #[error("Subscription path must be absolute (start with /)")]
    NotAbsolute,

    /// `..` segments climb above the watched root.
    #[error("Subscription path attempts to access outside upload directory")]
    OutsideRoot,

    /// `*` or `**` somewhere other than the final segment.
    #[error("Wildcard pattern can only be /* or /** at the end of the path")]
    MisplacedWildcard,
}

/// A validated, normalized subscription pattern.
///
/// Bases are stored root-relative, without leading or trailing slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// `/`
    Root,
    /// `/base`
    Exact(String),
    /// `/base/*`
    Children(String),
    /// `/base/**`
    Recursive(String),
}

impl Pattern {
    /// Validate and normalize a raw pattern.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if raw.is_empty() {
            return Err(PatternError::Invalid);
        }

        let unified = raw.replace('\\', "/");
        if !unified.starts_with('/') {
            return Err(PatternError::NotAbsolute);
        }

        let (body, wildcard) = if let Some(body) = unified.strip_suffix("/**") {
            (body, Some(Wildcard::Recursive))
        } else if let Some(body) = unified.strip_suffix("/*") {
            (body, Some(Wildcard::Children))
        } else {
            (unified.as_str(), None)
        };

        if body.contains('*') {
            return Err(PatternError::MisplacedWildcard);
        }

        let mut segments: Vec<&str> = Vec::new();
        for segment in body.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(PatternError::OutsideRoot);
                    }
                }
                other => segments.push(other),
            }
        }
        let base = segments.join("/");

        Ok(match wildcard {
            Some(Wildcard::Recursive) => Pattern::Recursive(base),
            Some(Wildcard::Children) => Pattern::Children(base),
            None if base.is_empty() => Pattern::Root,
            None => Pattern::Exact(base),
        })
    }

    /// Test a root-relative event path against this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let path = normalize_event_path(path);
        match self {
            Pattern::Root => true,
            Pattern::Recursive(base) => base.is_empty() || is_self_or_descendant(&path, base),
            Pattern::Children(parent) => {
                if parent.is_empty() {
                    !path.is_empty() && !path.contains('/')
                } else {
                    parent_of(&path) == parent
                }
            }
            Pattern::Exact(base) => is_self_or_descendant(&path, base),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Root => f.write_str("/"),
            Pattern::Exact(base) => write!(f, "/{base}"),
            Pattern::Children(base) if base.is_empty() => f.write_str("/*"),
            Pattern::Children(base) => write!(f, "/{base}/*"),
            Pattern::Recursive(base) if base.is_empty() => f.write_str("/**"),
            Pattern::Recursive(base) => write!(f, "/{base}/**"),
        }
    }
}

enum Wildcard {
    Children,
    Recursive,
}

fn normalize_event_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut rest = unified.as_str();
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest.trim_start_matches('/').to_string()
}

fn is_self_or_descendant(path: &str, base: &str) -> bool {
    match path.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}
