//! Registry reference parsing
//!
//! References follow `host/repository:tag`. The host is everything before the
//! first `/`, the tag is everything after the last `:` of the remainder, and
//! the repository may itself contain `/`.

use crate::error::{FetchError, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub host: String,
    pub repository: String,
    pub tag: String,
}

impl Reference {
    pub fn parse(reference: &str) -> Result<Self> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(FetchError::malformed(reference, "empty reference"));
        }

        let slash = match trimmed.find('/') {
            Some(pos) if pos > 0 => pos,
            _ => return Err(FetchError::malformed(reference, "missing registry host")),
        };
        let host = &trimmed[..slash];
        let remainder = &trimmed[slash + 1..];

        let colon = match remainder.rfind(':') {
            Some(pos) if pos > 0 && pos < remainder.len() - 1 => pos,
            _ => return Err(FetchError::malformed(reference, "must include a tag")),
        };

        Ok(Self {
            host: host.to_string(),
            repository: remainder[..colon].to_string(),
            tag: remainder[colon + 1..].to_string(),
        })
    }

    /// Same repository and tag served from another host
    pub fn with_host(&self, host: &str) -> Self {
        Self {
            host: host.to_string(),
            repository: self.repository.clone(),
            tag: self.tag.clone(),
        }
    }
}

impl FromStr for Reference {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        Reference::parse(s)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.host, self.repository, self.tag)
    }
}

/// Swap the host segment of `reference` for `host`.
///
/// Returns the input unchanged when `host` is blank, when it already is the
/// reference's host, or when the reference cannot be parsed.
pub fn substitute_host(reference: &str, host: &str) -> String {
    let host = host.trim();
    if host.is_empty() {
        return reference.to_string();
    }
    match Reference::parse(reference) {
        Ok(parsed) if parsed.host == host => reference.to_string(),
        Ok(parsed) => parsed.with_host(host).to_string(),
        Err(_) => reference.to_string(),
    }
}
