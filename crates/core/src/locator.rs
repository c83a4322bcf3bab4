//! Source-locator normalization and parsing.
//!
//! The stored locator is always the normalized form, and the store's
//! uniqueness constraint applies to it. Normalization happens before
//! any write: lowercase scheme and host, strip one trailing slash,
//! strip a `.git` suffix.

use crate::error::{DomainError, DomainResult};

/// Normalize a source-repository locator.
///
/// Accepts `http`/`https` URLs with a host and an `owner/name`-shaped
/// path; anything else is `invalid-source` territory.
pub fn normalize(raw: &str) -> DomainResult<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DomainError::validation("source locator is empty"));
    }

    let (scheme, rest) = raw
        .split_once("://")
        .ok_or_else(|| DomainError::validation("source locator must be an absolute URL"))?;

    let scheme = scheme.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(DomainError::validation(format!(
            "unsupported scheme: {scheme}"
        )));
    }

    let (host, path) = rest
        .split_once('/')
        .ok_or_else(|| DomainError::validation("source locator has no repository path"))?;

    if host.is_empty() || host.contains('@') {
        return Err(DomainError::validation("source locator has an invalid host"));
    }

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    if path.is_empty() {
        return Err(DomainError::validation("source locator has no repository path"));
    }
    if path.split('/').any(|seg| seg.is_empty()) {
        return Err(DomainError::validation("source locator has empty path segments"));
    }

    Ok(format!("{}://{}/{}", scheme, host.to_ascii_lowercase(), path))
}

/// Repository display name: the last path segment of a normalized locator.
pub fn display_name(normalized: &str) -> &str {
    normalized.rsplit('/').next().unwrap_or(normalized)
}

/// Host of a normalized locator.
pub fn host(normalized: &str) -> Option<&str> {
    normalized.split_once("://")?.1.split('/').next()
}

/// `(owner, name)` of a normalized locator, when the path has at least
/// two segments.
pub fn owner_repo(normalized: &str) -> Option<(&str, &str)> {
    let path = normalized.split_once("://")?.1;
    let mut segments = path.split('/');
    let _host = segments.next()?;
    let owner = segments.next()?;
    let name = segments.next()?;
    Some((owner, name))
}
