//! Input identity normalization
//!
//! The canonical form (`host/owner/repo`, or `host/group/.../repo` on hosts
//! with nested groups, lower-case) is the cache key, so every spelling of the
//! same repository must map to the same string.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

const DEFAULT_HOST: &str = "github.com";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("repository reference is empty")]
    Empty,
    #[error("unsupported scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),
    #[error("cannot parse repository reference: {0}")]
    Malformed(String),
    #[error("repository reference must name an owner and a repository: {0}")]
    MissingPath(String),
}

/// Canonical repository identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputIdentity(String);

impl InputIdentity {
    /// Parses and canonicalizes a repository reference.
    ///
    /// Accepts `https://host/owner/repo[.git]`, `git@host:owner/repo.git` and
    /// `owner/repo` (resolved against GitHub).
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IdentityError::Empty);
        }

        let (host, path) = if let Some(rest) = raw.strip_prefix("git@") {
            let (host, path) = rest
                .split_once(':')
                .ok_or_else(|| IdentityError::Malformed(raw.to_string()))?;
            (host.to_string(), path.to_string())
        } else if raw.contains("://") {
            let url = Url::parse(raw).map_err(|e| IdentityError::Malformed(e.to_string()))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(IdentityError::UnsupportedScheme(url.scheme().to_string()));
            }
            let host = url
                .host_str()
                .ok_or_else(|| IdentityError::Malformed(raw.to_string()))?
                .to_string();
            (host, url.path().to_string())
        } else if raw.split('/').next().is_some_and(|first| first.contains('.')) {
            // host/owner/repo without a scheme
            let (host, path) = raw
                .split_once('/')
                .ok_or_else(|| IdentityError::MissingPath(raw.to_string()))?;
            (host.to_string(), path.to_string())
        } else {
            (DEFAULT_HOST.to_string(), raw.to_string())
        };

        let host = host.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(IdentityError::Malformed(raw.to_string()));
        }

        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        // GitHub repositories are always owner/repo; other hosts nest groups
        // and mark deep links with a `-` segment.
        let project: Vec<&str> = if host == DEFAULT_HOST {
            segments.into_iter().take(2).collect()
        } else {
            segments.into_iter().take_while(|s| *s != "-").collect()
        };

        let Some((last, parents)) = project.split_last() else {
            return Err(IdentityError::MissingPath(raw.to_string()));
        };
        let repo = last.strip_suffix(".git").unwrap_or(*last);
        if parents.is_empty()
            || !parents.iter().all(|s| is_valid_segment(s))
            || !is_valid_segment(repo)
        {
            return Err(IdentityError::MissingPath(raw.to_string()));
        }

        let mut canonical = host.to_string();
        for segment in parents.iter().copied().chain(std::iter::once(repo)) {
            canonical.push('/');
            canonical.push_str(&segment.to_ascii_lowercase());
        }
        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps an already-canonical identity loaded from storage
    pub fn from_canonical(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for InputIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
