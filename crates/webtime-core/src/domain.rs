//! Domain value object and locator classification.
//!
//! A [`Domain`] is the unit of time attribution: the host-name portion of a
//! URL, lower-cased, with a leading `www.` removed.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{DomainError, DomainResult};

/// URL schemes that carry regular web content. Everything else is either a
/// host-internal page (settings, extensions, new tab) or not a page at all.
const WEB_SCHEMES: &[&str] = &["http", "https"];

/// Prefix removed from host names before attribution.
const WWW_PREFIX: &str = "www.";

// ============================================================================
// Domain
// ============================================================================

/// Normalised host name that time is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    /// Parses user input (a bare host, or something URL-shaped) into a domain.
    ///
    /// Accepts `"News.Example"`, `"https://www.news.example/path"` and
    /// `"news.example:8080"`; all three yield `news.example`.
    pub fn parse(input: &str) -> DomainResult<Self> {
        let cleaned = strip_decorations(input);
        let host = cleaned
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();
        let host = host.split(':').next().unwrap_or_default();

        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidDomain {
                input: input.to_string(),
            });
        }

        Ok(Self(host.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `host` is this domain or one of its subdomains.
    pub fn covers_host(&self, host: &str) -> bool {
        let host = host.strip_prefix(WWW_PREFIX).unwrap_or(host);
        host == self.0
            || host
                .strip_suffix(self.0.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lower-cases and trims user input, removing scheme, `www.` and trailing `/`.
pub(crate) fn strip_decorations(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    let without_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    let without_www = without_scheme
        .strip_prefix(WWW_PREFIX)
        .unwrap_or(without_scheme);
    without_www.trim_end_matches('/').to_string()
}

// ============================================================================
// Locator Classification
// ============================================================================

/// What a tab's URL means for tracking purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Regular web page; time is attributed to the domain.
    Trackable(Domain),
    /// Host-internal page (`chrome://`, `about:`, extension pages, ...).
    Internal,
    /// Empty locator or a blank new tab.
    Empty,
}

impl Locator {
    /// Classifies a raw URL reported by the host.
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::Empty;
        }

        let Ok(url) = Url::parse(raw) else {
            return Self::Internal;
        };

        if !WEB_SCHEMES.contains(&url.scheme()) {
            return match url.as_str() {
                "about:blank" | "about:newtab" => Self::Empty,
                _ => Self::Internal,
            };
        }

        match url.host_str() {
            Some(host) if !host.is_empty() => {
                let host = host.strip_prefix(WWW_PREFIX).unwrap_or(host);
                Self::Trackable(Domain(host.to_string()))
            }
            _ => Self::Empty,
        }
    }

    /// Returns the domain when the locator is trackable.
    pub fn domain(&self) -> Option<&Domain> {
        match self {
            Self::Trackable(domain) => Some(domain),
            Self::Internal | Self::Empty => None,
        }
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Trackable(_) => "trackable",
            Self::Internal => "internal",
            Self::Empty => "empty",
        }
    }
}
