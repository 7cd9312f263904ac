//! Call-site origin classification.
//!
//! The innermost retained frame's link decides which code issued a call:
//! the observed page itself, a third-party script, or the monitor's own
//! package.
//!
//! # Classification Strategy
//!
//! 1. **Origin prefix** - link starts with the page origin
//!    - `https://app.example.com/js/main.js:1:1` → same-origin
//! 2. **Package scheme** - link starts with the host package scheme
//!    - `extension://abcdef/content.js:3:9` → host-package
//! 3. **URL scheme** - any other `scheme://` link
//!    - `https://cdn.other.net/lib.js:1:1` → external
//! 4. Anything else (synthetic tags, bare paths) → unknown
//!
//! The package scheme is itself a URL scheme, so it is checked before the
//! generic scheme pattern.

use callscope_common::CallSiteDomain;
use regex::Regex;
use std::sync::LazyLock;

/// Default scheme prefix of the monitor's own package.
pub const DEFAULT_PACKAGE_SCHEME: &str = "extension://";

static URL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").expect("valid scheme pattern"));

/// Prefixes that decide a link's domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginRules {
    /// Origin of the observed program, e.g. `https://app.example.com`
    pub origin: Option<String>,
    pub package_scheme: String,
}

impl Default for OriginRules {
    fn default() -> Self {
        Self { origin: None, package_scheme: DEFAULT_PACKAGE_SCHEME.to_owned() }
    }
}

impl OriginRules {
    /// Classify a frame link.
    ///
    /// # Examples
    ///
    /// ```
    /// use callscope::classification::OriginRules;
    /// use callscope_common::CallSiteDomain;
    ///
    /// let rules = OriginRules {
    ///     origin: Some("https://app.example.com".to_owned()),
    ///     ..OriginRules::default()
    /// };
    /// assert_eq!(rules.classify("https://app.example.com/a.js:1:1"), CallSiteDomain::SameOrigin);
    /// assert_eq!(rules.classify("https://cdn.net/b.js:2:2"), CallSiteDomain::External);
    /// ```
    #[must_use]
    pub fn classify(&self, link: &str) -> CallSiteDomain {
        if self.origin.as_deref().is_some_and(|origin| !origin.is_empty() && link.starts_with(origin))
        {
            return CallSiteDomain::SameOrigin;
        }
        if !self.package_scheme.is_empty() && link.starts_with(&self.package_scheme) {
            return CallSiteDomain::HostPackage;
        }
        if URL_SCHEME.is_match(link) {
            return CallSiteDomain::External;
        }
        CallSiteDomain::Unknown
    }
}
