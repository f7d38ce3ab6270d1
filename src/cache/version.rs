//! Bucket naming and version rollover.
//!
//! A bucket is named `"<app>-v<N>"`. Bumping `N` is the only way to invalidate
//! cached entries: on the next activation every bucket that is not the current
//! one (and falls inside the cleanup scope) is deleted.

use std::fmt;

/// The name of a versioned cache bucket.
///
/// ```
/// use offline_cache::cache::version::{BucketName, CleanupScope};
///
/// let current = BucketName::new("copycash", 2);
/// assert_eq!(current.to_string(), "copycash-v2");
/// assert!(current.is_current("copycash-v2"));
/// assert!(current.is_superseded("copycash-v1", &CleanupScope::All));
/// assert!(!current.is_superseded("copycash-v2", &CleanupScope::All));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketName {
    app: String,
    version: u32,
    rendered: String,
}

impl BucketName {
    pub fn new(app: impl Into<String>, version: u32) -> Self {
        let app = app.into();
        let rendered = format!("{app}-v{version}");
        Self {
            app,
            version,
            rendered,
        }
    }

    /// Recovers app and version from a `"<app>-v<N>"` name.
    pub fn parse(name: &str) -> Option<Self> {
        let (app, version) = name.rsplit_once("-v")?;
        if app.is_empty() || version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self::new(app, version.parse().ok()?))
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// The next version of the same bucket.
    pub fn bumped(&self) -> Self {
        Self::new(self.app.clone(), self.version.saturating_add(1))
    }

    pub fn is_current(&self, name: &str) -> bool {
        self.rendered == name
    }

    /// Whether an activation should delete the bucket called `name`.
    pub fn is_superseded(&self, name: &str, scope: &CleanupScope) -> bool {
        !self.is_current(name) && scope.covers(name)
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl AsRef<str> for BucketName {
    fn as_ref(&self) -> &str {
        &self.rendered
    }
}

/// Which bucket names an activation may delete.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CleanupScope {
    /// Every bucket other than the current one.
    #[default]
    All,
    /// Only buckets whose name starts with the prefix, leaving buckets owned
    /// by other code on the same origin alone.
    Prefix(String),
}

impl CleanupScope {
    pub fn covers(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}
