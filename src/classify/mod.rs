//! Request classification.
//!
//! [`Classifier::classify`] is pure: it looks only at the method, the URL and
//! the `Accept` header, and decides which strategy (if any) handles the
//! request. Rules are evaluated in order:
//!
//! 1. [`Classification::Skip`]: not a GET, or cross-origin and not an
//!    allow-listed font host.
//! 2. [`Classification::Document`]: `Accept` mentions `text/html`.
//! 3. [`Classification::RuntimeStatic`]: the path ends in a script, style,
//!    image or font extension.
//! 4. [`Classification::Passthrough`]: everything else.

use url::{Origin, Url};

use crate::http::{Method, Request};

/// Extensions served cache-first, by asset group.
const SCRIPT_AND_STYLE: &[&str] = &["js", "css"];
const IMAGE: &[&str] = &["png", "jpg", "jpeg", "svg", "webp", "avif"];
const FONT: &[&str] = &["woff", "woff2", "ttf", "otf"];

/// Font hosts that may be intercepted despite being cross-origin.
pub const DEFAULT_FONT_HOSTS: &[&str] = &["fonts.googleapis.com", "fonts.gstatic.com"];

/// What the controller does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Not intercepted; the host sends it to the network untouched.
    Skip,
    /// HTML navigation, served network-first.
    Document,
    /// Static asset, served cache-first with a background refresh.
    RuntimeStatic(AssetGroup),
    /// Network, with the cache as a last resort.
    Passthrough,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Document => "document",
            Self::RuntimeStatic(_) => "runtime-static",
            Self::Passthrough => "passthrough",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetGroup {
    ScriptOrStyle,
    Image,
    Font,
}

impl AssetGroup {
    /// Matches the extension of `path`. Case-sensitive.
    pub fn for_path(path: &str) -> Option<Self> {
        let file = path.rsplit('/').next().unwrap_or(path);
        let (_, ext) = file.rsplit_once('.')?;
        if SCRIPT_AND_STYLE.contains(&ext) {
            Some(Self::ScriptOrStyle)
        } else if IMAGE.contains(&ext) {
            Some(Self::Image)
        } else if FONT.contains(&ext) {
            Some(Self::Font)
        } else {
            None
        }
    }
}

/// Classifies requests relative to the controller's own origin.
#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Origin,
    font_hosts: Vec<String>,
}

impl Classifier {
    /// A classifier for `origin` with the default font host allow-list.
    pub fn new(origin: &Url) -> Self {
        Self::with_font_hosts(origin, DEFAULT_FONT_HOSTS.iter().map(|h| h.to_string()))
    }

    pub fn with_font_hosts(origin: &Url, font_hosts: impl IntoIterator<Item = String>) -> Self {
        Self {
            origin: origin.origin(),
            font_hosts: font_hosts.into_iter().collect(),
        }
    }

    pub fn classify(&self, request: &Request) -> Classification {
        self.classify_parts(request.method(), request.url(), request.accept())
    }

    pub fn classify_parts(&self, method: &Method, url: &Url, accept: Option<&str>) -> Classification {
        if method != &Method::Get {
            return Classification::Skip;
        }
        if !self.is_same_origin(url) && !self.is_font_host(url) {
            return Classification::Skip;
        }
        if accept.is_some_and(|a| a.contains("text/html")) {
            return Classification::Document;
        }
        match AssetGroup::for_path(url.path()) {
            Some(group) => Classification::RuntimeStatic(group),
            None => Classification::Passthrough,
        }
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin
    }

    fn is_font_host(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| self.font_hosts.iter().any(|f| host.contains(f.as_str())))
    }
}
