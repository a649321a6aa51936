//! Cache key types and construction.
//!
//! A [`CacheKey`] identifies a logical API call independently of how the
//! caller spelled it. It is built from three components:
//!
//! 1. **Method** - `GET`, `POST`, ...
//! 2. **URL** - normalized: lowercase scheme and host, no fragment, no
//!    trailing slash, query string folded into the parts
//! 3. **Parts** - key/value pairs, sorted, so parameter order never matters
//!
//! ## Format
//!
//! When displayed, keys follow this format:
//! `{METHOD} {url}?key1=value1&key2=value2`
//!
//! ```
//! use tilbud_core::{CacheKey, KeyPart, Method};
//!
//! let a = CacheKey::new(Method::Get, "https://API.example.com/v2/stores/", vec![
//!     KeyPart::new("limit", Some("25")),
//!     KeyPart::new("dealer_ids", Some("d1,d2")),
//! ]);
//! let b = CacheKey::new(Method::Get, "https://api.example.com/v2/stores?limit=25", vec![
//!     KeyPart::new("dealer_ids", Some("d1,d2")),
//! ]);
//!
//! assert_eq!(a, b);
//! assert_eq!(
//!     a.to_string(),
//!     "GET https://api.example.com/v2/stores?dealer_ids=d1,d2&limit=25"
//! );
//! ```
//!
//! ## Performance
//!
//! [`CacheKey`] uses `Arc` internally for cheap cloning. Keys are cloned into
//! the in-flight registry, the schedule and every cache call, so copying a
//! key only increments a reference count.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::request::Method;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
struct CacheKeyInner {
    method: Method,
    url: SmolStr,
    parts: Vec<KeyPart>,
}

/// A cache key identifying a cached entry and an in-flight execution.
///
/// Two requests with the same method, the same normalized URL and the same
/// parameter set produce equal keys, regardless of parameter order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(into = "CacheKeyInner", from = "CacheKeyInner")]
pub struct CacheKey {
    inner: Arc<CacheKeyInner>,
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: same Arc pointer
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner == other.inner
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl From<CacheKeyInner> for CacheKey {
    fn from(inner: CacheKeyInner) -> Self {
        CacheKey {
            inner: Arc::new(inner),
        }
    }
}

impl From<CacheKey> for CacheKeyInner {
    fn from(key: CacheKey) -> Self {
        Arc::try_unwrap(key.inner).unwrap_or_else(|arc| (*arc).clone())
    }
}

impl CacheKey {
    /// Creates a key from a method, a URL and a set of parameter parts.
    ///
    /// The URL is normalized and any query string it carries is merged into
    /// the parts before they are sorted.
    pub fn new(method: Method, url: &str, parts: Vec<KeyPart>) -> Self {
        let (url, query) = normalize_url(url);
        let mut parts = parts;
        parts.extend(
            query
                .into_iter()
                .map(|(key, value)| KeyPart::new(key, Some(value))),
        );
        parts.sort();
        parts.dedup();
        CacheKey {
            inner: Arc::new(CacheKeyInner {
                method,
                url: SmolStr::from(url),
                parts,
            }),
        }
    }

    /// Returns the request method this key was built for.
    pub fn method(&self) -> Method {
        self.inner.method
    }

    /// Returns the normalized URL without query string.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Returns the sorted key parts.
    pub fn parts(&self) -> &[KeyPart] {
        &self.inner.parts
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.inner.method, self.inner.url)?;
        for (i, part) in self.inner.parts.iter().enumerate() {
            f.write_str(if i == 0 { "?" } else { "&" })?;
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

/// A single key-value component of a cache key.
///
/// A part without value renders as the bare key (a flag parameter).
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyPart {
    key: SmolStr,
    value: Option<SmolStr>,
}

impl KeyPart {
    /// Creates a new key part.
    pub fn new<K: AsRef<str>, V: AsRef<str>>(key: K, value: Option<V>) -> Self {
        KeyPart {
            key: SmolStr::new(key),
            value: value.map(SmolStr::new),
        }
    }

    /// Returns the part key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the part value, if any.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.key, value),
            None => f.write_str(&self.key),
        }
    }
}

/// Splits `url` into its normalized base and the decoded query pairs.
fn normalize_url(url: &str) -> (String, Vec<(String, String)>) {
    let url = url.trim();
    let url = url.split_once('#').map_or(url, |(base, _)| base);
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, query),
        None => (url, ""),
    };

    let mut normalized = match base.split_once("://") {
        Some((scheme, rest)) => {
            let (authority, path) = match rest.find('/') {
                Some(idx) => rest.split_at(idx),
                None => (rest, ""),
            };
            format!(
                "{}://{}{}",
                scheme.to_ascii_lowercase(),
                authority.to_ascii_lowercase(),
                path
            )
        }
        None => base.to_owned(),
    };
    while normalized.ends_with('/') && !normalized.ends_with("://") {
        normalized.pop();
    }

    let pairs = if query.is_empty() {
        Vec::new()
    } else {
        serde_urlencoded::from_str::<Vec<(String, String)>>(query).unwrap_or_default()
    };
    (normalized, pairs)
}
