//! Request description types.
//!
//! A [`Request`] is an immutable description of one API call: method, URL,
//! parameters, headers, cache policy, priority and optional auto-fill spec.
//! It is built with consuming setters and handed to the queue, which owns it
//! from then on.
//!
//! ```
//! use std::time::Duration;
//! use tilbud_core::{CachePolicy, Priority, Request};
//!
//! let request = Request::get("/v2/stores")
//!     .paginate(0, 50)
//!     .filter("dealer_ids", ["d2", "d1"])
//!     .order_by(["distance", "name"])
//!     .with_priority(Priority::High)
//!     .with_ttl(Duration::from_secs(120))
//!     .with_tag("store-list-screen");
//!
//! assert_eq!(request.priority(), Priority::High);
//! assert_eq!(request.tag(), Some("store-list-screen"));
//!
//! assert_eq!(request.params().get("dealer_ids").unwrap().joined(), "d1,d2");
//! assert_eq!(request.params().get("order_by").unwrap().joined(), "distance,name");
//! assert_eq!(request.policy(), CachePolicy::CacheFirst);
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::autofill::AutoFillSpec;
use crate::key::{CacheKey, KeyPart};

/// Parameter name for the page offset of list calls.
pub const OFFSET: &str = "offset";
/// Parameter name for the page size of list calls.
pub const LIMIT: &str = "limit";
/// Parameter name for the sort order of list calls.
pub const ORDER_BY: &str = "order_by";
/// Default page offset.
pub const OFFSET_DEFAULT: u32 = 0;
/// Default page size.
pub const LIMIT_DEFAULT: u32 = 25;
/// Separator used to join collection parameters.
pub const COLLECTION_SEPARATOR: &str = ",";

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
    /// `HEAD`
    Head,
    /// `OPTIONS`
    Options,
}

impl Method {
    /// Returns the method name as sent on the wire.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// Safe methods may share one execution and one cache entry.
    pub const fn is_safe(&self) -> bool {
        matches!(self, Method::Get | Method::Head | Method::Options)
    }

    /// Methods whose parameters travel in the query string rather than the body.
    pub const fn params_in_query(&self) -> bool {
        !matches!(self, Method::Post | Method::Put)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a request interacts with the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Serve a fresh cached entry if present, otherwise fetch and store.
    #[default]
    CacheFirst,
    /// Always fetch, but store the result for later `CacheFirst` callers.
    NetworkOnly,
    /// Neither read nor write the cache.
    IgnoreCache,
}

impl CachePolicy {
    /// Whether a cached entry may satisfy the request.
    pub const fn reads_cache(&self) -> bool {
        matches!(self, CachePolicy::CacheFirst)
    }

    /// Whether a successful network result is stored.
    pub const fn writes_cache(&self) -> bool {
        matches!(self, CachePolicy::CacheFirst | CachePolicy::NetworkOnly)
    }
}

/// Scheduling priority. Higher priorities start first; ties run FIFO.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Prefetching and other background work.
    Low,
    /// Regular calls.
    #[default]
    Normal,
    /// Calls blocking visible content.
    High,
    /// Calls that must jump the whole queue.
    Immediate,
}

/// A parameter value: a single string or a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A single scalar value.
    Single(SmolStr),
    /// A collection, transmitted joined with [`COLLECTION_SEPARATOR`].
    Many(Vec<SmolStr>),
}

impl ParamValue {
    /// Returns the wire representation of the value.
    pub fn joined(&self) -> String {
        match self {
            ParamValue::Single(value) => value.to_string(),
            ParamValue::Many(values) => values
                .iter()
                .map(SmolStr::as_str)
                .collect::<Vec<_>>()
                .join(COLLECTION_SEPARATOR),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Single(SmolStr::new(value))
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Single(SmolStr::from(value))
    }
}

impl From<SmolStr> for ParamValue {
    fn from(value: SmolStr) -> Self {
        ParamValue::Single(value)
    }
}

macro_rules! param_from_number {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ParamValue {
            fn from(value: $ty) -> Self {
                ParamValue::Single(SmolStr::from(value.to_string()))
            }
        })*
    };
}

param_from_number!(u32, u64, i32, i64, usize, f64, bool);

/// A flat, sorted parameter map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params(BTreeMap<SmolStr, ParamValue>);

impl Params {
    /// Creates an empty parameter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a parameter.
    pub fn insert(&mut self, key: impl Into<SmolStr>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Inserts a collection parameter. Values are sorted and deduplicated so
    /// that equal sets always produce the same key and query string.
    pub fn insert_set<I, S>(&mut self, key: impl Into<SmolStr>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        let set: BTreeSet<SmolStr> = values.into_iter().map(Into::into).collect();
        self.0
            .insert(key.into(), ParamValue::Many(set.into_iter().collect()));
    }

    /// Returns a parameter by name.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    /// Removes a parameter.
    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.0.remove(key)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if no parameter is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Wire pairs with collections joined.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(key, value)| (key.to_string(), value.joined()))
            .collect()
    }

    /// URL-encodes the parameters (`a=1&b=x%2Cy`).
    pub fn encode(&self) -> String {
        serde_urlencoded::to_string(self.to_pairs()).unwrap_or_default()
    }

    fn key_parts(&self) -> Vec<KeyPart> {
        self.0
            .iter()
            .map(|(key, value)| KeyPart::new(key, Some(value.joined())))
            .collect()
    }
}

/// An immutable description of one API call.
///
/// Cheap to clone: the body is reference counted and the auto-fill spec
/// holds its closures behind `Arc`.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: SmolStr,
    params: Params,
    headers: Vec<(SmolStr, String)>,
    body: Option<Bytes>,
    cache_policy: CachePolicy,
    priority: Priority,
    ttl: Option<Duration>,
    stale_if_error: bool,
    tag: Option<SmolStr>,
    autofill: Option<AutoFillSpec>,
}

impl Request {
    /// Creates a request for `method` and `url`.
    ///
    /// Relative URLs are resolved against the engine's base URL on submission.
    pub fn new(method: Method, url: impl Into<SmolStr>) -> Self {
        Request {
            method,
            url: url.into(),
            params: Params::new(),
            headers: Vec::new(),
            body: None,
            cache_policy: CachePolicy::default(),
            priority: Priority::default(),
            ttl: None,
            stale_if_error: false,
            tag: None,
            autofill: None,
        }
    }

    /// Shortcut for a `GET` request.
    pub fn get(url: impl Into<SmolStr>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Shortcut for a `POST` request.
    pub fn post(url: impl Into<SmolStr>) -> Self {
        Self::new(Method::Post, url)
    }

    /// Shortcut for a `PUT` request.
    pub fn put(url: impl Into<SmolStr>) -> Self {
        Self::new(Method::Put, url)
    }

    /// Shortcut for a `DELETE` request.
    pub fn delete(url: impl Into<SmolStr>) -> Self {
        Self::new(Method::Delete, url)
    }

    /// Adds a scalar parameter.
    pub fn param(mut self, key: impl Into<SmolStr>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Adds a collection parameter, sorted and joined with a comma on the wire.
    pub fn filter<I, S>(mut self, key: impl Into<SmolStr>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.params.insert_set(key, values);
        self
    }

    /// Sets `offset` and `limit` for list calls.
    pub fn paginate(self, offset: u32, limit: u32) -> Self {
        self.param(OFFSET, offset).param(LIMIT, limit)
    }

    /// Sets default paging (`offset=0`, `limit=25`).
    pub fn default_page(self) -> Self {
        self.paginate(OFFSET_DEFAULT, LIMIT_DEFAULT)
    }

    /// Sets `order_by`; the order of the given fields is preserved.
    pub fn order_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        let fields: Vec<SmolStr> = fields.into_iter().map(Into::into).collect();
        self.params.insert(ORDER_BY, ParamValue::Many(fields));
        self
    }

    /// Adds a request header.
    pub fn header(mut self, name: impl Into<SmolStr>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets an explicit request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the cache policy.
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Sets the scheduling priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides the engine's default TTL for the stored response.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Allows serving a stale cached entry when the network finally fails.
    pub fn stale_if_error(mut self) -> Self {
        self.stale_if_error = true;
        self
    }

    /// Sets an opaque grouping tag for bulk cancellation.
    pub fn with_tag(mut self, tag: impl Into<SmolStr>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Attaches an auto-fill spec.
    pub fn with_autofill(mut self, spec: AutoFillSpec) -> Self {
        self.autofill = Some(spec);
        self
    }

    /// Resolves a relative URL against `base_url`.
    ///
    /// URLs starting with `http` are kept as they are.
    pub fn resolve(mut self, base_url: &str) -> Self {
        if !self.url.starts_with("http") {
            let base = base_url.trim_end_matches('/');
            let path = self.url.trim_start_matches('/');
            self.url = SmolStr::from(format!("{base}/{path}"));
        }
        self
    }

    /// Returns the method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the URL as given (or as resolved).
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &[(SmolStr, String)] {
        &self.headers
    }

    /// Returns the explicit body, if any.
    pub fn request_body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Returns the cache policy.
    pub fn policy(&self) -> CachePolicy {
        self.cache_policy
    }

    /// Returns the scheduling priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the TTL override.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Whether a stale entry may be served after a final network failure.
    pub fn allows_stale(&self) -> bool {
        self.stale_if_error
    }

    /// Returns the grouping tag.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Returns the auto-fill spec.
    pub fn autofill(&self) -> Option<&AutoFillSpec> {
        self.autofill.as_ref()
    }

    /// Whether this request may share an execution and a cache entry with
    /// identical requests.
    pub fn is_cacheable(&self) -> bool {
        self.method.is_safe() && self.body.is_none()
    }

    /// Computes the cache key from method, URL and parameters.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.method, &self.url, self.params.key_parts())
    }

    /// URL with the query string appended for query-carrying methods.
    pub fn url_with_query(&self) -> String {
        if self.method.params_in_query() && !self.params.is_empty() {
            let separator = if self.url.contains('?') { '&' } else { '?' };
            format!("{}{}{}", self.url, separator, self.params.encode())
        } else {
            self.url.to_string()
        }
    }
}
