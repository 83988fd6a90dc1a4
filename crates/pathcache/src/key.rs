//! Cache key composition from request attributes.
//!
//! A [`KeySpec`] names which attributes participate in a key, in what order,
//! and how each one is resolved: a literal value, a resolver invoked at build
//! time, or omitted entirely. Building the same spec against the same logical
//! inputs always yields the same [`FullKey`] string, which is what lets an
//! exact-match key-value store behave as a whole cache.
//!
//! Segments are joined with `/`. Raw attribute values are percent-encoded so
//! the separator (and the `;` used to join multi-valued attributes) can never
//! leak into a segment and blur a prefix boundary.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Separator between key segments.
pub const KEY_SEPARATOR: char = '/';

/// Segment rendered for an attribute whose value is absent.
///
/// Deliberately not the empty string: "attribute not provided" and
/// "attribute present but empty" must produce distinct keys.
pub const ABSENT_SEGMENT: &str = "None";

/// Key produced when every attribute is omitted. Identifies "everything":
/// invalidating it clears the whole cache.
///
/// Escaped segments can never equal this token, because a `%` in a raw value
/// is always encoded as `%25`.
pub const ROOT_KEY: &str = "%root%";

/// The closed set of request attributes a cache key can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribute {
    /// Request path.
    Path,
    /// HTTP method.
    Method,
    /// Authenticated user identity.
    User,
    /// Selected request header values.
    Headers,
    /// Selected query parameter values.
    Get,
    /// Selected form parameter values.
    Post,
    /// Selected body field values.
    Json,
}

impl Attribute {
    /// Default key order: path/method/user/headers/get/post/json.
    pub const DEFAULT_ORDER: [Attribute; 7] = [
        Attribute::Path,
        Attribute::Method,
        Attribute::User,
        Attribute::Headers,
        Attribute::Get,
        Attribute::Post,
        Attribute::Json,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::Path => "path",
            Attribute::Method => "method",
            Attribute::User => "user",
            Attribute::Headers => "headers",
            Attribute::Get => "get",
            Attribute::Post => "post",
            Attribute::Json => "json",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resolved attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// A single value.
    One(String),
    /// A sequence of values, rendered in the order supplied. The caller is
    /// responsible for using a consistent order between cache population and
    /// invalidation.
    Many(Vec<String>),
    /// No value provided. Renders as [`ABSENT_SEGMENT`].
    Absent,
}

impl AttributeValue {
    /// Render this value as a single key segment.
    pub(crate) fn to_segment(&self) -> String {
        match self {
            AttributeValue::One(value) => escape_segment(value),
            AttributeValue::Many(values) => values
                .iter()
                .map(|v| escape_segment(v))
                .collect::<Vec<_>>()
                .join(";"),
            AttributeValue::Absent => ABSENT_SEGMENT.to_string(),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::One(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::One(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(values: Vec<String>) -> Self {
        AttributeValue::Many(values)
    }
}

impl From<Vec<&str>> for AttributeValue {
    fn from(values: Vec<&str>) -> Self {
        AttributeValue::Many(values.into_iter().map(String::from).collect())
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => AttributeValue::Absent,
        }
    }
}

/// Percent-encode the characters that would break segment boundaries.
///
/// `%` must be encoded first so decoding stays unambiguous; `/` is the segment
/// separator and `;` joins multi-valued attributes.
fn escape_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            ';' => out.push_str("%3B"),
            _ => out.push(c),
        }
    }
    out
}

/// A lazily invoked attribute resolver.
///
/// Invoked at key build time, never at spec construction time, so one spec can
/// produce per-caller keys (current user, current request path, ...).
pub type AttributeResolver =
    dyn Fn() -> Result<AttributeValue, Box<dyn std::error::Error + Send + Sync>> + Send + Sync;

/// How a single attribute contributes to the key.
#[derive(Clone)]
pub enum AttributeSource {
    /// A literal value fixed when the spec is constructed.
    Value(AttributeValue),
    /// A resolver invoked at build time.
    Resolver(Arc<AttributeResolver>),
    /// Attribute dropped from the key entirely, for both building and
    /// invalidation.
    Omit,
}

impl Default for AttributeSource {
    fn default() -> Self {
        AttributeSource::Value(AttributeValue::Absent)
    }
}

impl fmt::Debug for AttributeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeSource::Value(value) => f.debug_tuple("Value").field(value).finish(),
            AttributeSource::Resolver(_) => f.write_str("Resolver(..)"),
            AttributeSource::Omit => f.write_str("Omit"),
        }
    }
}

impl AttributeSource {
    /// Resolve to a rendered segment; `None` when omitted.
    fn resolve(&self, attribute: Attribute) -> Result<Option<String>, CacheError> {
        match self {
            AttributeSource::Value(value) => Ok(Some(value.to_segment())),
            AttributeSource::Resolver(resolve) => match resolve() {
                Ok(value) => Ok(Some(value.to_segment())),
                Err(e) => Err(CacheError::Resolver {
                    attribute,
                    message: e.to_string(),
                }),
            },
            AttributeSource::Omit => Ok(None),
        }
    }

    fn is_omitted(&self) -> bool {
        matches!(self, AttributeSource::Omit)
    }
}

/// Ordered, closed configuration for one family of cache keys.
///
/// The same spec (same sources, same order) must be used both to build keys
/// and later to build any prefix used for invalidation; a mismatched spec
/// produces keys that silently never match.
///
/// # Example
///
/// ```rust,ignore
/// use pathcache::{Attribute, AttributeValue, KeySpec};
///
/// let spec = KeySpec::new()
///     .path("/messages")
///     .method("GET")
///     .resolver(Attribute::User, || Ok(AttributeValue::One(current_user())))
///     .get(vec!["sent", "1"]);
///
/// let key = spec.build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct KeySpec {
    /// Source for the request path.
    pub path: AttributeSource,
    /// Source for the HTTP method.
    pub method: AttributeSource,
    /// Source for the user identity.
    pub user: AttributeSource,
    /// Source for header values.
    pub headers: AttributeSource,
    /// Source for query parameter values.
    pub get: AttributeSource,
    /// Source for form parameter values.
    pub post: AttributeSource,
    /// Source for body field values.
    pub json: AttributeSource,
    /// Custom attribute order. Attributes not listed are appended in the
    /// default order; duplicates keep their first occurrence.
    pub parameter_order: Option<Vec<Attribute>>,
}

impl KeySpec {
    /// Create a spec with every attribute absent and the default order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a literal value for an attribute.
    pub fn value(mut self, attribute: Attribute, value: impl Into<AttributeValue>) -> Self {
        *self.source_mut(attribute) = AttributeSource::Value(value.into());
        self
    }

    /// Set a resolver for an attribute, invoked at each build.
    pub fn resolver<F>(mut self, attribute: Attribute, resolve: F) -> Self
    where
        F: Fn() -> Result<AttributeValue, Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        *self.source_mut(attribute) = AttributeSource::Resolver(Arc::new(resolve));
        self
    }

    /// Drop an attribute from the key entirely.
    pub fn omit(mut self, attribute: Attribute) -> Self {
        *self.source_mut(attribute) = AttributeSource::Omit;
        self
    }

    /// Set a literal request path.
    pub fn path(self, value: impl Into<AttributeValue>) -> Self {
        self.value(Attribute::Path, value)
    }

    /// Set a literal HTTP method.
    pub fn method(self, value: impl Into<AttributeValue>) -> Self {
        self.value(Attribute::Method, value)
    }

    /// Set a literal user identity.
    pub fn user(self, value: impl Into<AttributeValue>) -> Self {
        self.value(Attribute::User, value)
    }

    /// Set literal header values.
    pub fn headers(self, value: impl Into<AttributeValue>) -> Self {
        self.value(Attribute::Headers, value)
    }

    /// Set literal query parameter values.
    pub fn get(self, value: impl Into<AttributeValue>) -> Self {
        self.value(Attribute::Get, value)
    }

    /// Set literal form parameter values.
    pub fn post(self, value: impl Into<AttributeValue>) -> Self {
        self.value(Attribute::Post, value)
    }

    /// Set literal body field values.
    pub fn json(self, value: impl Into<AttributeValue>) -> Self {
        self.value(Attribute::Json, value)
    }

    /// Set a custom attribute order.
    pub fn parameter_order(mut self, order: impl IntoIterator<Item = Attribute>) -> Self {
        self.parameter_order = Some(order.into_iter().collect());
        self
    }

    fn source(&self, attribute: Attribute) -> &AttributeSource {
        match attribute {
            Attribute::Path => &self.path,
            Attribute::Method => &self.method,
            Attribute::User => &self.user,
            Attribute::Headers => &self.headers,
            Attribute::Get => &self.get,
            Attribute::Post => &self.post,
            Attribute::Json => &self.json,
        }
    }

    fn source_mut(&mut self, attribute: Attribute) -> &mut AttributeSource {
        match attribute {
            Attribute::Path => &mut self.path,
            Attribute::Method => &mut self.method,
            Attribute::User => &mut self.user,
            Attribute::Headers => &mut self.headers,
            Attribute::Get => &mut self.get,
            Attribute::Post => &mut self.post,
            Attribute::Json => &mut self.json,
        }
    }

    /// The order attributes contribute to the key, omissions excluded.
    pub fn effective_order(&self) -> Vec<Attribute> {
        let listed = self.parameter_order.as_deref().unwrap_or(&[]);
        let mut order: Vec<Attribute> = Vec::with_capacity(Attribute::DEFAULT_ORDER.len());
        for &attribute in listed.iter().chain(Attribute::DEFAULT_ORDER.iter()) {
            if !order.contains(&attribute) {
                order.push(attribute);
            }
        }
        order.retain(|&attribute| !self.source(attribute).is_omitted());
        order
    }

    /// Build the full cache key, invoking resolvers as needed.
    ///
    /// A resolver failure aborts the build; no partial key escapes.
    pub fn build(&self) -> Result<FullKey, CacheError> {
        let mut segments = Vec::new();
        for attribute in self.effective_order() {
            if let Some(segment) = self.source(attribute).resolve(attribute)? {
                segments.push(segment);
            }
        }
        let key = FullKey::from_segments(segments);
        tracing::debug!(key = %key, "built cache key");
        Ok(key)
    }

    /// Build a prefix key pinning a leading run of attributes.
    ///
    /// Trailing attributes without a pinned value are left unconstrained. A
    /// value for an attribute that follows an unpinned one, or for an omitted
    /// attribute, is a spec mismatch the builder can detect and rejects.
    pub fn build_prefix(&self, values: &PrefixValues) -> Result<PrefixKey, CacheError> {
        for (attribute, _) in values.entries() {
            if self.source(*attribute).is_omitted() {
                return Err(CacheError::KeySpec(format!(
                    "value supplied for omitted attribute {attribute}"
                )));
            }
        }

        let order = self.effective_order();
        let mut segments = Vec::with_capacity(order.len());
        let mut stopped = false;
        for &attribute in &order {
            match values.value_of(attribute) {
                Some(value) if !stopped => segments.push(value.to_segment()),
                Some(_) => {
                    return Err(CacheError::KeySpec(format!(
                        "value for {attribute} follows an unpinned attribute; \
                         prefixes must pin a leading run of the key order"
                    )));
                }
                None => stopped = true,
            }
        }

        let complete = segments.len() == order.len();
        Ok(PrefixKey { segments, complete })
    }
}

/// Values pinning the leading attributes of a prefix key.
#[derive(Debug, Clone, Default)]
pub struct PrefixValues {
    values: Vec<(Attribute, AttributeValue)>,
}

impl PrefixValues {
    /// Create an empty set of pinned values (matches every key).
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin an attribute to a value. Setting the same attribute twice keeps
    /// the last value.
    pub fn set(mut self, attribute: Attribute, value: impl Into<AttributeValue>) -> Self {
        let value = value.into();
        match self.values.iter_mut().find(|(a, _)| *a == attribute) {
            Some(entry) => entry.1 = value,
            None => self.values.push((attribute, value)),
        }
        self
    }

    /// Pin the request path.
    pub fn path(self, value: impl Into<AttributeValue>) -> Self {
        self.set(Attribute::Path, value)
    }

    /// Pin the HTTP method.
    pub fn method(self, value: impl Into<AttributeValue>) -> Self {
        self.set(Attribute::Method, value)
    }

    /// Pin the user identity.
    pub fn user(self, value: impl Into<AttributeValue>) -> Self {
        self.set(Attribute::User, value)
    }

    /// Pin header values.
    pub fn headers(self, value: impl Into<AttributeValue>) -> Self {
        self.set(Attribute::Headers, value)
    }

    /// Pin query parameter values.
    pub fn get(self, value: impl Into<AttributeValue>) -> Self {
        self.set(Attribute::Get, value)
    }

    /// Pin form parameter values.
    pub fn post(self, value: impl Into<AttributeValue>) -> Self {
        self.set(Attribute::Post, value)
    }

    /// Pin body field values.
    pub fn json(self, value: impl Into<AttributeValue>) -> Self {
        self.set(Attribute::Json, value)
    }

    /// Whether no attribute is pinned.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn value_of(&self, attribute: Attribute) -> Option<&AttributeValue> {
        self.values
            .iter()
            .find(|(a, _)| *a == attribute)
            .map(|(_, value)| value)
    }

    fn entries(&self) -> impl Iterator<Item = &(Attribute, AttributeValue)> {
        self.values.iter()
    }
}

/// A complete cache key identifying exactly one cached value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FullKey {
    /// The joined key string handed to the store.
    key: String,
    /// The segments that make up the key.
    segments: Vec<String>,
}

impl FullKey {
    pub(crate) fn from_segments(segments: Vec<String>) -> Self {
        if segments.is_empty() {
            return Self {
                key: ROOT_KEY.to_string(),
                segments: vec![ROOT_KEY.to_string()],
            };
        }
        let mut key = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(segment);
        }
        Self { key, segments }
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Get the key segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for FullKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// A key prefix pinning a leading run of attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixKey {
    segments: Vec<String>,
    complete: bool,
}

impl PrefixKey {
    /// Get the pinned segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True when every attribute of the spec is pinned, so the prefix names
    /// exactly one key.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Convert a complete prefix into the full key it names.
    pub(crate) fn into_full_key(self) -> FullKey {
        FullKey::from_segments(self.segments)
    }
}
