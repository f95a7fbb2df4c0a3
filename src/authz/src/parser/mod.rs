//! Request classifier
//!
//! Converts an inbound `(method, path, body, metadata)` tuple into the resource attributes the
//! request acts on. Rules live in ordered groups; the first rule that matches ends the whole
//! chain, and the first error ends it too.
//!
//! ```text
//! host → user_api → user_custom → host_favorite → cloud_resource_sync
//!      → host_snapshot → object_identifier → business
//! ```
//!
//! An empty attribute list means the request needs no authorization. It is not a denial.

mod business;
mod host;

use http::Method;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{AuthzError, Result};
use crate::meta::{AuthAttribute, ResourceAttribute, UserInfo, GLOBAL_SCOPE};

/// Body field carrying the business id
pub const BUSINESS_ID_FIELD: &str = "bk_biz_id";

/// Upstream-resolved scope metadata attached to a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub label: Option<HashMap<String, String>>,
}

impl Metadata {
    /// Metadata scoped to one business
    pub fn for_business(business_id: i64) -> Self {
        let mut label = HashMap::new();
        label.insert(BUSINESS_ID_FIELD.to_string(), business_id.to_string());
        Self { label: Some(label) }
    }

    /// Business id carried in the label; a missing label or key means global scope.
    pub fn business_id(&self) -> Result<i64> {
        let Some(raw) = self.label.as_ref().and_then(|l| l.get(BUSINESS_ID_FIELD)) else {
            return Ok(GLOBAL_SCOPE);
        };

        raw.parse::<i64>().map_err(|e| {
            AuthzError::Classification(format!("invalid business id {raw:?} in metadata: {e}"))
        })
    }
}

/// Everything the classifier may look at
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,

    /// Path without query string or fragment
    pub uri: String,

    /// Non-empty path segments
    pub elements: Vec<String>,

    /// Parsed JSON body, `Null` when absent
    pub body: Value,

    pub metadata: Metadata,
}

impl RequestContext {
    /// Build a context from an already parsed body.
    ///
    /// Metadata is taken from the body's `metadata` field when present.
    pub fn new(method: Method, uri: &str, body: Value) -> Result<Self> {
        let uri = normalize_uri(uri)?;
        let elements = uri
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let metadata = match body.get("metadata") {
            Some(raw) if !raw.is_null() => serde_json::from_value(raw.clone()).map_err(|e| {
                AuthzError::Classification(format!("malformed request metadata: {e}"))
            })?,
            _ => Metadata::default(),
        };

        Ok(Self {
            method,
            uri,
            elements,
            body,
            metadata,
        })
    }

    /// Build a context from a raw request body
    pub fn from_raw(method: Method, uri: &str, body: &[u8]) -> Result<Self> {
        let body = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(body).map_err(|e| {
                AuthzError::Classification(format!("request body is not valid json: {e}"))
            })?
        };

        Self::new(method, uri, body)
    }

    /// Override metadata with a value resolved upstream
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Segment `index`, requiring exactly `expected` segments
    pub fn segment(&self, index: usize, expected: usize, operation: &str) -> Result<&str> {
        if self.elements.len() != expected || index >= expected {
            return Err(AuthzError::Classification(format!(
                "{operation}, but got invalid uri {}",
                self.uri
            )));
        }
        Ok(&self.elements[index])
    }

    /// Segment `index` parsed as a business id
    pub fn segment_business_id(&self, index: usize, expected: usize, operation: &str) -> Result<i64> {
        let raw = self.segment(index, expected, operation)?;
        business_id_from_segment(raw)
            .map_err(|e| AuthzError::Classification(format!("{operation} failed, err: {e}")))
    }

    /// Business id from the body's `bk_biz_id` field
    pub fn body_business_id(&self) -> Result<i64> {
        business_id_from_body(&self.body)
    }
}

fn normalize_uri(uri: &str) -> Result<String> {
    let path = uri.split(['?', '#']).next().unwrap_or_default();
    if !path.starts_with('/') {
        return Err(AuthzError::Classification(format!("malformed uri {uri:?}")));
    }
    Ok(path.to_string())
}

/// Business id from a JSON body.
///
/// An absent field means global scope. A field that is present but zero, or not an
/// integer, is an error.
pub fn business_id_from_body(body: &Value) -> Result<i64> {
    let Some(raw) = body.get(BUSINESS_ID_FIELD) else {
        return Ok(GLOBAL_SCOPE);
    };

    let id = match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    match id {
        Some(id) if id != 0 => Ok(id),
        _ => Err(AuthzError::Classification(format!(
            "invalid {BUSINESS_ID_FIELD} value {raw}"
        ))),
    }
}

/// Business id from a base-10 path segment
pub fn business_id_from_segment(segment: &str) -> Result<i64> {
    segment.parse::<i64>().map_err(|e| {
        AuthzError::Classification(format!("invalid business id {segment:?} in uri: {e}"))
    })
}

type Build = fn(&RequestContext) -> Result<Vec<ResourceAttribute>>;

enum PathMatcher {
    Exact(&'static str),
    Pattern(Regex),
}

/// One `(method, path) → attributes` rule
pub struct Rule {
    method: Method,
    path: PathMatcher,
    build: Build,
}

impl Rule {
    /// Rule matching one exact path
    pub fn exact(method: Method, path: &'static str, build: Build) -> Self {
        Self {
            method,
            path: PathMatcher::Exact(path),
            build,
        }
    }

    /// Rule matching a compiled pattern
    pub fn pattern(method: Method, pattern: &str, build: Build) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| AuthzError::Config(format!("invalid rule pattern {pattern}: {e}")))?;
        Ok(Self {
            method,
            path: PathMatcher::Pattern(regex),
            build,
        })
    }

    fn hit(&self, ctx: &RequestContext) -> bool {
        if ctx.method != self.method {
            return false;
        }
        match &self.path {
            PathMatcher::Exact(path) => ctx.uri == *path,
            PathMatcher::Pattern(regex) => regex.is_match(&ctx.uri),
        }
    }
}

/// A group of rules tried in order
pub trait RuleGroup: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(Some(..))` on the first matching rule, `Ok(None)` when nothing matched
    fn classify(&self, ctx: &RequestContext) -> Result<Option<Vec<ResourceAttribute>>>;
}

/// Rule group backed by a rule table
pub struct RuleSet {
    name: &'static str,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(name: &'static str, rules: Vec<Rule>) -> Self {
        Self { name, rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleGroup for RuleSet {
    fn name(&self) -> &'static str {
        self.name
    }

    fn classify(&self, ctx: &RequestContext) -> Result<Option<Vec<ResourceAttribute>>> {
        match self.rules.iter().find(|rule| rule.hit(ctx)) {
            Some(rule) => (rule.build)(ctx).map(Some),
            None => Ok(None),
        }
    }
}

/// Ordered chain of rule groups
pub struct Classifier {
    groups: Vec<Box<dyn RuleGroup>>,
}

impl Classifier {
    /// Classifier with the default rule chain
    pub fn new() -> Result<Self> {
        let groups: Vec<Box<dyn RuleGroup>> = vec![
            Box::new(host::host()?),
            Box::new(host::user_api()?),
            Box::new(host::user_custom()),
            Box::new(host::host_favorite()?),
            Box::new(host::cloud_resource_sync()),
            Box::new(host::host_snapshot()?),
            Box::new(host::object_identifier()?),
            Box::new(business::business()?),
        ];
        Ok(Self::with_groups(groups))
    }

    /// Classifier with a caller-supplied chain
    pub fn with_groups(groups: Vec<Box<dyn RuleGroup>>) -> Self {
        Self { groups }
    }

    /// Names of the groups in evaluation order
    pub fn group_names(&self) -> Vec<&'static str> {
        self.groups.iter().map(|g| g.name()).collect()
    }

    /// Resource attributes the request acts on
    pub fn classify(&self, ctx: &RequestContext) -> Result<Vec<ResourceAttribute>> {
        for group in &self.groups {
            match group.classify(ctx) {
                Ok(Some(resources)) => {
                    debug!(
                        group = group.name(),
                        method = %ctx.method,
                        uri = %ctx.uri,
                        count = resources.len(),
                        "request classified"
                    );
                    return Ok(resources);
                }
                Ok(None) => continue,
                Err(e) => {
                    debug!(group = group.name(), uri = %ctx.uri, error = %e, "classification failed");
                    return Err(e);
                }
            }
        }

        debug!(method = %ctx.method, uri = %ctx.uri, "no rule matched");
        Ok(Vec::new())
    }

    /// Classify and bind the result to a user
    pub fn parse(&self, user: UserInfo, ctx: &RequestContext) -> Result<AuthAttribute> {
        Ok(AuthAttribute::new(user, self.classify(ctx)?))
    }
}
