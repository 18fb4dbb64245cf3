//! Request matchers deciding whether the pipeline applies to a request.
//!
//! Matchers are pure predicates: no side effects, safe to call repeatedly and
//! concurrently, and they answer `false` rather than failing on malformed input.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, header};

use crate::filter::request::AuthRequest;

/// Predicate over an inbound request.
pub trait RequestMatcher: Send + Sync {
    fn matches(&self, request: &AuthRequest) -> bool;
}

impl<F> RequestMatcher for F
where
    F: Fn(&AuthRequest) -> bool + Send + Sync,
{
    fn matches(&self, request: &AuthRequest) -> bool {
        self(request)
    }
}

/// Extracts URI template variables from a request.
pub trait RequestVariablesExtractor {
    /// The template variables, or an empty map when the request does not match.
    fn extract_uri_template_variables(&self, request: &AuthRequest) -> HashMap<String, String>;
}

/// Drop `;` path parameters so they cannot be used to slip past a suffix match.
fn strip_path_parameters(uri: &str) -> &str {
    match uri.find(';') {
        Some(index) if index > 0 => &uri[..index],
        _ => uri,
    }
}

/// Matches requests whose path ends with `path`, relative to the mount point.
#[derive(Debug, Clone)]
pub struct PathSuffixMatcher {
    path: String,
}

impl PathSuffixMatcher {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl RequestMatcher for PathSuffixMatcher {
    fn matches(&self, request: &AuthRequest) -> bool {
        let uri = strip_path_parameters(request.path());
        let context_path = request.context_path();

        if context_path.is_empty() {
            return uri.ends_with(&self.path);
        }
        uri.ends_with(&format!("{}{}", context_path, self.path))
    }
}

/// Path suffix match that additionally requires a `client_id` parameter.
///
/// Without one it answers `false`, leaving the request to another rule such
/// as HTTP Basic.
#[derive(Debug, Clone)]
pub struct ClientCredentialsRequestMatcher {
    path: PathSuffixMatcher,
}

impl ClientCredentialsRequestMatcher {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: PathSuffixMatcher::new(path),
        }
    }
}

impl RequestMatcher for ClientCredentialsRequestMatcher {
    fn matches(&self, request: &AuthRequest) -> bool {
        if request.parameter("client_id").is_none() {
            return false;
        }
        self.path.matches(request)
    }
}

/// Path suffix match that additionally requires `Authorization: Basic`.
#[derive(Debug, Clone)]
pub struct BasicAuthRequestMatcher {
    path: PathSuffixMatcher,
}

impl BasicAuthRequestMatcher {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: PathSuffixMatcher::new(path),
        }
    }
}

impl RequestMatcher for BasicAuthRequestMatcher {
    fn matches(&self, request: &AuthRequest) -> bool {
        let is_basic = request
            .header(&header::AUTHORIZATION)
            .and_then(|value| value.get(..6))
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("basic "));
        is_basic && self.path.matches(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
    Wildcard,
    Rest,
}

/// Matches paths against a template such as `/clients/{client_id}/secret`,
/// optionally restricted to one method.
///
/// `{name}` captures one segment, `*` matches one segment, and a trailing
/// `**` matches any remainder. The template is relative to the context path.
#[derive(Debug, Clone)]
pub struct PathTemplateMatcher {
    template: String,
    segments: Vec<Segment>,
    method: Option<Method>,
}

impl PathTemplateMatcher {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let segments = template
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == "**" {
                    Segment::Rest
                } else if s == "*" {
                    Segment::Wildcard
                } else if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Segment::Variable(name.to_string())
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();

        Self {
            template,
            segments,
            method: None,
        }
    }

    /// Only match requests using `method`.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    fn capture(&self, request: &AuthRequest) -> Option<HashMap<String, String>> {
        if let Some(method) = &self.method
            && method != request.method()
        {
            return None;
        }

        let uri = strip_path_parameters(request.path());
        let relative = uri.strip_prefix(request.context_path())?;
        let parts: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();

        let mut variables = HashMap::new();
        let mut index = 0;
        for segment in &self.segments {
            match segment {
                Segment::Rest => return Some(variables),
                Segment::Wildcard => {
                    parts.get(index)?;
                }
                Segment::Literal(expected) => {
                    if parts.get(index) != Some(&expected.as_str()) {
                        return None;
                    }
                }
                Segment::Variable(name) => {
                    let value = parts.get(index)?;
                    variables.insert(name.clone(), (*value).to_string());
                }
            }
            index += 1;
        }

        (index == parts.len()).then_some(variables)
    }
}

impl RequestMatcher for PathTemplateMatcher {
    fn matches(&self, request: &AuthRequest) -> bool {
        self.capture(request).is_some()
    }
}

impl RequestVariablesExtractor for PathTemplateMatcher {
    fn extract_uri_template_variables(&self, request: &AuthRequest) -> HashMap<String, String> {
        self.capture(request).unwrap_or_default()
    }
}

/// Matches every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyRequestMatcher;

impl RequestMatcher for AnyRequestMatcher {
    fn matches(&self, _request: &AuthRequest) -> bool {
        true
    }
}

/// Matches when any of the wrapped matchers does.
#[derive(Clone, Default)]
pub struct OrRequestMatcher {
    matchers: Vec<Arc<dyn RequestMatcher>>,
}

impl OrRequestMatcher {
    pub fn new(matchers: Vec<Arc<dyn RequestMatcher>>) -> Self {
        Self { matchers }
    }

    pub fn or(mut self, matcher: impl RequestMatcher + 'static) -> Self {
        self.matchers.push(Arc::new(matcher));
        self
    }
}

impl RequestMatcher for OrRequestMatcher {
    fn matches(&self, request: &AuthRequest) -> bool {
        self.matchers.iter().any(|m| m.matches(request))
    }
}
