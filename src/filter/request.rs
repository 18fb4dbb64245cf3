//! Inbound request view consumed by the pipeline.

use std::collections::HashMap;

use http::{HeaderMap, HeaderName, HeaderValue, Method, header};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// The parts of an HTTP request the pipeline inspects.
///
/// Parameters merge the query string and, for form-encoded bodies, the body;
/// query values come first.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    method: Method,
    path: String,
    context_path: String,
    parameters: HashMap<String, Vec<String>>,
    content_type: Option<String>,
    headers: HeaderMap,
}

impl AuthRequest {
    /// Create a request with no parameters or headers.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            context_path: String::new(),
            parameters: HashMap::new(),
            content_type: None,
            headers: HeaderMap::new(),
        }
    }

    /// Build from HTTP request parts and the buffered body.
    pub fn from_parts(parts: &http::request::Parts, body: &[u8], context_path: &str) -> Self {
        let mut request = Self::new(parts.method.clone(), parts.uri.path())
            .with_context_path(context_path);
        request.headers = parts.headers.clone();
        request.content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if let Some(query) = parts.uri.query() {
            request.add_encoded_parameters(query.as_bytes());
        }
        if request.is_form() {
            request.add_encoded_parameters(body);
        }
        request
    }

    /// Set the mount point the application is served under.
    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    /// Add a single parameter value.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Add parameters from a query string such as `a=1&b=2`.
    pub fn with_query(mut self, query: &str) -> Self {
        self.add_encoded_parameters(query.as_bytes());
        self
    }

    /// Attach a form-encoded body and set the matching content type.
    pub fn with_form_body(mut self, body: &str) -> Self {
        self.content_type = Some(FORM_CONTENT_TYPE.to_string());
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(FORM_CONTENT_TYPE),
        );
        self.add_encoded_parameters(body.as_bytes());
        self
    }

    /// Add a header. Invalid header values are ignored.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            if name == header::CONTENT_TYPE {
                self.content_type = Some(value.to_str().unwrap_or_default().to_string());
            }
            self.headers.insert(name, value);
        }
        self
    }

    fn add_encoded_parameters(&mut self, encoded: &[u8]) {
        for (name, value) in url::form_urlencoded::parse(encoded) {
            self.parameters
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path, including any `;` path parameters.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get the first value of a parameter. Absent and empty are distinct.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Get all values of a parameter.
    pub fn parameter_values(&self, name: &str) -> &[String] {
        self.parameters
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether the body is form-encoded.
    pub fn is_form(&self) -> bool {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
    }
}
