//! Request and response abstractions the version engine operates on.
//!
//! A request carries a method, path, query string, headers and an optional
//! client identity. A response carries a status, headers and a body. HTTP
//! adapters convert to and from these at the edge.

use http::header::{HeaderName, HeaderValue, HOST, LOCATION};
use http::{HeaderMap, Method, StatusCode};
use tracing::debug;

/// An inbound API request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    client: Option<String>,
}

impl ApiRequest {
    /// Create a request from a method and a path with an optional query string.
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (uri, None),
        };

        Self {
            method,
            path: normalize_path(path),
            query: query.filter(|q| !q.is_empty()),
            headers: HeaderMap::new(),
            client: None,
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Add a header. Invalid names or values are dropped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        insert_header(&mut self.headers, name, value);
        self
    }

    /// Set the client identity used for rate limiting (user id or address).
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Normalized path, always starting with `/` and without a trailing slash.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First value of a decoded query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn client(&self) -> Option<&str> {
        self.client.as_deref()
    }

    /// Host from the `Host` header, without the port.
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(|h| h.split(':').next().unwrap_or(h))
    }

    /// Non-empty path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }
}

/// An outbound API response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: String::new(),
        }
    }

    /// 200 with a plain body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(StatusCode::OK).with_body(body)
    }

    /// A JSON response.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self::new(status)
            .with_body(serde_json::to_string(value).unwrap_or_default())
            .with_header("Content-Type", "application/json")
    }

    /// The bare 404 a router produces when no route matches.
    pub fn not_found() -> Self {
        Self::json(
            StatusCode::NOT_FOUND,
            &serde_json::json!({ "message": "Not Found" }),
        )
    }

    /// A `302 Found` redirect.
    pub fn redirect(location: &str) -> Self {
        Self::new(StatusCode::FOUND).with_header(LOCATION.as_str(), location)
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header, replacing any existing value.
    pub fn set_header(&mut self, name: &str, value: &str) {
        insert_header(&mut self.headers, name, value);
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parse the body as JSON.
    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => debug!(header = %name, "Dropping invalid header"),
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{}", trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parsing() {
        let request = ApiRequest::get("/api/v1/users/?page=2&api_version=v2")
            .with_header("X-API-Version", "v3")
            .with_header("Host", "api.example.com:8080");

        assert_eq!(request.path(), "/api/v1/users");
        assert_eq!(request.query_string(), Some("page=2&api_version=v2"));
        assert_eq!(request.query_param("api_version").as_deref(), Some("v2"));
        assert_eq!(request.query_param("missing"), None);
        assert_eq!(request.header("x-api-version"), Some("v3"));
        assert_eq!(request.host(), Some("api.example.com"));
        assert_eq!(
            request.segments().collect::<Vec<_>>(),
            vec!["api", "v1", "users"]
        );
    }

    #[test]
    fn test_empty_query_is_none() {
        let request = ApiRequest::get("/api/v1/users?");
        assert_eq!(request.query_string(), None);
    }

    #[test]
    fn test_response_headers() {
        let response = ApiResponse::ok("hello")
            .with_header("X-API-Version", "v1")
            .with_header("Bad Header", "x");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.header("x-api-version"), Some("v1"));
        assert!(!response.has_header("Bad Header"));
        assert_eq!(response.body(), "hello");
    }

    #[test]
    fn test_redirect() {
        let response = ApiResponse::redirect("/api/v1/users?page=2");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.header("Location"), Some("/api/v1/users?page=2"));
    }
}
