//! Transport-neutral HTTP request and response
//!
//! Calling conventions never see sockets. They read an [`HttpRequest`] whose
//! body has already been received in full and write into an
//! [`HttpResponse`], which the server adapter turns into a hyper response.

use crate::element::Element;
use crate::request::FunctionRequest;
use bytes::Bytes;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Method, StatusCode};
use std::net::SocketAddr;
use std::sync::OnceLock;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// State cached for the lifetime of one request.
///
/// Conventions are shared between threads and keep no per-request fields;
/// anything they want to reuse between matching and conversion lives here.
#[derive(Debug, Default)]
pub struct RequestContext {
    /// Root element of the request body, once it has been parsed as XML.
    pub cached_element: OnceLock<Element>,
    /// Function request produced by the selected convention.
    pub cached_function_request: OnceLock<FunctionRequest>,
}

/// An inbound HTTP request with its complete body.
#[derive(Debug)]
pub struct HttpRequest {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    context: RequestContext,
}

impl HttpRequest {
    /// Creates a request from a method and a path with optional query string.
    ///
    /// # Examples
    ///
    /// ```
    /// use hyper::Method;
    /// use xins_core::http::HttpRequest;
    ///
    /// let req = HttpRequest::new(Method::GET, "/api/GetPet?output=json&id=3");
    /// assert_eq!(req.path(), "/api/GetPet");
    /// assert_eq!(req.parameter("id").as_deref(), Some("3"));
    /// ```
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (path_and_query.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
            context: RequestContext::default(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Case-insensitive header lookup. Values that are not visible ASCII are
    /// treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Whether the body carries URL-encoded form parameters.
    pub fn is_form_encoded(&self) -> bool {
        self.header(header::CONTENT_TYPE.as_str())
            .map(media_type)
            .is_some_and(|t| t.eq_ignore_ascii_case(FORM_CONTENT_TYPE))
    }

    /// All query and form parameters in the order received, duplicates
    /// included.
    pub fn parameter_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .query
            .as_deref()
            .map(|q| {
                form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        if self.method == Method::POST && self.is_form_encoded() {
            pairs.extend(form_urlencoded::parse(&self.body).into_owned());
        }
        pairs
    }

    /// First value of a query or form parameter.
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.parameter_pairs()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// First value of a query-string parameter, ignoring the body.
    pub fn query_parameter(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// Media type of a Content-Type value, without parameters.
pub fn media_type(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
}

/// An outbound HTTP response being assembled by a calling convention.
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    content_length: Option<usize>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            content_length: None,
        }
    }

    /// A response with only a status and a plain-text explanation.
    pub fn with_status(status: StatusCode, detail: &str) -> Self {
        let mut response = Self::new();
        response.set_status(status);
        if !detail.is_empty() {
            response.set_content_type("text/plain; charset=UTF-8");
            response.body.extend_from_slice(detail.as_bytes());
        }
        response
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn set_content_type(&mut self, content_type: &'static str) {
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    /// Sink the body is written to.
    pub fn sink(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Announces a body length without sending a body, as for `HEAD`.
    pub fn set_content_length(&mut self, length: usize) {
        self.content_length = Some(length);
    }

    /// The length reported to the peer.
    pub fn content_length(&self) -> usize {
        self.content_length.unwrap_or(self.body.len())
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Vec<u8>, usize) {
        let length = self.content_length.unwrap_or(self.body.len());
        (self.status, self.headers, self.body, length)
    }
}
