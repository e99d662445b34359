//! Calling conventions
//!
//! A calling convention adapts one wire format to function requests and
//! results. Every HTTP request goes through the same steps:
//!
//! 1. [`ManagedConvention::matches_request`] - cheap check whether the
//!    convention understands the request; never fails.
//! 2. [`ManagedConvention::convert_request`] - produce a [`FunctionRequest`].
//! 3. The engine invokes the function.
//! 4. [`ManagedConvention::convert_result`] - write the result as HTTP.
//!
//! Conventions are shared between all request threads. They must not keep
//! per-request state in their own fields; the [`RequestContext`] of the
//! request is the place for that.
//!
//! [`RequestContext`]: crate::http::RequestContext

pub mod json;
pub mod standard;
pub mod xml;

pub use json::JsonCallingConvention;
pub use standard::StandardCallingConvention;
pub use xml::XmlCallingConvention;

use crate::element::Element;
use crate::function::FunctionSpec;
use crate::http::{HttpRequest, HttpResponse, media_type};
use crate::request::{FunctionRequest, RESERVED_PARAMETER};
use crate::result::{FunctionResult, Parameters};
use crate::result_parser::ParseError;
use hyper::header::{self, HeaderValue};
use hyper::{Method, StatusCode};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, error};
use xins_config::Config;

/// Value of the `Server` header set on every converted result.
pub const SERVER_HEADER: &str = concat!("XINS/", env!("CARGO_PKG_VERSION"));

/// Request parameter naming the convention explicitly.
pub const CONVENTION_PARAMETER: &str = "_convention";

/// Everything that can go wrong while converting a request or a result.
#[derive(Debug, thiserror::Error)]
pub enum ConventionError {
    /// The caller sent something the convention cannot accept.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no function specified")]
    FunctionNotSpecified,
    #[error("failed to convert request: {0}")]
    ConvertRequest(String),
    /// Writing the result failed after the function already ran.
    #[error("failed to convert result: {detail}")]
    ConvertResult {
        detail: String,
        #[source]
        source: Option<std::io::Error>,
    },
    #[error("parse failure: {0}")]
    Parse(#[from] ParseError),
    /// A convention implementation misbehaved.
    #[error("programming error: {0}")]
    Programming(String),
}

impl ConventionError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            ConventionError::InvalidRequest(_) | ConventionError::Parse(_) => {
                StatusCode::BAD_REQUEST
            }
            ConventionError::FunctionNotSpecified => StatusCode::NOT_FOUND,
            ConventionError::ConvertRequest(_)
            | ConventionError::ConvertResult { .. }
            | ConventionError::Programming(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn io(detail: &str, source: std::io::Error) -> Self {
        ConventionError::ConvertResult {
            detail: detail.to_string(),
            source: Some(source),
        }
    }
}

/// The hooks a wire format implements.
pub trait CallingConvention: Send + Sync {
    /// Name used with the `_convention` parameter, e.g. `_xins-std`.
    fn name(&self) -> &'static str;

    /// HTTP methods the convention accepts. `OPTIONS` is handled before any
    /// convention is consulted and is never listed here.
    fn supported_methods(&self) -> Vec<Method> {
        vec![Method::HEAD, Method::GET, Method::POST]
    }

    /// Methods accepted for one particular request.
    fn supported_methods_for(&self, _request: &HttpRequest) -> Vec<Method> {
        self.supported_methods()
    }

    /// Whether this convention understands the request. Must be cheap and
    /// must not change anything except the request's own context.
    fn matches(&self, request: &HttpRequest) -> Result<bool, ConventionError>;

    fn convert_request_impl(&self, request: &HttpRequest)
    -> Result<FunctionRequest, ConventionError>;

    fn convert_result_impl(
        &self,
        request: &HttpRequest,
        function_request: &FunctionRequest,
        response: &mut HttpResponse,
        result: &FunctionResult,
        spec: Option<&FunctionSpec>,
    ) -> Result<(), ConventionError>;
}

const STATE_UNINITIALIZED: u8 = 0;
const STATE_USABLE: u8 = 1;
const STATE_DEINITIALIZED: u8 = 2;

/// A convention together with its lifecycle state.
///
/// This wrapper enforces the contract around the hooks: matching never
/// fails, expected conversion errors pass through, anything else is
/// escalated as a programming error.
pub struct ManagedConvention {
    inner: Box<dyn CallingConvention>,
    state: AtomicU8,
}

impl ManagedConvention {
    pub fn new(inner: Box<dyn CallingConvention>) -> Self {
        Self {
            inner,
            state: AtomicU8::new(STATE_UNINITIALIZED),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn init(&self) {
        self.state.store(STATE_USABLE, Ordering::Release);
        debug!("Calling convention {} initialized", self.name());
    }

    pub fn deinit(&self) {
        self.state.store(STATE_DEINITIALIZED, Ordering::Release);
        debug!("Calling convention {} deinitialized", self.name());
    }

    pub fn is_usable(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_USABLE
    }

    pub fn supported_methods(&self, request: &HttpRequest) -> Vec<Method> {
        self.inner.supported_methods_for(request)
    }

    /// Whether the convention can handle the request.
    ///
    /// `OPTIONS` requests are let through so the capability check can run.
    /// Errors and panics from the hook count as "no match".
    pub fn matches_request(&self, request: &HttpRequest) -> bool {
        if !self.is_usable() {
            return false;
        }
        let method = request.method();
        if *method != Method::OPTIONS && !self.supported_methods(request).contains(method) {
            return false;
        }

        match catch_unwind(AssertUnwindSafe(|| self.inner.matches(request))) {
            Ok(Ok(matched)) => matched,
            Ok(Err(e)) => {
                debug!("Calling convention {} failed to match request: {}", self.name(), e);
                false
            }
            Err(_) => {
                debug!("Calling convention {} panicked while matching request", self.name());
                false
            }
        }
    }

    /// Converts the request and stores the result in the request context.
    ///
    /// A request is converted at most once; later calls return the stored
    /// function request.
    pub fn convert_request<'r>(
        &self,
        request: &'r HttpRequest,
    ) -> Result<&'r FunctionRequest, ConventionError> {
        self.assert_usable()?;
        let cache = &request.context().cached_function_request;
        if let Some(cached) = cache.get() {
            return Ok(cached);
        }

        let converted = catch_unwind(AssertUnwindSafe(|| self.inner.convert_request_impl(request)));
        let function_request = match converted {
            Ok(Ok(function_request)) => function_request,
            Ok(Err(
                e @ (ConventionError::InvalidRequest(_)
                | ConventionError::FunctionNotSpecified
                | ConventionError::ConvertRequest(_)),
            )) => return Err(e),
            Ok(Err(e)) => {
                return Err(self.programming_error(format!(
                    "unexpected error converting request: {}",
                    e
                )));
            }
            Err(_) => {
                return Err(self.programming_error("panic while converting request".to_string()));
            }
        };

        if function_request.function_name().is_empty() {
            return Err(
                self.programming_error("converted request has an empty function name".to_string())
            );
        }

        Ok(cache.get_or_init(|| function_request))
    }

    /// Writes the function result into the response.
    pub fn convert_result(
        &self,
        request: &HttpRequest,
        function_request: &FunctionRequest,
        response: &mut HttpResponse,
        result: &FunctionResult,
        spec: Option<&FunctionSpec>,
    ) -> Result<(), ConventionError> {
        self.assert_usable()?;
        response.set_header(header::SERVER, HeaderValue::from_static(SERVER_HEADER));

        let converted = catch_unwind(AssertUnwindSafe(|| {
            self.inner
                .convert_result_impl(request, function_request, response, result, spec)
        }));
        match converted {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e @ ConventionError::ConvertResult { .. })) => Err(e),
            Ok(Err(e)) => Err(self.programming_error(format!(
                "unexpected error converting result: {}",
                e
            ))),
            Err(_) => Err(self.programming_error("panic while converting result".to_string())),
        }
    }

    fn assert_usable(&self) -> Result<(), ConventionError> {
        if self.is_usable() {
            Ok(())
        } else {
            Err(self.programming_error("calling convention is not usable".to_string()))
        }
    }

    fn programming_error(&self, detail: String) -> ConventionError {
        error!("Calling convention {}: {}", self.name(), detail);
        ConventionError::Programming(format!("{}: {}", self.name(), detail))
    }
}

impl std::fmt::Debug for ManagedConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConvention")
            .field("name", &self.name())
            .field("usable", &self.is_usable())
            .finish()
    }
}

/// Collects all query and form parameters into a flat map.
///
/// A name given twice with different values is an invalid request; repeats
/// with the same value collapse into one entry.
pub fn gather_params(request: &HttpRequest) -> Result<Parameters, ConventionError> {
    let mut params = Parameters::new();
    for (name, value) in request.parameter_pairs() {
        match params.get(&name) {
            Some(existing) if *existing != value => {
                return Err(ConventionError::InvalidRequest(format!(
                    "Found multiple values for the parameter \"{}\".",
                    name
                )));
            }
            Some(_) => {}
            None => {
                params.insert(name, value);
            }
        }
    }
    Ok(params)
}

/// Removes entries that must never reach a function: empty names or values,
/// the reserved `function` name and `_`-prefixed framework parameters.
pub fn clean_up_parameters(params: &mut Parameters) {
    params.retain(|name, value| {
        !name.is_empty()
            && !value.is_empty()
            && name != RESERVED_PARAMETER
            && !name.starts_with('_')
    });
}

/// Parses the request body as XML and returns its root element.
///
/// The parsed element is cached in the request context, so matching and
/// conversion parse the body only once. With `check_content_type`, a body
/// that is not `text/xml` is rejected before anything is cached.
pub fn parse_xml_request(
    request: &HttpRequest,
    check_content_type: bool,
) -> Result<&Element, ConventionError> {
    if check_content_type {
        match request.header(header::CONTENT_TYPE.as_str()) {
            None => {
                return Err(ConventionError::InvalidRequest(
                    "No content type set.".to_string(),
                ));
            }
            Some(content_type) if !media_type(content_type).eq_ignore_ascii_case("text/xml") => {
                return Err(ConventionError::InvalidRequest(format!(
                    "Incorrect content type \"{}\".",
                    content_type
                )));
            }
            Some(_) => {}
        }
    }

    let cache = &request.context().cached_element;
    if let Some(element) = cache.get() {
        return Ok(element);
    }

    let body = std::str::from_utf8(request.body()).map_err(|e| {
        ConventionError::InvalidRequest(format!("Request body is not valid UTF-8: {}", e))
    })?;
    if body.trim().is_empty() {
        return Err(ConventionError::InvalidRequest(
            "Empty request body.".to_string(),
        ));
    }
    let element = Element::parse(body)
        .map_err(|e| ConventionError::InvalidRequest(format!("Unable to parse request: {}", e)))?;
    Ok(cache.get_or_init(|| element))
}

/// Parses an embedded data section, which must be rooted at `data`.
pub(crate) fn parse_data_section(xml: &str) -> Result<Element, ConventionError> {
    let element = Element::parse(xml).map_err(|e| {
        ConventionError::InvalidRequest(format!("Unable to parse the data section: {}", e))
    })?;
    if element.local_name() != "data" {
        return Err(ConventionError::InvalidRequest(format!(
            "The data section must be a \"data\" element, found \"{}\".",
            element.local_name()
        )));
    }
    Ok(element)
}

/// The set of active conventions and the rules for picking one.
#[derive(Debug)]
pub struct ConventionManager {
    conventions: Vec<ManagedConvention>,
    default_name: String,
}

impl ConventionManager {
    /// Registers and initializes the conventions enabled in `config`.
    pub fn from_config(config: &Config) -> Self {
        let mut candidates: Vec<Box<dyn CallingConvention>> =
            vec![Box::new(StandardCallingConvention::new())];
        if config.convention_enabled(xml::NAME) {
            candidates.push(Box::new(XmlCallingConvention::new()));
        }
        if config.convention_enabled(json::NAME) {
            candidates.push(Box::new(JsonCallingConvention::new()));
        }
        Self::new(candidates, config.default_convention())
    }

    pub fn new(conventions: Vec<Box<dyn CallingConvention>>, default_name: &str) -> Self {
        let conventions: Vec<ManagedConvention> =
            conventions.into_iter().map(ManagedConvention::new).collect();
        for convention in &conventions {
            convention.init();
        }
        Self {
            conventions,
            default_name: default_name.to_string(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ManagedConvention> {
        self.conventions.iter().find(|c| c.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.conventions.iter().map(|c| c.name()).collect()
    }

    /// Picks the convention for a request.
    ///
    /// An explicit `_convention` parameter wins. Otherwise the default
    /// convention is tried first, then the others in registration order.
    pub fn select(&self, request: &HttpRequest) -> Result<&ManagedConvention, ConventionError> {
        if let Some(name) = request.parameter(CONVENTION_PARAMETER).filter(|n| !n.is_empty()) {
            let convention = self.get(&name).ok_or_else(|| {
                ConventionError::InvalidRequest(format!("Unknown calling convention \"{}\".", name))
            })?;
            if !convention.matches_request(request) {
                return Err(ConventionError::InvalidRequest(format!(
                    "The calling convention \"{}\" cannot handle this request.",
                    name
                )));
            }
            return Ok(convention);
        }

        if let Some(default) = self.get(&self.default_name)
            && default.matches_request(request)
        {
            return Ok(default);
        }

        self.conventions
            .iter()
            .filter(|c| c.name() != self.default_name)
            .find(|c| c.matches_request(request))
            .ok_or_else(|| {
                ConventionError::InvalidRequest(
                    "No calling convention matches the request.".to_string(),
                )
            })
    }

    /// Methods any usable convention accepts for the request, plus `OPTIONS`.
    pub fn allowed_methods(&self, request: &HttpRequest) -> Vec<Method> {
        let mut methods = vec![Method::OPTIONS];
        for convention in self.conventions.iter().filter(|c| c.is_usable()) {
            for method in convention.supported_methods(request) {
                if !methods.contains(&method) {
                    methods.push(method);
                }
            }
        }
        methods
    }

    pub fn shutdown(&self) {
        for convention in &self.conventions {
            convention.deinit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::CallResultData;
    use hyper::header::HeaderValue;

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    struct Panicky;

    impl CallingConvention for Panicky {
        fn name(&self) -> &'static str {
            "_panicky"
        }

        fn matches(&self, _request: &HttpRequest) -> Result<bool, ConventionError> {
            panic!("matches blew up");
        }

        fn convert_request_impl(
            &self,
            _request: &HttpRequest,
        ) -> Result<FunctionRequest, ConventionError> {
            Err(ConventionError::ConvertResult {
                detail: "wrong kind".to_string(),
                source: None,
            })
        }

        fn convert_result_impl(
            &self,
            _request: &HttpRequest,
            _function_request: &FunctionRequest,
            _response: &mut HttpResponse,
            _result: &FunctionResult,
            _spec: Option<&FunctionSpec>,
        ) -> Result<(), ConventionError> {
            Err(ConventionError::InvalidRequest("too late".to_string()))
        }
    }

    struct Fixed {
        function: &'static str,
    }

    impl CallingConvention for Fixed {
        fn name(&self) -> &'static str {
            "_fixed"
        }

        fn supported_methods(&self) -> Vec<Method> {
            vec![Method::POST]
        }

        fn matches(&self, _request: &HttpRequest) -> Result<bool, ConventionError> {
            Ok(true)
        }

        fn convert_request_impl(
            &self,
            _request: &HttpRequest,
        ) -> Result<FunctionRequest, ConventionError> {
            Ok(FunctionRequest::new(self.function, Parameters::new(), None))
        }

        fn convert_result_impl(
            &self,
            _request: &HttpRequest,
            _function_request: &FunctionRequest,
            response: &mut HttpResponse,
            _result: &FunctionResult,
            _spec: Option<&FunctionSpec>,
        ) -> Result<(), ConventionError> {
            response.sink().extend_from_slice(b"ok");
            Ok(())
        }
    }

    #[test]
    fn test_gather_params_duplicates() {
        let same = HttpRequest::new(Method::GET, "/?a=1&a=1&b=2");
        let gathered = gather_params(&same).unwrap();
        assert_eq!(gathered, params(&[("a", "1"), ("b", "2")]));

        let conflicting = HttpRequest::new(Method::GET, "/?a=1&a=2");
        assert!(matches!(
            gather_params(&conflicting),
            Err(ConventionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_clean_up_parameters() {
        let mut p = params(&[
            ("function", "x"),
            ("_function", "Echo"),
            ("_data", "<data/>"),
            ("empty", ""),
            ("", "nameless"),
            ("keep", "1"),
        ]);
        clean_up_parameters(&mut p);
        assert_eq!(p, params(&[("keep", "1")]));
    }

    #[test]
    fn test_parse_xml_request_content_type() {
        let missing = HttpRequest::new(Method::POST, "/").with_body("<request/>");
        assert!(parse_xml_request(&missing, true).is_err());
        assert!(missing.context().cached_element.get().is_none());

        let wrong = HttpRequest::new(Method::POST, "/")
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body("<request/>");
        assert!(parse_xml_request(&wrong, true).is_err());
        assert!(wrong.context().cached_element.get().is_none());

        // Content type not checked: body parsed and cached
        assert_eq!(parse_xml_request(&wrong, false).unwrap().local_name(), "request");
        assert!(wrong.context().cached_element.get().is_some());
    }

    #[test]
    fn test_parse_xml_request_cached() {
        let req = HttpRequest::new(Method::POST, "/")
            .with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("Text/XML; charset=UTF-8"),
            )
            .with_body("<request function=\"Echo\"/>");
        let first = parse_xml_request(&req, true).unwrap() as *const Element;
        let second = parse_xml_request(&req, true).unwrap() as *const Element;
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_xml_request_malformed() {
        let req = HttpRequest::new(Method::POST, "/")
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/xml"))
            .with_body("<request>");
        assert!(matches!(
            parse_xml_request(&req, true),
            Err(ConventionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_unusable_convention_never_matches() {
        let convention = ManagedConvention::new(Box::new(Fixed { function: "Echo" }));
        let req = HttpRequest::new(Method::POST, "/");
        assert!(!convention.matches_request(&req));
        assert!(matches!(
            convention.convert_request(&req),
            Err(ConventionError::Programming(_))
        ));

        convention.init();
        assert!(convention.matches_request(&req));
        convention.deinit();
        assert!(!convention.matches_request(&req));
    }

    #[test]
    fn test_method_filter() {
        let convention = ManagedConvention::new(Box::new(Fixed { function: "Echo" }));
        convention.init();
        assert!(!convention.matches_request(&HttpRequest::new(Method::GET, "/")));
        assert!(!convention.matches_request(&HttpRequest::new(Method::PUT, "/")));
        assert!(convention.matches_request(&HttpRequest::new(Method::OPTIONS, "/")));
    }

    #[test]
    fn test_panicking_match_is_no_match() {
        let convention = ManagedConvention::new(Box::new(Panicky));
        convention.init();
        assert!(!convention.matches_request(&HttpRequest::new(Method::GET, "/")));
    }

    #[test]
    fn test_unexpected_errors_escalated() {
        let convention = ManagedConvention::new(Box::new(Panicky));
        convention.init();
        let req = HttpRequest::new(Method::GET, "/");
        assert!(matches!(
            convention.convert_request(&req),
            Err(ConventionError::Programming(_))
        ));

        let fr = FunctionRequest::new("Echo", Parameters::new(), None);
        let mut response = HttpResponse::new();
        let err = convention
            .convert_result(&req, &fr, &mut response, &CallResultData::success(), None)
            .unwrap_err();
        assert!(matches!(err, ConventionError::Programming(_)));
        assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_empty_function_name_is_programming_error() {
        let convention = ManagedConvention::new(Box::new(Fixed { function: "" }));
        convention.init();
        let req = HttpRequest::new(Method::POST, "/");
        assert!(matches!(
            convention.convert_request(&req),
            Err(ConventionError::Programming(_))
        ));
    }

    #[test]
    fn test_convert_caches_function_request_and_sets_server_header() {
        let convention = ManagedConvention::new(Box::new(Fixed { function: "Echo" }));
        convention.init();
        let req = HttpRequest::new(Method::POST, "/");
        let fr = convention.convert_request(&req).unwrap();
        assert_eq!(
            req.context().cached_function_request.get().map(|f| f.function_name()),
            Some("Echo")
        );
        let again = convention.convert_request(&req).unwrap();
        assert!(std::ptr::eq(fr, again));

        let mut response = HttpResponse::new();
        convention
            .convert_result(&req, &fr, &mut response, &CallResultData::success(), None)
            .unwrap();
        assert_eq!(response.header("server"), Some(SERVER_HEADER));
        assert_eq!(response.body(), b"ok");
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ConventionError::InvalidRequest(String::new()).http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ConventionError::FunctionNotSpecified.http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ConventionError::Programming(String::new()).http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_manager_selection() {
        let manager = ConventionManager::new(
            vec![
                Box::new(StandardCallingConvention::new()),
                Box::new(JsonCallingConvention::new()),
            ],
            "_xins-std",
        );

        let std_req = HttpRequest::new(Method::GET, "/?_function=Echo");
        assert_eq!(manager.select(&std_req).unwrap().name(), "_xins-std");

        let json_req = HttpRequest::new(Method::GET, "/api/Echo?output=json");
        assert_eq!(manager.select(&json_req).unwrap().name(), "_xins-json");

        let explicit = HttpRequest::new(Method::GET, "/api/Echo?output=json&_convention=_xins-json");
        assert_eq!(manager.select(&explicit).unwrap().name(), "_xins-json");

        let unknown = HttpRequest::new(Method::GET, "/?_function=Echo&_convention=_xins-soap");
        assert!(manager.select(&unknown).is_err());

        let mismatch = HttpRequest::new(Method::GET, "/?_function=Echo&_convention=_xins-json");
        assert!(manager.select(&mismatch).is_err());

        let nothing = HttpRequest::new(Method::GET, "/");
        assert!(matches!(
            manager.select(&nothing),
            Err(ConventionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_allowed_methods() {
        let manager = ConventionManager::new(
            vec![
                Box::new(StandardCallingConvention::new()),
                Box::new(XmlCallingConvention::new()),
            ],
            "_xins-std",
        );
        let methods = manager.allowed_methods(&HttpRequest::new(Method::OPTIONS, "/"));
        assert_eq!(
            methods,
            vec![Method::OPTIONS, Method::HEAD, Method::GET, Method::POST]
        );

        manager.shutdown();
        assert_eq!(
            manager.allowed_methods(&HttpRequest::new(Method::OPTIONS, "/")),
            vec![Method::OPTIONS]
        );
    }
}
