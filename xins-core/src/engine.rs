//! Request dispatch
//!
//! The [`Engine`] turns one complete [`HttpRequest`] into one
//! [`HttpResponse`]: select a convention, convert the request, invoke the
//! function, convert the result. It is synchronous and shared between all
//! connections.

use crate::api::{Api, ApiError};
use crate::convention::{ConventionError, ConventionManager};
use crate::http::{HttpRequest, HttpResponse};
use hyper::header::{self, HeaderValue};
use hyper::{Method, StatusCode};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Instant;
use tracing::{debug, info, warn};
use xins_config::Config;

/// Convention label used when no convention was selected.
const NO_CONVENTION: &str = "none";

struct EngineMetrics {
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
}

impl EngineMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new(
                "xins_requests_total",
                "Total number of handled requests by calling convention and outcome",
            ),
            &["convention", "outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "xins_request_duration_seconds",
                "Time spent handling a request, from convention selection to the written result",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["convention"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            requests_total,
            request_duration,
        })
    }

    fn record(&self, convention: &str, outcome: &str, start: Instant) {
        self.requests_total
            .with_label_values(&[convention, outcome])
            .inc();
        self.request_duration
            .with_label_values(&[convention])
            .observe(start.elapsed().as_secs_f64());
    }
}

/// How a request ended, as reported in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    ErrorCode,
    Options,
    InvalidRequest,
    NoSuchFunction,
    Failure,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::ErrorCode => "error_code",
            Outcome::Options => "options",
            Outcome::InvalidRequest => "invalid_request",
            Outcome::NoSuchFunction => "no_such_function",
            Outcome::Failure => "failure",
        }
    }

    fn of(error: &ConventionError) -> Self {
        if error.http_status().is_client_error() {
            Outcome::InvalidRequest
        } else {
            Outcome::Failure
        }
    }
}

pub struct Engine {
    api: Api,
    conventions: ConventionManager,
    metrics: Option<EngineMetrics>,
}

impl Engine {
    /// Builds an engine with the conventions enabled in `config`.
    pub fn new(config: &Config, api: Api, registry: Option<&Registry>) -> Result<Self, prometheus::Error> {
        Self::with_conventions(ConventionManager::from_config(config), api, registry)
    }

    pub fn with_conventions(
        conventions: ConventionManager,
        api: Api,
        registry: Option<&Registry>,
    ) -> Result<Self, prometheus::Error> {
        let metrics = registry.map(EngineMetrics::new).transpose()?;
        info!(
            "API {} ready with conventions {:?} and functions {:?}",
            api.name(),
            conventions.names(),
            api.function_names()
        );
        Ok(Self {
            api,
            conventions,
            metrics,
        })
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn conventions(&self) -> &ConventionManager {
        &self.conventions
    }

    /// Handles one request from start to finish.
    pub fn handle(&self, request: HttpRequest) -> HttpResponse {
        let start = Instant::now();
        let (convention, outcome, response) = self.dispatch(&request);
        debug!(
            "{} {} via {} -> {} ({})",
            request.method(),
            request.path(),
            convention,
            response.status(),
            outcome.as_str()
        );
        if let Some(metrics) = &self.metrics {
            metrics.record(convention, outcome.as_str(), start);
        }
        response
    }

    fn dispatch(&self, request: &HttpRequest) -> (&'static str, Outcome, HttpResponse) {
        if *request.method() == Method::OPTIONS {
            return (NO_CONVENTION, Outcome::Options, self.options(request));
        }

        let convention = match self.conventions.select(request) {
            Ok(convention) => convention,
            Err(e) => return (NO_CONVENTION, Outcome::of(&e), error_response(&e)),
        };
        let name = convention.name();

        let function_request = match convention.convert_request(request) {
            Ok(function_request) => function_request,
            Err(e) => return (name, Outcome::of(&e), error_response(&e)),
        };

        let result = match self.api.invoke(function_request) {
            Ok(result) => result,
            Err(e @ ApiError::NoSuchFunction(_)) => {
                let response = HttpResponse::with_status(StatusCode::NOT_FOUND, &e.to_string());
                return (name, Outcome::NoSuchFunction, response);
            }
            Err(e) => {
                warn!("Unexpected registry error: {}", e);
                let response =
                    HttpResponse::with_status(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
                return (name, Outcome::Failure, response);
            }
        };

        let spec = self.api.spec(function_request.function_name());
        let mut response = HttpResponse::new();
        if let Err(e) =
            convention.convert_result(request, function_request, &mut response, &result, spec)
        {
            return (name, Outcome::of(&e), error_response(&e));
        }

        let outcome = if result.is_success() {
            Outcome::Success
        } else {
            Outcome::ErrorCode
        };
        (name, outcome, response)
    }

    fn options(&self, request: &HttpRequest) -> HttpResponse {
        let allowed = self
            .conventions
            .allowed_methods(request)
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        let mut response = HttpResponse::new();
        match HeaderValue::from_str(&allowed) {
            Ok(value) => response.set_header(header::ALLOW, value),
            Err(e) => warn!("Unable to build Allow header from {:?}: {}", allowed, e),
        }
        response.set_content_length(0);
        response
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("api", &self.api)
            .field("conventions", &self.conventions)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

fn error_response(error: &ConventionError) -> HttpResponse {
    let status = error.http_status();
    if status.is_server_error() {
        warn!("Request failed: {}", error);
    } else {
        debug!("Request rejected: {}", error);
    }
    HttpResponse::with_status(status, &error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FnFunction;
    use crate::function::{FunctionSpec, ParamSpec, ParamType};
    use crate::result::CallResultData;
    use hyper::header::HeaderValue;
    use prometheus::{Encoder, TextEncoder};

    fn config() -> Config {
        Config::parse(
            r#"
listen_addrs: ["127.0.0.1:0"]
api_name: "test"
timeouts:
  request_read: 5
  idle: 60
metrics:
  enabled: false
  address: "127.0.0.1:0"
"#,
        )
        .unwrap()
    }

    fn engine(registry: Option<&Registry>) -> Engine {
        let api = Api::new("test")
            .with_function(FnFunction::new(
                FunctionSpec::new("Echo")
                    .input(ParamSpec::required("text", ParamType::Text))
                    .output(ParamSpec::optional("text", ParamType::Text)),
                |req| {
                    CallResultData::success()
                        .with_param("text", req.parameter("text").unwrap_or_default())
                },
            ))
            .unwrap();
        Engine::new(&config(), api, registry).unwrap()
    }

    fn body(response: &HttpResponse) -> String {
        String::from_utf8(response.body().to_vec()).unwrap()
    }

    #[test]
    fn test_standard_call() {
        let response = engine(None).handle(HttpRequest::new(
            Method::GET,
            "/?_function=Echo&text=hello",
        ));
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(&response).ends_with(r#"<result><param name="text">hello</param></result>"#));
    }

    #[test]
    fn test_json_call() {
        let response = engine(None).handle(HttpRequest::new(
            Method::GET,
            "/test/Echo?output=json&text=hello",
        ));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(&response), r#"{"text":"hello"}"#);
    }

    #[test]
    fn test_xml_call() {
        let request = HttpRequest::new(Method::POST, "/")
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/xml"))
            .with_body(r#"<request function="Echo"><param name="text">hi</param></request>"#);
        let response = engine(None).handle(request);
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(&response).contains(r#"<param name="text">hi</param>"#));
    }

    #[test]
    fn test_function_error_is_http_ok() {
        let response = engine(None).handle(HttpRequest::new(Method::GET, "/?_function=Echo"));
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(&response).contains(r#"errorcode="_InvalidRequest""#));
    }

    #[test]
    fn test_unknown_function_is_not_found() {
        let response = engine(None).handle(HttpRequest::new(Method::GET, "/?_function=Nope"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_no_matching_convention() {
        let response = engine(None).handle(HttpRequest::new(Method::GET, "/"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_options() {
        let response = engine(None).handle(HttpRequest::new(Method::OPTIONS, "/"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.header("allow"), Some("OPTIONS, HEAD, GET, POST"));
        assert_eq!(response.content_length(), 0);
    }

    #[test]
    fn test_metrics_recorded() {
        let registry = Registry::new();
        let engine = engine(Some(&registry));
        engine.handle(HttpRequest::new(Method::GET, "/?_function=Echo&text=a"));
        engine.handle(HttpRequest::new(Method::GET, "/?_function=Nope"));

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains(r#"xins_requests_total{convention="_xins-std",outcome="success"} 1"#));
        assert!(text.contains(
            r#"xins_requests_total{convention="_xins-std",outcome="no_such_function"} 1"#
        ));
    }

    #[test]
    fn test_metrics_registered_once() {
        let registry = Registry::new();
        let _first = engine(Some(&registry));
        let api = Api::new("other");
        assert!(Engine::new(&config(), api, Some(&registry)).is_err());
    }
}
