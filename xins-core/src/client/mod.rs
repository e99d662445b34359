//! Calling XINS functions on remote servers
//!
//! Build an [`XinsCallRequest`], pick a [`Transport`] per target and let the
//! [`XinsServiceCaller`] send, parse and classify:
//!
//! ```no_run
//! use xins_core::client::{HttpTransport, XinsCallRequest, XinsServiceCaller};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let caller = XinsServiceCaller::new(HttpTransport::new("http://127.0.0.1:8080/")?);
//! let mut request = XinsCallRequest::new("Echo")?;
//! request.set_parameter("text", Some("hello"))?;
//! let result = caller.call(&request).await?;
//! println!("{:?}", result.parameter("text"));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod transport;

pub use error::{CallError, TransportError, UnsuccessfulCall, classify, describe_violations};
pub use transport::HttpTransport;

use crate::convention::standard::{DATA_PARAMETER, FUNCTION_PARAMETER, NAME as STANDARD_CONVENTION};
use crate::convention::CONVENTION_PARAMETER;
use crate::element::Element;
use crate::function::FunctionSpec;
use crate::request::{
    CallConfig, FunctionRequest, RequestError, validate_function_name, validate_parameter_name,
};
use crate::result::{CallResultData, Parameters};
use crate::result_parser::parse_result;
use bytes::Bytes;
use hyper::StatusCode;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Diagnostic context identifier sent along with a call.
pub const CONTEXT_PARAMETER: &str = "_context";

/// Per-call client settings.
pub type XinsCallConfig = CallConfig;

/// A call to be sent to a XINS server.
///
/// Every mutation rebuilds the form parameters that go on the wire, so the
/// request can be handed to a transport at any time without further work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XinsCallRequest {
    request: FunctionRequest,
    context_id: Option<String>,
    wire_params: Vec<(String, String)>,
}

impl XinsCallRequest {
    pub fn new(function_name: &str) -> Result<Self, RequestError> {
        Self::with_parameters(function_name, Parameters::new(), None)
    }

    pub fn with_parameters(
        function_name: &str,
        parameters: Parameters,
        data_section: Option<Element>,
    ) -> Result<Self, RequestError> {
        validate_function_name(function_name)?;
        for name in parameters.keys() {
            validate_parameter_name(name)?;
        }
        check_data_section(data_section.as_ref())?;

        let parameters = parameters
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .collect();
        let mut call = Self {
            request: FunctionRequest::new(function_name, parameters, data_section)
                .with_call_config(CallConfig::default()),
            context_id: None,
            wire_params: Vec::new(),
        };
        call.rebuild_wire_params();
        Ok(call)
    }

    pub fn function_name(&self) -> &str {
        self.request.function_name()
    }

    pub fn parameters(&self) -> &Parameters {
        self.request.parameters()
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.request.parameter(name)
    }

    pub fn data_section(&self) -> Option<&Element> {
        self.request.data_element()
    }

    pub fn call_config(&self) -> XinsCallConfig {
        self.request.call_config().copied().unwrap_or_default()
    }

    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref()
    }

    /// Sets or, with `None` or an empty value, removes a parameter.
    pub fn set_parameter(&mut self, name: &str, value: Option<&str>) -> Result<(), RequestError> {
        validate_parameter_name(name)?;
        match value.filter(|v| !v.is_empty()) {
            Some(value) => {
                self.request
                    .parameters_mut()
                    .insert(name.to_string(), value.to_string());
            }
            None => {
                self.request.parameters_mut().remove(name);
            }
        }
        self.rebuild_wire_params();
        Ok(())
    }

    pub fn set_data_section(&mut self, data: Option<Element>) -> Result<(), RequestError> {
        check_data_section(data.as_ref())?;
        self.request.set_data_element(data);
        self.rebuild_wire_params();
        Ok(())
    }

    pub fn set_call_config(&mut self, config: XinsCallConfig) {
        self.request.set_call_config(config);
    }

    pub fn set_context_id(&mut self, context_id: Option<&str>) {
        self.context_id = context_id.filter(|c| !c.is_empty()).map(str::to_string);
        self.rebuild_wire_params();
    }

    /// Form parameters as sent with the standard calling convention.
    pub fn wire_parameters(&self) -> &[(String, String)] {
        &self.wire_params
    }

    fn rebuild_wire_params(&mut self) {
        let mut wire = Vec::with_capacity(self.request.parameters().len() + 4);
        wire.push((FUNCTION_PARAMETER.to_string(), self.function_name().to_string()));
        wire.push((CONVENTION_PARAMETER.to_string(), STANDARD_CONVENTION.to_string()));
        if let Some(context_id) = &self.context_id {
            wire.push((CONTEXT_PARAMETER.to_string(), context_id.clone()));
        }
        for (name, value) in self.request.parameters() {
            wire.push((name.clone(), value.clone()));
        }
        if let Some(data) = self.request.data_element() {
            wire.push((DATA_PARAMETER.to_string(), data.to_xml_string()));
        }
        self.wire_params = wire;
    }
}

fn check_data_section(data: Option<&Element>) -> Result<(), RequestError> {
    match data {
        Some(element) if element.local_name() != "data" => {
            Err(RequestError::DataSectionName(element.local_name().to_string()))
        }
        _ => Ok(()),
    }
}

/// Raw HTTP outcome of a call.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Carries a call to one target.
pub trait Transport: Send + Sync {
    /// Description of the target, used in logs.
    fn target(&self) -> &str;

    fn send(
        &self,
        call: &XinsCallRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

/// A successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XinsCallResult {
    data: CallResultData,
    target: String,
    duration: Duration,
}

impl XinsCallResult {
    pub fn parameters(&self) -> &Parameters {
        self.data.parameters()
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.data.parameter(name)
    }

    pub fn data_element(&self) -> Option<&Element> {
        self.data.data_element()
    }

    /// The target that answered.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn into_data(self) -> CallResultData {
        self.data
    }
}

/// Sends calls to one or more equivalent targets, in order.
///
/// The next target is tried only when [`CallError::should_fail_over`] allows
/// it; any other failure is returned right away.
#[derive(Debug)]
pub struct XinsServiceCaller<T> {
    targets: Vec<T>,
    specs: HashMap<String, FunctionSpec>,
}

impl<T: Transport> XinsServiceCaller<T> {
    pub fn new(primary: T) -> Self {
        Self {
            targets: vec![primary],
            specs: HashMap::new(),
        }
    }

    /// Adds a target to try when the previous ones fail over.
    pub fn with_fallback(mut self, target: T) -> Self {
        self.targets.push(target);
        self
    }

    /// Registers the `FunctionSpec` of a remote function, making classification strict
    /// about its error codes.
    pub fn with_spec(mut self, spec: FunctionSpec) -> Self {
        self.specs.insert(spec.name().to_string(), spec);
        self
    }

    pub async fn call(&self, request: &XinsCallRequest) -> Result<XinsCallResult, CallError> {
        let mut last_error = None;
        for (index, target) in self.targets.iter().enumerate() {
            match self.call_target(target, request).await {
                Ok(result) => return Ok(result),
                Err(e) if e.should_fail_over() && index + 1 < self.targets.len() => {
                    warn!(
                        "Call to {} on {} failed, trying next target: {}",
                        request.function_name(),
                        target.target(),
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        // The loop returns on the last target, so this only covers an
        // impossible empty target list.
        Err(last_error.unwrap_or(CallError::UnexpectedStatus(StatusCode::SERVICE_UNAVAILABLE)))
    }

    async fn call_target(&self, target: &T, request: &XinsCallRequest) -> Result<XinsCallResult, CallError> {
        let start = Instant::now();
        let response = target
            .send(request)
            .await
            .map_err(|source| CallError::Transport {
                source,
                fail_over_allowed: request.call_config().fail_over_allowed,
            })?;
        if response.status != StatusCode::OK {
            return Err(CallError::UnexpectedStatus(response.status));
        }

        let data = parse_result(&response.body)?;
        let data = classify(data, self.specs.get(request.function_name()))?;
        let duration = start.elapsed();
        debug!(
            "Call to {} on {} succeeded in {:?}",
            request.function_name(),
            target.target(),
            duration
        );
        Ok(XinsCallResult {
            data,
            target: target.target().to_string(),
            duration,
        })
    }
}
