//! Client-side call errors and result classification

use crate::element::Element;
use crate::function::FunctionSpec;
use crate::result::{
    CallResultData, ERR_DISABLED_FUNCTION, ERR_INTERNAL_ERROR, ERR_INVALID_REQUEST,
    ERR_INVALID_RESPONSE, Parameters,
};
use crate::result_parser::ParseError;
use hyper::StatusCode;
use std::time::Duration;

/// Failure of the transport below the protocol.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No connection could be established, so the target never saw the call.
    #[error("unable to connect to {target}: {detail}")]
    Connect { target: String, detail: String },
    #[error("call to {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },
    #[error("HTTP failure calling {target}: {detail}")]
    Http { target: String, detail: String },
    #[error("invalid target URL \"{0}\"")]
    InvalidUrl(String),
}

/// A call that completed with an application-defined error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsuccessfulCall {
    error_code: String,
    parameters: Parameters,
    data_element: Option<Element>,
}

impl UnsuccessfulCall {
    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn data_element(&self) -> Option<&Element> {
        self.data_element.as_ref()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("_InvalidRequest: {detail}")]
    InvalidRequest {
        detail: String,
        data: Option<Element>,
    },
    #[error("_InvalidResponse: {detail}")]
    InvalidResponse {
        detail: String,
        data: Option<Element>,
    },
    #[error("_DisabledFunction: the function is disabled")]
    DisabledFunction,
    #[error("_InternalError: {}", .message.as_deref().unwrap_or("no details"))]
    InternalError { message: Option<String> },
    #[error("Error code \"{code}\" is not acceptable for this function.")]
    UnacceptableErrorCode { code: String },
    #[error("call failed with error code \"{}\"", .0.error_code())]
    Unsuccessful(UnsuccessfulCall),
    #[error("unable to parse the call result: {0}")]
    Parse(#[from] ParseError),
    #[error("transport failure: {source}")]
    Transport {
        #[source]
        source: TransportError,
        fail_over_allowed: bool,
    },
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(StatusCode),
}

impl CallError {
    /// Whether the call may be retried against another target.
    ///
    /// A failed connection means the call never arrived and can always be
    /// retried. Other transport failures are retried only when the call
    /// configuration allows fail-over.
    pub fn should_fail_over(&self) -> bool {
        match self {
            CallError::Transport {
                source: TransportError::Connect { .. },
                ..
            } => true,
            CallError::Transport {
                fail_over_allowed, ..
            } => *fail_over_allowed,
            _ => false,
        }
    }

    /// The error code returned by the server, if the call got that far.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            CallError::InvalidRequest { .. } => Some(ERR_INVALID_REQUEST),
            CallError::InvalidResponse { .. } => Some(ERR_INVALID_RESPONSE),
            CallError::DisabledFunction => Some(ERR_DISABLED_FUNCTION),
            CallError::InternalError { .. } => Some(ERR_INTERNAL_ERROR),
            CallError::UnacceptableErrorCode { code } => Some(code.as_str()),
            CallError::Unsuccessful(call) => Some(call.error_code()),
            _ => None,
        }
    }
}

/// Turns a parsed result into success or a typed error.
///
/// Without a `FunctionSpec`, any non-standard code counts as an application error.
/// With one, codes the `FunctionSpec` does not declare are unacceptable.
pub fn classify(
    data: CallResultData,
    spec: Option<&FunctionSpec>,
) -> Result<CallResultData, CallError> {
    let Some(code) = data.error_code().map(str::to_string) else {
        return Ok(data);
    };

    let (_, parameters, data_element) = data.into_parts();
    match code.as_str() {
        ERR_INVALID_REQUEST => Err(CallError::InvalidRequest {
            detail: describe_violations(data_element.as_ref()),
            data: data_element,
        }),
        ERR_INVALID_RESPONSE => Err(CallError::InvalidResponse {
            detail: describe_violations(data_element.as_ref()),
            data: data_element,
        }),
        ERR_DISABLED_FUNCTION => Err(CallError::DisabledFunction),
        ERR_INTERNAL_ERROR => Err(CallError::InternalError {
            message: parameters.get(crate::api::EXCEPTION_MESSAGE_PARAMETER).cloned(),
        }),
        _ if spec.is_some_and(|s| !s.accepts_error_code(&code)) => {
            Err(CallError::UnacceptableErrorCode { code })
        }
        _ => Err(CallError::Unsuccessful(UnsuccessfulCall {
            error_code: code,
            parameters,
            data_element,
        })),
    }
}

/// One sentence per violation listed in an `_InvalidRequest` or
/// `_InvalidResponse` data section, separated by spaces.
pub fn describe_violations(data: Option<&Element>) -> String {
    let Some(data) = data else {
        return String::new();
    };

    let mut sentences = Vec::new();
    for child in data.children() {
        match child.local_name() {
            "missing-param" => sentences.push(format!(
                "No value given for required parameter \"{}\".",
                child.attribute("param").unwrap_or_default()
            )),
            "invalid-value-for-type" => {
                let param = child.attribute("param").unwrap_or_default();
                let param_type = child.attribute("type").unwrap_or_default();
                sentences.push(match child.attribute("value") {
                    Some(value) => format!(
                        "The value \"{}\" for the parameter \"{}\" is considered invalid for the type \"{}\".",
                        value, param, param_type
                    ),
                    None => format!(
                        "The value for the parameter \"{}\" is considered invalid for the type \"{}\".",
                        param, param_type
                    ),
                });
            }
            "param-combo" => {
                let names: Vec<&str> = child
                    .children_named("param")
                    .filter_map(|p| p.attribute("name"))
                    .collect();
                sentences.push(format!(
                    "Violated param-combo constraint of type \"{}\" on parameters {}.",
                    child.attribute("type").unwrap_or_default(),
                    quoted_list(&names)
                ));
            }
            _ => {}
        }
    }
    sentences.join(" ")
}

/// `"a", "b" and "c"`
fn quoted_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("\"{}\"", n)).collect();
    match quoted.split_last() {
        None => String::new(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} and {}", rest.join(", "), last),
    }
}
