//! Shape of one protocol response

use crate::element::Element;
use std::collections::BTreeMap;

/// Flat parameter map. Names are unique; iteration order is by name.
pub type Parameters = BTreeMap<String, String>;

pub const ERR_INVALID_REQUEST: &str = "_InvalidRequest";
pub const ERR_INVALID_RESPONSE: &str = "_InvalidResponse";
pub const ERR_DISABLED_FUNCTION: &str = "_DisabledFunction";
pub const ERR_INTERNAL_ERROR: &str = "_InternalError";

/// Error codes reserved by the framework itself.
pub const STANDARD_ERROR_CODES: [&str; 4] = [
    ERR_INVALID_REQUEST,
    ERR_INVALID_RESPONSE,
    ERR_DISABLED_FUNCTION,
    ERR_INTERNAL_ERROR,
];

pub fn is_standard_error_code(code: &str) -> bool {
    STANDARD_ERROR_CODES.contains(&code)
}

/// Error code, parameters and data section of a call result.
///
/// An absent error code means the call succeeded. The empty string is never
/// stored as an error code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallResultData {
    error_code: Option<String>,
    parameters: Parameters,
    data_element: Option<Element>,
}

/// Result produced by a function on the server side.
pub type FunctionResult = CallResultData;

impl CallResultData {
    pub fn new(
        error_code: Option<String>,
        parameters: Parameters,
        data_element: Option<Element>,
    ) -> Self {
        Self {
            error_code: error_code.filter(|c| !c.is_empty()),
            parameters,
            data_element,
        }
    }

    pub fn success() -> Self {
        Self::default()
    }

    pub fn error(code: &str) -> Self {
        Self::new(Some(code.to_string()), Parameters::new(), None)
    }

    /// Adds a parameter; empty values are dropped since they cannot be told
    /// apart from absent ones on the wire.
    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.set_parameter(name, value);
        self
    }

    pub fn with_data(mut self, data: Element) -> Self {
        self.data_element = Some(data);
        self
    }

    pub fn set_parameter(&mut self, name: &str, value: &str) {
        if name.is_empty() || value.is_empty() {
            self.parameters.remove(name);
        } else {
            self.parameters.insert(name.to_string(), value.to_string());
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
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

    pub fn into_parts(self) -> (Option<String>, Parameters, Option<Element>) {
        (self.error_code, self.parameters, self.data_element)
    }
}
