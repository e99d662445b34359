//! Function requests and call configuration

use crate::element::Element;
use crate::result::Parameters;

/// Parameter name that can never be used, it clashes with the legacy
/// `function` request parameter.
pub const RESERVED_PARAMETER: &str = "function";

/// Meta functions every API answers, independent of its own functions.
pub const META_FUNCTIONS: [&str; 3] = ["_NoOp", "_GetVersion", "_GetFunctionList"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("{kind} name must not be empty")]
    EmptyName { kind: &'static str },
    #[error("{kind} name \"{name}\" does not match the pattern [a-zA-Z][a-zA-Z0-9_.-]*")]
    InvalidName { kind: &'static str, name: String },
    #[error("parameter name \"{0}\" is reserved")]
    ReservedName(String),
    #[error("the data section root must be named \"data\", found \"{0}\"")]
    DataSectionName(String),
}

/// Checks a name against `[a-zA-Z][a-zA-Z0-9_.-]*`.
#[inline]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => chars
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'),
        _ => false,
    }
}

/// Validates a function name. Meta function names are accepted as well.
///
/// # Examples
///
/// ```
/// use xins_core::request::validate_function_name;
///
/// assert!(validate_function_name("abc-Def.2").is_ok());
/// assert!(validate_function_name("_GetVersion").is_ok());
/// assert!(validate_function_name("1abc").is_err());
/// assert!(validate_function_name("").is_err());
/// ```
pub fn validate_function_name(name: &str) -> Result<(), RequestError> {
    if name.is_empty() {
        return Err(RequestError::EmptyName { kind: "function" });
    }
    if META_FUNCTIONS.contains(&name) || is_valid_name(name) {
        Ok(())
    } else {
        Err(RequestError::InvalidName {
            kind: "function",
            name: name.to_string(),
        })
    }
}

/// Validates an input parameter name.
pub fn validate_parameter_name(name: &str) -> Result<(), RequestError> {
    if name.is_empty() {
        return Err(RequestError::EmptyName { kind: "parameter" });
    }
    if name == RESERVED_PARAMETER {
        return Err(RequestError::ReservedName(name.to_string()));
    }
    if !is_valid_name(name) {
        return Err(RequestError::InvalidName {
            kind: "parameter",
            name: name.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Post,
    Get,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Get => "GET",
        }
    }
}

/// Per-call settings on the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallConfig {
    /// Whether the call may be retried against another target even if the
    /// first one may already have received it.
    pub fail_over_allowed: bool,
    pub http_method: HttpMethod,
}

impl CallConfig {
    pub fn new(fail_over_allowed: bool, http_method: HttpMethod) -> Self {
        Self {
            fail_over_allowed,
            http_method,
        }
    }
}

/// A call of one function: name, flat parameters and optional data section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRequest {
    function_name: String,
    parameters: Parameters,
    data_element: Option<Element>,
    call_config: Option<CallConfig>,
}

impl FunctionRequest {
    pub fn new(function_name: &str, parameters: Parameters, data_element: Option<Element>) -> Self {
        Self {
            function_name: function_name.to_string(),
            parameters,
            data_element,
            call_config: None,
        }
    }

    pub fn with_call_config(mut self, config: CallConfig) -> Self {
        self.call_config = Some(config);
        self
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
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

    pub fn call_config(&self) -> Option<&CallConfig> {
        self.call_config.as_ref()
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    pub(crate) fn set_data_element(&mut self, data: Option<Element>) {
        self.data_element = data;
    }

    pub(crate) fn set_call_config(&mut self, config: CallConfig) {
        self.call_config = Some(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_pattern() {
        assert!(is_valid_name("abc-Def.2"));
        assert!(is_valid_name("a"));
        assert!(is_valid_name("a_b"));
        assert!(!is_valid_name("1abc"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("_x"));
        assert!(!is_valid_name("a b"));
        assert!(!is_valid_name("é"));
    }

    #[test]
    fn test_parameter_names() {
        assert!(validate_parameter_name("abc-Def.2").is_ok());
        assert_eq!(
            validate_parameter_name("function"),
            Err(RequestError::ReservedName("function".to_string()))
        );
        assert!(matches!(
            validate_parameter_name(""),
            Err(RequestError::EmptyName { .. })
        ));
        assert!(matches!(
            validate_parameter_name("1abc"),
            Err(RequestError::InvalidName { .. })
        ));
        assert!(validate_parameter_name("_function").is_err());
    }

    #[test]
    fn test_function_names() {
        assert!(validate_function_name("GetPet").is_ok());
        assert!(validate_function_name("_NoOp").is_ok());
        assert!(validate_function_name("_Other").is_err());
        assert!(validate_function_name("1abc").is_err());
    }

    #[test]
    fn test_default_call_config() {
        let config = CallConfig::default();
        assert!(!config.fail_over_allowed);
        assert_eq!(config.http_method, HttpMethod::Post);
    }
}
