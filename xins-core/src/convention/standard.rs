//! The standard calling convention, `_xins-std`
//!
//! Requests are plain query or form parameters with the function name in
//! `_function` and an optional XML data section in `_data`. Results are
//! written in the XML result grammar.

use super::{
    CallingConvention, ConventionError, clean_up_parameters, gather_params, parse_data_section,
};
use crate::function::FunctionSpec;
use crate::http::{HttpRequest, HttpResponse};
use crate::request::{FunctionRequest, validate_function_name, validate_parameter_name};
use crate::result::FunctionResult;
use crate::result_outputter::write_result;
use hyper::Method;

pub const NAME: &str = "_xins-std";

pub(crate) const FUNCTION_PARAMETER: &str = "_function";
pub(crate) const DATA_PARAMETER: &str = "_data";

pub(crate) const XML_CONTENT_TYPE: &str = "text/xml; charset=UTF-8";

#[derive(Debug, Default)]
pub struct StandardCallingConvention;

impl StandardCallingConvention {
    pub fn new() -> Self {
        Self
    }
}

impl CallingConvention for StandardCallingConvention {
    fn name(&self) -> &'static str {
        NAME
    }

    fn matches(&self, request: &HttpRequest) -> Result<bool, ConventionError> {
        Ok(request
            .parameter(FUNCTION_PARAMETER)
            .is_some_and(|f| !f.is_empty()))
    }

    fn convert_request_impl(
        &self,
        request: &HttpRequest,
    ) -> Result<FunctionRequest, ConventionError> {
        let mut params = gather_params(request)?;

        let function_name = params
            .get(FUNCTION_PARAMETER)
            .filter(|f| !f.is_empty())
            .cloned()
            .ok_or(ConventionError::FunctionNotSpecified)?;
        validate_function_name(&function_name)
            .map_err(|e| ConventionError::InvalidRequest(e.to_string()))?;

        let data = match params.get(DATA_PARAMETER).filter(|d| !d.is_empty()) {
            Some(xml) => Some(parse_data_section(xml)?),
            None => None,
        };

        clean_up_parameters(&mut params);
        for name in params.keys() {
            validate_parameter_name(name)
                .map_err(|e| ConventionError::InvalidRequest(e.to_string()))?;
        }

        Ok(FunctionRequest::new(&function_name, params, data))
    }

    fn convert_result_impl(
        &self,
        request: &HttpRequest,
        _function_request: &FunctionRequest,
        response: &mut HttpResponse,
        result: &FunctionResult,
        spec: Option<&FunctionSpec>,
    ) -> Result<(), ConventionError> {
        write_xml_result(request, response, result, spec)
    }
}

/// Writes `result` in the XML grammar. For `HEAD` only the length is
/// reported and no body is produced.
pub(crate) fn write_xml_result(
    request: &HttpRequest,
    response: &mut HttpResponse,
    result: &FunctionResult,
    spec: Option<&FunctionSpec>,
) -> Result<(), ConventionError> {
    response.set_content_type(XML_CONTENT_TYPE);

    if *request.method() == Method::HEAD {
        let mut buffer = Vec::new();
        write_result(&mut buffer, result, spec)
            .map_err(|e| ConventionError::io("unable to measure the result", e))?;
        response.set_content_length(buffer.len());
        return Ok(());
    }

    write_result(response.sink(), result, spec)
        .map_err(|e| ConventionError::io("unable to write the result", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convention::ManagedConvention;
    use crate::result::CallResultData;

    fn managed() -> ManagedConvention {
        let convention = ManagedConvention::new(Box::new(StandardCallingConvention::new()));
        convention.init();
        convention
    }

    #[test]
    fn test_matches() {
        let convention = managed();
        assert!(convention.matches_request(&HttpRequest::new(Method::GET, "/?_function=Echo")));
        assert!(!convention.matches_request(&HttpRequest::new(Method::GET, "/?_function=")));
        assert!(!convention.matches_request(&HttpRequest::new(Method::GET, "/?function=Echo")));
        assert!(!convention.matches_request(&HttpRequest::new(Method::PUT, "/?_function=Echo")));
    }

    #[test]
    fn test_convert_request() {
        let req = HttpRequest::new(
            Method::GET,
            "/?_function=Echo&text=hi&_convention=_xins-std&_context=abc&function=legacy&empty=",
        );
        let fr = managed().convert_request(&req).unwrap();
        assert_eq!(fr.function_name(), "Echo");
        assert_eq!(fr.parameters().len(), 1);
        assert_eq!(fr.parameter("text"), Some("hi"));
        assert!(fr.data_element().is_none());
    }

    #[test]
    fn test_convert_request_with_data() {
        let req = HttpRequest::new(
            Method::GET,
            "/?_function=AddPets&_data=%3Cdata%3E%3Cpet%20name%3D%22Rex%22%2F%3E%3C%2Fdata%3E",
        );
        let fr = managed().convert_request(&req).unwrap();
        let data = fr.data_element().unwrap();
        assert_eq!(data.local_name(), "data");
        assert_eq!(data.children()[0].attribute("name"), Some("Rex"));
    }

    #[test]
    fn test_bad_data_section() {
        let convention = managed();
        let wrong_root = HttpRequest::new(Method::GET, "/?_function=F&_data=%3Cpets%2F%3E");
        assert!(matches!(
            convention.convert_request(&wrong_root),
            Err(ConventionError::InvalidRequest(_))
        ));

        let malformed = HttpRequest::new(Method::GET, "/?_function=F&_data=%3Cdata%3E");
        assert!(matches!(
            convention.convert_request(&malformed),
            Err(ConventionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_invalid_names() {
        let convention = managed();
        let bad_function = HttpRequest::new(Method::GET, "/?_function=1abc");
        assert!(matches!(
            convention.convert_request(&bad_function),
            Err(ConventionError::InvalidRequest(_))
        ));

        let bad_param = HttpRequest::new(Method::GET, "/?_function=Echo&1abc=x");
        assert!(matches!(
            convention.convert_request(&bad_param),
            Err(ConventionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_conflicting_parameters() {
        let req = HttpRequest::new(Method::GET, "/?_function=Echo&a=1&a=2");
        assert!(matches!(
            managed().convert_request(&req),
            Err(ConventionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_convert_result() {
        let convention = managed();
        let req = HttpRequest::new(Method::GET, "/?_function=Echo");
        let fr = convention.convert_request(&req).unwrap();
        let mut response = HttpResponse::new();
        convention
            .convert_result(
                &req,
                &fr,
                &mut response,
                &CallResultData::success().with_param("a", "1"),
                None,
            )
            .unwrap();
        assert_eq!(response.header("content-type"), Some(XML_CONTENT_TYPE));
        assert_eq!(
            response.body(),
            br#"<?xml version="1.0" encoding="UTF-8"?><result><param name="a">1</param></result>"#
        );
    }

    #[test]
    fn test_head_reports_length_only() {
        let convention = managed();
        let req = HttpRequest::new(Method::HEAD, "/?_function=Echo");
        let fr = convention.convert_request(&req).unwrap();
        let mut response = HttpResponse::new();
        let result = CallResultData::success().with_param("a", "1");
        convention
            .convert_result(&req, &fr, &mut response, &result, None)
            .unwrap();
        assert!(response.body().is_empty());
        assert_eq!(
            response.content_length(),
            crate::result_outputter::result_to_bytes(&result, None).len()
        );
    }
}
