//! The XML calling convention, `_xins-xml`
//!
//! The request is posted as a `text/xml` document:
//!
//! ```xml
//! <request function="GetPet">
//!   <param name="id">3</param>
//!   <data>...</data>
//! </request>
//! ```
//!
//! The result uses the same grammar as the standard convention.

use super::standard::write_xml_result;
use super::{CallingConvention, ConventionError, clean_up_parameters, parse_xml_request};
use crate::element::Element;
use crate::function::FunctionSpec;
use crate::http::{HttpRequest, HttpResponse};
use crate::request::{FunctionRequest, validate_function_name, validate_parameter_name};
use crate::result::{FunctionResult, Parameters};
use hyper::Method;

pub const NAME: &str = "_xins-xml";

#[derive(Debug, Default)]
pub struct XmlCallingConvention;

impl XmlCallingConvention {
    pub fn new() -> Self {
        Self
    }
}

impl CallingConvention for XmlCallingConvention {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supported_methods(&self) -> Vec<Method> {
        vec![Method::POST]
    }

    fn matches(&self, request: &HttpRequest) -> Result<bool, ConventionError> {
        let root = parse_xml_request(request, true)?;
        Ok(root.local_name() == "request" && root.namespace_uri().is_none())
    }

    fn convert_request_impl(
        &self,
        request: &HttpRequest,
    ) -> Result<FunctionRequest, ConventionError> {
        let root = parse_xml_request(request, true)?;
        if root.local_name() != "request" {
            return Err(ConventionError::InvalidRequest(format!(
                "The root element is \"{}\" instead of \"request\".",
                root.local_name()
            )));
        }

        let function_name = root
            .attribute("function")
            .filter(|f| !f.is_empty())
            .ok_or(ConventionError::FunctionNotSpecified)?;
        validate_function_name(function_name)
            .map_err(|e| ConventionError::InvalidRequest(e.to_string()))?;

        let mut params = collect_params(root)?;
        clean_up_parameters(&mut params);
        for name in params.keys() {
            validate_parameter_name(name)
                .map_err(|e| ConventionError::InvalidRequest(e.to_string()))?;
        }

        let mut data_sections = root.children_named("data");
        let data = data_sections.next().cloned();
        if data_sections.next().is_some() {
            return Err(ConventionError::InvalidRequest(
                "Found duplicate data sections in the \"request\" element.".to_string(),
            ));
        }

        Ok(FunctionRequest::new(function_name, params, data))
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

fn collect_params(root: &Element) -> Result<Parameters, ConventionError> {
    let mut params = Parameters::new();
    for param in root.children_named("param") {
        let name = param.attribute("name").unwrap_or_default();
        if name.is_empty() {
            return Err(ConventionError::InvalidRequest(
                "No parameter name specified for a \"param\" element.".to_string(),
            ));
        }

        let value = param.text().unwrap_or_default();
        match params.get(name) {
            Some(existing) if existing != value => {
                return Err(ConventionError::InvalidRequest(format!(
                    "Found multiple values for the parameter \"{}\".",
                    name
                )));
            }
            Some(_) => {}
            None => {
                params.insert(name.to_string(), value.to_string());
            }
        }
    }
    Ok(params)
}
