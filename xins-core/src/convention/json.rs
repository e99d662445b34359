//! The JSON calling convention, `_xins-json`
//!
//! Requests look like `GET /petstore/GetPet?output=json&id=3`: the function
//! is the last path segment and `output=json` selects this convention. The
//! optional `_data` parameter carries the data section as a JSON object and
//! `callback` wraps the output as JSONP.
//!
//! Data sections map between JSON and XML as follows. On input, every member
//! becomes a child element, arrays become repeated elements and scalars
//! become text. On output, an element with nothing but text becomes a
//! string; any other element becomes an object holding its attributes, its
//! children (repeated names grouped into arrays) and its text under
//! `content`. Result parameters named `errorCode` or `data` are left out
//! of the output object since those members belong to the framework.

use super::{CallingConvention, ConventionError, clean_up_parameters, gather_params};
use crate::element::Element;
use crate::function::FunctionSpec;
use crate::http::{HttpRequest, HttpResponse};
use crate::request::{
    FunctionRequest, is_valid_name, validate_function_name, validate_parameter_name,
};
use crate::result::FunctionResult;
use hyper::Method;
use serde_json::{Map, Value};
use tracing::debug;

const ERROR_CODE_MEMBER: &str = "errorCode";
const DATA_MEMBER: &str = "data";

pub const NAME: &str = "_xins-json";

const OUTPUT_PARAMETER: &str = "output";
const CALLBACK_PARAMETER: &str = "callback";
const DATA_PARAMETER: &str = "_data";

const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
const JSONP_CONTENT_TYPE: &str = "text/javascript; charset=UTF-8";

#[derive(Debug, Default)]
pub struct JsonCallingConvention;

impl JsonCallingConvention {
    pub fn new() -> Self {
        Self
    }
}

impl CallingConvention for JsonCallingConvention {
    fn name(&self) -> &'static str {
        NAME
    }

    fn matches(&self, request: &HttpRequest) -> Result<bool, ConventionError> {
        let wants_json = request
            .query_parameter(OUTPUT_PARAMETER)
            .is_some_and(|o| o == "json");
        Ok(wants_json && function_segment(request).is_some())
    }

    fn convert_request_impl(
        &self,
        request: &HttpRequest,
    ) -> Result<FunctionRequest, ConventionError> {
        let function_name = function_segment(request).ok_or(ConventionError::FunctionNotSpecified)?;
        validate_function_name(function_name)
            .map_err(|e| ConventionError::InvalidRequest(e.to_string()))?;
        callback(request)?;

        let mut params = gather_params(request)?;
        let data = match params.get(DATA_PARAMETER).filter(|d| !d.is_empty()) {
            Some(json) => Some(data_section_from_json(json)?),
            None => None,
        };

        params.remove(OUTPUT_PARAMETER);
        params.remove(CALLBACK_PARAMETER);
        clean_up_parameters(&mut params);
        for name in params.keys() {
            validate_parameter_name(name)
                .map_err(|e| ConventionError::InvalidRequest(e.to_string()))?;
        }

        Ok(FunctionRequest::new(function_name, params, data))
    }

    fn convert_result_impl(
        &self,
        request: &HttpRequest,
        _function_request: &FunctionRequest,
        response: &mut HttpResponse,
        result: &FunctionResult,
        _spec: Option<&FunctionSpec>,
    ) -> Result<(), ConventionError> {
        let json = serde_json::to_string(&result_to_json(result)).map_err(|e| {
            ConventionError::ConvertResult {
                detail: format!("unable to serialize the result as JSON: {}", e),
                source: None,
            }
        })?;

        let body = match callback(request)? {
            Some(callback) => {
                response.set_content_type(JSONP_CONTENT_TYPE);
                format!("{}({})", callback, json)
            }
            None => {
                response.set_content_type(JSON_CONTENT_TYPE);
                json
            }
        };

        if *request.method() == Method::HEAD {
            response.set_content_length(body.len());
        } else {
            response.sink().extend_from_slice(body.as_bytes());
        }
        Ok(())
    }
}

/// The last non-empty path segment, which names the function.
fn function_segment(request: &HttpRequest) -> Option<&str> {
    request
        .path()
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

/// The JSONP callback, if one was requested. Only plain JavaScript
/// identifiers, optionally dotted, are accepted.
fn callback(request: &HttpRequest) -> Result<Option<String>, ConventionError> {
    let Some(callback) = request.query_parameter(CALLBACK_PARAMETER) else {
        return Ok(None);
    };
    if callback.is_empty() {
        return Ok(None);
    }

    let mut chars = callback.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.');
    if !valid {
        return Err(ConventionError::InvalidRequest(format!(
            "Invalid callback name \"{}\".",
            callback
        )));
    }
    Ok(Some(callback))
}

/// Converts the `_data` JSON object into a `data` element.
pub fn data_section_from_json(json: &str) -> Result<Element, ConventionError> {
    let value: Value = serde_json::from_str(json).map_err(|e| {
        ConventionError::InvalidRequest(format!("Unable to parse the data section as JSON: {}", e))
    })?;
    if !value.is_object() {
        return Err(ConventionError::InvalidRequest(
            "The data section must be a JSON object.".to_string(),
        ));
    }
    json_to_element("data", &value)
}

fn json_to_element(name: &str, value: &Value) -> Result<Element, ConventionError> {
    if !is_valid_name(name) {
        return Err(ConventionError::InvalidRequest(format!(
            "\"{}\" cannot be used as an element name.",
            name
        )));
    }
    let mut element =
        Element::new(name).map_err(|e| ConventionError::InvalidRequest(e.to_string()))?;

    match value {
        Value::Object(members) => {
            for (key, member) in members {
                match member {
                    Value::Array(items) => {
                        for item in items {
                            element.add_child(json_to_element(key, item)?);
                        }
                    }
                    other => element.add_child(json_to_element(key, other)?),
                }
            }
        }
        Value::String(s) => element.set_text(Some(s.as_str())),
        Value::Number(n) => element.set_text(Some(n.to_string().as_str())),
        Value::Bool(b) => element.set_text(Some(if *b { "true" } else { "false" })),
        Value::Array(_) => {
            return Err(ConventionError::InvalidRequest(format!(
                "Nested arrays are not supported in the data section, found one in \"{}\".",
                name
            )));
        }
        Value::Null => {}
    }
    Ok(element)
}

/// Builds the JSON object for a function result.
pub fn result_to_json(result: &FunctionResult) -> Value {
    let mut object = Map::new();
    if let Some(code) = result.error_code() {
        object.insert(ERROR_CODE_MEMBER.to_string(), Value::String(code.to_string()));
    }
    for (name, value) in result.parameters() {
        if name == ERROR_CODE_MEMBER || name == DATA_MEMBER {
            debug!("Leaving result parameter \"{}\" out of the JSON output", name);
            continue;
        }
        if !name.is_empty() && !value.is_empty() {
            object.insert(name.clone(), Value::String(value.clone()));
        }
    }
    if let Some(data) = result.data_element() {
        object.insert(DATA_MEMBER.to_string(), Value::Object(element_members(data)));
    }
    Value::Object(object)
}

fn element_to_json(element: &Element) -> Value {
    if element.attributes().is_empty() && element.children().is_empty() {
        return Value::String(element.text().unwrap_or_default().to_string());
    }
    Value::Object(element_members(element))
}

fn element_members(element: &Element) -> Map<String, Value> {
    let mut members = Map::new();
    for attribute in element.attributes() {
        members.insert(
            attribute.local_name.clone(),
            Value::String(attribute.value.clone()),
        );
    }
    for child in element.children() {
        let value = element_to_json(child);
        match members.get_mut(child.local_name()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                members.insert(child.local_name().to_string(), value);
            }
        }
    }
    if let Some(text) = element.text() {
        members.insert("content".to_string(), Value::String(text.to_string()));
    }
    members
}
