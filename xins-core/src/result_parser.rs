//! Parser for the XML result grammar
//!
//! ```text
//! <result[ errorcode="CODE"]><param name="N">V</param>...<data>...</data></result>
//! ```
//!
//! The root must be an un-namespaced `result` element without text content.
//! `param` and `data` children are interpreted, every other child is
//! ignored so newer servers can add elements without breaking older clients.

use crate::element::Element;
use crate::result::{CallResultData, Parameters};
use roxmltree::{Document, Node};
use std::error::Error as StdError;

/// Raised when a byte buffer is not a valid call result.
#[derive(Debug, thiserror::Error)]
#[error("{detail}")]
pub struct ParseError {
    detail: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ParseError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            source: None,
        }
    }

    pub fn with_source(
        detail: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            detail: detail.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Human-readable description of what is wrong with the input.
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// Parses a call result.
///
/// # Examples
///
/// ```
/// use xins_core::result_parser::parse_result;
///
/// let result = parse_result(br#"<result errorcode="NotFound"><param name="id">7</param></result>"#).unwrap();
/// assert_eq!(result.error_code(), Some("NotFound"));
/// assert_eq!(result.parameter("id"), Some("7"));
///
/// assert!(parse_result(b"<product/>").is_err());
/// ```
pub fn parse_result(xml: &[u8]) -> Result<CallResultData, ParseError> {
    let text = std::str::from_utf8(xml)
        .map_err(|e| ParseError::with_source("The call result is not valid UTF-8.", e))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let doc = Document::parse(text).map_err(|e| {
        ParseError::with_source(format!("Unable to parse the call result as XML: {}", e), e)
    })?;
    let root = doc.root_element();

    let root_name = root.tag_name().name();
    if root_name != "result" {
        return Err(ParseError::new(format!(
            "The root element is \"{}\" instead of \"result\".",
            root_name
        )));
    }
    if let Some(ns) = root.tag_name().namespace() {
        return Err(ParseError::new(format!(
            "The \"result\" element must not have a namespace, found \"{}\".",
            ns
        )));
    }

    for child in root.children().filter(|c| c.is_text()) {
        let pcdata = child.text().unwrap_or_default();
        if !pcdata.trim().is_empty() {
            return Err(ParseError::new(format!(
                "Found PCDATA content in the \"result\" element: \"{}\".",
                pcdata.trim()
            )));
        }
    }

    let error_code = parse_error_code(root)?;

    let mut parameters = Parameters::new();
    let mut data_element = None;
    for child in root.children().filter(|c| c.is_element()) {
        let tag = child.tag_name();
        // Elements in a foreign namespace are extensions we do not know about.
        if tag.namespace().is_some() {
            continue;
        }
        match tag.name() {
            "param" => parse_param(text, child, &mut parameters)?,
            "data" => {
                if data_element.is_some() {
                    return Err(ParseError::new(
                        "Found duplicate data sections in the \"result\" element.",
                    ));
                }
                data_element = Some(Element::from_node(child));
            }
            _ => {}
        }
    }

    Ok(CallResultData::new(error_code, parameters, data_element))
}

fn parse_error_code(root: Node<'_, '_>) -> Result<Option<String>, ParseError> {
    let errorcode = root.attribute("errorcode").filter(|v| !v.is_empty());
    let code = root.attribute("code").filter(|v| !v.is_empty());

    match (errorcode, code) {
        (Some(a), Some(b)) if a != b => Err(ParseError::new(format!(
            "Found conflicting duplicate value for the error code: errorcode=\"{}\" and code=\"{}\".",
            a, b
        ))),
        (Some(a), _) => Ok(Some(a.to_string())),
        (None, Some(b)) => Ok(Some(b.to_string())),
        (None, None) => Ok(None),
    }
}

fn parse_param(
    source: &str,
    param: Node<'_, '_>,
    parameters: &mut Parameters,
) -> Result<(), ParseError> {
    let name = match param.attribute("name") {
        Some(name) if !name.is_empty() => name,
        _ => {
            return Err(ParseError::new(
                "No parameter name specified for a \"param\" element.",
            ));
        }
    };

    let value = param_value(source, param);
    if value.is_empty() {
        return Ok(());
    }

    match parameters.get(name) {
        Some(existing) if *existing != value => Err(ParseError::new(format!(
            "Duplicate output parameter \"{}\" with different values: \"{}\" and \"{}\".",
            name, existing, value
        ))),
        Some(_) => Ok(()),
        None => {
            parameters.insert(name.to_string(), value);
            Ok(())
        }
    }
}

/// Text of a `param` element.
///
/// A value holding markup (an `_xml` typed parameter) is returned as the
/// verbatim source between the tags.
fn param_value(source: &str, param: Node<'_, '_>) -> String {
    if param.children().any(|c| c.is_element()) {
        let first = param.first_child().map(|c| c.range().start);
        let last = param.last_child().map(|c| c.range().end);
        if let (Some(start), Some(end)) = (first, last) {
            return source[start..end].to_string();
        }
    }

    param
        .children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect()
}
