//! Serializes function results to the XML result grammar

use crate::element::escape_text;
use crate::function::{FunctionSpec, ParamType};
use crate::result::CallResultData;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::{self, Write};

/// Writes `result` as a complete UTF-8 XML document to `out`.
///
/// Events are written to the sink as they are produced; nothing is buffered
/// here. Parameters with an empty name or value are skipped. When `spec`
/// declares an output parameter as `_xml` its value is written without
/// escaping; without a spec every value is escaped.
pub fn write_result<W: Write>(
    out: W,
    result: &CallResultData,
    spec: Option<&FunctionSpec>,
) -> io::Result<()> {
    let mut writer = Writer::new(out);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("result");
    if let Some(code) = result.error_code() {
        root.push_attribute(("errorcode", code));
    }
    writer.write_event(Event::Start(root))?;

    for (name, value) in result.parameters() {
        if name.is_empty() || value.is_empty() {
            continue;
        }
        let mut param = BytesStart::new("param");
        param.push_attribute(("name", name.as_str()));
        writer.write_event(Event::Start(param))?;

        let raw = spec.and_then(|s| s.output_type(name)) == Some(ParamType::Xml);
        if raw {
            writer.write_event(Event::Text(BytesText::from_escaped(value.as_str())))?;
        } else {
            writer.write_event(Event::Text(BytesText::from_escaped(escape_text(value))))?;
        }
        writer.write_event(Event::End(BytesEnd::new("param")))?;
    }

    if let Some(data) = result.data_element() {
        data.write_to(&mut writer)?;
    }

    writer.write_event(Event::End(BytesEnd::new("result")))?;
    writer.into_inner().flush()
}

/// Serializes `result` into a new buffer.
///
/// # Examples
///
/// ```
/// use xins_core::result::CallResultData;
/// use xins_core::result_outputter::result_to_bytes;
///
/// let result = CallResultData::success().with_param("a", "1");
/// assert_eq!(
///     result_to_bytes(&result, None),
///     br#"<?xml version="1.0" encoding="UTF-8"?><result><param name="a">1</param></result>"#
/// );
/// ```
pub fn result_to_bytes(result: &CallResultData, spec: Option<&FunctionSpec>) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(256);
    // Writing into a Vec cannot fail.
    let _ = write_result(&mut buffer, result, spec);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, ElementBuilder};
    use crate::function::ParamSpec;
    use crate::result::Parameters;

    fn output(result: &CallResultData, spec: Option<&FunctionSpec>) -> String {
        String::from_utf8(result_to_bytes(result, spec)).unwrap()
    }

    #[test]
    fn test_empty_success() {
        assert_eq!(
            output(&CallResultData::success(), None),
            r#"<?xml version="1.0" encoding="UTF-8"?><result></result>"#
        );
    }

    #[test]
    fn test_error_code_escaped() {
        let result = CallResultData::error("Bad\"<Code>");
        let xml = output(&result, None);
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><result errorcode="Bad&quot;&lt;Code&gt;">"#));
    }

    #[test]
    fn test_empty_values_skipped() {
        let mut params = Parameters::new();
        params.insert("a".to_string(), "1".to_string());
        params.insert("b".to_string(), String::new());
        params.insert(String::new(), "x".to_string());
        let result = CallResultData::new(None, params, None);
        assert_eq!(
            output(&result, None),
            r#"<?xml version="1.0" encoding="UTF-8"?><result><param name="a">1</param></result>"#
        );
    }

    #[test]
    fn test_text_escaped() {
        let result = CallResultData::success().with_param("q", "a & <b>");
        assert!(output(&result, None).contains(r#"<param name="q">a &amp; &lt;b&gt;</param>"#));
    }

    #[test]
    fn test_carriage_return_written_as_reference() {
        let result = CallResultData::success().with_param("p", "a\r\nb");
        assert!(output(&result, None).contains("<param name=\"p\">a&#13;\nb</param>"));
    }

    #[test]
    fn test_xml_param_written_raw_only_with_spec() {
        let spec = FunctionSpec::new("F").output(ParamSpec::required("doc", ParamType::Xml));
        let result = CallResultData::success().with_param("doc", "<a>b</a>");

        assert!(output(&result, Some(&spec)).contains(r#"<param name="doc"><a>b</a></param>"#));
        assert!(
            output(&result, None).contains(r#"<param name="doc">&lt;a&gt;b&lt;/a&gt;</param>"#)
        );
    }

    #[test]
    fn test_data_section() {
        let data = ElementBuilder::new("data")
            .unwrap()
            .child(
                ElementBuilder::new("pet")
                    .unwrap()
                    .attribute("name", "Tom & Jerry")
                    .build(),
            )
            .build();
        let result = CallResultData::success().with_data(data);
        assert_eq!(
            output(&result, None),
            r#"<?xml version="1.0" encoding="UTF-8"?><result><data><pet name="Tom &amp; Jerry"/></data></result>"#
        );
    }

    #[test]
    fn test_empty_data_section() {
        let result = CallResultData::success().with_data(Element::new("data").unwrap());
        assert!(output(&result, None).ends_with("<result><data/></result>"));
    }

    #[test]
    fn test_write_error_propagates() {
        struct FailingSink;
        impl Write for FailingSink {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let err = write_result(FailingSink, &CallResultData::success(), None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
