//! Generic, order-preserving XML element tree
//!
//! [`Element`] is the in-memory form of the data section carried by requests
//! and results, and of any other XML embedded in the protocol. Trees are built
//! either by [`ElementBuilder`] or by parsing XML text; once built they are
//! treated as values.

use quick_xml::Writer;
use quick_xml::escape::escape;
use quick_xml::events::attributes::Attribute as XmlAttribute;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use std::borrow::Cow;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};

#[derive(Debug, thiserror::Error)]
pub enum ElementError {
    #[error("element name must not be empty")]
    EmptyName,
    #[error("no \"{name}\" child element found in \"{parent}\"")]
    NoSuchChild { parent: String, name: String },
    #[error("found {count} \"{name}\" child elements in \"{parent}\" while exactly one was expected")]
    MultipleChildren {
        parent: String,
        name: String,
        count: usize,
    },
    #[error("unable to parse XML: {0}")]
    Xml(#[from] roxmltree::Error),
}

/// A single attribute, optionally qualified by a namespace URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attribute {
    pub namespace_uri: Option<String>,
    pub local_name: String,
    pub value: String,
}

/// An XML element: name, optional namespace, attributes, children and text.
///
/// Equality is structural. Children are compared in order, attributes are
/// compared regardless of the order they were set in.
#[derive(Debug, Clone)]
pub struct Element {
    local_name: String,
    namespace_uri: Option<String>,
    attributes: Vec<Attribute>,
    children: Vec<Element>,
    text: Option<String>,
}

impl Element {
    /// Creates an empty element without namespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use xins_core::element::Element;
    ///
    /// let data = Element::new("data").unwrap();
    /// assert_eq!(data.local_name(), "data");
    /// assert!(Element::new("").is_err());
    /// ```
    pub fn new(local_name: &str) -> Result<Self, ElementError> {
        Self::with_namespace(local_name, None)
    }

    /// Creates an empty element in the given namespace.
    pub fn with_namespace(
        local_name: &str,
        namespace_uri: Option<&str>,
    ) -> Result<Self, ElementError> {
        if local_name.is_empty() {
            return Err(ElementError::EmptyName);
        }
        Ok(Self {
            local_name: local_name.to_string(),
            namespace_uri: namespace_uri.filter(|ns| !ns.is_empty()).map(str::to_string),
            attributes: Vec::new(),
            children: Vec::new(),
            text: None,
        })
    }

    /// Parses an XML document and returns its root element.
    pub fn parse(xml: &str) -> Result<Self, ElementError> {
        let doc = roxmltree::Document::parse(xml)?;
        Ok(Self::from_node(doc.root_element()))
    }

    /// Converts a parsed node (and its subtree) into an owned element.
    ///
    /// Whitespace-only text is dropped from elements that have children;
    /// comments and processing instructions are ignored.
    pub(crate) fn from_node(node: roxmltree::Node<'_, '_>) -> Self {
        let tag = node.tag_name();
        let attributes = node
            .attributes()
            .map(|attr| Attribute {
                namespace_uri: attr.namespace().map(str::to_string),
                local_name: attr.name().to_string(),
                value: attr.value().to_string(),
            })
            .collect();

        let mut children = Vec::new();
        let mut text = String::new();
        for child in node.children() {
            if child.is_element() {
                children.push(Self::from_node(child));
            } else if child.is_text()
                && let Some(t) = child.text()
            {
                text.push_str(t);
            }
        }

        let layout_only = !children.is_empty() && text.trim().is_empty();
        Self {
            local_name: tag.name().to_string(),
            namespace_uri: tag.namespace().map(str::to_string),
            attributes,
            children,
            text: if text.is_empty() || layout_only { None } else { Some(text) },
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn namespace_uri(&self) -> Option<&str> {
        self.namespace_uri.as_deref()
    }

    /// Sets an unqualified attribute, replacing any previous value.
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        self.set_attribute_ns(None, name, value);
    }

    pub fn set_attribute_ns(&mut self, namespace_uri: Option<&str>, name: &str, value: &str) {
        let namespace_uri = namespace_uri.filter(|ns| !ns.is_empty());
        if let Some(existing) = self
            .attributes
            .iter_mut()
            .find(|a| a.local_name == name && a.namespace_uri.as_deref() == namespace_uri)
        {
            existing.value = value.to_string();
            return;
        }
        self.attributes.push(Attribute {
            namespace_uri: namespace_uri.map(str::to_string),
            local_name: name.to_string(),
            value: value.to_string(),
        });
    }

    /// Returns the value of an unqualified attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attribute_ns(None, name)
    }

    pub fn attribute_ns(&self, namespace_uri: Option<&str>, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.local_name == name && a.namespace_uri.as_deref() == namespace_uri)
            .map(|a| a.value.as_str())
    }

    /// Attributes in the order they were set.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Appends a child; the child list is never reordered.
    pub fn add_child(&mut self, child: Element) {
        self.children.push(child);
        self.drop_layout_text();
    }

    /// All direct children in document order.
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Direct children with the given local name, in document order.
    ///
    /// Each call returns a fresh iterator, so callers can walk the
    /// children as many times as they need.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.local_name == name)
    }

    /// Returns the only direct child with the given name.
    ///
    /// Fails when there is no such child or more than one.
    pub fn unique_child(&self, name: &str) -> Result<&Element, ElementError> {
        let mut matches = self.children.iter().filter(|c| c.local_name == name);
        let first = matches.next().ok_or_else(|| ElementError::NoSuchChild {
            parent: self.local_name.clone(),
            name: name.to_string(),
        })?;
        let extra = matches.count();
        if extra > 0 {
            return Err(ElementError::MultipleChildren {
                parent: self.local_name.clone(),
                name: name.to_string(),
                count: extra + 1,
            });
        }
        Ok(first)
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Whitespace-only text is kept on leaf elements and dropped once the
    /// element has children, matching what parsing produces.
    pub fn set_text(&mut self, text: Option<&str>) {
        self.text = text.filter(|t| !t.is_empty()).map(str::to_string);
        self.drop_layout_text();
    }

    fn drop_layout_text(&mut self) {
        if !self.children.is_empty() && self.text.as_deref().is_some_and(|t| t.trim().is_empty()) {
            self.text = None;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.children.is_empty() && self.text.is_none()
    }

    /// Writes the element as markup, escaping attribute values and text.
    pub fn write_to<W: Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        self.write_with_scope(writer, None)
    }

    fn write_with_scope<W: Write>(
        &self,
        writer: &mut Writer<W>,
        parent_ns: Option<&str>,
    ) -> io::Result<()> {
        let mut start = BytesStart::new(self.local_name.as_str());
        if self.namespace_uri.as_deref() != parent_ns {
            push_escaped(&mut start, "xmlns", self.namespace_uri.as_deref().unwrap_or(""));
        }

        let mut prefix_index = 0;
        for attr in &self.attributes {
            match &attr.namespace_uri {
                None => push_escaped(&mut start, &attr.local_name, &attr.value),
                Some(ns) => {
                    let prefix = format!("ns{}", prefix_index);
                    prefix_index += 1;
                    push_escaped(&mut start, &format!("xmlns:{}", prefix), ns);
                    push_escaped(&mut start, &format!("{}:{}", prefix, attr.local_name), &attr.value);
                }
            }
        }

        if self.children.is_empty() && self.text.is_none() {
            return writer.write_event(Event::Empty(start));
        }

        writer.write_event(Event::Start(start))?;
        if let Some(text) = &self.text {
            writer.write_event(Event::Text(BytesText::from_escaped(escape_text(text))))?;
        }
        for child in &self.children {
            child.write_with_scope(writer, self.namespace_uri.as_deref())?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.local_name.as_str())))
    }

    /// Serializes the element to an XML fragment (no declaration).
    pub fn to_xml_string(&self) -> String {
        let mut writer = Writer::new(Vec::new());
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut writer);
        String::from_utf8_lossy(&writer.into_inner()).into_owned()
    }

    fn sorted_attributes(&self) -> Vec<&Attribute> {
        let mut attrs: Vec<&Attribute> = self.attributes.iter().collect();
        attrs.sort();
        attrs
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.local_name == other.local_name
            && self.namespace_uri == other.namespace_uri
            && self.text == other.text
            && self.attributes.len() == other.attributes.len()
            && self.sorted_attributes() == other.sorted_attributes()
            && self.children == other.children
    }
}

impl Eq for Element {}

impl Hash for Element {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.local_name.hash(state);
        self.namespace_uri.hash(state);
        self.sorted_attributes().hash(state);
        self.children.hash(state);
        self.text.hash(state);
    }
}

fn push_escaped(start: &mut BytesStart<'_>, name: &str, value: &str) {
    let value = escape_attribute(value);
    start.push_attribute(XmlAttribute::from((name.as_bytes(), value.as_bytes())));
}

/// Escapes character data so that a parser reads back exactly `raw`.
///
/// Carriage returns become `&#13;`; a literal one would be folded into a
/// line feed by end-of-line handling.
pub(crate) fn escape_text(raw: &str) -> Cow<'_, str> {
    let escaped = escape(raw);
    if escaped.contains('\r') {
        Cow::Owned(escaped.replace('\r', "&#13;"))
    } else {
        escaped
    }
}

/// Escapes an attribute value. Line feeds, carriage returns and tabs are
/// written as character references, which attribute normalization keeps.
pub(crate) fn escape_attribute(raw: &str) -> Cow<'_, str> {
    let escaped = escape(raw);
    if escaped.contains(['\n', '\r', '\t']) {
        Cow::Owned(
            escaped
                .replace('\n', "&#10;")
                .replace('\r', "&#13;")
                .replace('\t', "&#9;"),
        )
    } else {
        escaped
    }
}

/// Builds an [`Element`] tree in one expression.
///
/// # Examples
///
/// ```
/// use xins_core::element::ElementBuilder;
///
/// let data = ElementBuilder::new("data")
///     .unwrap()
///     .child(
///         ElementBuilder::new("missing-param")
///             .unwrap()
///             .attribute("param", "inputText")
///             .build(),
///     )
///     .build();
/// assert_eq!(data.children().len(), 1);
/// ```
#[derive(Debug)]
pub struct ElementBuilder {
    element: Element,
}

impl ElementBuilder {
    pub fn new(local_name: &str) -> Result<Self, ElementError> {
        Ok(Self {
            element: Element::new(local_name)?,
        })
    }

    pub fn with_namespace(local_name: &str, namespace_uri: &str) -> Result<Self, ElementError> {
        Ok(Self {
            element: Element::with_namespace(local_name, Some(namespace_uri))?,
        })
    }

    pub fn attribute(mut self, name: &str, value: &str) -> Self {
        self.element.set_attribute(name, value);
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.element.add_child(child);
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.element.set_text(Some(text));
        self
    }

    pub fn build(self) -> Element {
        self.element
    }
}
