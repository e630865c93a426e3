//! Minimal XML element tree.
//!
//! Cryptfile documents, DRMInfo sections and DASH ContentProtection fragments
//! are built as [`Element`] trees and only turned into text at the edge.
//! Writing goes through `quick-xml`; reading back uses `roxmltree`.
use std::io::Write;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{Error, Result};

/// A child of an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with ordered attributes and children.
///
/// Names are kept qualified (`cenc:pssh`); namespace declarations are plain
/// `xmlns:*` attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Set an attribute, replacing any previous value with the same name.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an attribute value by qualified name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(Node::Text(text.into()));
    }

    pub fn nodes(&self) -> &[Node] {
        &self.children
    }

    /// Child elements in document order.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Child elements with the given qualified name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children().filter(move |e| e.name == name)
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Serialize as an indented standalone document with an XML declaration.
    pub fn to_xml_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        String::from_utf8(buf).map_err(|e| Error::XmlError(e.to_string()))
    }

    /// Serialize as an indented standalone document into `out`.
    pub fn write_to<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = Writer::new_with_indent(out, b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| Error::XmlError(e.to_string()))?;
        write_element(&mut writer, self)
    }

    /// Serialize as a compact fragment without an XML declaration.
    pub fn to_fragment_string(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, self)?;
        String::from_utf8(writer.into_inner()).map_err(|e| Error::XmlError(e.to_string()))
    }

    /// Parse a document and return its root element.
    ///
    /// Whitespace-only text is dropped. Namespaced names are rebuilt with the
    /// prefix in scope; `xmlns` declarations are not carried over.
    pub fn parse(text: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(text).map_err(|e| Error::XmlError(e.to_string()))?;
        Ok(convert_node(doc.root_element()))
    }
}

fn write_element<W: Write>(writer: &mut Writer<W>, element: &Element) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (name, value) in element.attributes.iter() {
        start.push_attribute((name.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| Error::XmlError(e.to_string()));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| Error::XmlError(e.to_string()))?;
    for child in element.children.iter() {
        match child {
            Node::Element(e) => write_element(writer, e)?,
            Node::Text(t) => writer
                .write_event(Event::Text(BytesText::new(t)))
                .map_err(|e| Error::XmlError(e.to_string()))?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(|e| Error::XmlError(e.to_string()))
}

/// Rebuild `prefix:name` from a resolved namespace, as written in the source.
fn qualified_name(node: roxmltree::Node<'_, '_>, namespace: Option<&str>, name: &str) -> String {
    let prefix = namespace.and_then(|uri| node.lookup_prefix(uri));
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, name),
        _ => name.to_string(),
    }
}

fn convert_node(node: roxmltree::Node<'_, '_>) -> Element {
    let tag = node.tag_name();
    let mut element = Element::new(qualified_name(node, tag.namespace(), tag.name()));
    for attr in node.attributes() {
        element.set_attr(
            qualified_name(node, attr.namespace(), attr.name()),
            attr.value(),
        );
    }
    for child in node.children() {
        if child.is_element() {
            element.push_child(convert_node(child));
        } else if let Some(text) = child.text() {
            if child.is_text() && !text.trim().is_empty() {
                element.push_text(text.trim());
            }
        }
    }
    element
}
