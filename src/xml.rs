//! Owned XML element tree used as the in-memory feed document.
//!
//! OPDS output is assembled as a tree of [`XmlElement`] nodes and serialized
//! through `quick-xml` events. Cached per-work entry fragments are stored as
//! serialized text and re-parsed back into the tree when reused, so this
//! module supports both directions.
//!
//! Namespaces are handled by convention: elements and attributes carry their
//! prefixed names (`opds:availability`, `dcterms:language`) and the feed or
//! standalone-entry root declares the prefix map. Cached fragments are always
//! produced by this module, so prefixes are stable across the round trip.

use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

/// Atom (the default, unprefixed namespace).
pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
/// OPDS catalog extensions (`opds:` prefix).
pub const OPDS_NS: &str = "http://opds-spec.org/2010/catalog";
/// Dublin Core terms (`dcterms:` prefix).
pub const DCTERMS_NS: &str = "http://purl.org/dc/terms/";
/// schema.org vocabulary (`schema:` prefix).
pub const SCHEMA_NS: &str = "http://schema.org/";
/// BIBFRAME vocabulary (`bibframe:` prefix).
pub const BIBFRAME_NS: &str = "http://bibframe.org/vocab/";
/// Application extension vocabulary (`app:` prefix).
pub const APP_NS: &str = "http://lectern.dev/terms/";

/// Prefix → namespace pairs declared on document roots.
pub const NAMESPACES: &[(&str, &str)] = &[
    ("xmlns", ATOM_NS),
    ("xmlns:opds", OPDS_NS),
    ("xmlns:dcterms", DCTERMS_NS),
    ("xmlns:schema", SCHEMA_NS),
    ("xmlns:bibframe", BIBFRAME_NS),
    ("xmlns:app", APP_NS),
];

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(String),

    #[error("serialized XML is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("failed to write XML: {0}")]
    Write(String),
}

/// A child of an element: nested element or character data.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// One element of the document tree.
///
/// Attribute insertion order is preserved so serialization is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// An element whose only child is a text node, e.g. `<title>Moby Dick</title>`.
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut el = Self::new(name);
        el.push_text(text);
        el
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set an attribute, replacing any existing value for the same key.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.attributes.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            self.attributes.push((key, value));
        }
    }

    /// Builder-style [`set_attr`](Self::set_attr).
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn push(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    /// Builder-style [`push`](Self::push).
    pub fn child(mut self, child: XmlElement) -> Self {
        self.push(child);
        self
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(XmlNode::Text(text.into()));
    }

    pub fn extend(&mut self, children: impl IntoIterator<Item = XmlElement>) {
        for child in children {
            self.push(child);
        }
    }

    /// Concatenated character data of direct text children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            if let XmlNode::Text(t) = child {
                out.push_str(t);
            }
        }
        out
    }

    /// Direct child elements, in document order.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// Direct child elements with the given (prefixed) name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.child_elements().filter(move |e| e.name == name)
    }

    pub fn first_child_named(&self, name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|e| e.name == name)
    }

    /// Depth-first search for the first descendant with the given name.
    pub fn descendant_named(&self, name: &str) -> Option<&XmlElement> {
        for child in self.child_elements() {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.descendant_named(name) {
                return Some(found);
            }
        }
        None
    }

    /// Serialize this element (and its subtree) without an XML declaration.
    ///
    /// Used for cached entry fragments, where the enclosing feed supplies
    /// the namespace declarations.
    pub fn to_fragment(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        self.write_into(&mut writer)?;
        Ok(String::from_utf8(writer.into_inner().into_inner())?)
    }

    /// Serialize this element as a complete document: XML declaration plus
    /// the full namespace map on the root.
    pub fn to_document(&self) -> Result<String, XmlError> {
        let mut root = self.clone();
        for (prefix, uri) in NAMESPACES {
            root.set_attr(*prefix, *uri);
        }
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(write_error)?;
        root.write_into(&mut writer)?;
        Ok(String::from_utf8(writer.into_inner().into_inner())?)
    }

    fn write_into(&self, writer: &mut Writer<Cursor<Vec<u8>>>) -> Result<(), XmlError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        if self.children.is_empty() {
            writer.write_event(Event::Empty(start)).map_err(write_error)?;
            return Ok(());
        }
        writer.write_event(Event::Start(start)).map_err(write_error)?;
        for child in &self.children {
            match child {
                XmlNode::Element(e) => e.write_into(writer)?,
                XmlNode::Text(t) => writer
                    .write_event(Event::Text(BytesText::new(t)))
                    .map_err(write_error)?,
            }
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(write_error)?;
        Ok(())
    }

    /// Parse a single-rooted fragment previously produced by
    /// [`to_fragment`](Self::to_fragment) or [`to_document`](Self::to_document).
    pub fn parse(input: &str) -> Result<XmlElement, XmlError> {
        let mut reader = Reader::from_str(input);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let el = element_from_start(&e, &reader)?;
                    stack.push(el);
                }
                Ok(Event::Empty(e)) => {
                    let el = element_from_start(&e, &reader)?;
                    attach(&mut stack, &mut root, el)?;
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| XmlError::Parse(e.to_string()))?
                        .into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.push_text(text);
                    }
                }
                Ok(Event::End(_)) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| XmlError::Parse("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, el)?;
                }
                Ok(Event::Eof) => break,
                Ok(Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_)) => {}
                Ok(Event::CData(t)) => {
                    let text = String::from_utf8_lossy(&t).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.push_text(text);
                    }
                }
                Err(e) => return Err(XmlError::Parse(e.to_string())),
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(XmlError::Parse("unclosed element".into()));
        }
        root.ok_or_else(|| XmlError::Parse("no root element".into()))
    }
}

fn write_error(error: impl std::fmt::Display) -> XmlError {
    XmlError::Write(error.to_string())
}

fn element_from_start(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<XmlElement, XmlError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut el = XmlElement::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(|e| XmlError::Parse(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| XmlError::Parse(e.to_string()))?
            .into_owned();
        el.set_attr(key, value);
    }
    Ok(el)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    el: XmlElement,
) -> Result<(), XmlError> {
    if let Some(parent) = stack.last_mut() {
        parent.push(el);
    } else if root.is_none() {
        *root = Some(el);
    } else {
        return Err(XmlError::Parse("multiple root elements".into()));
    }
    Ok(())
}
