//! Owned XML element tree with canonical serialization.
//!
//! SAML signature verification needs to re-serialize parts of the document
//! in a canonical form (digest input and `SignedInfo`), and needs to remove
//! the `Signature` element before digesting. A stream parser cannot do
//! either, so assertions are parsed into this small owned tree.
//!
//! The canonical form implemented here is the exclusive-C14N subset this
//! verifier both produces and consumes: UTF-8, no comments, attributes
//! sorted, namespace declarations emitted where first visible (including a
//! binding for the element's own prefix inherited from outside the
//! canonicalized subtree), character data escaped per the C14N rules, empty
//! elements written as start/end pairs. Doctype declarations are rejected outright; a trust broker has no
//! business resolving external entities.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{ServiceError, ServiceResult};

/// An XML element with resolved namespace, attributes, and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// Qualified name as written (`prefix:local` or `local`).
    pub qname: String,
    /// Local part of the name.
    pub local: String,
    /// Resolved namespace URI, empty when unbound.
    pub namespace: String,
    /// Attributes as written, in document order, including `xmlns` decls.
    pub attrs: Vec<(String, String)>,
    /// Child nodes in document order.
    pub children: Vec<XmlNode>,
}

/// A node in the tree: element or character data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// A child element.
    Element(XmlElement),
    /// Unescaped character data.
    Text(String),
}

impl XmlElement {
    /// Value of an attribute by its literal (qualified) name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over child elements.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// First child element with the given namespace and local name.
    #[must_use]
    pub fn find_child(&self, namespace: &str, local: &str) -> Option<&XmlElement> {
        self.child_elements()
            .find(|e| e.namespace == namespace && e.local == local)
    }

    /// All child elements with the given namespace and local name.
    pub fn find_children<'a>(
        &'a self,
        namespace: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> {
        self.child_elements()
            .filter(move |e| e.namespace == namespace && e.local == local)
    }

    /// Concatenated text content of direct text children, trimmed.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let XmlNode::Text(t) = node {
                out.push_str(t);
            }
        }
        out.trim().to_string()
    }

    /// Remove direct child elements matching namespace and local name.
    pub fn remove_children(&mut self, namespace: &str, local: &str) {
        self.children.retain(|n| match n {
            XmlNode::Element(e) => !(e.namespace == namespace && e.local == local),
            XmlNode::Text(_) => true,
        });
    }
}

fn parse_err(detail: impl std::fmt::Display) -> ServiceError {
    ServiceError::invalid_argument(format!("malformed XML: {detail}"))
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

/// Namespace bindings in scope, innermost last.
#[derive(Debug, Default, Clone)]
struct NsScope {
    // (prefix or "" for default, uri)
    bindings: Vec<(String, String)>,
}

impl NsScope {
    fn resolve(&self, prefix: Option<&str>) -> String {
        let key = prefix.unwrap_or("");
        self.bindings
            .iter()
            .rev()
            .find(|(p, _)| p == key)
            .map(|(_, uri)| uri.clone())
            .unwrap_or_default()
    }
}

fn element_from_start(
    start: &quick_xml::events::BytesStart<'_>,
    scope: &mut NsScope,
) -> ServiceResult<XmlElement> {
    let qname = String::from_utf8(start.name().as_ref().to_vec())
        .map_err(|_| parse_err("non-UTF-8 element name"))?;

    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(parse_err)?;
        let key = String::from_utf8(attr.key.as_ref().to_vec())
            .map_err(|_| parse_err("non-UTF-8 attribute name"))?;
        let value = attr
            .unescape_value()
            .map_err(parse_err)?
            .into_owned();
        if key == "xmlns" {
            scope.bindings.push((String::new(), value.clone()));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.bindings.push((prefix.to_string(), value.clone()));
        }
        attrs.push((key, value));
    }

    let (prefix, local) = split_qname(&qname);
    let namespace = scope.resolve(prefix);

    Ok(XmlElement {
        local: local.to_string(),
        namespace,
        qname,
        attrs,
        children: Vec::new(),
    })
}

/// Parse a complete XML document into its root element.
///
/// # Errors
///
/// Returns [`ServiceError::InvalidArgument`] on syntax errors, doctype
/// declarations, processing instructions, or trailing content.
pub fn parse_document(bytes: &[u8]) -> ServiceResult<XmlElement> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(false);

    let mut buf = Vec::new();
    // Stack of open elements with the scope depth at which they started.
    let mut stack: Vec<(XmlElement, usize)> = Vec::new();
    let mut scope = NsScope::default();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(parse_err)?;
        match event {
            Event::Decl(_) => {},
            Event::DocType(_) => return Err(parse_err("doctype declarations are not allowed")),
            Event::PI(_) => return Err(parse_err("processing instructions are not allowed")),
            Event::CData(_) => return Err(parse_err("CDATA sections are not allowed")),
            Event::Comment(_) => {},
            Event::Start(start) => {
                if root.is_some() {
                    return Err(parse_err("content after document element"));
                }
                let depth = scope.bindings.len();
                let element = element_from_start(&start, &mut scope)?;
                stack.push((element, depth));
            },
            Event::Empty(start) => {
                if root.is_some() {
                    return Err(parse_err("content after document element"));
                }
                let depth = scope.bindings.len();
                let element = element_from_start(&start, &mut scope)?;
                scope.bindings.truncate(depth);
                match stack.last_mut() {
                    Some((parent, _)) => parent.children.push(XmlNode::Element(element)),
                    None => root = Some(element),
                }
            },
            Event::End(end) => {
                let (element, depth) = stack
                    .pop()
                    .ok_or_else(|| parse_err("unbalanced end tag"))?;
                if end.name().as_ref() != element.qname.as_bytes() {
                    return Err(parse_err(format!(
                        "mismatched end tag </{}>",
                        String::from_utf8_lossy(end.name().as_ref())
                    )));
                }
                scope.bindings.truncate(depth);
                match stack.last_mut() {
                    Some((parent, _)) => parent.children.push(XmlNode::Element(element)),
                    None => root = Some(element),
                }
            },
            Event::Text(text) => {
                let value = text.unescape().map_err(parse_err)?.into_owned();
                match stack.last_mut() {
                    Some((parent, _)) => parent.children.push(XmlNode::Text(value)),
                    None => {
                        if !value.trim().is_empty() {
                            return Err(parse_err("text outside the document element"));
                        }
                    },
                }
            },
            Event::Eof => break,
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(parse_err("unexpected end of document"));
    }
    root.ok_or_else(|| parse_err("empty document"))
}

// ============================================================================
// Canonical serialization
// ============================================================================

fn escape_text(out: &mut Vec<u8>, text: &str) {
    for b in text.bytes() {
        match b {
            b'&' => out.extend_from_slice(b"&amp;"),
            b'<' => out.extend_from_slice(b"&lt;"),
            b'>' => out.extend_from_slice(b"&gt;"),
            b'\r' => out.extend_from_slice(b"&#xD;"),
            other => out.push(other),
        }
    }
}

fn escape_attr(out: &mut Vec<u8>, value: &str) {
    for b in value.bytes() {
        match b {
            b'&' => out.extend_from_slice(b"&amp;"),
            b'<' => out.extend_from_slice(b"&lt;"),
            b'"' => out.extend_from_slice(b"&quot;"),
            b'\t' => out.extend_from_slice(b"&#x9;"),
            b'\n' => out.extend_from_slice(b"&#xA;"),
            b'\r' => out.extend_from_slice(b"&#xD;"),
            other => out.push(other),
        }
    }
}

fn canonicalize_into(element: &XmlElement, inherited: &[(String, String)], out: &mut Vec<u8>) {
    out.push(b'<');
    out.extend_from_slice(element.qname.as_bytes());

    // Namespace declarations first (sorted by prefix): the ones written on
    // the element itself, plus the binding for the element's own prefix
    // when that binding was inherited from outside the canonicalized
    // subtree. Declarations already emitted with the same value on an
    // ancestor are suppressed. Then regular attributes sorted by name.
    let mut ns_decls: Vec<(String, String)> = element
        .attrs
        .iter()
        .filter(|(k, _)| k == "xmlns" || k.starts_with("xmlns:"))
        .cloned()
        .collect();

    if !element.namespace.is_empty() {
        let own_decl = match split_qname(&element.qname).0 {
            Some(prefix) => format!("xmlns:{prefix}"),
            None => "xmlns".to_string(),
        };
        if !ns_decls.iter().any(|(k, _)| *k == own_decl) {
            ns_decls.push((own_decl, element.namespace.clone()));
        }
    }
    ns_decls.sort_by(|a, b| a.0.cmp(&b.0));

    let mut scope = inherited.to_vec();
    for (key, value) in &ns_decls {
        let already = scope
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .is_some_and(|(_, v)| v == value);
        if !already {
            out.push(b' ');
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b"=\"");
            escape_attr(out, value);
            out.push(b'"');
        }
        scope.push((key.clone(), value.clone()));
    }

    let mut plain: Vec<(&String, &String)> = element
        .attrs
        .iter()
        .filter(|(k, _)| k != "xmlns" && !k.starts_with("xmlns:"))
        .map(|(k, v)| (k, v))
        .collect();
    plain.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in plain {
        out.push(b' ');
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(b"=\"");
        escape_attr(out, value);
        out.push(b'"');
    }

    out.push(b'>');

    for child in &element.children {
        match child {
            XmlNode::Element(e) => canonicalize_into(e, &scope, out),
            XmlNode::Text(t) => escape_text(out, t),
        }
    }

    out.extend_from_slice(b"</");
    out.extend_from_slice(element.qname.as_bytes());
    out.push(b'>');
}

/// Serialize an element subtree in the canonical form described in the
/// module docs.
#[must_use]
pub fn canonicalize(element: &XmlElement) -> Vec<u8> {
    let mut out = Vec::new();
    canonicalize_into(element, &[], &mut out);
    out
}
