use std::borrow::Cow;
use std::io::{Read, Write};

use xml::common::XmlVersion;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent};
use xmltree::{Element, XMLNode};

use crate::errors::DavError;
use crate::store::DAV_NS;
use crate::util::MemBuffer;
use crate::DavResult;

pub(crate) trait ElementExt {
    /// Is this `DAV:name`.
    fn is_dav(&self, name: &str) -> bool;
    /// Iterator over the child elements, skipping text and comments.
    fn child_elems_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Element> + 'a>;
    /// First child element named `DAV:name`.
    fn dav_child(&self, name: &str) -> Option<&Element>;
    /// Write this element with xml-rs.
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()>;
}

impl ElementExt for Element {
    fn is_dav(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(DAV_NS)
    }

    fn child_elems_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Element> + 'a> {
        Box::new(self.children.iter().filter_map(|n| n.as_element()))
    }

    fn dav_child(&self, name: &str) -> Option<&Element> {
        self.child_elems_iter().find(|e| e.is_dav(name))
    }


    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let name = match self.prefix {
            Some(ref prefix) => format!("{}:{}", prefix, self.name),
            None => self.name.clone(),
        };
        let mut start = XmlEvent::start_element(name.as_str());
        if let Some(ref ns) = self.namespace {
            start = match self.prefix {
                Some(ref prefix) => start.ns(prefix.as_str(), ns.as_str()),
                None => start.default_ns(ns.as_str()),
            };
        }
        let mut attrs: Vec<_> = self.attributes.iter().collect();
        attrs.sort();
        for (k, v) in attrs {
            start = start.attr(k.as_str(), v.as_str());
        }
        emitter.write(start)?;
        write_nodes(emitter, &self.children)?;
        emitter.write(XmlEvent::end_element())
    }
}

fn write_nodes<W: Write>(emitter: &mut EventWriter<W>, nodes: &[XMLNode]) -> xml::writer::Result<()> {
    for node in nodes {
        match node {
            XMLNode::Element(e) => e.write_ev(emitter)?,
            XMLNode::Text(t) => emitter.write(XmlEvent::Characters(t.as_str()))?,
            XMLNode::CData(t) => emitter.write(XmlEvent::CData(t.as_str()))?,
            XMLNode::Comment(_) | XMLNode::ProcessingInstruction(..) => {}
        }
    }
    Ok(())
}

/// Parse a request body. Empty bodies are not accepted here.
pub(crate) fn parse_xml<R: Read>(body: R) -> DavResult<Element> {
    let elem = Element::parse(body)?;
    Ok(elem)
}

/// An emitter for response bodies.
pub(crate) fn emitter(buffer: MemBuffer) -> DavResult<EventWriter<MemBuffer>> {
    let mut emitter = EmitterConfig::new()
        .perform_indent(false)
        .normalize_empty_elements(false)
        .create_writer(buffer);
    emitter.write(XmlEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    Ok(emitter)
}

/// Serialize the content of an element for storage.
pub(crate) fn fragment_of(nodes: &[XMLNode]) -> DavResult<String> {
    let mut emitter = EmitterConfig::new()
        .perform_indent(false)
        .write_document_declaration(false)
        .create_writer(MemBuffer::new());
    write_nodes(&mut emitter, nodes)?;
    let bytes = emitter.into_inner().take();
    String::from_utf8(bytes.to_vec()).map_err(|_| DavError::malformed("invalid UTF-8 in XML"))
}

/// Write a stored fragment back out as xml events.
///
/// A fragment that does not parse on its own (an undeclared prefix, say)
/// is written as text.
pub(crate) fn write_fragment<W: Write>(emitter: &mut EventWriter<W>, fragment: &str) -> DavResult<()> {
    if fragment.is_empty() {
        return Ok(());
    }
    let wrapped = format!("<fragment>{fragment}</fragment>");
    match Element::parse(wrapped.as_bytes()) {
        Ok(elem) => write_nodes(emitter, &elem.children)?,
        Err(e) => {
            trace!("xml: stored fragment does not parse ({e}), writing it as text");
            emitter.write(XmlEvent::Characters(fragment))?;
        }
    }
    Ok(())
}

/// Start an element in the DAV: namespace. The `D` prefix is declared on
/// the document root.
pub(crate) fn start_dav<W: Write>(emitter: &mut EventWriter<W>, name: &str) -> DavResult<()> {
    let name = format!("D:{name}");
    emitter.write(XmlEvent::start_element(name.as_str()))?;
    Ok(())
}

pub(crate) fn end<W: Write>(emitter: &mut EventWriter<W>) -> DavResult<()> {
    emitter.write(XmlEvent::end_element())?;
    Ok(())
}

/// `<D:name>text</D:name>`
pub(crate) fn dav_text_elem<W: Write>(emitter: &mut EventWriter<W>, name: &str, text: &str) -> DavResult<()> {
    start_dav(emitter, name)?;
    if !text.is_empty() {
        emitter.write(XmlEvent::Characters(text))?;
    }
    end(emitter)
}

/// Start an element for a property name, declaring its namespace when it
/// is not DAV:.
pub(crate) fn start_prop<W: Write>(
    emitter: &mut EventWriter<W>,
    namespace: &str,
    local_name: &str,
    attributes: &[(String, String)],
) -> DavResult<()> {
    let name: Cow<str> = if namespace == DAV_NS {
        Cow::Owned(format!("D:{local_name}"))
    } else if namespace.is_empty() {
        Cow::Borrowed(local_name)
    } else {
        Cow::Owned(format!("X:{local_name}"))
    };
    let mut start = XmlEvent::start_element(name.as_ref());
    if namespace.is_empty() {
        start = start.default_ns("");
    } else if namespace != DAV_NS {
        start = start.ns("X", namespace);
    }
    for (k, v) in attributes {
        start = start.attr(k.as_str(), v.as_str());
    }
    emitter.write(start)?;
    Ok(())
}
