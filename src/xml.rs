// src/xml.rs

//! Minimal XML element tree on top of quick-xml
//!
//! The variants and comps documents are small and are read, filtered and
//! written back whole, so a plain owned tree is easier to work with than
//! a streaming reader.

use crate::error::{Error, Result};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_text(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.attrs.push((name.to_string(), value.to_string())),
        }
    }

    /// Direct children named `name`
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Text of the first child named `name`
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// Replace the text of child `name`, creating it if missing
    pub fn set_child_text(&mut self, name: &str, text: &str) {
        match self.child_mut(name) {
            Some(child) => child.text = text.to_string(),
            None => self.children.push(Element::with_text(name, text)),
        }
    }
}

fn xml_error(what: &str, err: impl ToString) -> Error {
    Error::parse(what, err)
}

fn start_element(what: &str, start: &BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(&name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| xml_error(what, e))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| xml_error(what, e))?
            .into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

/// Parse a document into its root element; `what` names it in errors
pub fn parse(what: &str, content: &str) -> Result<Element> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().map_err(|e| xml_error(what, e))? {
            Event::Start(start) => stack.push(start_element(what, &start)?),
            Event::Empty(start) => {
                let element = start_element(what, &start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    let text = text.unescape().map_err(|e| xml_error(what, e))?;
                    current.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let Some(element) = stack.pop() else {
                    return Err(xml_error(what, "unbalanced closing tag"));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(xml_error(what, "unexpected end of document"));
    }
    root.ok_or_else(|| xml_error(what, "document has no root element"))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| xml_error("XML output", e))
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attrs {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if element.children.is_empty() && element.text.is_empty() {
        emit(writer, Event::Empty(start))?;
        return Ok(());
    }
    emit(writer, Event::Start(start))?;
    if !element.text.is_empty() {
        emit(writer, Event::Text(BytesText::new(&element.text)))?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    emit(writer, Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}

/// Serialize `root` with an XML declaration and an optional DOCTYPE line
pub fn write(root: &Element, doctype: Option<&str>) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    if let Some(doctype) = doctype {
        emit(&mut writer, Event::DocType(BytesText::from_escaped(doctype)))?;
    }
    write_element(&mut writer, root)?;
    let mut out = String::from_utf8(writer.into_inner())
        .map_err(|e| xml_error(&root.name, e))?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_with_attributes() {
        let doc = r#"<?xml version="1.0"?>
<variants>
  <variant id="Server" type="variant">
    <arches><arch>x86_64</arch></arches>
    <groups><group glob="true">core*</group></groups>
  </variant>
</variants>"#;
        let root = parse("variants", doc).unwrap();
        assert_eq!(root.name, "variants");
        let variant = root.child("variant").unwrap();
        assert_eq!(variant.attr("id"), Some("Server"));
        assert_eq!(variant.child("arches").unwrap().child_text("arch"), Some("x86_64"));
        let group = variant.child("groups").unwrap().child("group").unwrap();
        assert_eq!(group.attr("glob"), Some("true"));
        assert_eq!(group.text, "core*");
    }

    #[test]
    fn test_unbalanced_document_fails() {
        assert!(parse("comps", "<comps><group>").is_err());
    }

    #[test]
    fn test_write_round_trips_text_escaping() {
        let mut root = Element::new("comps");
        root.children.push(Element::with_text("name", "Tools & Utilities"));
        let out = write(&root, None).unwrap();
        assert!(out.contains("Tools &amp; Utilities"));
        let back = parse("comps", &out).unwrap();
        assert_eq!(back.child_text("name"), Some("Tools & Utilities"));
    }
}
