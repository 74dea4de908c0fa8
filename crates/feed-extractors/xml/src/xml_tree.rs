use feed_core::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Key used for element text when an element also has attributes or children
pub const TEXT_KEY: &str = "#text";

/// Parsed XML document; names are stored without namespace prefixes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl Element {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Text(text) => Some(text.as_str()),
            XmlNode::Element(_) => None,
        })
    }

    /// Concatenated text of this element and all its descendants
    pub fn string_value(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                XmlNode::Text(text) => out.push_str(text),
                XmlNode::Element(element) => element.collect_text(out),
            }
        }
    }

    /// Converts the element into a raw record.
    ///
    /// Text-only elements become strings, empty ones null. Otherwise an object
    /// keyed by attribute and child names; repeated children become arrays and
    /// an attribute sharing a child's name is prefixed with `@`.
    pub fn to_record(&self) -> Value {
        let text: String = self.texts().collect();
        let has_children = self.child_elements().next().is_some();

        if self.attributes.is_empty() && !has_children {
            return if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            };
        }

        let mut record = Map::new();
        for (name, value) in &self.attributes {
            let key = if self.child_elements().any(|child| &child.name == name) {
                format!("@{}", name)
            } else {
                name.clone()
            };
            record.insert(key, Value::String(value.clone()));
        }

        for child in self.child_elements() {
            let value = child.to_record();
            match record.get_mut(&child.name) {
                Some(Value::Array(items)) if self.is_repeated(&child.name) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    let value = if self.is_repeated(&child.name) {
                        Value::Array(vec![value])
                    } else {
                        value
                    };
                    record.insert(child.name.clone(), value);
                }
            }
        }

        if !text.is_empty() {
            record.insert(TEXT_KEY.to_string(), Value::String(text));
        }
        Value::Object(record)
    }

    fn is_repeated(&self, name: &str) -> bool {
        self.child_elements().filter(|child| child.name == name).nth(1).is_some()
    }
}

/// Parses a response body into a document tree
pub fn parse_document(body: &[u8]) -> Result<Document> {
    let mut reader = Reader::from_reader(body);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Err(e) => {
                return Err(Error::Extraction(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            Ok(Event::Start(start)) => stack.push(open_element(&start)?),
            Ok(Event::Empty(start)) => {
                let element = open_element(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| Error::Extraction("unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(text)) => {
                let text = text
                    .unescape()
                    .map_err(|e| Error::Extraction(format!("invalid XML text: {}", e)))?;
                push_text(&mut stack, &text);
            }
            Ok(Event::CData(data)) => {
                let data = data.into_inner();
                push_text(&mut stack, &String::from_utf8_lossy(&data));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(Error::Extraction(format!(
            "malformed XML: element <{}> is never closed",
            open.name
        )));
    }
    root.map(|root| Document { root })
        .ok_or_else(|| Error::Extraction("XML body has no root element".to_string()))
}

fn open_element(start: &BytesStart<'_>) -> Result<Element> {
    let mut element = Element::new(decode_name(start.local_name().as_ref()));

    for attribute in start.attributes() {
        let attribute =
            attribute.map_err(|e| Error::Extraction(format!("invalid XML attribute: {}", e)))?;
        let key = attribute.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let value = attribute
            .unescape_value()
            .map_err(|e| Error::Extraction(format!("invalid XML attribute value: {}", e)))?;
        element.attributes.push((
            decode_name(attribute.key.local_name().as_ref()),
            value.into_owned(),
        ));
    }

    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(Error::Extraction(format!(
            "malformed XML: second root element <{}>",
            element.name
        ))),
    }
}

/// Whitespace-only text between elements is layout, not content
fn push_text(stack: &mut [Element], text: &str) {
    if text.trim().is_empty() {
        return;
    }
    // text outside the root element is ignored
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlNode::Text(text.to_string()));
    }
}

fn decode_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}
