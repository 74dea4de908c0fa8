//! A small XPath 1.0 subset.
//!
//! Supported: absolute and relative location paths, the `/` and `//`
//! separators, name tests (namespace prefixes are ignored), `*`, `.`,
//! `@name`, `@*`, `text()` and the predicates `[n]`, `[last()]`, `[@a]`,
//! `[@a='v']`, `[child]`, `[child='v']` and `[text()='v']`.
//! Relative paths are evaluated from the root element.

use crate::xml_tree::{Document, Element, XmlNode};
use feed_core::{Error, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Compiled location path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    /// Preceded by `//`
    descendant: bool,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    SelfNode,
    Element(Option<String>),
    Attribute(Option<String>),
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Last,
    HasAttribute(String),
    AttributeEquals(String, String),
    HasChild(String),
    ChildEquals(String, String),
    TextEquals(String),
}

/// Node selected by a path.
///
/// Attributes and text nodes carry their owning element and their index in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selected<'a> {
    Element(&'a Element),
    Attribute {
        owner: &'a Element,
        index: usize,
        name: &'a str,
        value: &'a str,
    },
    Text {
        owner: &'a Element,
        index: usize,
        text: &'a str,
    },
}

impl Selected<'_> {
    pub fn string_value(&self) -> String {
        match self {
            Selected::Element(element) => element.string_value(),
            Selected::Attribute { value, .. } => value.to_string(),
            Selected::Text { text, .. } => text.to_string(),
        }
    }

    pub fn to_record(&self) -> Value {
        match self {
            Selected::Element(element) => element.to_record(),
            other => Value::String(other.string_value()),
        }
    }

    fn key(&self) -> NodeKey {
        match self {
            Selected::Element(element) => (address(element), ELEMENT, 0),
            Selected::Attribute { owner, index, .. } => (address(owner), ATTRIBUTE, *index),
            Selected::Text { owner, index, .. } => (address(owner), TEXT, *index),
        }
    }
}

/// Owning element address, node kind and index within the owner
type NodeKey = (usize, u8, usize);

const ELEMENT: u8 = 0;
const ATTRIBUTE: u8 = 1;
const TEXT: u8 = 2;
const DOCUMENT: u8 = 3;

fn address(element: &Element) -> usize {
    element as *const Element as usize
}

/// Preorder position of every node, attributes directly after their element
struct DocumentOrder {
    positions: HashMap<NodeKey, usize>,
}

impl DocumentOrder {
    fn new(root: &Element) -> Self {
        let mut positions = HashMap::new();
        positions.insert((address(root), DOCUMENT, 0), 0);
        let mut next = 1;
        Self::walk(root, &mut positions, &mut next);
        Self { positions }
    }

    fn walk(element: &Element, positions: &mut HashMap<NodeKey, usize>, next: &mut usize) {
        let owner = address(element);
        Self::number((owner, ELEMENT, 0), positions, next);
        for index in 0..element.attributes.len() {
            Self::number((owner, ATTRIBUTE, index), positions, next);
        }
        for (index, child) in element.children.iter().enumerate() {
            match child {
                XmlNode::Element(child) => Self::walk(child, positions, next),
                XmlNode::Text(_) => Self::number((owner, TEXT, index), positions, next),
            }
        }
    }

    fn number(key: NodeKey, positions: &mut HashMap<NodeKey, usize>, next: &mut usize) {
        positions.insert(key, *next);
        *next += 1;
    }

    fn position(&self, key: &NodeKey) -> usize {
        self.positions.get(key).copied().unwrap_or(usize::MAX)
    }
}

/// Evaluation context; the document node sits above the root element
#[derive(Clone, Copy)]
enum Context<'a> {
    Document(&'a Element),
    Node(Selected<'a>),
}

impl<'a> Context<'a> {
    fn key(&self) -> NodeKey {
        match self {
            Context::Document(root) => (address(root), DOCUMENT, 0),
            Context::Node(node) => node.key(),
        }
    }

    fn descendants_or_self(self, out: &mut Vec<Context<'a>>) {
        out.push(self);
        let element = match self {
            Context::Document(root) => {
                Context::Node(Selected::Element(root)).descendants_or_self(out);
                return;
            }
            Context::Node(Selected::Element(element)) => element,
            Context::Node(_) => return,
        };
        for child in element.child_elements() {
            Context::Node(Selected::Element(child)).descendants_or_self(out);
        }
    }
}

impl XPath {
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            Error::Extraction(format!("invalid XPath expression '{}': {}", expression, reason))
        };

        let mut rest = expression.trim();
        if rest.is_empty() {
            return Err(invalid("empty expression"));
        }

        let absolute = rest.starts_with('/');
        let mut descendant = false;
        if let Some(after) = rest.strip_prefix("//") {
            descendant = true;
            rest = after;
        } else if let Some(after) = rest.strip_prefix('/') {
            rest = after;
            if rest.is_empty() {
                return Ok(Self {
                    absolute,
                    steps: Vec::new(),
                });
            }
        }

        let mut steps = Vec::new();
        loop {
            let (step, remaining) =
                parse_step(rest, descendant).map_err(|reason| invalid(reason.as_str()))?;
            steps.push(step);
            rest = remaining;

            if rest.is_empty() {
                break;
            }
            if let Some(after) = rest.strip_prefix("//") {
                descendant = true;
                rest = after;
            } else if let Some(after) = rest.strip_prefix('/') {
                descendant = false;
                rest = after;
            } else {
                return Err(invalid(format!("unexpected '{}'", rest).as_str()));
            }
            if rest.is_empty() {
                return Err(invalid("path ends with a separator"));
            }
        }

        Ok(Self { absolute, steps })
    }

    /// Evaluates the path; nodes come back in document order without duplicates
    pub fn evaluate<'a>(&self, document: &'a Document) -> Vec<Selected<'a>> {
        let order = DocumentOrder::new(&document.root);
        let mut current = if self.absolute {
            vec![Context::Document(&document.root)]
        } else {
            vec![Context::Node(Selected::Element(&document.root))]
        };

        for step in &self.steps {
            let bases = if step.descendant {
                let mut expanded = Vec::new();
                for context in current {
                    context.descendants_or_self(&mut expanded);
                }
                expanded
            } else {
                current
            };

            let mut seen = HashSet::new();
            let mut next = Vec::new();
            for base in bases {
                let candidates = step.candidates(base);
                for candidate in step.filter(candidates) {
                    if seen.insert(candidate.key()) {
                        next.push(candidate);
                    }
                }
            }
            next.sort_by_key(|context| order.position(&context.key()));
            current = next;
        }

        current
            .into_iter()
            .map(|context| match context {
                Context::Document(root) => Selected::Element(root),
                Context::Node(node) => node,
            })
            .collect()
    }
}

impl Step {
    fn candidates<'a>(&self, base: Context<'a>) -> Vec<Context<'a>> {
        let element = match (&self.test, base) {
            (NodeTest::SelfNode, base) => return vec![base],
            (NodeTest::Element(name), Context::Document(root)) => {
                return if name_matches(name, &root.name) {
                    vec![Context::Node(Selected::Element(root))]
                } else {
                    Vec::new()
                };
            }
            (_, Context::Node(Selected::Element(element))) => element,
            _ => return Vec::new(),
        };

        match &self.test {
            NodeTest::Element(name) => element
                .child_elements()
                .filter(|child| name_matches(name, &child.name))
                .map(|child| Context::Node(Selected::Element(child)))
                .collect(),
            NodeTest::Attribute(name) => element
                .attributes
                .iter()
                .enumerate()
                .filter(|(_, (key, _))| name_matches(name, key))
                .map(|(index, (key, value))| {
                    Context::Node(Selected::Attribute {
                        owner: element,
                        index,
                        name: key.as_str(),
                        value: value.as_str(),
                    })
                })
                .collect(),
            NodeTest::Text => element
                .children
                .iter()
                .enumerate()
                .filter_map(|(index, child)| match child {
                    XmlNode::Text(text) => Some(Context::Node(Selected::Text {
                        owner: element,
                        index,
                        text: text.as_str(),
                    })),
                    XmlNode::Element(_) => None,
                })
                .collect(),
            NodeTest::SelfNode => vec![base],
        }
    }

    fn filter<'a>(&self, mut nodes: Vec<Context<'a>>) -> Vec<Context<'a>> {
        for predicate in &self.predicates {
            let len = nodes.len();
            nodes = nodes
                .into_iter()
                .enumerate()
                .filter(|(index, node)| predicate.matches(*node, index + 1, len))
                .map(|(_, node)| node)
                .collect();
        }
        nodes
    }
}

impl Predicate {
    fn matches(&self, node: Context<'_>, position: usize, len: usize) -> bool {
        let element = match node {
            Context::Node(Selected::Element(element)) | Context::Document(element) => Some(element),
            _ => None,
        };

        match self {
            Predicate::Position(n) => position == *n,
            Predicate::Last => position == len,
            Predicate::HasAttribute(name) => element.is_some_and(|e| e.attribute(name).is_some()),
            Predicate::AttributeEquals(name, expected) => {
                element.is_some_and(|e| e.attribute(name) == Some(expected.as_str()))
            }
            Predicate::HasChild(name) => {
                element.is_some_and(|e| e.child_elements().any(|c| &c.name == name))
            }
            Predicate::ChildEquals(name, expected) => element.is_some_and(|e| {
                e.child_elements()
                    .any(|c| &c.name == name && &c.string_value() == expected)
            }),
            Predicate::TextEquals(expected) => match node {
                Context::Node(Selected::Text { text, .. }) => text == expected,
                _ => element.is_some_and(|e| e.texts().any(|t| t == expected)),
            },
        }
    }
}

fn name_matches(test: &Option<String>, name: &str) -> bool {
    match test {
        Some(expected) => expected == name,
        None => true,
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

/// Strips a namespace prefix, `ns:item` matches `item`
fn local_name(name: &str) -> String {
    name.rsplit(':').next().unwrap_or(name).to_string()
}

fn split_name(input: &str) -> (&str, &str) {
    let end = input
        .char_indices()
        .find(|(_, c)| !is_name_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(input.len());
    input.split_at(end)
}

fn parse_step(input: &str, descendant: bool) -> std::result::Result<(Step, &str), String> {
    let (test, mut rest) = if let Some(rest) = input.strip_prefix("text()") {
        (NodeTest::Text, rest)
    } else if input.starts_with("..") {
        return Err("parent steps are not supported".to_string());
    } else if let Some(rest) = input.strip_prefix('.') {
        (NodeTest::SelfNode, rest)
    } else if let Some(rest) = input.strip_prefix('*') {
        (NodeTest::Element(None), rest)
    } else if let Some(rest) = input.strip_prefix("@*") {
        (NodeTest::Attribute(None), rest)
    } else if let Some(after) = input.strip_prefix('@') {
        let (name, rest) = split_name(after);
        if name.is_empty() {
            return Err("attribute name expected after '@'".to_string());
        }
        (NodeTest::Attribute(Some(local_name(name))), rest)
    } else {
        let (name, rest) = split_name(input);
        if name.is_empty() {
            return Err(format!("name expected at '{}'", input));
        }
        (NodeTest::Element(Some(local_name(name))), rest)
    };

    let mut predicates = Vec::new();
    while let Some(after) = rest.strip_prefix('[') {
        let close = closing_bracket(after).ok_or("unclosed predicate")?;
        predicates.push(parse_predicate(after[..close].trim())?);
        rest = &after[close + 1..];
    }

    Ok((
        Step {
            descendant,
            test,
            predicates,
        },
        rest,
    ))
}

fn closing_bracket(input: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_predicate(input: &str) -> std::result::Result<Predicate, String> {
    if input == "last()" {
        return Ok(Predicate::Last);
    }
    if let Ok(position) = input.parse::<usize>() {
        if position == 0 {
            return Err("positions start at 1".to_string());
        }
        return Ok(Predicate::Position(position));
    }

    if let Some((lhs, rhs)) = input.split_once('=') {
        let expected = literal(rhs.trim())?;
        let lhs = lhs.trim();
        return if lhs == "text()" {
            Ok(Predicate::TextEquals(expected))
        } else if let Some(name) = lhs.strip_prefix('@') {
            Ok(Predicate::AttributeEquals(checked_name(name)?, expected))
        } else {
            Ok(Predicate::ChildEquals(checked_name(lhs)?, expected))
        };
    }

    match input.strip_prefix('@') {
        Some(name) => Ok(Predicate::HasAttribute(checked_name(name)?)),
        None => Ok(Predicate::HasChild(checked_name(input)?)),
    }
}

fn checked_name(name: &str) -> std::result::Result<String, String> {
    if name.is_empty() || !name.chars().all(is_name_char) {
        return Err(format!("unsupported predicate '{}'", name));
    }
    Ok(local_name(name))
}

fn literal(input: &str) -> std::result::Result<String, String> {
    ['\'', '"']
        .iter()
        .find_map(|q| input.strip_prefix(*q).and_then(|s| s.strip_suffix(*q)))
        .map(str::to_string)
        .ok_or_else(|| format!("quoted literal expected, found '{}'", input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml_tree::parse_document;

    const FEED: &str = r#"<?xml version="1.0"?>
        <feed>
          <meta><next>c-2</next></meta>
          <listings>
            <listing id="1" status="active"><city>Austin</city></listing>
            <listing id="2" status="sold"><city>Boise</city></listing>
            <listing id="3" status="active"><city>Reno</city><featured/></listing>
          </listings>
        </feed>"#;

    fn select(expression: &str) -> Vec<String> {
        let doc = parse_document(FEED.as_bytes()).unwrap();
        XPath::parse(expression)
            .unwrap()
            .evaluate(&doc)
            .iter()
            .map(|node| match node {
                Selected::Element(e) => e.attribute("id").map(str::to_string).unwrap_or_else(|| e.string_value()),
                other => other.string_value(),
            })
            .collect()
    }

    #[test]
    fn test_relative_and_absolute_paths() {
        assert_eq!(select("listings/listing"), vec!["1", "2", "3"]);
        assert_eq!(select("/feed/listings/listing"), vec!["1", "2", "3"]);
        assert_eq!(select("/listings/listing"), Vec::<String>::new());
        assert_eq!(select("meta/next"), vec!["c-2"]);
    }

    #[test]
    fn test_descendant_axis() {
        assert_eq!(select("//listing"), vec!["1", "2", "3"]);
        assert_eq!(select("//city/text()"), vec!["Austin", "Boise", "Reno"]);
        assert_eq!(select("//listing/@status"), vec!["active", "sold", "active"]);
        assert_eq!(select("//next"), vec!["c-2"]);
    }

    #[test]
    fn test_predicates() {
        assert_eq!(select("//listing[@status='active']"), vec!["1", "3"]);
        assert_eq!(select("//listing[city=\"Boise\"]"), vec!["2"]);
        assert_eq!(select("//listing[featured]"), vec!["3"]);
        assert_eq!(select("//listing[last()]"), vec!["3"]);
        assert_eq!(select("listings/listing[2]"), vec!["2"]);
        assert_eq!(select("//listing[@status='active'][2]"), vec!["3"]);
        assert_eq!(select("//city[text()='Reno']"), vec!["Reno"]);
    }

    #[test]
    fn test_wildcards_and_self() {
        assert_eq!(select("listings/*").len(), 3);
        assert_eq!(select("listings/listing[1]/@*"), vec!["1", "active"]);
        assert_eq!(select(".").len(), 1);
    }

    fn select_in(xml: &str, expression: &str) -> Vec<String> {
        let doc = parse_document(xml.as_bytes()).unwrap();
        XPath::parse(expression)
            .unwrap()
            .evaluate(&doc)
            .iter()
            .map(|node| match node {
                Selected::Element(e) => e.attribute("id").unwrap_or_default().to_string(),
                other => other.string_value(),
            })
            .collect()
    }

    #[test]
    fn test_equal_attribute_values_are_distinct_nodes() {
        let xml = r#"<r><item code=""/><item code=""/><item code="x"/></r>"#;
        assert_eq!(select_in(xml, "//item/@code"), vec!["", "", "x"]);
        assert_eq!(select_in(xml, "item/@code"), vec!["", "", "x"]);
    }

    #[test]
    fn test_descendants_come_back_in_document_order() {
        let xml = r#"<r><a id="1"><a id="2"><a id="3"/></a></a><b><a id="4"/></b><a id="5"/></r>"#;
        assert_eq!(select_in(xml, "//a"), vec!["1", "2", "3", "4", "5"]);
        assert_eq!(select_in(xml, "//a/@id"), vec!["1", "2", "3", "4", "5"]);
        // a node reached through several bases appears once
        assert_eq!(select_in(xml, "//a//a"), vec!["2", "3"]);
    }

    #[test]
    fn test_invalid_expressions() {
        for expression in ["", "//", "listing[", "listing/", "../x", "listing[@]", "a[b=c]", "a[0]"] {
            assert!(XPath::parse(expression).is_err(), "{expression:?} should not parse");
        }
    }
}
