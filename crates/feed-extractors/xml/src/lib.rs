mod xml_extractor;
mod xml_tree;
mod xpath;

pub use xml_extractor::XmlExtractor;
pub use xml_tree::{parse_document, Document, Element, XmlNode};
pub use xpath::{Selected, XPath};
