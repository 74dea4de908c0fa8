use crate::xml_tree::parse_document;
use crate::xpath::XPath;
use feed_core::{ExtractedPage, Extractor, InputFormat, RawRecord, Result};
use tracing::debug;

/// Extracts records from XML bodies with XPath location paths
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlExtractor;

impl XmlExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for XmlExtractor {
    fn format(&self) -> InputFormat {
        InputFormat::Xml
    }

    fn validate_expression(&self, expression: &str) -> Result<()> {
        XPath::parse(expression).map(|_| ())
    }

    fn extract(
        &self,
        body: &[u8],
        expression: &str,
        token_path: Option<&str>,
    ) -> Result<ExtractedPage> {
        let records_path = XPath::parse(expression)?;
        let document = parse_document(body)?;

        let records: Vec<RawRecord> = records_path
            .evaluate(&document)
            .iter()
            .map(|node| node.to_record())
            .collect();

        let body_token = match token_path {
            Some(path) => XPath::parse(path)?
                .evaluate(&document)
                .first()
                .map(|node| node.string_value().trim().to_string())
                .filter(|token| !token.is_empty()),
            None => None,
        };

        debug!(
            "Extracted {} XML records with '{}' (token: {:?})",
            records.len(),
            expression,
            body_token
        );
        Ok(ExtractedPage {
            records,
            body_token,
        })
    }
}
