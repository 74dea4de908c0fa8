use crate::{Extractor, FetchResult, LinkSource, Pagination, RawRecord, Result};
use std::fmt;

/// Position of the next page to request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    Offset(u64),
    Page(u64),
    Cursor(String),
    Link(String),
}

impl PageToken {
    /// Template variable the token is exposed under
    pub fn variable_name(&self) -> &'static str {
        match self {
            PageToken::Offset(_) => "offset",
            PageToken::Page(_) => "page",
            PageToken::Cursor(_) => "cursor",
            PageToken::Link(_) => "next_link",
        }
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageToken::Offset(offset) => write!(f, "{}", offset),
            PageToken::Page(page) => write!(f, "{}", page),
            PageToken::Cursor(cursor) => f.write_str(cursor),
            PageToken::Link(link) => f.write_str(link),
        }
    }
}

/// Token for the first request; cursor and link pagination start without one
pub fn first_token(pagination: &Pagination) -> Option<PageToken> {
    match pagination {
        Pagination::Offset { start, .. } => Some(PageToken::Offset(*start)),
        Pagination::Page { start, .. } => Some(PageToken::Page(*start)),
        _ => None,
    }
}

/// Derives the token of the following page, `None` ends pagination
pub fn next_token(
    pagination: &Pagination,
    current: Option<&PageToken>,
    record_count: usize,
    body_token: Option<&str>,
    response: &FetchResult,
) -> Option<PageToken> {
    if record_count == 0 {
        return None;
    }

    match pagination {
        Pagination::None => None,
        Pagination::Offset { page_size, start, .. } => {
            if record_count as u64 != *page_size {
                return None;
            }
            let offset = match current {
                Some(PageToken::Offset(offset)) => *offset,
                _ => *start,
            };
            Some(PageToken::Offset(offset + page_size))
        }
        Pagination::Page { page_size, start, .. } => {
            if let Some(page_size) = page_size {
                if (record_count as u64) < *page_size {
                    return None;
                }
            }
            let page = match current {
                Some(PageToken::Page(page)) => *page,
                _ => *start,
            };
            Some(PageToken::Page(page + 1))
        }
        Pagination::Cursor { .. } => non_empty(body_token).map(PageToken::Cursor),
        Pagination::Link { source } => match source {
            LinkSource::Header { name, rel } => response
                .header(name)
                .and_then(|value| find_link(value, rel))
                .map(PageToken::Link),
            LinkSource::Body { .. } => non_empty(body_token).map(PageToken::Link),
        },
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Finds the URL with the given rel in an RFC 8288 `Link` header value
fn find_link(header: &str, rel: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let url = target.strip_prefix('<')?.strip_suffix('>')?;
        let matches = parts.any(|param| {
            let Some((key, value)) = param.split_once('=') else {
                return false;
            };
            key.trim().eq_ignore_ascii_case("rel")
                && value
                    .trim()
                    .trim_matches('"')
                    .split_whitespace()
                    .any(|r| r.eq_ignore_ascii_case(rel))
        });
        matches.then(|| url.to_string())
    })
}

/// Extracts the records of one response and the token of the page after it
pub fn extract_page(
    extractor: &dyn Extractor,
    response: &FetchResult,
    expression: &str,
    pagination: &Pagination,
    current: Option<&PageToken>,
) -> Result<(Vec<RawRecord>, Option<PageToken>)> {
    let page = extractor.extract(&response.body, expression, pagination.token_path())?;
    let next = next_token(
        pagination,
        current,
        page.records.len(),
        page.body_token.as_deref(),
        response,
    );
    Ok((page.records, next))
}
