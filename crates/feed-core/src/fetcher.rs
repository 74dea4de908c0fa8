use crate::{FetchError, ResolvedRequest};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Raw response of one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub status: u16,
    /// Header names are lowercase; repeated headers are joined with ", "
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
    /// Attempts used, the successful one included
    pub attempts: u32,
}

impl FetchResult {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Trait for page fetchers
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch one page, retrying transient failures according to the fetcher's policy
    async fn fetch(&self, request: &ResolvedRequest) -> std::result::Result<FetchResult, FetchError>;
}
