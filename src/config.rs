//! Remote endpoint configuration.

use anyhow::{Context, Result};

/// Connection settings for the hosted backend.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Normalized base URL, no trailing slash, no `/rest` suffix.
    pub base_url: String,
    pub api_key: String,
    /// Branch this device belongs to; used by the stock RPC.
    pub branch_id: Option<String>,
}

impl RemoteConfig {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Self {
        RemoteConfig {
            base_url: normalize_base_url(base_url),
            api_key: api_key.into(),
            branch_id: None,
        }
    }

    pub fn with_branch(mut self, branch_id: impl Into<String>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }

    /// Load from `SHOPSTREAM_API_URL` / `SHOPSTREAM_API_KEY` /
    /// `SHOPSTREAM_BRANCH_ID`.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("SHOPSTREAM_API_URL").context("SHOPSTREAM_API_URL is not set")?;
        let api_key =
            std::env::var("SHOPSTREAM_API_KEY").context("SHOPSTREAM_API_KEY is not set")?;
        let branch_id = std::env::var("SHOPSTREAM_BRANCH_ID").ok();
        Ok(RemoteConfig {
            base_url: normalize_base_url(&base_url),
            api_key,
            branch_id,
        })
    }
}

/// Normalize the backend URL:
/// - ensure a scheme (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/rest` segment (common copy-paste mistake)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    if url.ends_with("/rest") {
        url.truncate(url.len() - 5);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}
