//! GitHub REST client for repository search
//!
//! Covers the two endpoints the crawler needs: paginated repository search
//! and the /rate_limit probe for the search category.

use anyhow::{Context, Result};
use serde::Deserialize;

/// GitHub caps search pages at 100 results
pub const MAX_PER_PAGE: u32 = 100;

/// One repository as returned by the search API
///
/// Every field is optional so a single sparse record cannot fail its whole
/// page; required-field enforcement happens at normalization time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSearchRepo {
    pub id: Option<u64>,
    pub full_name: Option<String>,
    pub created_at: Option<String>,
    pub pushed_at: Option<String>,
    pub updated_at: Option<String>,
    pub clone_url: Option<String>,
    pub language: Option<String>,
    pub forks_count: Option<u64>,
    pub open_issues_count: Option<u64>,
    pub watchers_count: Option<u64>,
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<RawSearchRepo>,
}

/// One page of search results plus the pagination cursor
#[derive(Debug)]
pub struct SearchPage {
    pub items: Vec<RawSearchRepo>,
    /// Page number from the response's `rel="next"` link, if any
    pub next_page: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    pub reset: u64,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    search: RateLimit,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

/// GitHub API client
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Self {
        Self::with_base_url(token, "https://api.github.com")
    }

    /// Point the client at a different API root (used by tests)
    pub fn with_base_url(token: Option<String>, api_base: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("gh-harvest/0.1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            token,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Build request with auth header if token available
    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req.header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Check rate limit status for the search category
    ///
    /// Read-only: the limit is observed before each page fetch, never cached.
    pub async fn search_rate_limit(&self) -> Result<RateLimit> {
        let url = format!("{}/rate_limit", self.api_base);

        let response = self
            .request(&url)
            .send()
            .await
            .context("Failed to check rate limit")?;

        if !response.status().is_success() {
            anyhow::bail!("GitHub API error {} on /rate_limit", response.status());
        }

        let data: RateLimitResponse = response
            .json()
            .await
            .context("Failed to parse rate limit response")?;
        Ok(data.resources.search)
    }

    /// Fetch one page of repository search results, fork-count descending
    pub async fn search_page(&self, query: &str, page: u32, per_page: u32) -> Result<SearchPage> {
        let url = format!("{}/search/repositories", self.api_base);

        let response = self
            .request(&url)
            .query(&[
                ("q", query),
                ("sort", "forks"),
                ("order", "desc"),
                ("per_page", &per_page.to_string()),
                ("page", &page.to_string()),
            ])
            .send()
            .await
            .context("search request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GitHub search API error {}", status);
        }

        let next_page = response
            .headers()
            .get("link")
            .and_then(|h| h.to_str().ok())
            .and_then(parse_next_page);

        let body: SearchResponse = response
            .json()
            .await
            .context("Failed to parse search response")?;

        Ok(SearchPage {
            items: body.items,
            next_page,
        })
    }
}

/// Extract the page number of the `rel="next"` entry from a Link header
///
/// GitHub paginates search with entries like
/// `<https://api.github.com/search/repositories?q=..&page=2>; rel="next"`.
/// The last page carries no `rel="next"` entry.
pub fn parse_next_page(link: &str) -> Option<u32> {
    for entry in link.split(',') {
        let Some((target, params)) = entry.split_once(';') else {
            continue;
        };
        if !params.contains(r#"rel="next""#) {
            continue;
        }
        let url = target.trim().trim_start_matches('<').trim_end_matches('>');
        let Some((_, query)) = url.split_once('?') else {
            continue;
        };
        for pair in query.split('&') {
            if let Some(page) = pair.strip_prefix("page=") {
                return page.parse().ok();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_next_page() {
        let link = r#"<https://api.github.com/search/repositories?q=x&per_page=100&page=2>; rel="next", <https://api.github.com/search/repositories?q=x&per_page=100&page=34>; rel="last""#;
        assert_eq!(parse_next_page(link), Some(2));
    }

    #[test]
    fn test_parse_next_page_ignores_per_page_param() {
        // `per_page=100` must not be mistaken for the page cursor
        let link = r#"<https://api.github.com/search/repositories?per_page=100&page=7>; rel="next""#;
        assert_eq!(parse_next_page(link), Some(7));
    }

    #[test]
    fn test_last_page_has_no_next() {
        let link = r#"<https://api.github.com/search/repositories?q=x&page=1>; rel="first", <https://api.github.com/search/repositories?q=x&page=33>; rel="prev""#;
        assert_eq!(parse_next_page(link), None);
    }

    #[test]
    fn test_malformed_link_header() {
        assert_eq!(parse_next_page(""), None);
        assert_eq!(parse_next_page("nonsense"), None);
        assert_eq!(parse_next_page(r#"<no-query-string>; rel="next""#), None);
    }
}
