use anyhow::{Context, Result, anyhow, bail};
use ollamacode_core::CancellationToken;
use reqwest::Url;
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DUCKDUCKGO_HTML_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const SEARCH_TIMEOUT_SECS: u64 = 20;
const USER_AGENT: &str = "Mozilla/5.0 (compatible; ollama-code)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub trait WebSearcher: Send + Sync {
    fn search(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<WebResult>>;
}

pub struct DuckDuckGoSearcher {
    http: Client,
    endpoint: String,
}

impl DuckDuckGoSearcher {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(DUCKDUCKGO_HTML_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build web search client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

impl WebSearcher for DuckDuckGoSearcher {
    fn search(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<WebResult>> {
        let query = query.trim();
        if query.is_empty() {
            bail!("search query must not be empty");
        }
        if cancel.is_cancelled() {
            bail!("web search cancelled");
        }
        let url = Url::parse_with_params(&self.endpoint, &[("q", query)])
            .with_context(|| format!("invalid search endpoint {}", self.endpoint))?;
        let response = self
            .http
            .get(url)
            .send()
            .context("web search request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("web search returned HTTP {}", status.as_u16()));
        }
        let body = response.text().context("failed to read web search body")?;
        if cancel.is_cancelled() {
            bail!("web search cancelled");
        }
        Ok(parse_duckduckgo_html(&body, limit))
    }
}

/// Extracts result links from DuckDuckGo's HTML page. Redirect links are
/// unwrapped to their `uddg` target.
pub fn parse_duckduckgo_html(html: &str, limit: usize) -> Vec<WebResult> {
    let document = Html::parse_document(html);
    let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
        Selector::parse(".result"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for result in document.select(&result_sel) {
        if results.len() >= limit {
            break;
        }
        let Some(link) = result.select(&link_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let title = element_text(link);
        if title.is_empty() {
            continue;
        }
        let snippet = result
            .select(&snippet_sel)
            .next()
            .map(element_text)
            .unwrap_or_default();
        results.push(WebResult {
            title,
            url: unwrap_redirect(href),
            snippet,
        });
    }
    results
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn unwrap_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{href}")
    } else {
        href.to_string()
    };
    let Ok(url) = Url::parse(&absolute) else {
        return href.to_string();
    };
    url.query_pairs()
        .find(|(key, _)| key == "uddg")
        .map(|(_, target)| target.into_owned())
        .unwrap_or(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
<html><body>
  <div class="result results_links">
    <h2><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fdoc.rust-lang.org%2Fbook%2F&amp;rut=abc">The Rust
      <b>Book</b></a></h2>
    <a class="result__snippet" href="#">Learn   Rust from the ground up.</a>
  </div>
  <div class="result">
    <h2><a class="result__a" href="https://crates.io/">crates.io</a></h2>
  </div>
  <div class="result">
    <h2><a class="result__a" href="https://example.org/third">Third</a></h2>
    <div class="result__snippet">third snippet</div>
  </div>
</body></html>"##;

    #[test]
    fn parses_results_and_unwraps_redirects() {
        let results = parse_duckduckgo_html(SAMPLE, 10);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "The Rust Book");
        assert_eq!(results[0].url, "https://doc.rust-lang.org/book/");
        assert_eq!(results[0].snippet, "Learn Rust from the ground up.");
        assert_eq!(results[1].url, "https://crates.io/");
        assert!(results[1].snippet.is_empty());
    }

    #[test]
    fn limit_caps_results() {
        let results = parse_duckduckgo_html(SAMPLE, 2);
        assert_eq!(results.len(), 2);
        assert!(parse_duckduckgo_html("<html></html>", 3).is_empty());
    }

    #[test]
    fn empty_query_and_cancelled_token_fail_fast() {
        let searcher = DuckDuckGoSearcher::with_endpoint("http://127.0.0.1:9/").unwrap();
        assert!(searcher.search("  ", 3, &CancellationToken::new()).is_err());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = searcher.search("rust", 3, &cancel).unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
