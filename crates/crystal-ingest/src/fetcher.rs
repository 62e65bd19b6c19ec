//! Sitemap index retrieval

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::http;
use crate::sitemap::{self, SitemapLocation};
use reqwest::Client;
use tracing::{debug, info};

/// Retrieves the top-level sitemap index and lists its chunk locations.
///
/// There is no retry here: without the index there is nothing to build, so
/// any failure is returned to the caller as fatal.
pub struct SitemapIndexFetcher {
    client: Client,
}

impl SitemapIndexFetcher {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        Ok(Self {
            client: http::build_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Fetch `base_url` and return every child sitemap location in document order.
    pub async fn fetch(&self, base_url: &str) -> Result<Vec<SitemapLocation>> {
        info!(url = %base_url, "Fetching sitemap index");

        let response = http::get_ok(&self.client, base_url).await?;
        let body = response
            .text()
            .await
            .map_err(|e| IndexError::retrieval(base_url, e))?;

        debug!(bytes = body.len(), "Sitemap index downloaded");

        let locations = sitemap::parse_index(&body, base_url)?;
        info!(locations = locations.len(), "Sitemap index parsed");

        Ok(locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn index_body(server: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>{server}/sitemap.xml</loc></sitemap>
  <sitemap><loc>{server}/chunks/sitemap-1.xml.gz</loc></sitemap>
</sitemapindex>"#
        )
    }

    fn fetcher(user_agent: &str) -> SitemapIndexFetcher {
        let config = IndexConfig::builder().user_agent(user_agent).build();
        SitemapIndexFetcher::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_sends_user_agent_and_parses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.xml"))
            .and(header("user-agent", "crystal-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index_body(&server.uri())))
            .expect(1)
            .mount(&server)
            .await;

        let locations = fetcher("crystal-test/1.0")
            .fetch(&format!("{}/index.xml", server.uri()))
            .await
            .unwrap();

        assert_eq!(locations.len(), 2);
        assert_eq!(
            locations[1].as_str(),
            format!("{}/chunks/sitemap-1.xml.gz", server.uri())
        );
    }

    #[tokio::test]
    async fn test_fetch_non_success_is_retrieval_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.xml"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetcher("crystal-test/1.0")
            .fetch(&format!("{}/index.xml", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, IndexError::Retrieval { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_fetch_garbage_is_format_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>blocked</html>"))
            .mount(&server)
            .await;

        let err = fetcher("crystal-test/1.0")
            .fetch(&format!("{}/index.xml", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, IndexError::Format { .. }));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_is_retrieval_error() {
        // Port 9 (discard) is closed on test machines.
        let err = fetcher("crystal-test/1.0")
            .fetch("http://127.0.0.1:9/index.xml")
            .await
            .unwrap_err();

        assert!(matches!(err, IndexError::Retrieval { .. }));
    }
}
