//! Plex Media Server client
//!
//! Only one query is needed: the items of a library section that were
//! watched at least once and not since the cutoff.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::config::PlexConfig;

/// Source of the raw stale-items listing
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Raw listing of items unseen for longer than the configured period.
    /// `None` means there is nothing to look at.
    async fn fetch_stale_items(&self) -> Result<Option<String>>;
}

pub struct PlexClient {
    config: PlexConfig,
    client: Client,
}

impl PlexClient {
    pub fn new(config: PlexConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent("plex-archiver/0.1")
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    /// Listing URL for items last viewed before `now - unwatched_days`
    pub fn stale_items_url(&self, now: DateTime<Utc>) -> Result<Url> {
        let cutoff = now - chrono::Duration::days(self.config.unwatched_days);
        let mut url = Url::parse(&format!(
            "http://{}:{}/library/sections/{}/all",
            self.config.hostname, self.config.port, self.config.section_id
        ))
        .context("Invalid Plex host")?;

        // Plex filter operators live in the key, e.g. `viewCount>=1`
        url.set_query(Some(&format!(
            "viewCount>=1&lastViewedAt<={}",
            cutoff.timestamp()
        )));
        url.query_pairs_mut()
            .append_pair("X-Plex-Token", &self.config.token);

        Ok(url)
    }
}

#[async_trait]
impl InventorySource for PlexClient {
    async fn fetch_stale_items(&self) -> Result<Option<String>> {
        let url = self.stale_items_url(Utc::now())?;
        info!(
            host = %self.config.hostname,
            section = self.config.section_id,
            unwatched_days = self.config.unwatched_days,
            "Fetching stale items from Plex"
        );

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/xml")
            .send()
            .await
            .context("Failed to reach Plex")?;

        if !response.status().is_success() {
            anyhow::bail!("Plex returned error status: {}", response.status());
        }

        let body = response
            .text()
            .await
            .context("Failed to read Plex response")?;

        if body.trim().is_empty() {
            debug!("Plex returned an empty body");
            return Ok(None);
        }
        Ok(Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> PlexConfig {
        PlexConfig {
            hostname: "plex.local".to_string(),
            port: 32400,
            token: "abc&def".to_string(),
            section_id: 2,
            unwatched_days: 365,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_stale_items_url() {
        let client = PlexClient::new(config()).unwrap();
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let url = client.stale_items_url(now).unwrap();

        assert_eq!(url.host_str(), Some("plex.local"));
        assert_eq!(url.port(), Some(32400));
        assert_eq!(url.path(), "/library/sections/2/all");

        let query = url.query().unwrap();
        let cutoff = 1_700_000_000 - 365 * 24 * 60 * 60;
        assert!(query.contains("viewCount%3E=1") || query.contains("viewCount>=1"));
        assert!(query.contains(&format!("={}", cutoff)));
        assert!(query.ends_with("X-Plex-Token=abc%26def"));
    }

    /// Answer one HTTP request with `response`, returning the port
    async fn serve_once(response: &'static str) -> u16 {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        port
    }

    fn local_client(port: u16) -> PlexClient {
        let mut config = config();
        config.hostname = "127.0.0.1".to_string();
        config.port = port;
        PlexClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_listing_body_is_returned() {
        let port = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/xml\r\nContent-Length: 36\r\nConnection: close\r\n\r\n<MediaContainer></MediaContainer>\n  ",
        )
        .await;
        let body = local_client(port).fetch_stale_items().await.unwrap();
        assert_eq!(body.as_deref().map(str::trim), Some("<MediaContainer></MediaContainer>"));
    }

    #[tokio::test]
    async fn test_empty_body_means_nothing_to_do() {
        let port = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\n \r\n",
        )
        .await;
        assert_eq!(local_client(port).fetch_stale_items().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_status_is_an_error() {
        let port = serve_once(
            "HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let err = local_client(port).fetch_stale_items().await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        let mut config = config();
        config.hostname = "127.0.0.1".to_string();
        config.port = 1;
        config.request_timeout = Duration::from_secs(2);

        let client = PlexClient::new(config).unwrap();
        assert!(client.fetch_stale_items().await.is_err());
    }
}
