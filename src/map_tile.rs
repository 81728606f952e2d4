//! Static map request URL and the best-effort image download.
//!
//! A failed download is logged and reported as `None`; the computed report
//! artifacts never depend on it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, Response, StatusCode, Url};
use tracing::{info, warn};

use crate::config::MapConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct StaticMapRequest {
    base: Url,
    params: Vec<(&'static str, String)>,
    max_url_len: usize,
}

impl StaticMapRequest {
    pub fn new(config: &MapConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("invalid static map URL {:?}", config.base_url))?;

        let mut params = vec![
            ("size", config.size.clone()),
            ("scale", config.scale.to_string()),
            ("format", config.format.clone()),
            ("maptype", config.maptype.clone()),
        ];
        if let Some(key) = &config.api_key {
            params.push(("key", key.clone()));
        }

        Ok(Self {
            base,
            params,
            max_url_len: config.max_url_len,
        })
    }

    pub fn url_for(&self, route: &str) -> Url {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in &self.params {
                query.append_pair(name, value);
            }
            query.append_pair("path", &format!("color:blue|weight:5|enc:{route}"));
        }
        url
    }

    /// Whether the full request URL for `route` stays under the service limit.
    pub fn fits(&self, route: &str) -> bool {
        self.url_for(route).as_str().len() <= self.max_url_len
    }
}

pub fn client() -> anyhow::Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}

/// GET with exponential backoff on 429, 5xx and network failures.
///
/// Other client errors are not retried.
pub async fn send_with_retry(client: &Client, url: &str, max_retries: u32) -> Option<Response> {
    for attempt in 0..max_retries {
        let last_attempt = attempt + 1 == max_retries;
        let delay = match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Some(resp),
            Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                let delay = Duration::from_secs(2u64.pow(attempt + 1));
                warn!(attempt, ?delay, "map service rate limited");
                delay
            }
            Ok(resp) if resp.status().is_server_error() => {
                let delay = Duration::from_secs(2u64.pow(attempt));
                warn!(attempt, status = %resp.status(), ?delay, "map service error");
                delay
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "map request rejected");
                return None;
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                let delay = Duration::from_secs(2u64.pow(attempt));
                warn!(attempt, error = %e, ?delay, "map request network error");
                delay
            }
            Err(e) => {
                warn!(error = %e, "map request failed");
                return None;
            }
        };

        if !last_attempt {
            tokio::time::sleep(delay).await;
        }
    }

    warn!(max_retries, "map request failed after retries");
    None
}

/// Downloads the map image to `target`, returning the path on success.
pub async fn save_map_image(
    client: &Client,
    url: &Url,
    target: &Path,
    max_retries: u32,
) -> Option<PathBuf> {
    info!(target = %target.display(), "requesting map image");
    let response = send_with_retry(client, url.as_str(), max_retries).await?;

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to read map image body");
            return None;
        }
    };

    if let Err(e) = std::fs::write(target, &bytes) {
        warn!(error = %e, target = %target.display(), "failed to write map image");
        return None;
    }

    info!(target = %target.display(), bytes = bytes.len(), "created map image");
    Some(target.to_path_buf())
}
