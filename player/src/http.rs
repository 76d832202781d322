//! HTTP image fetcher.

use async_trait::async_trait;
use routeview_env::{AssetFetcher, EnvError, FetchedAsset};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Loads pano images from the image service. With a frames directory the
/// image is written to disk and the file path becomes the asset uri;
/// otherwise the body is discarded once received.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    frames_dir: Option<PathBuf>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, frames_dir: Option<PathBuf>) -> Result<Self, EnvError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnvError::transport(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            timeout,
            frames_dir,
        })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, EnvError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                EnvError::Timeout(self.timeout.as_millis() as u64)
            } else {
                EnvError::asset(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status));
        }
        let body = response.bytes().await.map_err(|e| EnvError::asset(url, e))?;
        debug!("Fetched {} bytes from {}", body.len(), url);

        match &self.frames_dir {
            Some(dir) => {
                let path = dir.join(frame_file_name(url));
                tokio::fs::write(&path, &body)
                    .await
                    .map_err(|e| EnvError::asset(url, e))?;
                Ok(FetchedAsset::new(path.display().to_string(), body.len()))
            }
            None => Ok(FetchedAsset::new(url, body.len())),
        }
    }
}

/// Client errors other than timeouts and rate limits will not change on retry.
fn status_error(url: &str, status: reqwest::StatusCode) -> EnvError {
    use reqwest::StatusCode;
    let retryable = status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS;
    if status.is_client_error() && !retryable {
        EnvError::unavailable(url, status.as_u16())
    } else {
        EnvError::asset(url, status)
    }
}

/// File name for an image URL: `<pano>_<heading>.jpg`, falling back to the
/// sanitized URL when it has no pano parameter.
pub fn frame_file_name(url: &str) -> String {
    let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
    let param = |name: &str| {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| sanitize(value))
    };

    match (param("pano"), param("heading")) {
        (Some(pano), Some(heading)) => format!("{}_{}.jpg", pano, heading),
        (Some(pano), None) => format!("{}.jpg", pano),
        _ => format!("{}.jpg", sanitize(url)),
    }
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}
