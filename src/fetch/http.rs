//! Plain HTTP(S) origin fetcher
//!
//! Size and file name come from a HEAD request, falling back to a one-byte
//! ranged GET for origins that reject HEAD. Bytes are pulled with
//! `Range: bytes=<offset>-`.

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{FetchError, Result};
use crate::fetch::{ByteSource, FetchSession, RangedStream, RemoteArtifact, partial_content_start, safe_file_name};
use crate::logging::Logger;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct HttpFetcher {
    client: Client,
    output: Logger,
}

impl HttpFetcher {
    pub fn new(connect_timeout: Duration, skip_tls: bool, output: Logger) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(skip_tls)
            .build()
            .map_err(|e| FetchError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, output))
    }

    pub fn with_client(client: Client, output: Logger) -> Self {
        Self { client, output }
    }

    /// Resolve the artifact's file name and total size
    pub async fn probe(&self, url: &str) -> Result<RemoteArtifact> {
        let parsed = url::Url::parse(url)?;
        self.output.detail(&format!("Probing {}", url));

        let head = self
            .client
            .head(parsed.clone())
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "HEAD request"));

        let (size, disposition_name) = match head {
            Ok(resp) if resp.status().is_success() && header_u64(resp.headers(), CONTENT_LENGTH).is_some() => (
                header_u64(resp.headers(), CONTENT_LENGTH).unwrap_or(0),
                disposition_file_name(resp.headers()),
            ),
            Ok(resp) => {
                self.output.detail(&format!("HEAD returned {}, probing with a ranged GET", resp.status()));
                self.probe_with_range(&parsed).await?
            }
            Err(err) => {
                self.output.detail(&format!("HEAD failed ({}), probing with a ranged GET", err));
                self.probe_with_range(&parsed).await?
            }
        };

        let name = match disposition_name {
            Some(name) => name,
            None => url_file_name(&parsed)?,
        };
        Ok(RemoteArtifact {
            name: safe_file_name(&name)?,
            size,
            digest: None,
        })
    }

    async fn probe_with_range(&self, url: &url::Url) -> Result<(u64, Option<String>)> {
        let resp = self
            .client
            .get(url.clone())
            .header(RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "range probe"))?;

        let status = resp.status();
        let size = match status {
            StatusCode::PARTIAL_CONTENT => resp
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(content_range_total),
            StatusCode::OK => header_u64(resp.headers(), CONTENT_LENGTH),
            _ => return Err(HttpErrorHandler::handle_origin_error(status, url.as_str())),
        };
        let size = size.ok_or_else(|| {
            FetchError::UnexpectedResponse(format!("{} does not report its size", url))
        })?;
        Ok((size, disposition_file_name(resp.headers())))
    }

    pub async fn fetch(&self, url: &str, dest_dir: &Path, session: &FetchSession) -> Result<PathBuf> {
        let artifact = session.until_cancelled(self.probe(url)).await?;
        self.output.info(&format!(
            "Remote file {} ({})",
            artifact.name,
            self.output.format_size(artifact.size)
        ));
        let source = HttpSource {
            client: self.client.clone(),
            url: url.to_string(),
        };
        session.download(&artifact, dest_dir, &source).await
    }
}

struct HttpSource {
    client: Client,
    url: String,
}

#[async_trait]
impl ByteSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn open_at(&self, offset: u64) -> Result<RangedStream> {
        let mut request = self.client.get(&self.url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        let resp = request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "download request"))?;

        let start = match resp.status() {
            StatusCode::PARTIAL_CONTENT => partial_content_start(resp.headers(), offset),
            StatusCode::OK => 0,
            status => return Err(HttpErrorHandler::handle_origin_error(status, &self.url)),
        };

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| NetworkErrorHandler::handle_network_error(&e, "download stream")));
        Ok(RangedStream {
            stream: Box::pin(stream),
            start,
        })
    }
}

fn header_u64(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Total from `bytes 0-0/12345`; `*` means unknown
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

fn disposition_file_name(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

fn url_file_name(url: &url::Url) -> Result<String> {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| FetchError::Configuration(format!("Cannot derive a file name from {}", url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_content_range_total() {
        assert_eq!(content_range_total("bytes 0-0/5368709120"), Some(5368709120));
        assert_eq!(content_range_total("bytes 0-0/*"), None);
    }

    #[test]
    fn test_disposition_file_name() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"virtio-win.iso\""),
        );
        assert_eq!(disposition_file_name(&headers), Some("virtio-win.iso".to_string()));
        assert_eq!(disposition_file_name(&HeaderMap::new()), None);
    }

    #[test]
    fn test_url_file_name() {
        let url = url::Url::parse("https://fw.example.com/images/istoreos-24.10.img.gz").unwrap();
        assert_eq!(url_file_name(&url).unwrap(), "istoreos-24.10.img.gz");
        let root = url::Url::parse("https://fw.example.com/").unwrap();
        assert!(url_file_name(&root).is_err());
    }
}
