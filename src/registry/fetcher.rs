//! Pull the first file of a registry artifact through the resumable copy path

use crate::config::{AuthConfig, FetchConfig};
use crate::error::{FetchError, Result};
use crate::fetch::{ByteSource, FetchSession, RangedStream, RemoteArtifact};
use crate::logging::Logger;
use crate::reference::Reference;
use crate::registry::client::RegistryClient;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RegistryFetcher {
    auth: AuthConfig,
    plain_http: bool,
    skip_tls: bool,
    connect_timeout: Duration,
    output: Logger,
}

impl RegistryFetcher {
    pub fn new(auth: AuthConfig, output: Logger) -> Self {
        Self {
            auth,
            plain_http: false,
            skip_tls: false,
            connect_timeout: Duration::from_secs(30),
            output,
        }
    }

    pub fn from_config(config: &FetchConfig, auth: AuthConfig, output: Logger) -> Self {
        Self::new(auth, output)
            .with_plain_http(config.plain_http)
            .with_skip_tls(config.skip_tls)
            .with_connect_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)))
    }

    pub fn with_plain_http(mut self, plain_http: bool) -> Self {
        self.plain_http = plain_http;
        self
    }

    pub fn with_skip_tls(mut self, skip_tls: bool) -> Self {
        self.skip_tls = skip_tls;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn registry_address(&self, host: &str) -> String {
        let scheme = if self.plain_http { "http" } else { "https" };
        format!("{}://{}", scheme, host)
    }

    /// Resolve the reference's file listing and download its first entry
    pub async fn fetch(&self, reference: &str, dest_dir: &Path, session: &FetchSession) -> Result<PathBuf> {
        let parsed = Reference::parse(reference)?;

        let mut client = RegistryClient::builder(self.registry_address(&parsed.host))
            .with_auth(self.auth.clone())
            .with_skip_tls(self.skip_tls)
            .with_connect_timeout(self.connect_timeout)
            .with_output(self.output.clone())
            .build()?;

        session.until_cancelled(client.authenticate(&parsed.repository)).await?;
        let manifest = session
            .until_cancelled(client.pull_manifest(&parsed.repository, &parsed.tag))
            .await?;
        let files = manifest.files()?;
        let Some(entry) = files.into_iter().next() else {
            return Err(FetchError::EmptyArtifact(reference.to_string()));
        };

        self.output.info(&format!(
            "{} provides {} ({})",
            reference,
            entry.name,
            self.output.format_size(entry.size)
        ));

        let source = BlobSource {
            client,
            reference: reference.to_string(),
            repository: parsed.repository,
            artifact: entry.clone(),
        };
        session.download(&entry, dest_dir, &source).await
    }
}

struct BlobSource {
    client: RegistryClient,
    reference: String,
    repository: String,
    artifact: RemoteArtifact,
}

#[async_trait]
impl ByteSource for BlobSource {
    fn describe(&self) -> String {
        self.reference.clone()
    }

    async fn open_at(&self, offset: u64) -> Result<RangedStream> {
        let digest = self.artifact.digest.as_deref().ok_or_else(|| {
            FetchError::UnexpectedResponse(format!("{} has no digest", self.artifact.name))
        })?;
        self.client.open_blob(&self.repository, digest, offset).await
    }
}
