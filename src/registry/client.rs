// Registry client for pulling one artifact's manifest and blob bytes over the
// Docker Registry HTTP API v2 / OCI distribution API.

use crate::config::AuthConfig;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{FetchError, Result};
use crate::fetch::{RangedStream, partial_content_start};
use crate::logging::Logger;
use crate::registry::auth::{Auth, RegistryCredential};
use crate::registry::manifest::{ACCEPT_MANIFEST_TYPES, Manifest};
use futures::StreamExt;
use reqwest::header::{ACCEPT, RANGE};
use reqwest::{Client, StatusCode};
use std::time::Duration;

pub struct RegistryClientBuilder {
    address: String,
    auth_config: AuthConfig,
    skip_tls: bool,
    connect_timeout: Duration,
    output: Logger,
}

impl RegistryClientBuilder {
    pub fn new(address: String) -> Self {
        Self {
            address,
            auth_config: AuthConfig::default(),
            skip_tls: false,
            connect_timeout: Duration::from_secs(30),
            output: Logger::new_quiet(),
        }
    }

    pub fn with_auth(mut self, auth_config: AuthConfig) -> Self {
        self.auth_config = auth_config;
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

    pub fn with_output(mut self, output: Logger) -> Self {
        self.output = output;
        self
    }

    pub fn build(self) -> Result<RegistryClient> {
        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .danger_accept_invalid_certs(self.skip_tls)
            .danger_accept_invalid_hostnames(self.skip_tls)
            .build()
            .map_err(|e| FetchError::Configuration(format!("Failed to create registry client: {}", e)))?;

        let address = self.address.trim_end_matches('/').to_string();
        let auth = Auth::new(client.clone(), &address);

        Ok(RegistryClient {
            client,
            address,
            auth_config: self.auth_config,
            auth,
            credential: RegistryCredential::Anonymous,
            output: self.output,
        })
    }
}

#[derive(Clone)]
pub struct RegistryClient {
    client: Client,
    address: String,
    auth_config: AuthConfig,
    auth: Auth,
    credential: RegistryCredential,
    output: Logger,
}

impl RegistryClient {
    pub fn builder(address: String) -> RegistryClientBuilder {
        RegistryClientBuilder::new(address)
    }

    pub async fn authenticate(&mut self, repository: &str) -> Result<()> {
        self.credential = self.auth.login(repository, &self.auth_config, &self.output).await?;
        match &self.credential {
            RegistryCredential::Anonymous => self.output.detail("Registry allows anonymous access"),
            RegistryCredential::Basic { username, .. } => {
                self.output.detail(&format!("Using basic authentication as {}", username))
            }
            RegistryCredential::Bearer(token) => {
                self.output.detail(&format!("Pull token obtained ({} chars)", token.len()))
            }
        }
        Ok(())
    }

    /// Download and parse the manifest for `repository:reference`
    pub async fn pull_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        let url = format!("{}/v2/{}/manifests/{}", self.address, repository, reference);
        self.output.verbose(&format!("Pulling manifest {}", url));

        let request = self.client.get(&url).header(ACCEPT, ACCEPT_MANIFEST_TYPES);
        let response = self
            .credential
            .apply(request)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "manifest pull"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(HttpErrorHandler::handle_registry_error(status, &error_text, "manifest pull"));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "manifest body"))?;
        Manifest::from_slice(&data)
    }

    /// Open the blob as a byte stream starting at `offset`
    pub async fn open_blob(&self, repository: &str, digest: &str, offset: u64) -> Result<RangedStream> {
        let url = format!("{}/v2/{}/blobs/{}", self.address, repository, digest);
        self.output.detail(&format!("Opening blob {} at offset {}", url, offset));

        let mut request = self.client.get(&url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        let response = self
            .credential
            .apply(request)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "blob pull"))?;

        let start = match response.status() {
            StatusCode::PARTIAL_CONTENT => partial_content_start(response.headers(), offset),
            StatusCode::OK => 0,
            status => {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Failed to read error response".to_string());
                return Err(HttpErrorHandler::handle_registry_error(status, &error_text, "blob pull"));
            }
        };

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| NetworkErrorHandler::handle_network_error(&e, "blob stream")));
        Ok(RangedStream {
            stream: Box::pin(stream),
            start,
        })
    }
}
