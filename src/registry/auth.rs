//! Authentication for registry pulls
//!
//! Probes `/v2/` and follows the `WWW-Authenticate` challenge: bearer tokens
//! are exchanged at the realm for `repository:<name>:pull`, with basic
//! credentials when configured and anonymously otherwise.

use crate::config::AuthConfig;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{FetchError, Result};
use crate::logging::Logger;
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// How requests to the registry are authorized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCredential {
    Anonymous,
    Basic { username: String, password: String },
    Bearer(String),
}

impl RegistryCredential {
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            RegistryCredential::Anonymous => request,
            RegistryCredential::Basic { username, password } => request.basic_auth(username, Some(password)),
            RegistryCredential::Bearer(token) => request.bearer_auth(token),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Auth {
    client: Client,
    registry_address: String,
}

impl Auth {
    pub fn new(client: Client, registry_address: &str) -> Self {
        Self {
            client,
            registry_address: registry_address.trim_end_matches('/').to_string(),
        }
    }

    pub async fn login(&self, repository: &str, auth: &AuthConfig, output: &Logger) -> Result<RegistryCredential> {
        let url = format!("{}/v2/", self.registry_address);
        output.detail(&format!("Sending auth challenge request to {}", url));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "registry probe"))?;

        let status = response.status();
        output.detail(&format!("Auth challenge response status: {}", status));

        if status.is_success() {
            return Ok(RegistryCredential::Anonymous);
        }
        if status != StatusCode::UNAUTHORIZED {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(status, &text, "registry probe"));
        }

        let header = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if let Some(challenge) = parse_bearer_challenge(&header) {
            output.detail(&format!(
                "Bearer challenge: realm={}, service={:?}",
                challenge.realm, challenge.service
            ));
            let token = self.get_token(&challenge, repository, auth, output).await?;
            return Ok(RegistryCredential::Bearer(token));
        }

        if header.trim_start().to_ascii_lowercase().starts_with("basic") {
            return match (&auth.username, &auth.password) {
                (Some(username), Some(password)) => Ok(RegistryCredential::Basic {
                    username: username.clone(),
                    password: password.clone(),
                }),
                _ => Err(FetchError::Authentication(
                    "Registry requires basic credentials but none are configured".to_string(),
                )),
            };
        }

        Err(FetchError::Authentication(format!(
            "Unsupported authentication challenge: {:?}",
            header
        )))
    }

    async fn get_token(
        &self,
        challenge: &AuthChallenge,
        repository: &str,
        auth: &AuthConfig,
        output: &Logger,
    ) -> Result<String> {
        let scope = format!("repository:{}:pull", repository);
        let mut query: Vec<(&str, &str)> = vec![("scope", scope.as_str())];
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }

        let mut request = self.client.get(&challenge.realm).query(&query);
        if let (Some(username), Some(password)) = (&auth.username, &auth.password) {
            output.detail(&format!("Requesting pull token for {} as {}", repository, username));
            request = request.basic_auth(username, Some(password));
        } else {
            output.detail(&format!("Requesting anonymous pull token for {}", repository));
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token request"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_auth_error(status, &text));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Authentication(format!("Failed to parse token response: {}", e)))?;

        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FetchError::Authentication("Token response carried no token".to_string()))
    }
}

/// Parse `Bearer realm="...",service="...",scope="..."`
pub fn parse_bearer_challenge(header: &str) -> Option<AuthChallenge> {
    let header = header.trim();
    if header.len() < 7 || !header[..7].eq_ignore_ascii_case("bearer ") {
        return None;
    }

    let mut params = HashMap::new();
    for param in header[7..].split(',') {
        if let Some((key, value)) = param.split_once('=') {
            params.insert(key.trim().to_ascii_lowercase(), value.trim().trim_matches('"').to_string());
        }
    }

    let realm = params.remove("realm").filter(|r| !r.is_empty())?;
    Some(AuthChallenge {
        realm,
        service: params.remove("service"),
        scope: params.remove("scope"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = parse_bearer_challenge(
            r#"Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:user/image:pull""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://ghcr.io/token");
        assert_eq!(challenge.service.as_deref(), Some("ghcr.io"));
        assert_eq!(challenge.scope.as_deref(), Some("repository:user/image:pull"));
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(parse_bearer_challenge(r#"Basic realm="registry""#).is_none());
        assert!(parse_bearer_challenge("Bearer service=\"x\"").is_none());
        assert!(parse_bearer_challenge("").is_none());
    }
}
