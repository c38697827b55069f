//! Standardized error handling patterns for HTTP and registry responses

use crate::error::FetchError;
use reqwest::StatusCode;

/// Standard error handler for HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Handle registry-related HTTP errors
    pub fn handle_registry_error(status: StatusCode, error_text: &str, operation: &str) -> FetchError {
        let error_msg = match status.as_u16() {
            401 => format!("Unauthorized to perform {}: {}", operation, error_text),
            403 => format!("Forbidden: insufficient permissions for {}: {}", operation, error_text),
            404 => format!("Resource not found for {}: {}", operation, error_text),
            416 => format!("Requested range not satisfiable for {}: {}", operation, error_text),
            429 => format!("Rate limited during {}: {}", operation, error_text),
            500 => format!("Registry server error during {}: {}", operation, error_text),
            502 | 503 => format!("Registry unavailable for {}: {}", operation, error_text),
            _ => format!("{} failed (status {}): {}", operation, status, error_text),
        };

        FetchError::Registry(error_msg)
    }

    /// Handle authentication-related HTTP errors
    pub fn handle_auth_error(status: StatusCode, error_text: &str) -> FetchError {
        let error_msg = match status.as_u16() {
            400 => "Invalid token request parameters".to_string(),
            401 => "Invalid credentials provided".to_string(),
            403 => "Access denied - insufficient permissions".to_string(),
            404 => "Authentication endpoint not found".to_string(),
            _ => format!("Authentication failed (status {}): {}", status, error_text),
        };

        FetchError::Authentication(error_msg)
    }

    /// Handle plain HTTP origin errors
    pub fn handle_origin_error(status: StatusCode, url: &str) -> FetchError {
        match status.as_u16() {
            404 => FetchError::UnexpectedResponse(format!("{} not found on origin", url)),
            416 => FetchError::UnexpectedResponse(format!("Origin rejected range request for {}", url)),
            500..=599 => FetchError::Network(format!("Origin server error {} for {}", status, url)),
            _ => FetchError::UnexpectedResponse(format!("Origin returned {} for {}", status, url)),
        }
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors with helpful context
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> FetchError {
        if error.is_timeout() {
            FetchError::Network(format!("{} timeout: {}", context, error))
        } else if error.is_connect() {
            FetchError::Network(format!("Connection error during {}: {}", context, error))
        } else if error.is_decode() || error.is_body() {
            FetchError::Network(format!("Body stream error during {}: {}", context, error))
        } else if error.to_string().contains("certificate") {
            FetchError::Network(format!("TLS certificate error during {}: {}", context, error))
        } else {
            FetchError::Network(format!("{} network error: {}", context, error))
        }
    }
}
