//! SHA256 digest utilities for registry blobs
//!
//! Validation of `sha256:` descriptors from manifests and streaming
//! verification of finished downloads.

use crate::error::{FetchError, IoResultExt, Result};
use sha2::Digest;
use std::io::Read;
use std::path::Path;

const HASH_BUFFER_SIZE: usize = 1024 * 1024;

pub struct DigestUtils;

impl DigestUtils {
    /// Validate SHA256 hex string (64 characters, all hex)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Extract SHA256 hex part from full digest
    pub fn extract_hex_part(digest: &str) -> Result<&str> {
        match digest.strip_prefix("sha256:") {
            Some(hex_part) if Self::is_valid_sha256_hex(hex_part) => Ok(hex_part),
            Some(_) => Err(FetchError::UnexpectedResponse(format!(
                "Invalid SHA256 hex part in digest: {}",
                digest
            ))),
            None => Err(FetchError::UnexpectedResponse(format!(
                "Digest missing sha256: prefix: {}",
                digest
            ))),
        }
    }

    /// Format digest for display (truncated for readability)
    pub fn format_digest_short(digest: &str) -> String {
        if digest.len() > 23 {
            format!("{}...", &digest[..23])
        } else {
            digest.to_string()
        }
    }

    /// Hash a file without loading it into memory
    pub async fn sha256_file(path: &Path) -> Result<String> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut file = std::fs::File::open(&owned).fs_context("open for hashing", &owned)?;
            let mut hasher = sha2::Sha256::new();
            let mut buf = vec![0u8; HASH_BUFFER_SIZE];
            loop {
                let n = file.read(&mut buf).fs_context("read for hashing", &owned)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        })
        .await
        .map_err(|e| FetchError::Configuration(format!("Hashing task failed: {}", e)))?
    }

    /// Check a file on disk against an expected `sha256:` digest
    pub async fn verify_file(path: &Path, expected_digest: &str) -> Result<()> {
        let expected_hex = Self::extract_hex_part(expected_digest)?;
        let computed = Self::sha256_file(path).await?;
        if !computed.eq_ignore_ascii_case(expected_hex) {
            return Err(FetchError::DigestMismatch {
                path: path.display().to_string(),
                expected: expected_digest.to_string(),
                actual: format!("sha256:{}", computed),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_DIGEST: &str = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_validate_digest() {
        assert_eq!(DigestUtils::extract_hex_part(HELLO_DIGEST).unwrap(), &HELLO_DIGEST[7..]);
        assert!(DigestUtils::extract_hex_part("sha256:invalid").is_err());
        assert!(DigestUtils::extract_hex_part(&HELLO_DIGEST[7..]).is_err());
        assert!(DigestUtils::extract_hex_part("md5:abc").is_err());
    }

    #[test]
    fn test_format_digest_short() {
        assert_eq!(DigestUtils::format_digest_short(HELLO_DIGEST), "sha256:b94d27b9934d3e08...");
        assert_eq!(DigestUtils::format_digest_short("sha256:ab"), "sha256:ab");
    }

    #[tokio::test]
    async fn test_verify_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        DigestUtils::verify_file(&path, HELLO_DIGEST).await.unwrap();

        tokio::fs::write(&path, b"hello world!").await.unwrap();
        let err = DigestUtils::verify_file(&path, HELLO_DIGEST).await.unwrap_err();
        assert!(matches!(err, FetchError::DigestMismatch { .. }));
    }
}
