//! OCI manifest types and the file listing derived from them

use crate::digest::DigestUtils;
use crate::error::{FetchError, Result};
use crate::fetch::{RemoteArtifact, safe_file_name};
use serde::Deserialize;
use std::collections::HashMap;

pub const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";

pub const ACCEPT_MANIFEST_TYPES: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    /// Present on image indexes / manifest lists
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

impl Manifest {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(data)?;
        if manifest.layers.is_empty() && !manifest.manifests.is_empty() {
            return Err(FetchError::UnexpectedResponse(
                "Reference resolves to a manifest index; multi-platform artifacts are not supported".to_string(),
            ));
        }
        Ok(manifest)
    }

    /// Files in layer order, named after their title annotation
    pub fn files(&self) -> Result<Vec<RemoteArtifact>> {
        self.layers
            .iter()
            .map(|layer| {
                let hex = DigestUtils::extract_hex_part(&layer.digest)?;
                let name = match layer.annotations.get(TITLE_ANNOTATION) {
                    Some(title) => safe_file_name(title)?,
                    None => format!("sha256_{}", hex),
                };
                Ok(RemoteArtifact {
                    name,
                    size: layer.size,
                    digest: Some(layer.digest.clone()),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_files_from_artifact_manifest() {
        let json = format!(
            r#"{{
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "config": {{"mediaType": "application/vnd.oci.empty.v1+json", "digest": "{d}", "size": 2}},
                "layers": [
                    {{"mediaType": "application/octet-stream", "digest": "{d}", "size": 5368709120,
                      "annotations": {{"org.opencontainers.image.title": "Win11_24H2_Chinese_Simplified_x64.iso"}}}},
                    {{"mediaType": "application/octet-stream", "digest": "{d}", "size": 11}}
                ]
            }}"#,
            d = DIGEST
        );
        let manifest = Manifest::from_slice(json.as_bytes()).unwrap();
        let files = manifest.files().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "Win11_24H2_Chinese_Simplified_x64.iso");
        assert_eq!(files[0].size, 5368709120);
        assert_eq!(files[0].digest.as_deref(), Some(DIGEST));
        assert_eq!(files[1].name, format!("sha256_{}", &DIGEST[7..]));
    }

    #[test]
    fn test_empty_listing() {
        let manifest = Manifest::from_slice(br#"{"schemaVersion": 2, "layers": []}"#).unwrap();
        assert!(manifest.files().unwrap().is_empty());
    }

    #[test]
    fn test_index_is_rejected() {
        let json = format!(
            r#"{{"schemaVersion": 2, "manifests": [{{"digest": "{}", "size": 10}}]}}"#,
            DIGEST
        );
        assert!(matches!(
            Manifest::from_slice(json.as_bytes()),
            Err(FetchError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_title_is_reduced_to_file_name() {
        let json = format!(
            r#"{{"layers": [{{"digest": "{}", "size": 1,
                 "annotations": {{"org.opencontainers.image.title": "../../etc/passwd"}}}}]}}"#,
            DIGEST
        );
        let files = Manifest::from_slice(json.as_bytes()).unwrap().files().unwrap();
        assert_eq!(files[0].name, "passwd");
    }
}
