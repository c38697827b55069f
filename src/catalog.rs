//! Windows image catalog
//!
//! Maps a Windows version and edition name to the canonical registry
//! reference that carries the matching installation image.

use crate::error::{FetchError, Result};
use std::fmt;

const CATALOG_NAMESPACE: &str = "ghcr.io/kspeeder";

const EDITION_CN_SIMPLIFIED: &str = "chinese (simplified)";
const EDITION_CN_SIMPLIFIED_X64: &str = "chinese (simplified) x64";
const EDITION_EN_ENTERPRISE: &str = "english enterprise";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WindowsVersion {
    #[value(name = "7")]
    Win7,
    #[value(name = "10")]
    Win10,
    #[value(name = "11")]
    Win11,
}

impl WindowsVersion {
    fn image_name(self) -> &'static str {
        match self {
            WindowsVersion::Win7 => "win7x64",
            WindowsVersion::Win10 => "win10x64",
            WindowsVersion::Win11 => "win11x64",
        }
    }

    /// Edition names accepted for this version
    pub fn editions(self) -> &'static [&'static str] {
        match self {
            WindowsVersion::Win7 => &["English Enterprise", "Chinese (Simplified)", "Chinese (Simplified) x64"],
            WindowsVersion::Win10 | WindowsVersion::Win11 => &["Chinese (Simplified)"],
        }
    }
}

impl fmt::Display for WindowsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WindowsVersion::Win7 => "Windows 7",
            WindowsVersion::Win10 => "Windows 10",
            WindowsVersion::Win11 => "Windows 11",
        };
        f.write_str(label)
    }
}

/// Canonical reference for `version` + `edition`; edition matching ignores case
pub fn windows_reference(version: WindowsVersion, edition: &str) -> Result<String> {
    let normalized = edition.trim().to_lowercase();

    let tag = match (version, normalized.as_str()) {
        (WindowsVersion::Win10 | WindowsVersion::Win11, EDITION_CN_SIMPLIFIED) => "cn_simplified",
        (WindowsVersion::Win7, "" | EDITION_EN_ENTERPRISE) => "en_enterprise",
        (WindowsVersion::Win7, EDITION_CN_SIMPLIFIED | EDITION_CN_SIMPLIFIED_X64) => "cn_simplified",
        _ => {
            return Err(FetchError::Configuration(format!(
                "{} has no image for edition {:?} (available: {})",
                version,
                edition,
                version.editions().join(", ")
            )));
        }
    };

    Ok(format!("{}/{}:{}", CATALOG_NAMESPACE, version.image_name(), tag))
}
