//! VM Image Fetcher Library
//!
//! This file serves as the library root for the vm-image-fetcher crate,
//! organizing and exposing the modules that resolve, download and resume
//! VM installation images from OCI registries and HTTP origins.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod mirror;
pub mod progress;
pub mod reference;
pub mod registry;
pub mod status;

pub use config::{AuthConfig, FetchConfig};
pub use error::{FetchError, Result};
pub use fetch::{FetchSession, HttpFetcher};
pub use logging::Logger;
pub use mirror::MirrorResolver;
pub use reference::Reference;
pub use registry::RegistryFetcher;
pub use status::{DownloadStatus, StatusStore};
