//! Registry module for pulling artifacts from OCI registries
//!
//! This module provides authentication, manifest and blob access, and the
//! fetcher that feeds a registry blob into the resumable copy path.

pub mod auth;
pub mod client;
pub mod fetcher;
pub mod manifest;

pub use auth::{Auth, RegistryCredential};
pub use client::{RegistryClient, RegistryClientBuilder};
pub use fetcher::RegistryFetcher;
pub use manifest::Manifest;
