//! Mirror candidate ordering and fallback
//!
//! Preferred mirrors are tried in the order given, duplicates are skipped,
//! and the canonical reference always closes the list.

use crate::error::{FetchError, Result};
use crate::logging::Logger;
use crate::reference::{Reference, substitute_host};
use std::collections::HashSet;
use std::future::Future;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MIRROR: &str = "ghcr.1ms.run";

/// Well-known mirror choices for the canonical `ghcr.io` registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MirrorPreset {
    /// ghcr.1ms.run, falls back to the official registry
    #[value(name = "1ms")]
    OneMs,
    /// ghcr.nju.edu.cn, falls back to the official registry
    Nju,
    /// ghcr.linkease.net:5443, requires a local KSpeeder install
    Linkease,
    /// Official registry only
    Official,
}

impl MirrorPreset {
    pub fn hosts(self) -> Vec<String> {
        match self {
            MirrorPreset::OneMs => vec![DEFAULT_MIRROR.to_string()],
            MirrorPreset::Nju => vec!["ghcr.nju.edu.cn".to_string()],
            MirrorPreset::Linkease => vec!["ghcr.linkease.net:5443".to_string()],
            MirrorPreset::Official => Vec::new(),
        }
    }
}

pub fn default_mirrors() -> Vec<String> {
    MirrorPreset::OneMs.hosts()
}

/// Build the ordered, duplicate-free candidate list ending with `canonical`
pub fn build_candidates(canonical: &str, mirrors: &[String]) -> Vec<String> {
    let mut refs = Vec::with_capacity(mirrors.len() + 1);
    let mut seen = HashSet::with_capacity(mirrors.len() + 1);

    for mirror in mirrors {
        let mirror = mirror.trim();
        if mirror.is_empty() {
            continue;
        }
        let candidate = substitute_host(canonical, mirror);
        // The canonical reference is always tried last
        if candidate != canonical && seen.insert(candidate.clone()) {
            refs.push(candidate);
        }
    }

    refs.push(canonical.to_string());
    refs
}

pub struct MirrorResolver {
    mirrors: Vec<String>,
    output: Logger,
    cancel: CancellationToken,
}

impl MirrorResolver {
    pub fn new(mirrors: Vec<String>, output: Logger) -> Self {
        Self {
            mirrors,
            output,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop moving on to further candidates once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn candidates(&self, canonical: &str) -> Result<Vec<String>> {
        Reference::parse(canonical)?;
        Ok(build_candidates(canonical, &self.mirrors))
    }

    /// Run `fetch_one` over each candidate until one succeeds.
    ///
    /// Transient failures move on to the next candidate and only the last one
    /// is reported. Anything else aborts immediately.
    pub async fn resolve_with_fallback<T, F, Fut>(&self, canonical: &str, mut fetch_one: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let candidates = self.candidates(canonical)?;
        let total = candidates.len();
        let mut last: Option<(String, FetchError)> = None;

        for (i, candidate) in candidates.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            self.output.step(&format!("Trying source {}/{}: {}", i + 1, total, candidate));
            match fetch_one(candidate.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    self.output.warning(&format!("Source {} failed: {}", candidate, err));
                    last = Some((candidate, err));
                }
                Err(err) => return Err(err),
            }
        }

        match last {
            Some((last_source, error)) => Err(FetchError::MirrorsExhausted {
                last_source,
                error: Box::new(error),
            }),
            None => Err(FetchError::Configuration("no reference candidates".to_string())),
        }
    }
}
