//! Runner that turns parsed arguments into a fetch

use crate::catalog::windows_reference;
use crate::cli::args::{Args, Command};
use crate::config::{AuthConfig, FetchConfig};
use crate::error::Result;
use crate::fetch::{FetchOptions, FetchSession, HttpFetcher};
use crate::logging::Logger;
use crate::mirror::MirrorResolver;
use crate::registry::RegistryFetcher;
use crate::status::StatusStore;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DOWNLOAD_STATUS_FILE: &str = "download.ops";
pub const WINDOWS_STATUS_FILE: &str = "windows_install.ops";

pub struct Runner {
    args: Args,
    config: FetchConfig,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        let output = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };

        let base = match &args.config {
            Some(path) => FetchConfig::from_file(path)?,
            None => FetchConfig::default(),
        };
        let config = args.apply_to(base.from_env());
        config.validate()?;

        Ok(Self { args, config, output })
    }

    pub async fn run(&self) -> Result<()> {
        match &self.args.command {
            Command::Fetch { reference, .. } => {
                self.fetch_reference(reference, DOWNLOAD_STATUS_FILE).await?;
            }
            Command::Windows { version, edition, .. } => {
                let reference = windows_reference(*version, edition)?;
                self.output.info(&format!("{} ({}) resolves to {}", version, edition, reference));
                self.fetch_reference(&reference, WINDOWS_STATUS_FILE).await?;
            }
            Command::FetchUrl { url } => {
                self.fetch_url(url).await?;
            }
            Command::Candidates { reference, .. } => self.print_candidates(reference)?,
            Command::Status => self.print_status().await,
        }
        Ok(())
    }

    async fn fetch_reference(&self, reference: &str, status_file: &str) -> Result<PathBuf> {
        self.output.section("Registry fetch");
        let started = Instant::now();

        let auth = AuthConfig::from_env();
        if auth.has_credentials() {
            self.output.step("Using registry credentials from the environment");
        } else {
            self.output.step("No registry credentials found - pulling anonymously");
        }
        let fetcher = RegistryFetcher::from_config(&self.config, auth, self.output.clone());

        let (session, guards) = self.session(status_file).await;
        let resolver = MirrorResolver::new(self.config.mirrors.clone(), self.output.clone())
            .with_cancel(session.cancel.clone());
        let dest_dir = self.config.iso_path.as_path();

        let fetcher = &fetcher;
        let session_ref = &session;
        let result = resolver
            .resolve_with_fallback(reference, move |candidate| async move {
                fetcher.fetch(&candidate, dest_dir, session_ref).await
            })
            .await;
        guards.release();

        let path = result?;
        self.report_done(&path, started);
        Ok(path)
    }

    async fn fetch_url(&self, url: &str) -> Result<PathBuf> {
        self.output.section("HTTP fetch");
        let started = Instant::now();

        let fetcher = HttpFetcher::new(
            Duration::from_secs(self.config.connect_timeout_secs.max(1)),
            self.config.skip_tls,
            self.output.clone(),
        )?;
        let (session, guards) = self.session(DOWNLOAD_STATUS_FILE).await;
        let result = fetcher.fetch(url, &self.config.iso_path, &session).await;
        guards.release();

        let path = result?;
        self.report_done(&path, started);
        Ok(path)
    }

    /// Session wired to the checkpoint file, Ctrl-C and the optional deadline
    async fn session(&self, status_file: &str) -> (FetchSession, CancelGuards) {
        let store = StatusStore::new(self.config.status_path_or(status_file));
        let existing = store.load().await;
        if let Some(status) = &existing {
            self.output.detail(&format!(
                "Found checkpoint for {} at {}%",
                status.display_name(),
                status.percent()
            ));
        }

        let cancel = CancellationToken::new();
        let guards = CancelGuards::install(cancel.clone(), self.config.deadline_secs, self.output.clone());

        let session = FetchSession::new(self.output.clone())
            .with_options(FetchOptions::from(&self.config))
            .with_checkpoint(store, existing)
            .with_cancel(cancel);
        (session, guards)
    }

    fn report_done(&self, path: &std::path::Path, started: Instant) {
        self.output.success(&format!(
            "Saved {} in {}",
            path.display(),
            self.output.format_duration(started.elapsed())
        ));
    }

    fn print_candidates(&self, reference: &str) -> Result<()> {
        let resolver = MirrorResolver::new(self.config.mirrors.clone(), self.output.clone());
        for candidate in resolver.candidates(reference)? {
            println!("{}", candidate);
        }
        Ok(())
    }

    async fn print_status(&self) {
        let stores: Vec<StatusStore> = match &self.config.status_path {
            Some(path) => vec![StatusStore::new(path.clone())],
            None => [DOWNLOAD_STATUS_FILE, WINDOWS_STATUS_FILE]
                .iter()
                .map(|name| StatusStore::new(self.config.cache_path.join(name)))
                .collect(),
        };

        let mut found = false;
        for store in stores {
            if let Some(status) = store.load_valid().await {
                found = true;
                self.output.summary_kv(
                    "Download in progress",
                    &[
                        ("File", status.display_name()),
                        ("Progress", format!("{}%", status.percent())),
                        (
                            "Written",
                            format!(
                                "{} / {}",
                                self.output.format_size(status.curr),
                                self.output.format_size(status.total_size)
                            ),
                        ),
                        ("Source", status.source_reference.clone()),
                        ("Checkpoint", store.path().display().to_string()),
                    ],
                );
            }
        }
        if !found {
            self.output.info("No resumable download found");
        }
    }
}

/// Background tasks that cancel the fetch on Ctrl-C or when the deadline passes
struct CancelGuards {
    tasks: Vec<JoinHandle<()>>,
}

impl CancelGuards {
    fn install(cancel: CancellationToken, deadline_secs: Option<u64>, output: Logger) -> Self {
        let mut tasks = Vec::new();

        let token = cancel.clone();
        let log = output.clone();
        tasks.push(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log.warning("Interrupted - keeping partial download for the next run");
                token.cancel();
            }
        }));

        if let Some(secs) = deadline_secs {
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                output.warning(&format!("Deadline of {}s reached - cancelling", secs));
                cancel.cancel();
            }));
        }

        Self { tasks }
    }

    fn release(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}
