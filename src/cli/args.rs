//! Command-line argument parsing

use crate::catalog::WindowsVersion;
use crate::config::FetchConfig;
use crate::mirror::MirrorPreset;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vm-image-fetcher")]
#[command(about = "Download VM installation images from OCI registries and HTTP origins, resuming where a previous run stopped")]
#[command(version, author)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Directory for finished images
    #[arg(long = "iso-path", global = true, help = "Directory that receives finished images")]
    pub iso_path: Option<PathBuf>,

    /// Directory for checkpoint files
    #[arg(long = "cache-path", global = true, help = "Directory that holds checkpoint files")]
    pub cache_path: Option<PathBuf>,

    /// Checkpoint file override
    #[arg(long = "status-path", global = true, help = "Explicit checkpoint file path")]
    pub status_path: Option<PathBuf>,

    /// Ignore partial files and checkpoints
    #[arg(long = "no-resume", global = true, help = "Always start downloads from the beginning")]
    pub no_resume: bool,

    /// Configuration file path
    #[arg(long = "config", global = true, help = "Path to a JSON configuration file")]
    pub config: Option<PathBuf>,

    /// Overall deadline in seconds
    #[arg(
        long = "timeout",
        short = 't',
        global = true,
        help = "Cancel the fetch after this many seconds"
    )]
    pub timeout: Option<u64>,

    /// Use http:// for registry hosts
    #[arg(long = "plain-http", global = true, help = "Talk to registries over plain HTTP")]
    pub plain_http: bool,

    /// Skip TLS verification
    #[arg(long = "skip-tls", short = 'k', global = true, help = "Skip TLS certificate verification")]
    pub skip_tls: bool,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet mode
    #[arg(
        long = "quiet",
        short = 'q',
        global = true,
        conflicts_with = "verbose",
        help = "Only print errors"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch the first file of a registry artifact, trying mirrors first
    Fetch {
        /// Canonical reference, e.g. ghcr.io/kspeeder/win11x64:cn_simplified
        reference: String,
        #[command(flatten)]
        mirrors: MirrorArgs,
        /// Verify the finished file against its registry digest
        #[arg(long = "verify")]
        verify: bool,
    },
    /// Fetch a file from a plain HTTP(S) URL
    FetchUrl {
        url: String,
    },
    /// Fetch a Windows installation image from the catalog
    Windows {
        #[arg(long = "version", value_enum)]
        version: WindowsVersion,
        #[arg(long = "edition", default_value = "")]
        edition: String,
        #[command(flatten)]
        mirrors: MirrorArgs,
        #[arg(long = "verify")]
        verify: bool,
    },
    /// Print the ordered list of references a fetch would try
    Candidates {
        reference: String,
        #[command(flatten)]
        mirrors: MirrorArgs,
    },
    /// Show the saved checkpoint, if it matches the partial file on disk
    Status,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct MirrorArgs {
    /// Mirror host, repeatable; tried in the order given
    #[arg(long = "mirror", short = 'm')]
    pub mirror: Vec<String>,

    /// Named mirror list
    #[arg(long = "preset", value_enum, conflicts_with = "mirror")]
    pub preset: Option<MirrorPreset>,
}

impl MirrorArgs {
    /// Mirrors chosen on the command line, if any
    pub fn selected(&self) -> Option<Vec<String>> {
        if !self.mirror.is_empty() {
            return Some(self.mirror.clone());
        }
        self.preset.map(MirrorPreset::hosts)
    }
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Layer command-line flags over `config`
    pub fn apply_to(&self, mut config: FetchConfig) -> FetchConfig {
        if let Some(path) = &self.iso_path {
            config.iso_path = path.clone();
        }
        if let Some(path) = &self.cache_path {
            config.cache_path = path.clone();
        }
        if let Some(path) = &self.status_path {
            config.status_path = Some(path.clone());
        }
        if self.no_resume {
            config.resume = false;
        }
        if self.timeout.is_some() {
            config.deadline_secs = self.timeout;
        }
        if self.plain_http {
            config.plain_http = true;
        }
        if self.skip_tls {
            config.skip_tls = true;
        }

        match &self.command {
            Command::Fetch { mirrors, verify, .. } | Command::Windows { mirrors, verify, .. } => {
                if let Some(selected) = mirrors.selected() {
                    config.mirrors = selected;
                }
                if *verify {
                    config.verify_digest = true;
                }
            }
            Command::Candidates { mirrors, .. } => {
                if let Some(selected) = mirrors.selected() {
                    config.mirrors = selected;
                }
            }
            Command::FetchUrl { .. } | Command::Status => {}
        }
        config
    }
}
