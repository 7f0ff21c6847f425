//! cordon CLI - apply isolation modes one token at a time

use clap::{Parser, ValueEnum};
use cordon_core::config::ReportFormat;
use cordon_core::isolation::{DetachStrategy, SeccompProfile};
use cordon_core::{CordonConfig, Driver};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cordon")]
#[command(author, version, about = "Explore Linux isolation primitives one mode at a time")]
struct Cli {
    /// JSON config file (flags override it)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// New root directory for -chroot (defaults to CORDON_ROOT env var or /tmp/cordon-root)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// How -chroot detaches the filesystem
    #[arg(long, value_enum)]
    detach: Option<Detach>,

    /// Do not map uid/gid into new user namespaces
    #[arg(long)]
    no_id_map: bool,

    /// Allow-list installed by -seccomp
    #[arg(long, value_enum)]
    seccomp_profile: Option<Profile>,

    /// Stop waiting for a child after this many seconds
    #[arg(long, value_name = "SECS")]
    wait_timeout: Option<u64>,

    /// Print identity reports as JSON
    #[arg(long)]
    json: bool,

    /// Isolation modes, applied in order: -user -network -pid -chroot -seccomp
    #[arg(value_name = "MODE", allow_hyphen_values = true, trailing_var_arg = true)]
    modes: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Detach {
    PivotRoot,
    Chroot,
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    Baseline,
    Diagnostic,
}

impl Cli {
    /// Defaults, then the config file, then flags
    fn resolve_config(&self) -> cordon_core::Result<CordonConfig> {
        let base = match &self.config {
            Some(path) => CordonConfig::from_file(path)?,
            None => CordonConfig::default(),
        };

        let mut builder = base.into_builder();
        if let Some(root) = &self.root {
            builder = builder.detach_root(root);
        }
        if let Some(detach) = self.detach {
            builder = builder.detach_strategy(match detach {
                Detach::PivotRoot => DetachStrategy::PivotRoot,
                Detach::Chroot => DetachStrategy::Chroot,
            });
        }
        if self.no_id_map {
            builder = builder.map_user_ids(false);
        }
        if let Some(profile) = self.seccomp_profile {
            builder = builder.seccomp_profile(match profile {
                Profile::Baseline => SeccompProfile::Baseline,
                Profile::Diagnostic => SeccompProfile::Diagnostic,
            });
        }
        if let Some(secs) = self.wait_timeout {
            builder = builder.wait_timeout_secs(secs);
        }
        if self.json {
            builder = builder.report_format(ReportFormat::Json);
        }
        Ok(builder.build())
    }
}

fn main() -> ExitCode {
    // stdout carries the reports; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cordon=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{} failed: {e}", e.step());
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?config, "configuration loaded");

    let mut driver = Driver::new(&config);
    match driver.run(cli.modes.as_slice()) {
        Ok(outcome) => ExitCode::from(outcome.exit_status()),
        Err(e) => {
            tracing::error!(pid = std::process::id(), "{} failed: {e}", e.step());
            ExitCode::FAILURE
        }
    }
}
