//! CLI command definitions and dispatch.

pub mod apply;
pub mod plan;
pub mod run;
pub mod status;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use convoy_common::config::ConvoyConfig;
use convoy_common::constants;
use convoy_common::types::{DriftField, LogFormat};
use convoy_manifest::Manifest;
use convoy_manifest::environment::HttpFetcher;
use convoy_runtime::backend::{self, ContainerBackend};
use convoy_runtime::drift::StructuredComparator;
use convoy_runtime::options::HostContext;
use convoy_runtime::{ReconcileOptions, Reconciler};

/// convoy: converge this host's containers to a manifest.
#[derive(Parser, Debug)]
#[command(name = constants::BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Path to the manifest (`.json` for JSON, anything else for YAML).
    #[arg(long, global = true, env = "CONVOY_MANIFEST", default_value = constants::DEFAULT_MANIFEST)]
    pub manifest: PathBuf,

    /// Placement zone of this host, exported to containers as DATACENTER.
    #[arg(long, global = true, env = "CONVOY_ZONE")]
    pub zone: Option<String>,

    /// Overrides the hostname reported by the kernel.
    #[arg(long, global = true, env = "CONVOY_HOSTNAME")]
    pub hostname: Option<String>,

    /// Seconds a stopping container gets before it is killed.
    #[arg(long, global = true, default_value_t = constants::DEFAULT_STOP_TIMEOUT_SECS)]
    pub stop_timeout: u64,

    /// Seconds a pre-start hook may run. Unbounded when unset.
    #[arg(long, global = true)]
    pub hook_timeout: Option<u64>,

    /// Fields compared to decide whether a container must be recreated.
    #[arg(long, global = true, value_delimiter = ',', default_value = "image")]
    pub drift: Vec<DriftField>,

    /// Path or name of the docker binary.
    #[arg(long, global = true, default_value = constants::DEFAULT_DOCKER_BINARY)]
    pub docker: PathBuf,

    /// Log line format: text or json.
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,
}

impl GlobalArgs {
    /// Builds the invocation configuration.
    #[must_use]
    pub fn config(&self) -> ConvoyConfig {
        ConvoyConfig {
            manifest_path: self.manifest.clone(),
            zone: self.zone.clone(),
            hostname: self.hostname.clone(),
            stop_timeout_secs: self.stop_timeout,
            hook_timeout_secs: self.hook_timeout,
            drift_fields: self.drift.clone(),
            docker_binary: self.docker.clone(),
            log_format: self.log_format,
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Converge containers to the manifest.
    Apply(apply::ApplyArgs),
    /// Show whether each manifest container is running.
    Status(status::StatusArgs),
    /// Run a one-off command with a container's configuration.
    Run(run::RunArgs),
    /// Print the execution order without touching the runtime.
    Plan(plan::PlanArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.global.config();
    tracing::debug!(?config, "configuration");
    match cli.command {
        Command::Apply(args) => apply::execute(&config, &args),
        Command::Status(args) => status::execute(&config, &args),
        Command::Run(args) => run::execute(&config, &args),
        Command::Plan(args) => plan::execute(&config, &args),
    }
}

/// Everything a runtime-touching command needs, wired from configuration.
pub struct Session {
    /// The validated manifest.
    pub manifest: Manifest,
    backend: Box<dyn ContainerBackend>,
    fetcher: HttpFetcher,
    host: HostContext,
    config: ConvoyConfig,
}

impl Session {
    /// Loads the manifest and connects to the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is invalid, the docker binary is
    /// missing, or the host context cannot be read.
    pub fn open(config: &ConvoyConfig) -> anyhow::Result<Self> {
        let manifest = convoy_manifest::loader::load_manifest(&config.manifest_path)?;
        let backend = backend::docker_backend(&config.docker_binary)?;
        let fetcher = HttpFetcher::new()?;
        let host = HostContext::detect(config.zone.clone(), config.hostname.clone())?;
        Ok(Self {
            manifest,
            backend,
            fetcher,
            host,
            config: config.clone(),
        })
    }

    /// A reconciler bound to this session's runtime.
    #[must_use]
    pub fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(self.backend.as_ref(), &self.fetcher, self.host.clone())
            .with_comparator(StructuredComparator::new(self.config.drift_fields.iter().copied()))
            .with_options(ReconcileOptions {
                stop_timeout: self.config.stop_timeout(),
                hook_timeout: self.config.hook_timeout(),
            })
    }
}
