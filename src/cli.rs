///
/// This module implements the CLI for pulp-squeezer: argument parsing, the Ansible
/// binary-module entry point and dispatch to the module runners.
///
/// All reconciliation logic lives in [`pulp-squeezer-core`]; this module is glue.
///
/// ## How To Use
/// - From a shell: `pulp-squeezer --pulp-url https://pulp.example.org repository --name r --state present`.
/// - From Ansible: install the binary as a module; Ansible calls it with the path to a JSON
///   arguments file, which [`Commands::Module`] reads.
/// - Programmatically: call [`run`] with a constructed [`Cli`].
///
/// [`pulp-squeezer-core`]: ../../pulp-squeezer-core/
use crate::client::PulpClient;
use crate::load_config::{load_config, ConnectionArgs};
use crate::modules::{
    run_ansible_repository, run_file_content, run_repository, FileContentArgs, RepositoryParams,
    RunOptions,
};
use crate::repository::RepositoryKind;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pulp_squeezer_core::report::ModuleReport;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// CLI for pulp-squeezer: declarative management of Pulp repositories and content.
#[derive(Parser)]
#[clap(
    name = "pulp-squeezer",
    version,
    about = "Idempotently create, update, delete or query Pulp repositories and content"
)]
pub struct Cli {
    /// Path to a YAML file with connection settings
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(flatten)]
    pub connection: ConnectionArgs,

    /// Report what would change without changing anything
    #[clap(long, global = true)]
    pub check: bool,

    /// Include before/after entity snapshots in the result
    #[clap(long, global = true)]
    pub diff: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage repositories of any supported plugin
    Repository {
        /// Content plugin of the repository
        #[clap(long, value_enum, default_value_t = RepositoryKind::File)]
        plugin: RepositoryKind,
        #[clap(flatten)]
        params: RepositoryParams,
    },
    /// Manage ansible repositories
    AnsibleRepository {
        #[clap(flatten)]
        params: RepositoryParams,
    },
    /// Manage file content units in a file repository
    FileContent {
        #[clap(flatten)]
        params: FileContentArgs,
    },
    /// Run as an Ansible binary module with a JSON arguments file
    Module {
        /// Module to run
        #[clap(value_enum)]
        name: ModuleName,
        /// Path to the JSON arguments file
        args: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum ModuleName {
    PulpRepository,
    AnsibleRepository,
    FileContent,
}

impl ModuleName {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleName::PulpRepository => "pulp_repository",
            ModuleName::AnsibleRepository => "ansible_repository",
            ModuleName::FileContent => "file_content",
        }
    }
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Repository { .. } => "repository",
            Commands::AnsibleRepository { .. } => "ansible_repository",
            Commands::FileContent { .. } => "file_content",
            Commands::Module { name, .. } => name.as_str(),
        }
    }
}

/// Module arguments file contents: module parameters, connection parameters and the
/// `_ansible_*` switches, all at the top level.
#[derive(Debug, Deserialize)]
pub struct ModuleInvocation<T> {
    #[serde(flatten)]
    pub connection: ConnectionArgs,
    #[serde(flatten)]
    pub params: T,
    #[serde(rename = "_ansible_check_mode", default)]
    pub check_mode: bool,
    #[serde(rename = "_ansible_diff", default)]
    pub diff: bool,
}

#[derive(Debug, Deserialize)]
struct PulpRepositoryParams {
    #[serde(default)]
    plugin: RepositoryKind,
    #[serde(flatten)]
    params: RepositoryParams,
}

/// Parses a module arguments file, unwrapping `ANSIBLE_MODULE_ARGS` when present.
pub fn read_module_args<T: DeserializeOwned>(path: &Path) -> Result<ModuleInvocation<T>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read module arguments {}", path.display()))?;
    let mut value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("module arguments {} are not valid JSON", path.display()))?;
    if let Some(inner) = value.get_mut("ANSIBLE_MODULE_ARGS") {
        value = inner.take();
    }
    serde_json::from_value(value)
        .with_context(|| format!("invalid module arguments in {}", path.display()))
}

enum Job {
    Repository(RepositoryKind, RepositoryParams),
    AnsibleRepository(RepositoryParams),
    FileContent(FileContentArgs),
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<ModuleReport> {
    tracing::info!(module = cli.command.name(), "module_started");

    let mut options = RunOptions {
        check_mode: cli.check,
        diff: cli.diff,
    };
    let mut module_connection = ConnectionArgs::default();

    let job = match cli.command {
        Commands::Repository { plugin, params } => Job::Repository(plugin, params),
        Commands::AnsibleRepository { params } => Job::AnsibleRepository(params),
        Commands::FileContent { params } => Job::FileContent(params),
        Commands::Module { name, args } => {
            let (connection, check_mode, diff, job) = match name {
                ModuleName::PulpRepository => {
                    let inv: ModuleInvocation<PulpRepositoryParams> = read_module_args(&args)?;
                    let job = Job::Repository(inv.params.plugin, inv.params.params);
                    (inv.connection, inv.check_mode, inv.diff, job)
                }
                ModuleName::AnsibleRepository => {
                    let inv: ModuleInvocation<RepositoryParams> = read_module_args(&args)?;
                    let job = Job::AnsibleRepository(inv.params);
                    (inv.connection, inv.check_mode, inv.diff, job)
                }
                ModuleName::FileContent => {
                    let inv: ModuleInvocation<FileContentArgs> = read_module_args(&args)?;
                    (inv.connection, inv.check_mode, inv.diff, Job::FileContent(inv.params))
                }
            };
            module_connection = connection;
            options.check_mode |= check_mode;
            options.diff |= diff;
            job
        }
    };

    let config = load_config(cli.config.as_deref(), &[&module_connection, &cli.connection])?;
    let client = PulpClient::new(&config)?;

    let report = match job {
        Job::Repository(kind, params) => run_repository(&client, kind, &params, options).await,
        Job::AnsibleRepository(params) => run_ansible_repository(&client, &params, options).await,
        Job::FileContent(params) => run_file_content(&client, &params.into(), options).await,
    };

    match report {
        Ok(report) => {
            tracing::info!(changed = report.changed, "module_finished");
            Ok(report)
        }
        Err(e) => {
            tracing::error!(error = %e, "Module failed");
            Err(e.into())
        }
    }
}
