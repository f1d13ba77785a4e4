//! # apim-migrate CLI interface
//!
//! Command parsing and orchestration only. Every export, checkpoint and
//! upload decision is made in `apim-migrate-core`; this module loads the
//! config, builds the `reqwest` clients for the chosen environment, hands them
//! to the core, and prints the final summary.
//!
//! - `export apis|apps|mcp-servers`: resumable export to local archives.
//! - `ai upload`: push public APIs (and/or API Products) to the indexing service.
//! - `ai purge`: remove every indexed API and API Product of a tenant.
//!
//! For programmatic and integration use, call [`run`] with a constructed [`Cli`].
use crate::load_config::{environment, load_config};
use crate::remote::{ExportFormat, ExportOptions, ManagementClient, RemoteCatalog};
use crate::upload::{resolve_ai_key, IndexingClient};
use anyhow::Result;
use apim_migrate_core::artifact::{ApiDescriptor, ArtifactKind};
use apim_migrate_core::checkpoint::{CheckpointStore, MigrationLayout};
use apim_migrate_core::config::{Config, ConfigError};
use apim_migrate_core::contract::ArtifactCatalog;
use apim_migrate_core::export::{ExportDriver, ExportOutcome, ExportSummary, RunIdentity};
use apim_migrate_core::upload::{purge_index, tenant_from_username, UploadPipeline, UploadScope};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// CLI for apim-migrate: resumable bulk exports and AI index uploads.
#[derive(Parser, Debug)]
#[clap(
    name = "apim-migrate",
    version,
    about = "Export API Manager artifacts for migration and upload public APIs to the AI indexing service"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export every artifact of one kind, resuming where a previous run stopped
    Export {
        #[clap(subcommand)]
        target: ExportTarget,
    },
    /// Work with the AI indexing service
    Ai {
        #[clap(subcommand)]
        action: AiCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ExportTarget {
    /// Export all APIs of a tenant
    Apis(ApiExportArgs),
    /// Export all Applications of a tenant
    Apps(AppExportArgs),
    /// Export the deployed revisions of all MCP Servers of a tenant
    McpServers(McpServerExportArgs),
}

impl ExportTarget {
    fn split(self) -> (ArtifactKind, ExportArgs, ExportOptions) {
        match self {
            ExportTarget::Apis(args) => (ArtifactKind::Api, args.common, args.archive.options()),
            ExportTarget::Apps(args) => (
                ArtifactKind::Application,
                args.common,
                ExportOptions {
                    with_keys: args.with_keys,
                    ..Default::default()
                },
            ),
            ExportTarget::McpServers(args) => (
                ArtifactKind::McpServer,
                args.common,
                ExportOptions {
                    preserve_credentials: args.preserve_credentials,
                    all_revisions: args.all,
                    ..args.archive.options()
                },
            ),
        }
    }
}

/// Flags shared by every export target.
#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Environment (from the config file) to export from
    #[clap(long, short = 'e')]
    pub environment: String,
    /// Tenant domain of the artifacts to export
    #[clap(long, short = 't')]
    pub tenant: Option<String>,
    /// User running the export, recorded in the checkpoint metadata
    #[clap(long, short = 'u')]
    pub user: Option<String>,
    /// Discard previous progress and exports, and start over
    #[clap(long)]
    pub force: bool,
    /// Path to the YAML config file
    #[clap(long)]
    pub config: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ArchiveArgs {
    /// Definition format inside exported archives
    #[clap(long, value_enum, default_value_t = ExportFormat::Yaml)]
    pub format: ExportFormat,
    /// Keep the lifecycle status of exported artifacts
    #[clap(long)]
    pub preserve_status: bool,
}

impl ArchiveArgs {
    fn options(&self) -> ExportOptions {
        ExportOptions {
            format: self.format,
            preserve_status: self.preserve_status,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ApiExportArgs {
    #[clap(flatten)]
    pub common: ExportArgs,
    #[clap(flatten)]
    pub archive: ArchiveArgs,
}

#[derive(Args, Debug, Clone)]
pub struct AppExportArgs {
    #[clap(flatten)]
    pub common: ExportArgs,
    /// Include the applications' consumer keys
    #[clap(long)]
    pub with_keys: bool,
}

#[derive(Args, Debug, Clone)]
pub struct McpServerExportArgs {
    #[clap(flatten)]
    pub common: ExportArgs,
    #[clap(flatten)]
    pub archive: ArchiveArgs,
    /// Keep endpoint credentials in the exported archives
    #[clap(long)]
    pub preserve_credentials: bool,
    /// Export the working copy and every revision, not only deployed revisions
    #[clap(long)]
    pub all: bool,
}

#[derive(Subcommand, Debug)]
pub enum AiCommand {
    /// Upload public, published APIs to the indexing service
    Upload(UploadArgs),
    /// Remove all indexed APIs and API Products of a tenant
    Purge(PurgeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    #[clap(long, short = 'e')]
    pub environment: String,
    /// Username; the part after '@' selects the tenant
    #[clap(long, short = 'u')]
    pub user: String,
    /// Upload API Products as well as APIs
    #[clap(long, conflicts_with = "products")]
    pub all: bool,
    /// Upload API Products only
    #[clap(long)]
    pub products: bool,
    /// Indexing service endpoint, overriding the environment's `ai_service`
    #[clap(long)]
    pub endpoint: Option<String>,
    /// Indexing service key, overriding APIM_AI_KEY
    #[clap(long)]
    pub key: Option<String>,
    /// Remove the tenant's existing index entries before uploading
    #[clap(long)]
    pub purge: bool,
    #[clap(long)]
    pub config: PathBuf,
}

impl UploadArgs {
    pub fn scope(&self) -> UploadScope {
        if self.all {
            UploadScope::All
        } else if self.products {
            UploadScope::ApiProducts
        } else {
            UploadScope::Apis
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct PurgeArgs {
    #[clap(long, short = 'e')]
    pub environment: String,
    #[clap(long, short = 't')]
    pub tenant: String,
    #[clap(long)]
    pub endpoint: Option<String>,
    #[clap(long)]
    pub key: Option<String>,
    #[clap(long)]
    pub config: PathBuf,
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Export { target } => {
            let (kind, args, options) = target.split();
            export(kind, args, options).await
        }
        Commands::Ai { action } => match action {
            AiCommand::Upload(args) => ai_upload(args).await,
            AiCommand::Purge(args) => ai_purge(args).await,
        },
    }
}

async fn export(kind: ArtifactKind, args: ExportArgs, options: ExportOptions) -> Result<()> {
    let config = load_config(&args.config)?;
    let env = environment(&config, &args.environment)?;
    let client = ManagementClient::new_from_env(config.request_timeout())?;

    let tenant = args.tenant.clone().unwrap_or_default();
    let store = CheckpointStore::new(
        MigrationLayout::new(&config.export_dir, &args.environment, &tenant),
        kind,
    );
    let identity = RunIdentity {
        tenant_domain: tenant,
        user: args.user.clone().unwrap_or_default(),
    };
    tracing::info!(
        command = "export",
        kind = %kind,
        environment = %args.environment,
        force = args.force,
        ?options,
        "Starting export"
    );
    if args.force {
        println!(
            "Cleaning all the previously exported {kind} of the given target tenant, in the given environment if any, and prepare to export {kind} from beginning"
        );
    }

    let summary = match kind {
        ArtifactKind::Api => {
            let catalog = RemoteCatalog::apis(client, &env.publisher)
                .with_tenant(args.tenant.clone())
                .with_options(options);
            drive(&catalog, store, identity, args.force).await?
        }
        ArtifactKind::McpServer => {
            let catalog = RemoteCatalog::mcp_servers(client, &env.publisher)
                .with_tenant(args.tenant.clone())
                .with_options(options);
            drive(&catalog, store, identity, args.force).await?
        }
        ArtifactKind::Application => {
            let admin = required(&args.environment, "admin", env.admin.as_deref())?;
            let catalog = RemoteCatalog::applications(client, admin)
                .with_tenant(args.tenant.clone())
                .with_options(options);
            drive(&catalog, store, identity, args.force).await?
        }
        ArtifactKind::ApiProduct => {
            anyhow::bail!("exporting {kind} for migration is not supported")
        }
    };

    print_export_summary(&summary);
    Ok(())
}

async fn drive<C: ArtifactCatalog>(
    catalog: &C,
    store: CheckpointStore,
    identity: RunIdentity,
    force: bool,
) -> Result<ExportSummary> {
    let summary = ExportDriver::new(catalog, store, identity).run(force).await?;
    Ok(summary)
}

fn print_export_summary(summary: &ExportSummary) {
    match summary.outcome {
        ExportOutcome::NothingToExport => {
            println!("No {} available to be exported..!", summary.kind)
        }
        ExportOutcome::AlreadyComplete => println!(
            "All {} were already exported to {}",
            summary.kind,
            summary.archive_dir.display()
        ),
        ExportOutcome::Completed => println!(
            "\nTotal number of {} exported: {} ({} archives, {} pages)\n{} export path: {}\n\nCommand: export {} execution completed !",
            summary.kind,
            summary.exported,
            summary.archives,
            summary.pages,
            summary.kind,
            summary.archive_dir.display(),
            summary.kind.slug()
        ),
    }
}

/// Returns the endpoint or a `MissingEndpoint` error naming the config key.
fn required<'a>(
    environment: &str,
    endpoint: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| {
        ConfigError::MissingEndpoint {
            environment: environment.to_string(),
            endpoint,
        }
        .into()
    })
}

fn ai_endpoint(config: &Config, environment_name: &str, cli_endpoint: Option<String>) -> Result<String> {
    if let Some(endpoint) = cli_endpoint.filter(|e| !e.is_empty()) {
        return Ok(endpoint);
    }
    let env = environment(config, environment_name)?;
    Ok(required(environment_name, "ai_service", env.ai_service.as_deref())?.to_string())
}

async fn ai_upload(args: UploadArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let env = environment(&config, &args.environment)?;
    let endpoint = ai_endpoint(&config, &args.environment, args.endpoint.clone())?;
    let key = resolve_ai_key(args.key.clone())?;
    let tenant = tenant_from_username(&args.user);
    let settings = config.upload.to_settings(&tenant);
    let indexer = Arc::new(IndexingClient::new(endpoint, key, config.request_timeout())?);
    let client = ManagementClient::new_from_env(config.request_timeout())?;

    if args.purge {
        let deleted = purge_index(indexer.as_ref(), &tenant, &settings.retry).await?;
        println!("Removed {deleted} existing APIs and API Products for tenant: {tenant}");
    }

    // Payload extraction reads the JSON definitions inside the archive.
    let options = ExportOptions {
        format: ExportFormat::Json,
        preserve_status: true,
        ..Default::default()
    };
    let apis = RemoteCatalog::apis(client.clone(), &env.publisher).with_options(options);
    let products = RemoteCatalog::api_products(client, &env.publisher).with_options(options);
    let scope = args.scope();
    let catalogs: Vec<&dyn ArtifactCatalog<Item = ApiDescriptor>> = scope
        .kinds()
        .into_iter()
        .filter_map(|kind| match kind {
            ArtifactKind::Api => Some(&apis as &dyn ArtifactCatalog<Item = ApiDescriptor>),
            ArtifactKind::ApiProduct => Some(&products as &dyn ArtifactCatalog<Item = ApiDescriptor>),
            _ => None,
        })
        .collect();

    tracing::info!(command = "ai upload", ?scope, tenant = %tenant, "Starting upload");
    let report = UploadPipeline::new(indexer, settings).run(&catalogs).await?;
    println!(
        "\nTotal number of public APIs present in the API Manager: {}\nTotal number of APIs successfully uploaded: {}\n",
        report.total_candidates, report.total_uploaded
    );
    if report.batches_dropped > 0 {
        println!(
            "{} of {} batches could not be uploaded; see the log for details",
            report.batches_dropped,
            report.batches_sent + report.batches_dropped
        );
    }
    Ok(())
}

async fn ai_purge(args: PurgeArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let endpoint = ai_endpoint(&config, &args.environment, args.endpoint.clone())?;
    let key = resolve_ai_key(args.key.clone())?;
    let settings = config.upload.to_settings(&args.tenant);
    let indexer = IndexingClient::new(endpoint, key, config.request_timeout())?;

    let deleted = purge_index(&indexer, &args.tenant, &settings.retry).await?;
    println!(
        "Removed {deleted} existing APIs and API Products for tenant: {}",
        args.tenant
    );
    Ok(())
}
