use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use citefetcher::{CitationClient, DEFAULT_CITATION_URL};
use clap::{Args, Parser, Subcommand};
use registryfetcher::{MonitorClient, RegistryClient, DEFAULT_MONITOR_URL, DEFAULT_REGISTRY_URL};
use repofetcher::RepoClient;
use toolstore::citations::{CitationAggregator, YearMode, DEFAULT_FALLBACK_YEAR};
use toolstore::config::StoreConfig;
use toolstore::impact::JournalImpacts;
use toolstore::materialize::QueryMaterializer;
use toolstore::models::SavedQuery;
use toolstore::store::{RecordStore, SqliteStore};
use toolstore::sync::ToolSynchronizer;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Runs the command line interface for the registry synchronization service.
pub async fn run_cli() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Run(args)) => run_pass(args).await?,
        Some(Command::SyncTool(args)) => sync_tool(args).await?,
        Some(Command::AddQuery(args)) => add_query(args).await?,
        Some(Command::Materialize(args)) => materialize(args).await?,
        None => {
            println!("No subcommand provided. Use --help to see available commands.");
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Runs one synchronization pass over every saved query
    Run(CommonArgs),
    /// Synchronizes a single tool by registry ID
    SyncTool(SyncToolArgs),
    /// Stores a new saved query and synchronizes the tools it covers
    AddQuery(AddQueryArgs),
    /// Prints the (cached) result document of a saved query
    Materialize(MaterializeArgs),
}

#[derive(Args, Clone)]
struct CommonArgs {
    /// Base directory for the registry database
    #[arg(long, env = "TOOLHUB_BASE_PATH")]
    base_path: PathBuf,
    /// Tool registry base URL
    #[arg(long, env = "TOOLHUB_REGISTRY_URL", default_value = DEFAULT_REGISTRY_URL)]
    registry_url: String,
    /// Citation source base URL
    #[arg(long, env = "TOOLHUB_CITATION_URL", default_value = DEFAULT_CITATION_URL)]
    citation_url: String,
    /// Availability monitor base URL
    #[arg(long, env = "TOOLHUB_MONITOR_URL", default_value = DEFAULT_MONITOR_URL)]
    monitor_url: String,
    /// Optional code-host token to lift API rate limits
    #[arg(long, env = "GITHUB_TOKEN")]
    github_token: Option<String>,
    /// Request timeout for every external source, in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
    /// JSON file overriding the compiled-in journal impact table
    #[arg(long)]
    impacts: Option<PathBuf>,
    /// Add year-bucket counts on re-sync instead of overwriting them
    #[arg(long, default_value_t = false)]
    accumulate_years: bool,
    /// Year recorded when a tool has no publication years at all
    #[arg(long, default_value_t = DEFAULT_FALLBACK_YEAR)]
    fallback_year: i32,
}

#[derive(Args)]
struct SyncToolArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Registry ID of the tool
    #[arg(long)]
    id: String,
    /// Synchronize even if the tool was already synchronized today
    #[arg(long, default_value_t = false)]
    force: bool,
}

#[derive(Args)]
struct AddQueryArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Identifier for the new query
    #[arg(long)]
    id: String,
    /// Collection tag filter
    #[arg(long)]
    collection: Option<String>,
    /// Topic term filter
    #[arg(long)]
    topic: Option<String>,
    /// Explicit comma-separated tool IDs
    #[arg(long, value_delimiter = ',')]
    tools: Vec<String>,
}

#[derive(Args)]
struct MaterializeArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Identifier of the saved query
    #[arg(long)]
    id: String,
}

/// Everything needed to wire the engines to the live sources.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub base_path: PathBuf,
    pub registry_url: String,
    pub citation_url: String,
    pub monitor_url: String,
    pub github_token: Option<String>,
    pub timeout: Duration,
    pub impacts_path: Option<PathBuf>,
    pub year_mode: YearMode,
    pub fallback_year: i32,
}

impl HubConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            citation_url: DEFAULT_CITATION_URL.to_string(),
            monitor_url: DEFAULT_MONITOR_URL.to_string(),
            github_token: None,
            timeout: Duration::from_secs(30),
            impacts_path: None,
            year_mode: YearMode::Overwrite,
            fallback_year: DEFAULT_FALLBACK_YEAR,
        }
    }
}

impl CommonArgs {
    fn into_config(self) -> HubConfig {
        HubConfig {
            base_path: self.base_path,
            registry_url: self.registry_url,
            citation_url: self.citation_url,
            monitor_url: self.monitor_url,
            github_token: self.github_token,
            timeout: Duration::from_secs(self.timeout_secs),
            impacts_path: self.impacts,
            year_mode: if self.accumulate_years {
                YearMode::Accumulate
            } else {
                YearMode::Overwrite
            },
            fallback_year: self.fallback_year,
        }
    }
}

/// The assembled service: one explicit store handle shared by the
/// synchronizer and the materializer, plus the live source clients.
pub struct ToolHub {
    pub store: Arc<dyn RecordStore>,
    pub synchronizer: ToolSynchronizer,
    pub materializer: QueryMaterializer,
}

impl ToolHub {
    pub fn new(config: HubConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.base_path)
            .context("failed to create the base directory")?;
        let mut store_config = StoreConfig::new(&config.base_path);
        store_config.impacts_path = config.impacts_path.clone();

        let store: Arc<dyn RecordStore> = Arc::new(
            SqliteStore::open(&store_config).context("failed to open the record store")?,
        );
        let impacts = match &store_config.impacts_path {
            Some(path) => JournalImpacts::from_path(path)
                .context("failed to load the journal impact table")?,
            None => JournalImpacts::builtin(),
        };

        let registry = Arc::new(
            RegistryClient::new(&config.registry_url, config.timeout)
                .context("failed to create the registry client")?,
        );
        let citations = Arc::new(
            CitationClient::new(&config.citation_url, config.timeout)
                .context("failed to create the citation client")?,
        );
        let monitor = Arc::new(
            MonitorClient::new(&config.monitor_url, config.timeout)
                .context("failed to create the monitor client")?,
        );
        let code_host = Arc::new(
            RepoClient::new(config.github_token.clone())
                .context("failed to create the code-host client")?,
        );

        let aggregator = CitationAggregator::new(citations, impacts)
            .with_year_mode(config.year_mode)
            .with_fallback_year(config.fallback_year);
        let synchronizer = ToolSynchronizer::new(
            Arc::clone(&store),
            registry,
            aggregator,
            monitor,
            code_host,
        );
        let materializer = QueryMaterializer::new(Arc::clone(&store));

        Ok(Self {
            store,
            synchronizer,
            materializer,
        })
    }
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

async fn run_pass(args: CommonArgs) -> anyhow::Result<()> {
    let hub = ToolHub::new(args.into_config())?;
    let report = hub.synchronizer.run().await?;
    let refreshed = hub.materializer.refresh_affected(&report.touched)?;
    info!(
        "run finished: {} created, {} updated, {} fresh, {} missing, {} failed, {} documents refreshed",
        report.created, report.updated, report.skipped, report.missing, report.failed, refreshed
    );
    Ok(())
}

async fn sync_tool(args: SyncToolArgs) -> anyhow::Result<()> {
    let id = args.id.clone();
    let hub = ToolHub::new(args.common.into_config())?;
    let outcome = hub.synchronizer.sync_tool_with(&id, args.force).await?;
    let refreshed = hub.materializer.refresh_affected(&[id.clone()])?;
    info!("tool '{id}': {outcome:?}, {refreshed} documents refreshed");
    Ok(())
}

async fn add_query(args: AddQueryArgs) -> anyhow::Result<()> {
    let query = SavedQuery {
        id: args.id.clone(),
        collection: args.collection.clone(),
        topic: args.topic.clone(),
        tool_ids: args.tools.clone(),
    };
    // Reject ambiguous or empty filters before anything is stored.
    query.filter()?;

    let hub = ToolHub::new(args.common.into_config())?;
    hub.store.insert_saved_query(&query)?;
    info!("query '{}' stored, synchronizing its tools", query.id);

    let report = hub.synchronizer.sync_query(&query).await?;
    if report.failed > 0 {
        error!(
            "query '{}': {} tools failed to synchronize",
            query.id, report.failed
        );
    }
    let document = hub.materializer.refresh(&query)?;
    info!(
        "query '{}': {} created, {} updated, document of {} bytes cached",
        query.id,
        report.created,
        report.updated,
        document.len()
    );
    Ok(())
}

async fn materialize(args: MaterializeArgs) -> anyhow::Result<()> {
    let id = args.id.clone();
    let hub = ToolHub::new(args.common.into_config())?;
    let query = hub
        .store
        .get_saved_query(&id)?
        .ok_or_else(|| anyhow::anyhow!("no saved query '{id}'"))?;
    let document = hub.materializer.cached_or_materialize(&query)?;
    println!("{document}");
    Ok(())
}
