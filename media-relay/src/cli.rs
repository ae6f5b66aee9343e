//! # media-relay CLI Interface (Module)
//!
//! Command parsing and wiring for the `media-relay` binary. All pipeline logic lives in
//! [`media_relay_core`]; this module loads configuration, passes the access gate, builds
//! the concrete collaborators and hands them to the orchestrator.
//!
//! ## Commands
//! - `discover`: record the account's remote media in the ledger
//! - `publish`: publish every pending item of the account
//! - `sync`: `discover` followed by `publish`; `sync --all` runs every configured account in turn
//! - `status`: print the ledger counts of the account
//!
//! Every command reads the operator key from `RELAY_ACCESS_KEY`. When
//! `RELAY_NOTIFY_WEBHOOK_URL` is set, `sync --all` posts each failed account to that webhook.
//!
//! For programmatic/integration use: call [`run`] with a constructed [`Cli`].
use crate::load_config::{load_config, CliConfig, ACCESS_KEY_ENV};
use crate::shutdown::install_signal_handler;
use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use media_relay_core::access::{Authenticator, StaticKeyGate};
use media_relay_core::accounts::StaticAccountDirectory;
use media_relay_core::batch::{run_batch, AccountOutcome};
use media_relay_core::contract::{FailureNotifier, PostLedger};
use media_relay_core::graph::GraphApiClient;
use media_relay_core::ledger::SqlitePostLedger;
use media_relay_core::notify::WebhookNotifier;
use media_relay_core::stage::{HttpFetcher, LocalFileStager};
use media_relay_core::synchronise::SyncOrchestrator;
use media_relay_core::wordpress::WordpressClient;
use std::path::PathBuf;

/// CLI for media-relay: relay Instagram media into WordPress posts.
#[derive(Parser)]
#[clap(
    name = "media-relay",
    version,
    about = "Relay a customer's Instagram media into WordPress posts, exactly once per item"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Config file and account every command acts on.
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Path to the YAML config file
    #[clap(long)]
    pub config: PathBuf,
    /// Id of the configured account to act on
    #[clap(long)]
    pub account: String,
}

/// Config file and either one account or all of them.
#[derive(Args, Debug, Clone)]
#[clap(group(ArgGroup::new("scope").required(true).args(["account", "all"])))]
pub struct SyncTarget {
    /// Path to the YAML config file
    #[clap(long)]
    pub config: PathBuf,
    /// Id of the configured account to sync
    #[clap(long)]
    pub account: Option<String>,
    /// Sync every configured account, one after another
    #[clap(long)]
    pub all: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the account's remote media and record new items as pending
    Discover(Target),
    /// Publish every pending item of the account
    Publish(Target),
    /// Discover, then publish
    Sync(SyncTarget),
    /// Show how many items are seen, published and pending
    Status(Target),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Discover(_) => "discover",
            Commands::Publish(_) => "publish",
            Commands::Sync(_) => "sync",
            Commands::Status(_) => "status",
        }
    }

    fn config_path(&self) -> &PathBuf {
        match self {
            Commands::Discover(t) | Commands::Publish(t) | Commands::Status(t) => &t.config,
            Commands::Sync(t) => &t.config,
        }
    }

    /// Accounts the command acts on, in order.
    fn account_ids(&self, config: &CliConfig) -> Vec<String> {
        match self {
            Commands::Discover(t) | Commands::Publish(t) | Commands::Status(t) => {
                vec![t.account.clone()]
            }
            Commands::Sync(SyncTarget { all: true, .. }) => {
                config.accounts.iter().map(|a| a.id.clone()).collect()
            }
            Commands::Sync(t) => t.account.iter().cloned().collect(),
        }
    }
}

type Orchestrator = SyncOrchestrator<
    StaticAccountDirectory,
    GraphApiClient,
    LocalFileStager<HttpFetcher>,
    WordpressClient,
    SqlitePostLedger,
>;

/// Authenticate the operator key and check it covers every one of `account_ids`.
async fn pass_gate(config: &CliConfig, account_ids: &[String]) -> Result<()> {
    let gate = StaticKeyGate::from_config(&config.access);
    let key = std::env::var(ACCESS_KEY_ENV).unwrap_or_default();
    let principal = gate
        .authenticate(&key)
        .await
        .with_context(|| format!("Access denied (set {ACCESS_KEY_ENV})"))?;
    for account_id in account_ids {
        principal.authorize(account_id)?;
    }
    tracing::info!(principal = %principal.name, accounts = account_ids.len(), "Access granted");
    Ok(())
}

fn build_orchestrator(config: &CliConfig, ledger: SqlitePostLedger) -> Result<Orchestrator> {
    if config.wordpress.app_password.is_empty() {
        bail!("WordPress application password is not set");
    }
    let accounts = StaticAccountDirectory::from_config(&config.accounts);
    let media = GraphApiClient::new(&config.graph, config.retry.clone())
        .context("Failed to construct Graph API client")?;
    let fetcher =
        HttpFetcher::new(config.retry.clone()).context("Failed to construct file fetcher")?;
    let mut stager = LocalFileStager::new(fetcher);
    if let Some(dir) = &config.staging_dir {
        stager = stager.with_parent(dir.clone());
    }
    let publisher = WordpressClient::new(&config.wordpress, config.retry.clone())
        .context("Failed to construct WordPress client")?;

    Ok(SyncOrchestrator::new(accounts, media, stager, publisher, ledger)
        .with_cancellation(install_signal_handler()))
}

async fn discover(orchestrator: &Orchestrator, account_id: &str) -> Result<()> {
    let report = orchestrator.discover(account_id).await?;
    println!(
        "Discovery report for {}: {} listed, {} new, {} refreshed, {} before start date",
        report.account_id,
        report.listed,
        report.recorded_new,
        report.refreshed,
        report.skipped_before_start
    );
    Ok(())
}

async fn publish(orchestrator: &Orchestrator, account_id: &str) -> Result<()> {
    match orchestrator.run_sync(account_id).await {
        Ok(report) => {
            for item in &report.published {
                println!("published {} -> {}", item.media_id, item.link);
            }
            println!(
                "Publish report for {}: {} published",
                report.account_id,
                report.published_count()
            );
            Ok(())
        }
        Err(failure) => {
            println!(
                "Publish report for {}: {} published before failure",
                account_id, failure.published
            );
            Err(anyhow::Error::new(failure))
        }
    }
}

fn build_notifier(config: &CliConfig) -> Result<Option<WebhookNotifier>> {
    config
        .notify_webhook_url
        .as_deref()
        .map(|url| WebhookNotifier::new(url, config.retry.clone()))
        .transpose()
        .context("Failed to construct failure notifier")
}

async fn sync_all(
    config: &CliConfig,
    orchestrator: &Orchestrator,
    account_ids: &[String],
) -> Result<()> {
    let notifier = build_notifier(config)?;
    let batch = run_batch(
        orchestrator,
        account_ids,
        notifier.as_ref().map(|n| n as &dyn FailureNotifier),
    )
    .await;

    for run in &batch.runs {
        match &run.outcome {
            AccountOutcome::Synced { discovery, report } => println!(
                "{}: {} new, {} published",
                run.account_id,
                discovery.recorded_new,
                report.published_count()
            ),
            AccountOutcome::Failed(notice) => println!(
                "{}: failed after {} published: {}",
                run.account_id, notice.published, notice.message
            ),
        }
    }
    if batch.cancelled {
        bail!("Batch cancelled after {} account(s)", batch.runs.len());
    }
    let failed = batch.failed_count();
    if failed > 0 {
        bail!("{failed} of {} account(s) failed", account_ids.len());
    }
    Ok(())
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let command = cli.command.name();
    let config = load_config(cli.command.config_path())?;
    let account_ids = cli.command.account_ids(&config);
    pass_gate(&config, &account_ids).await?;
    if account_ids.is_empty() {
        bail!("No accounts are configured");
    }
    for account_id in &account_ids {
        config.account(account_id)?;
    }

    let ledger = SqlitePostLedger::open(&config.ledger_path)
        .await
        .with_context(|| format!("Failed to open ledger {:?}", config.ledger_path))?;
    tracing::info!(command, accounts = ?account_ids, "Starting command");

    if let Commands::Status(target) = &cli.command {
        let summary = ledger.summary(&target.account).await?;
        println!(
            "Status for {}: {} seen, {} published, {} pending",
            target.account, summary.seen, summary.published, summary.pending
        );
        return Ok(());
    }

    let orchestrator = build_orchestrator(&config, ledger)?;
    match &cli.command {
        Commands::Discover(target) => discover(&orchestrator, &target.account).await,
        Commands::Publish(target) => publish(&orchestrator, &target.account).await,
        Commands::Sync(SyncTarget { all: true, .. }) => {
            sync_all(&config, &orchestrator, &account_ids).await
        }
        Commands::Sync(_) => {
            for account_id in &account_ids {
                discover(&orchestrator, account_id).await?;
                publish(&orchestrator, account_id).await?;
            }
            Ok(())
        }
        Commands::Status(_) => Ok(()),
    }
}
