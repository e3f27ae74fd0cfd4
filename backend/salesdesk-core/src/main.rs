// src/main.rs
use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod config;
mod contracts;
mod dashboard;
mod domain;
mod export;
mod hierarchy;
mod import;
mod incentives;
mod loader;
mod normalize;
mod period;
mod reports;
mod reports_tests;
mod rollup;
mod server;
mod store;

use config::AppConfig;
use domain::TargetBook;
use import::ImportMode;
use loader::Sheet;
use period::ReportMonth;
use server::AppState;
use store::{JsonFileStore, PageRequest, SopFilter, Store};

// --- Command line ---

#[derive(Parser, Debug)]
#[command(name = "salesdesk", version, about = "Sales organization reporting backend")]
struct Cli {
    /// Overrides SALESDESK_DATA_FILE.
    #[arg(long, global = true)]
    data_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP(S) API (default).
    Serve,
    /// Print a monthly report as JSON.
    Report {
        #[arg(value_enum)]
        kind: ReportKind,
        /// YYYY-MM, defaults to the current month.
        #[arg(long)]
        month: Option<String>,
    },
    /// Load a CSV sheet into the store.
    Import {
        #[arg(value_enum)]
        kind: ImportKind,
        file: PathBuf,
        #[arg(long, value_enum)]
        mode: Option<ImportMode>,
        /// SOP snapshot date (YYYY-MM-DD).
        #[arg(long)]
        upload_date: Option<NaiveDate>,
    },
    /// Write a CSV export.
    Export {
        #[arg(value_enum)]
        kind: ExportKind,
        #[arg(short, long)]
        out: PathBuf,
        /// Contracts only: YYYY-MM, all contracts when omitted.
        #[arg(long)]
        month: Option<String>,
        /// SOP only: snapshot date, the latest when omitted.
        #[arg(long)]
        upload_date: Option<NaiveDate>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReportKind {
    Manager,
    Team,
    Dashboard,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ImportKind {
    Agents,
    Contracts,
    Sop,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExportKind {
    Contracts,
    Sop,
}

// --- Entry point ---

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting tracing subscriber failed")?;

    let cli = Cli::parse();
    let mut config = AppConfig::from_env().context("Invalid SALESDESK_* configuration")?;
    if let Some(path) = cli.data_file {
        config.data_file = path;
    }
    info!("Configuration loaded, data file {}", config.data_file.display());

    let store = Arc::new(
        JsonFileStore::open(config.data_file.clone())
            .with_context(|| format!("Opening store at {}", config.data_file.display()))?,
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, store).await,
        Command::Report { kind, month } => print_report(&config, store.as_ref(), kind, month.as_deref()).await,
        Command::Import {
            kind,
            file,
            mode,
            upload_date,
        } => run_import(store.as_ref(), kind, &file, mode.unwrap_or_default(), upload_date).await,
        Command::Export {
            kind,
            out,
            month,
            upload_date,
        } => run_export(store.as_ref(), kind, &out, month.as_deref(), upload_date).await,
    }
}

async fn serve(config: &AppConfig, store: Arc<JsonFileStore>) -> Result<()> {
    let state = AppState {
        store,
        overrides: Arc::new(config.overrides()),
        dashboard_defaults: config.dashboard_defaults(),
    };
    let app = server::router(state);
    let addr = config.bind_addr;

    match config.tls_paths() {
        Some((cert, key)) => {
            let tls_config = RustlsConfig::from_pem_file(cert, key)
                .await
                .with_context(|| format!("Failed to load TLS cert/key from {} / {}", cert.display(), key.display()))?;
            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")?;
        }
        None => {
            info!("Starting server on http://{}", addr);
            axum_server::bind(addr)
                .serve(app.into_make_service())
                .await
                .context("HTTP server failed")?;
        }
    }
    Ok(())
}

fn parse_month(raw: Option<&str>) -> Result<ReportMonth> {
    match raw {
        Some(raw) => ReportMonth::parse(raw).context("Bad --month"),
        None => Ok(ReportMonth::current()),
    }
}

async fn print_report(config: &AppConfig, store: &dyn Store, kind: ReportKind, month: Option<&str>) -> Result<()> {
    let month = parse_month(month)?;
    let agents = store.list_agents().await?;
    let contracts = store.contracts_touching(&month).await?;
    let overrides = config.overrides();

    let json = match kind {
        ReportKind::Manager => {
            let targets = TargetBook::from_allocations(&store.allocations_for_month(&month).await?);
            serde_json::to_string_pretty(&reports::manager_summary(&month, &agents, &contracts, &targets, &overrides))?
        }
        ReportKind::Team => serde_json::to_string_pretty(&reports::team_detail(&month, &agents, &contracts, &overrides))?,
        ReportKind::Dashboard => {
            let target = store.global_target(&month).await?;
            serde_json::to_string_pretty(&dashboard::overview(
                &month,
                Local::now().date_naive(),
                &contracts,
                &agents,
                target.as_ref(),
                config.dashboard_defaults(),
            ))?
        }
    };
    println!("{}", json);
    Ok(())
}

async fn run_import(
    store: &dyn Store,
    kind: ImportKind,
    file: &Path,
    mode: ImportMode,
    upload_date: Option<NaiveDate>,
) -> Result<()> {
    let sheet = Sheet::from_path(file).with_context(|| format!("Reading {}", file.display()))?;
    let summary = match kind {
        ImportKind::Agents => import::import_agents(store, &sheet, mode).await?,
        ImportKind::Contracts => import::import_contracts(store, &sheet, mode).await?,
        ImportKind::Sop => {
            import::import_sop(store, &sheet, mode, upload_date, Local::now().date_naive()).await?
        }
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_export(
    store: &dyn Store,
    kind: ExportKind,
    out: &Path,
    month: Option<&str>,
    upload_date: Option<NaiveDate>,
) -> Result<()> {
    let bytes = match kind {
        ExportKind::Contracts => {
            let month = month.map(ReportMonth::parse).transpose().context("Bad --month")?;
            let contracts = store.list_contracts().await?;
            let agents = store.list_agents().await?;
            export::contracts_csv(&contracts, &agents, month.as_ref())?
        }
        ExportKind::Sop => {
            let date = match upload_date {
                Some(date) => Some(date),
                None => store.latest_sop_date().await?,
            };
            let filter = SopFilter {
                agent_code: None,
                upload_date: date,
            };
            let page = store.sop_records(&filter, PageRequest::unbounded()).await?;
            export::sop_csv(&page.items)?
        }
    };
    std::fs::write(out, &bytes).with_context(|| format!("Writing {}", out.display()))?;
    info!("Wrote {} bytes to {}", bytes.len(), out.display());
    Ok(())
}
