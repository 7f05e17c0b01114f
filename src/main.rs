use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

use paneforge::config::CoreConfig;
use paneforge::git::GitCache;
use paneforge::pane::multiplexer::{MultiplexerAdapter, WeztermMultiplexer};
use paneforge::pricing::PricingCatalog;
use paneforge::providers::{ClaudeUsageProvider, CodexUsageProvider};
use paneforge::scheduler::{PaneScheduler, SchedulerIntervals};
use paneforge::screen::{ScreenGateway, ScreenMode};
use paneforge::usage::{CostWiring, ProviderEntry, TokenSource, TranscriptShape, UsageDashboard};
use paneforge::api;
use paneforge::utils;

#[derive(Parser)]
#[command(name = "paneforge")]
#[command(version)]
#[command(about = "Local-first observability and remote-control plane for AI coding agent sessions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon: HTTP transport, pane discovery, and background polling.
    Serve,
    /// Print resolved configuration and file locations, then exit.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve);

    let config = CoreConfig::load()?;

    match command {
        Commands::Serve => {
            initialize_logging(&config)?;
            serve(config).await
        }
        Commands::Config => {
            initialize_cli_logging();
            print_config(&config);
            Ok(())
        }
    }
}

fn print_config(config: &CoreConfig) {
    println!("config file:        {}", utils::paths::config_path().display());
    println!("logs directory:     {}", utils::paths::logs_dir().display());
    println!("http bind address:  {}", config.http_bind_addr);
    println!("pricing catalog:    {}", config.pricing_catalog_url);
    println!("pricing enabled:    {}", config.pricing_enabled);
    println!(
        "transcripts root:   {}",
        config.transcripts_root.clone().unwrap_or_else(|| utils::paths::default_transcripts_root().display().to_string())
    );
}

async fn serve(config: CoreConfig) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting paneforge");

    let git_cache = Arc::new(GitCache::new());
    let multiplexer: Arc<dyn MultiplexerAdapter> = Arc::new(WeztermMultiplexer::new());
    let screen_gateway = Arc::new(ScreenGateway::new(
        multiplexer.clone(),
        &config.dangerous_command_patterns,
        config.screen_enter_delay_ms,
    ));

    let catalog = Arc::new(PricingCatalog::new(
        config.pricing_catalog_url.clone(),
        Duration::from_millis(config.pricing_ttl_ms),
        Duration::from_millis(config.pricing_stale_max_age_ms),
        PricingCatalog::default_provider_config(),
    ));

    let transcripts_root = config
        .transcripts_root
        .as_ref()
        .map_or_else(utils::paths::default_transcripts_root, std::path::PathBuf::from);
    let token_source = Arc::new(TokenSource::new(transcripts_root));

    let claude = ClaudeUsageProvider::new(config.pace_threshold_percent);
    let codex = CodexUsageProvider::new(config.pace_threshold_percent);

    let dashboard = Arc::new(UsageDashboard::new(
        vec![
            ProviderEntry {
                provider_id: "claude".to_owned(),
                provider_label: "Claude".to_owned(),
                source: Arc::new(claude),
                cost: Some(CostWiring { token_source: token_source.clone(), shape: TranscriptShape::ChatTranscript }),
            },
            ProviderEntry {
                provider_id: "codex".to_owned(),
                provider_label: "Codex".to_owned(),
                source: Arc::new(codex),
                cost: Some(CostWiring { token_source: token_source.clone(), shape: TranscriptShape::Session }),
            },
        ],
        catalog,
        config.pricing_enabled,
        Duration::from_millis(config.dashboard_core_ttl_ms),
        Duration::from_millis(config.dashboard_cost_ttl_ms),
        Duration::from_millis(config.dashboard_backoff_ms),
    ));

    let state = api::AppState {
        config: Arc::new(config.clone()),
        git_cache: git_cache.clone(),
        screen_gateway: screen_gateway.clone(),
        dashboard,
        multiplexer: multiplexer.clone(),
    };

    let intervals = SchedulerIntervals {
        git: Duration::from_millis(config.git_poll_interval_ms),
        screen_text: Duration::from_millis(config.screen_poll_interval_text_ms),
        screen_image: Duration::from_millis(config.screen_poll_interval_image_ms),
    };
    tokio::spawn(discover_panes(multiplexer, git_cache, screen_gateway, intervals));

    let router = api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr).await?;
    tracing::info!(addr = %config.http_bind_addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Periodically lists panes from the multiplexer and spawns a background
/// poller for each newly discovered one. Panes are treated as visible as
/// soon as they're discovered; a richer transport would toggle visibility
/// from a client subscribe/unsubscribe message instead.
async fn discover_panes(
    multiplexer: Arc<dyn MultiplexerAdapter>,
    git_cache: Arc<GitCache>,
    screen_gateway: Arc<ScreenGateway>,
    intervals: SchedulerIntervals,
) {
    let mut known = std::collections::HashSet::new();
    let mut tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tick.tick().await;
        let panes = match multiplexer.list_panes().await {
            Ok(panes) => panes,
            Err(e) => {
                tracing::debug!(error = %e, "pane discovery failed");
                continue;
            }
        };
        for pane in panes {
            let pane_id = pane.pane_id.to_string();
            if known.contains(&pane_id) {
                continue;
            }
            known.insert(pane_id.clone());
            let worktree_path = pane.cwd.clone().unwrap_or_default();
            let scheduler = PaneScheduler::spawn(
                pane_id,
                worktree_path,
                git_cache.clone(),
                screen_gateway.clone(),
                ScreenMode::Text,
                intervals,
            );
            scheduler.set_visible(true);
            // Intentionally leaked: the pane lives until the process exits or
            // the multiplexer reports it gone, at which point its subprocess
            // calls start failing and are logged at debug level.
            std::mem::forget(scheduler);
        }
    }
}

fn initialize_cli_logging() {
    let env_filter = tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "paneforge=warn".into()));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_filter(env_filter))
        .init();
}

/// Console output plus a daily-rotating file under `~/.paneforge/logs`, JSON
/// formatted when `config.log_json` (or `PANEFORGE_LOG_FORMAT=json`) is set.
fn initialize_logging(config: &CoreConfig) -> anyhow::Result<()> {
    let logs_dir = utils::paths::logs_dir();
    std::fs::create_dir_all(&logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(&logs_dir, "paneforge.log");
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "paneforge=info".into());
    let console_filter = tracing_subscriber::EnvFilter::new(rust_log.clone());
    let file_filter = tracing_subscriber::EnvFilter::new(rust_log);

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    if config.log_json {
        tracing_subscriber::registry()
            .with(console_layer.json().with_filter(console_filter))
            .with(tracing_subscriber::fmt::layer().json().with_writer(file_appender).with_filter(file_filter))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(console_layer.with_filter(console_filter))
            .with(tracing_subscriber::fmt::layer().with_writer(file_appender).with_ansi(false).with_filter(file_filter))
            .init();
    }

    Ok(())
}
