//! Shadowtrade - Linked-Account Trade Monitor
//!
//! Polls Owner, Shadow and Slave accounts and cascades closes across linked positions.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use shadowtrade::adapters::cli::{self, CheckCmd, Command, RunCmd, Services, TokenCmd, ValidateCmd};
use shadowtrade::adapters::{ApiServer, FileVault, TokenSigner};
use shadowtrade::config::load_config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (secrets go here, not in shadowtrade.toml)
    dotenvy::dotenv().ok();

    let app = cli::init();
    let config_level = load_config(app.config_path()).ok().map(|c| c.logging.level);
    init_logging(app.verbose, app.debug, config_level.as_deref())?;

    match app.command {
        Command::Run(cmd) => run_command(cmd).await,
        Command::Check(cmd) => check_command(cmd).await,
        Command::Token(cmd) => token_command(cmd),
        Command::Validate(cmd) => validate_command(cmd),
    }
}

fn init_logging(verbose: bool, debug: bool, config_level: Option<&str>) -> Result<()> {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        config_level.unwrap_or("info")
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(filter).init();
    Ok(())
}

async fn run_command(cmd: RunCmd) -> Result<()> {
    tracing::info!("Starting shadowtrade...");

    let config = load_config(&cmd.config).context("Failed to load configuration")?;
    let secret = config.token_secret().context("Gateway token secret missing")?;
    let signer = Arc::new(TokenSigner::new(secret, config.gateway.token_ttl_hours));
    let services = Services::build(&config)?;

    let shutdown = CancellationToken::new();
    let heartbeat = services.hub.spawn_heartbeat(
        Duration::from_secs(config.gateway.heartbeat_secs),
        shutdown.clone(),
    );
    let cleanup = services.queue.spawn_cleanup(
        Duration::from_secs(config.queue.cleanup_interval_secs),
        config.queue.max_retries,
        shutdown.clone(),
    );
    let retention = services.spawn_retention(config.notifications.retention_days, shutdown.clone());

    if config.monitor.auto_start && !cmd.no_auto_start {
        services.monitor.start().await.context("Failed to start monitor")?;
    } else {
        tracing::info!("Monitor left stopped; start it via POST /api/monitoring/start");
    }

    // Setup Ctrl+C handler
    let monitor = services.monitor.clone();
    let hub = services.hub.clone();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
        if let Err(e) = monitor.stop().await {
            tracing::debug!("Monitor stop: {}", e);
        }
        hub.shutdown();
        signal.cancel();
    });

    let bind = cmd.bind.unwrap_or_else(|| config.gateway.bind_addr.clone());
    let result = ApiServer::new(services.app_state(signer))
        .serve(&bind, shutdown.clone())
        .await
        .context("Gateway server failed");

    shutdown.cancel();
    for task in [heartbeat, cleanup, retention] {
        if let Err(e) = task.await {
            tracing::warn!("Background task ended abnormally: {}", e);
        }
    }

    tracing::info!("shadowtrade stopped");
    result
}

async fn check_command(cmd: CheckCmd) -> Result<()> {
    let config = load_config(&cmd.config).context("Failed to load configuration")?;
    let services = Services::build(&config)?;

    let connections = services
        .monitor
        .test_connections()
        .await
        .context("Failed to load active accounts")?;
    let report = services.monitor.run_cycle().await;
    let stats = services.audit.stats(None).await;

    if cmd.format == "json" {
        let out = serde_json::json!({
            "connections": connections,
            "cycle": report,
            "auto_close": stats,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for check in &connections {
            match &check.error {
                None => println!("[ok]   {} {} (user {})", check.role, check.account_id, check.user_id),
                Some(e) => println!("[fail] {} {} (user {}): {}", check.role, check.account_id, check.user_id, e),
            }
        }
        println!("Accounts checked: {}", report.accounts);
        println!("Opened: {}  Refreshed: {}  Closed: {}", report.opened, report.refreshed, report.closed);
        println!("Failed accounts: {}", report.failed_accounts);
        println!(
            "Auto-close: {} closed, {} skipped, {} failed ({:.2}% success)",
            stats.closed, stats.skipped, stats.failed, stats.success_rate
        );
    }

    Ok(())
}

fn token_command(cmd: TokenCmd) -> Result<()> {
    let config = load_config(&cmd.config).context("Failed to load configuration")?;
    let secret = config.token_secret().context("Gateway token secret missing")?;
    let ttl = cmd.ttl_hours.unwrap_or(config.gateway.token_ttl_hours);

    let token = TokenSigner::new(secret, ttl)
        .issue(&cmd.user_id, &cmd.email)
        .context("Failed to issue token")?;
    println!("{}", token);
    Ok(())
}

fn validate_command(cmd: ValidateCmd) -> Result<()> {
    let config = load_config(&cmd.config).context("Failed to load configuration")?;
    println!("Config OK: {}", cmd.config.display());

    if let Err(e) = config.token_secret() {
        println!("Warning: {}", e);
    }

    let vault = FileVault::new(config.accounts.file_path());
    let summary = vault
        .validate()
        .with_context(|| format!("Invalid account registry {}", vault.path().display()))?;
    println!(
        "Account registry OK: {} accounts ({} active) across {} users",
        summary.total, summary.active, summary.users
    );
    Ok(())
}
