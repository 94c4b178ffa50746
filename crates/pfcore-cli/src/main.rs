//! Process entry point: parse flags, load and validate config, wire the
//! exchange adapter and strategy, and run the Bot Controller to completion.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use pfcore_bot::{live_config, BotController, FlatStrategy, LeafConfigs};
use pfcore_config::{secrets::resolve_exchange_credentials, AppConfig, RunMode};
use pfcore_exchange::{ExchangeAdapter, LiveStreaming, MockAdapter};

#[derive(Parser)]
#[command(name = "pfcore")]
#[command(about = "Perpetual-futures trading bot controller", long_about = None)]
struct Cli {
    /// Layered config file paths, merged in order (later overrides earlier).
    #[arg(long = "config", required = true)]
    config: Vec<String>,

    /// Override `exchange.platform` from the loaded config.
    #[arg(long)]
    exchange: Option<String>,

    /// Stop after this many ticks instead of running indefinitely.
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Override `system.status_log_interval_ticks`.
    #[arg(long)]
    status_log_interval_ticks: Option<u64>,

    /// Override `system.remote_risk_refresh_interval_ticks`.
    #[arg(long)]
    remote_risk_refresh_interval_ticks: Option<u64>,

    /// Keep polling after the adapter stops producing events instead of exiting.
    #[arg(long, default_value_t = false)]
    run_forever: bool,
}

fn main() -> ExitCode {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            tracing::error!(target: "pfcore_cli", error = %err, "CLI_INIT_FAILED");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let paths: Vec<&str> = cli.config.iter().map(|s| s.as_str()).collect();
    let loaded = pfcore_config::load_layered_yaml(&paths).context("CONFIG_VALIDATION_FAILED")?;
    let mut cfg: AppConfig = loaded.typed().context("CONFIG_VALIDATION_FAILED")?;

    if let Some(exchange) = cli.exchange {
        cfg.exchange.platform = exchange;
    }
    if let Some(n) = cli.max_ticks {
        cfg.system.max_ticks = Some(n);
    }
    if let Some(n) = cli.status_log_interval_ticks {
        cfg.system.status_log_interval_ticks = n;
    }
    if let Some(n) = cli.remote_risk_refresh_interval_ticks {
        cfg.system.remote_risk_refresh_interval_ticks = n;
    }

    tracing::info!(
        target: "pfcore_cli",
        config_hash = %loaded.config_hash,
        mode = ?cfg.system.mode,
        platform = %cfg.exchange.platform,
        "CONFIG_LOADED"
    );

    let adapter = build_adapter(&cfg)?;
    let leaves = LeafConfigs::from_app_config(&cfg);
    let strategy = Box::new(FlatStrategy);
    let max_ticks = cfg.system.max_ticks;

    let mut controller = BotController::new(cfg, leaves, adapter, strategy)?.with_max_ticks(max_ticks);

    let outcome = controller.run(cli.run_forever)?;
    tracing::info!(
        target: "pfcore_cli",
        ticks = outcome.ticks,
        exit_reason = ?outcome.exit_reason,
        final_equity = outcome.final_equity,
        "RUN_COMPLETE"
    );
    Ok(())
}

/// Build the adapter named by `exchange.platform`. `"mock"` backs local dry
/// runs and needs no credentials; anything else is treated as a live venue
/// name and requires resolved credentials outside replay mode.
fn build_adapter(cfg: &AppConfig) -> Result<Arc<dyn ExchangeAdapter>> {
    let platform = cfg.exchange.platform.trim().to_ascii_lowercase();
    if platform == "mock" {
        return Ok(Arc::new(MockAdapter::new()));
    }

    let resolved = resolve_exchange_credentials(&cfg.exchange.platform, cfg.system.mode)
        .context("CREDENTIALS_MISSING")?;
    let (api_key, api_secret) = match resolved {
        Some(creds) => (creds.api_key, creds.api_secret),
        None if matches!(cfg.system.mode, RunMode::Replay) => (String::new(), String::new()),
        None => bail!("CREDENTIALS_MISSING: no credentials resolved for platform {}", cfg.exchange.platform),
    };

    let live_cfg = live_config(cfg, api_key, api_secret);
    let adapter = LiveStreaming::new(live_cfg).context("EXCHANGE_CONNECT_FAILED")?;
    Ok(Arc::new(adapter))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}
