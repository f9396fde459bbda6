use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn, Level};

use nextcmd_core::GenerativeProposer;
use nextcmd_engine::{EngineConfig, PredictionEngine};
use nextcmd_proposer::{
    DisabledProposer, HttpProposer, HttpProposerConfig, ReliableConfig, ReliableProposer,
};
use nextcmd_server::{HandlerState, ServerConfig};
use nextcmd_settings::{LoggingSettings, Settings};
use nextcmd_store::{Database, HistoryRepo, HistoryStore};
use nextcmd_telemetry::{parse_level, TelemetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = nextcmd_settings::load_settings().context("failed to load settings")?;

    let (telemetry, ignored_levels) = telemetry_config(&settings.logging);
    let guard = nextcmd_telemetry::init_telemetry(telemetry);
    for raw in ignored_levels {
        warn!(value = %raw, "ignoring unknown log level");
    }

    info!("starting nextcmd server");

    let db_path = settings
        .store
        .resolve_db_path(&nextcmd_settings::nextcmd_home());
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    info!(path = %db_path.display(), "database opened");

    let proposer = build_proposer(&settings)?;
    let engine = PredictionEngine::new(proposer, EngineConfig::from_settings(&settings));
    info!(proposer = engine.proposer_name(), "prediction engine ready");

    let store: Arc<dyn HistoryStore> = Arc::new(HistoryRepo::new(db));
    let handler_state = Arc::new(HandlerState::new(
        Arc::new(engine),
        store,
        guard.metrics(),
    ));

    let handle = nextcmd_server::start(ServerConfig::from_settings(&settings.server), handler_state)
        .await
        .context("failed to start server")?;

    info!(port = handle.port(), "nextcmd server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn build_proposer(settings: &Settings) -> anyhow::Result<Arc<dyn GenerativeProposer>> {
    if !settings.model.enabled {
        info!("model disabled, serving history-only predictions");
        return Ok(Arc::new(DisabledProposer));
    }

    let reliable = ReliableConfig::from_settings(settings);
    let http = HttpProposer::new(http_config(settings, &reliable))
        .context("failed to build model client")?;
    info!(endpoint = http.endpoint(), model = %settings.model.model, "model client configured");

    Ok(Arc::new(ReliableProposer::new(http, reliable)))
}

/// HTTP client config whose request timeout fits inside the wrapper's deadline.
fn http_config(settings: &Settings, reliable: &ReliableConfig) -> HttpProposerConfig {
    let mut config = HttpProposerConfig::from_settings(&settings.model);
    config.request_timeout = config.request_timeout.min(reliable.call_timeout);
    config
}

/// Map logging settings onto the subscriber config. Unparseable levels are
/// returned so they can be reported once logging is up.
fn telemetry_config(logging: &LoggingSettings) -> (TelemetryConfig, Vec<String>) {
    let mut ignored = Vec::new();

    let log_level = parse_level(&logging.level).unwrap_or_else(|| {
        ignored.push(logging.level.clone());
        Level::INFO
    });

    let mut module_levels = Vec::new();
    for (module, raw) in &logging.modules {
        match parse_level(raw) {
            Some(level) => module_levels.push((module.clone(), level)),
            None => ignored.push(format!("{module}={raw}")),
        }
    }

    let config = TelemetryConfig {
        log_level,
        module_levels,
        json: logging.json,
    };
    (config, ignored)
}
