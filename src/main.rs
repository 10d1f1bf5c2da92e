//! HLCS orchestration gateway entry point.
//!
//! Loads configuration, wires the backend collaborators and core
//! components together, and serves the API gateway until interrupted.
//! Generalizes the teacher's interactive-REPL `main` (`ollama_rs` chat
//! loop over a `Supervisor`) into a long-running service process: the
//! gateway now *is* the interface, there is no terminal loop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hlcs::backends::{CapabilityMap, HttpToolServer, JsonlMemoryStore, StubLocalReasoner, ToolServer};
use hlcs::config::Config;
use hlcs::consensus::ConsensusEngine;
use hlcs::feature_flags::FeatureFlags;
use hlcs::gateway::{self, AppState};
use hlcs::meta::{strategy_from_config, MetaCognition};
use hlcs::orchestrator::Orchestrator;
use hlcs::planner::StrategicPlanner;
use hlcs::safety::CallerRateLimiter;

/// Rate-limiter refill rate: callers get `max_concurrent_requests` requests
/// per minute as a starting point, tunable independently once a real
/// per-caller quota is configured.
const RATE_LIMIT_PER_MINUTE: u32 = 600;
const RATE_LIMIT_BURST: u32 = 50;

const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_BACKEND_UNREACHABLE: i32 = 3;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "hlcs", about = "Autonomous orchestration gateway")]
struct Cli {
    /// Path to a YAML configuration file (falls back to built-in defaults
    /// plus `HLCS_`-prefixed environment overrides if omitted or missing).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Probe the tool server's health before serving and exit 3 if it is
    /// unreachable, instead of starting degraded.
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    match run(config, cli.strict).await {
        Ok(()) => Ok(()),
        Err(e) if e.downcast_ref::<Interrupted>().is_some() => {
            info!("interrupted, shutting down");
            std::process::exit(EXIT_INTERRUPTED);
        }
        Err(e) => {
            error!("fatal error: {e}");
            Err(e)
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("interrupted")]
struct Interrupted;

async fn run(config: Config, strict: bool) -> Result<()> {
    let tool_server: Arc<dyn ToolServer> =
        Arc::new(HttpToolServer::new(config.backends.tool_server.url.clone(), config.backends.tool_server.timeout_ms));

    if strict {
        match tool_server.health().await {
            Ok(hlcs::backends::HealthStatus::Down) | Err(_) => {
                error!("tool server at {} is unreachable and --strict was given", config.backends.tool_server.url);
                std::process::exit(EXIT_BACKEND_UNREACHABLE);
            }
            Ok(_) => info!("tool server health check passed"),
        }
    }

    let local_reasoner = if config.backends.local_reasoner.enabled {
        Some(Arc::new(StubLocalReasoner::new()) as Arc<dyn hlcs::backends::LocalReasonerBackend>)
    } else {
        None
    };

    let memory = JsonlMemoryStore::open(
        PathBuf::from(&config.memory.persist_dir).join("episodes.jsonl"),
        config.memory.stm_ttl_hours,
        config.memory.ltm_promotion_threshold,
    )
    .await?;

    let consensus = Arc::new(ConsensusEngine::new(config.consensus_defaults.role_weights.clone()));
    if let Err(e) = consensus.restore_participants(&config.participant_registry_path).await {
        warn!("failed to restore participant registry: {e}");
    }

    let feature_flags_table = config
        .feature_flags
        .iter()
        .map(|(name, flag)| (name.clone(), hlcs::feature_flags::FlagDefinition::from(flag.clone())))
        .collect();
    let feature_flags = Arc::new(if PathBuf::from(&config.feature_flags_path).exists() {
        FeatureFlags::load(&config.feature_flags_path).await?
    } else {
        FeatureFlags::new(&config.feature_flags_path, feature_flags_table)
    });

    let capability_map = Arc::new(CapabilityMap::default_mapping());

    let strategy = strategy_from_config(&config.strategy_default);
    let orchestrator = Arc::new(Orchestrator::new(
        MetaCognition::new(strategy),
        consensus.clone(),
        tool_server.clone(),
        local_reasoner.clone(),
        memory,
        (*capability_map).clone(),
        config.consensus_defaults.clone(),
    ));

    let planner = Arc::new(StrategicPlanner::new(config.max_step_attempts));
    let rate_limiter = Arc::new(CallerRateLimiter::new(RATE_LIMIT_PER_MINUTE, RATE_LIMIT_BURST));

    let state = AppState {
        orchestrator,
        consensus: consensus.clone(),
        planner,
        tool_server,
        local_reasoner,
        capability_map,
        feature_flags,
        rate_limiter,
        request_slots: Arc::new(tokio::sync::Semaphore::new(config.max_concurrent_requests)),
        max_concurrent_requests: config.max_concurrent_requests,
    };

    let participant_registry_path = config.participant_registry_path.clone();
    let listen_address = config.listen_address.clone();

    tokio::select! {
        result = gateway::run_server(state, &listen_address) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt signal");
            if let Err(e) = consensus.persist_participants(&participant_registry_path).await {
                warn!("failed to persist participant registry on shutdown: {e}");
            }
            Err(Interrupted.into())
        }
    }
}
