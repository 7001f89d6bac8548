pub mod auth;
pub mod backoff;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod models;
pub mod protocol;
pub mod rate_limit;
pub mod routes;
pub mod runner;
pub mod session;
pub mod tools;
pub mod visibility;

use auth::Authenticator;
use config::BridgeConfig;
use db::Db;
use rate_limit::{RateLimitConfig, RateLimiter};
use runner::{AgentRunner, HttpChatAdapter, ModelAdapter, RunnerConfig, RunnerMode};
use session::SessionManager;
use std::env;
use std::sync::Arc;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let config = BridgeConfig::from_env();
    rocket_with_config(config)
}

/// Builds the bootstrap used by both `main` and integration tests; tests
/// supply their own `BridgeConfig` pointing at an ephemeral database path
/// and agent-key file (teacher's `rocket_with_db` idiom).
pub fn rocket_with_config(config: BridgeConfig) -> rocket::Rocket<rocket::Build> {
    if let Some(parent) = std::path::Path::new(&config.database_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).ok();
    }

    let db = Db::new(&config.database_path);
    let rate_limit_config = RateLimitConfig::from_env();
    let rate_limiter = RateLimiter::new();
    let sessions = SessionManager::new();

    // A missing or unparseable agent-key table is a fatal startup error
    // (SPEC_FULL A.3) — the bridge has no one it can authenticate without it.
    let records = match &config.agents_file {
        Some(path) => config::load_agent_records(path).unwrap_or_else(|e| {
            panic!("failed to load AGORAI_AGENTS_FILE ({path}): {e}");
        }),
        None => Vec::new(),
    };
    let authenticator = Authenticator::new(records, config.key_salt.clone());

    let figment = rocket::Config::figment().merge(("limits.json", config.max_body_size));

    let mut build = rocket::custom(figment)
        .manage(rate_limit_config)
        .manage(rate_limiter)
        .manage(sessions)
        .manage(authenticator)
        .manage(config.clone())
        .register("/", rocket::catchers![routes::too_many_requests, routes::not_found])
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::mcp_post,
                routes::mcp_get,
                routes::mcp_delete,
            ],
        );

    // The optional internal agent (§4.10) runs in-process against the same
    // store; it is started from a liftoff fairing in the teacher's
    // `webhooks`/`retention` idiom so it only ever starts once the server
    // is actually serving.
    if env::var("AGORAI_INTERNAL_AGENT_NAME").is_ok() {
        let runner_db = Arc::new(Db::new_with_events(&config.database_path, db.events_sender()));
        let poll_interval_ms = config.poll_interval_ms;
        build = build.attach(rocket::fairing::AdHoc::on_liftoff("Internal Agent Runner", move |_rocket| {
            Box::pin(async move {
                let runner_config = build_runner_config(poll_interval_ms);
                let adapter: Arc<dyn ModelAdapter> = Arc::new(build_adapter());
                let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
                let runner = Arc::new(AgentRunner::new(runner_db, adapter, runner_config, cancel_rx));
                if let Err(e) = runner.start() {
                    tracing::error!(error = %e, "internal agent runner failed to start");
                }
            })
        }));
    }

    build.manage(db)
}

fn build_runner_config(poll_interval_ms: u64) -> RunnerConfig {
    let agent_name = env::var("AGORAI_INTERNAL_AGENT_NAME").unwrap_or_else(|_| "internal-runner".to_string());
    let mode = match env::var("AGORAI_INTERNAL_AGENT_MODE").as_deref() {
        Ok("passive") => RunnerMode::Passive,
        _ => RunnerMode::Active,
    };
    let system_prompt = env::var("AGORAI_INTERNAL_AGENT_SYSTEM_PROMPT").ok();
    RunnerConfig {
        agent_name,
        mode,
        poll_interval_ms,
        system_prompt,
    }
}

fn build_adapter() -> HttpChatAdapter {
    HttpChatAdapter {
        endpoint: env::var("AGORAI_MODEL_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:11434/v1/chat/completions".to_string()),
        model: env::var("AGORAI_MODEL_NAME").unwrap_or_else(|_| "default".to_string()),
        client: reqwest::Client::new(),
    }
}

/// Initializes the teacher's `tracing`/`tracing-subscriber` stack (SPEC_FULL
/// A.1); safe to call more than once from tests (errors are ignored).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
