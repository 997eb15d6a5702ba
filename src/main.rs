//! Binary entry point: wire configuration, storage, clients, and the webhook
//! server together, then serve until interrupted.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use greenlight::agent::AgentRunner;
use greenlight::approvals::HttpApprovalClient;
use greenlight::cache::{CacheStats, ResultCache};
use greenlight::config::Config;
use greenlight::llm::ChatLlm;
use greenlight::server::{AppState, WebhookServer, router};
use greenlight::store::{DedupGuard, KvStore, MemoryKv, PostgresKv, ThreadStore};
use greenlight::tools::{
    HttpDeployClient, HttpForgeClient, HttpMailingListClient, HttpTrackerClient, Toolbox,
};

/// Interval between cache-stats log lines.
const CACHE_STATS_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser, Debug)]
#[command(name = "greenlight", about = "Approval-gated automation agent")]
struct Cli {
    /// Address to bind the webhook server to (overrides HOST/PORT).
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Emit logs as JSON.
    #[arg(long, env = "LOG_JSON")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("greenlight=info,tower_http=info"));
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Config::from_env().context("loading configuration")?;

    let kv: Arc<dyn KvStore> = match config.store.database_url {
        Some(_) => {
            let store = PostgresKv::connect(&config.store)
                .await
                .context("connecting to postgres")?;
            store.ensure_schema().await.context("preparing kv schema")?;
            tracing::info!("using postgres-backed store");
            Arc::new(store)
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set, using in-memory store; suspended threads will not \
                 survive a restart"
            );
            Arc::new(MemoryKv::new())
        }
    };

    let threads = ThreadStore::new(kv.clone(), config.store.snapshot_ttl);
    let dedup = DedupGuard::new(kv.clone(), config.dedup.ttl);

    let stats = Arc::new(CacheStats::new());
    let cache = ResultCache::new(kv, config.cache.ttl, stats.clone());

    let stats_task = tokio::spawn({
        let stats = stats.clone();
        async move {
            let mut ticker = tokio::time::interval(CACHE_STATS_INTERVAL);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                stats.log_and_reset();
            }
        }
    });

    let llm = Arc::new(ChatLlm::new(config.llm));
    let toolbox = Toolbox {
        tracker: Arc::new(HttpTrackerClient::new(config.tracker)),
        deploys: Arc::new(HttpDeployClient::new(config.deploys)),
        forge: Arc::new(HttpForgeClient::new(config.forge.clone())),
        mailing: config
            .mailing
            .map(|mailing| Arc::new(HttpMailingListClient::new(mailing)) as _),
    };

    let runner = Arc::new(AgentRunner::new(
        llm.clone(),
        llm.clone(),
        Arc::new(HttpApprovalClient::new(config.approvals)),
        toolbox,
        cache,
        threads.clone(),
        config.forge.promote_workflow.clone(),
    ));

    let state = AppState {
        runner,
        planner: llm,
        dedup,
        threads,
        inbound: config.inbound,
        webhook_secret: config.server.webhook_secret.clone(),
        disable_webhook_verification: config.server.disable_webhook_verification,
    };

    if state.disable_webhook_verification {
        tracing::warn!("webhook signature verification is DISABLED");
    }

    let addr = cli.bind.unwrap_or(
        format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .context("parsing bind address")?,
    );

    let mut server = WebhookServer::new(addr);
    server.start(router(state)).await?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received");

    stats_task.abort();
    server.shutdown().await;
    Ok(())
}
