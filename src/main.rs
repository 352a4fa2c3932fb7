//! banshieldd - centralized IP reputation and ban decision engine.
//!
//! Wires together the Ban Engine (with its Ledger/Index pair) and the
//! five long-running tasks built around it: the syslog UDP ingestor, the
//! three proxy-facing adapters, and the periodic cleanup sweep. Every
//! task shares one `tokio::sync::broadcast` shutdown signal.

mod adapters;
mod cleanup;
mod config;
mod db;
mod engine;
mod error;
mod ingest;
mod patterns;

use crate::config::Config;
use crate::db::Database;
use crate::engine::BanEngine;
use crate::patterns::PatternMatcher;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path. Falls back to
/// `banshield.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "banshield.toml".to_string(),
    }
}

/// Seed the `patterns` table from `[[patterns]]` config entries. Upserts
/// by name, so re-running with an edited config file updates existing
/// rules rather than duplicating them.
async fn seed_patterns(db: &Database, config: &Config) {
    for rule in &config.patterns {
        if let Err(e) = db
            .patterns()
            .upsert_pattern(
                &rule.name,
                &rule.regex,
                rule.ip_group as i64,
                rule.severity as i64,
                &rule.description,
                rule.enabled,
            )
            .await
        {
            tracing::warn!(pattern = %rule.name, error = %e, "failed to seed pattern into database");
        }
    }
}

/// Build the pattern matcher from whatever is currently enabled in the
/// `patterns` table (config-seeded plus anything added since via the
/// admin API, once that surface grows pattern CRUD).
async fn load_matcher(db: &Database) -> PatternMatcher {
    match db.patterns().list_enabled().await {
        Ok(rows) => {
            let rules: Vec<(String, String, usize, u8, String)> = rows
                .into_iter()
                .map(|r| {
                    (
                        r.name,
                        r.regex,
                        r.ip_group as usize,
                        r.severity as u8,
                        r.description,
                    )
                })
                .collect();
            PatternMatcher::from_rules(&rules)
        }
        Err(e) => {
            error!(error = %e, "failed to load patterns from database, starting with none");
            PatternMatcher::new()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();
    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: failed to load config from {}: {}", config_path, e);
        e
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.server.log_format {
        crate::config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        crate::config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    if let Err(errors) = crate::config::validate(&config) {
        for err in &errors {
            error!(error = %err, "configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(instance = %config.server.name, "starting banshieldd");

    let db = Database::new(&config.database.path).await?;
    seed_patterns(&db, &config).await;
    let matcher = Arc::new(load_matcher(&db).await);
    info!(patterns = matcher.len(), "pattern matcher ready");

    let engine = BanEngine::new(db, config.ban.clone());

    // One shutdown broadcast, subscribed to by every long-running task.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
            let _ = shutdown_tx.send(());
        });
    }

    let mut tasks = Vec::new();

    // Syslog UDP ingestor.
    {
        let ingestor = ingest::LogIngestor::bind(config.syslog.address, engine.clone(), matcher.clone()).await?;
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            ingestor.run(shutdown_rx).await;
        }));
    }

    // HAProxy SPOA adapter.
    {
        let spoa = adapters::spoa::SpoaAdapter::bind(
            config.spoa.address,
            engine.clone(),
            config.spoa.read_timeout,
            config.spoa.max_clients,
        )
        .await?;
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            spoa.run(shutdown_rx).await;
        }));
    }

    // Envoy ext_authz gRPC adapter.
    {
        let engine = engine.clone();
        let addr = config.envoy.address;
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = adapters::envoy::serve(addr, engine, shutdown_rx).await {
                error!(error = %e, "envoy ext_authz adapter stopped with an error");
            }
        }));
    }

    // Nginx auth_request adapter, plus the admin HTTP API mounted on
    // the same router.
    {
        let nginx_adapter = adapters::nginx::NginxAdapter::new(engine.clone(), config.nginx.return_json);
        let addr = config.nginx.address;
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = adapters::nginx::serve(addr, nginx_adapter, shutdown_rx).await {
                error!(error = %e, "nginx auth_request adapter stopped with an error");
            }
        }));
    }

    // Periodic cleanup: sweeps stale ledger entries and clears expired bans.
    {
        let engine = engine.clone();
        let interval = config.ban.cleanup_interval;
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            cleanup::run(engine, interval, shutdown_rx).await;
        }));
    }

    // Wait for the shutdown signal, then let every task wind down on its
    // own graceful-shutdown path (listeners stop accepting, in-flight
    // requests finish). After an overall 30s deadline the process exits
    // regardless of any straggler.
    let mut shutdown_rx = shutdown_tx.subscribe();
    let _ = shutdown_rx.recv().await;
    info!("shutdown signal received, waiting for tasks to wind down");

    let join_remaining = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(std::time::Duration::from_secs(30), join_remaining)
        .await
        .is_err()
    {
        error!("shutdown deadline elapsed with tasks still running, terminating anyway");
    } else {
        info!("all tasks wound down cleanly");
    }

    Ok(())
}
