//! Token Sentry - real-time token threat detection engine
//!
//! Probes tokens behaviorally (simulated buy -> sell), scores the result
//! deterministically, and publishes versioned alerts to a stream.
//!
//! Usage: token_sentry 0xTOKEN@CHAIN_ID [0xTOKEN@CHAIN_ID ...]

use alloy_primitives::Address;
use eyre::Result;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use token_sentry::stream::StreamTransport;
use token_sentry::utils::constants::{
    get_chain_name, rpc_env_key, APP_NAME, APP_VERSION, SUPPORTED_CHAIN_IDS,
};
use token_sentry::{
    AnalysisTask, Engine, EngineConfig, HttpTransport, InMemoryStream, RedisStream, TaskTrigger,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    println!(
        r#"
    ╔══════════════════════════════════════════╗
    ║       T O K E N   S E N T R Y            ║
    ║   Behavioral Token Threat Detection      ║
    ╚══════════════════════════════════════════╝
    "#
    );
    println!("    {} v{}\n", APP_NAME, APP_VERSION);

    // Surface missing primary RPC keys early; public fallbacks still work
    // but get throttled fast.
    let has_primary = SUPPORTED_CHAIN_IDS
        .iter()
        .filter_map(|id| rpc_env_key(*id))
        .any(|key| std::env::var(key).map(|v| !v.is_empty()).unwrap_or(false));
    if !has_primary {
        eprintln!("⚠️  No primary RPC URL set (e.g. ETH_HTTP_URL).");
        eprintln!("   Running on public fallback endpoints only.");
        eprintln!();
    }

    let config = EngineConfig::from_env();
    config.validate()?;
    let rpc_timeout = config.gateway.rpc_timeout;

    let stream: Arc<dyn StreamTransport> = match std::env::var("REDIS_URL") {
        Ok(url) if !url.is_empty() => Arc::new(RedisStream::connect(&url).await?),
        _ => {
            eprintln!("⚠️  REDIS_URL not set: alerts go to an in-memory stream (dry run).");
            Arc::new(InMemoryStream::new())
        }
    };

    let engine = Arc::new(Engine::new(
        config,
        Arc::new(HttpTransport::new(rpc_timeout)?),
        stream,
    )?);

    let tokens = parse_token_args(std::env::args().skip(1))?;
    if tokens.is_empty() {
        eprintln!("⚠️  No tokens supplied. Pass targets as 0xTOKEN@CHAIN_ID arguments.");
    }
    for (token, chain_id) in &tokens {
        println!(
            "🎯 Watching {} on {}",
            token,
            get_chain_name(*chain_id)
        );
        engine
            .submit(AnalysisTask::new(*token, *chain_id, TaskTrigger::Manual))
            .await?;
    }

    // Optional periodic re-check of the same targets
    let recheck_secs: u64 = std::env::var("SENTRY_RECHECK_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if recheck_secs > 0 && !tokens.is_empty() {
        let engine = engine.clone();
        let tokens = tokens.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(recheck_secs));
            interval.tick().await; // skip the immediate tick
            loop {
                interval.tick().await;
                for (token, chain_id) in &tokens {
                    let task = AnalysisTask::new(*token, *chain_id, TaskTrigger::Recheck);
                    if engine.submit(task).await.is_err() {
                        return;
                    }
                }
            }
        });
    }

    let runner = engine.clone();
    let run_handle = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await?;
    println!("\n\n🛑 Shutting down gracefully...");
    engine.shutdown();
    run_handle.await?;

    let stats = engine.stats();
    println!("\n📊 Final Statistics:");
    println!("   Submitted:   {}", stats.submitted);
    println!("   Completed:   {}", stats.completed);
    println!("   Published:   {}", stats.published);
    println!("   Requeued:    {}", stats.requeued);
    println!("   Failed:      {}", stats.failed);
    println!("   Avg Latency: {:.2}ms", stats.avg_latency_ms);

    if let Ok(report) = serde_json::to_string_pretty(&engine.health_report()) {
        println!("\n🩺 Health Report:\n{}", report);
    }

    Ok(())
}

/// Parse `0xTOKEN@CHAIN_ID` arguments
fn parse_token_args(args: impl Iterator<Item = String>) -> Result<Vec<(Address, u64)>> {
    let mut tokens = Vec::new();
    for arg in args {
        let (addr_part, chain_part) = arg
            .split_once('@')
            .ok_or_else(|| eyre::eyre!("expected 0xTOKEN@CHAIN_ID, got '{}'", arg))?;
        let token = Address::from_str(addr_part)
            .map_err(|e| eyre::eyre!("bad token address '{}': {}", addr_part, e))?;
        let chain_id: u64 = chain_part
            .parse()
            .map_err(|e| eyre::eyre!("bad chain id '{}': {}", chain_part, e))?;
        tokens.push((token, chain_id));
    }
    Ok(tokens)
}
