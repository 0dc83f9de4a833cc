use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trackgit::config::{self, Config};
use trackgit::gateway::{InMemoryGateway, ShortenerClient, StaticAuthToken, TransferClient};
use trackgit::models::token::TokenExport;
use trackgit::models::Token;
use trackgit::session::FileSessionStore;
use trackgit::store::TokenStore;
use trackgit::{id, query};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // Export spans over OTLP only when a collector is configured
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "trackgit"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "trackgit=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        cli::Commands::NewId { count } => {
            for _ in 0..count {
                println!("{}", id::generate_token_id());
            }
            Ok(())
        }
        cli::Commands::Shorten { url } => handle_shorten(&cfg, &url).await,
        cli::Commands::Transfer {
            token_id,
            email,
            auth_token,
        } => handle_transfer(&cfg, &token_id, &email, auth_token).await,
        cli::Commands::Range {
            file,
            token,
            start,
            end,
            bucket_ms,
        } => handle_range(&file, &token, &start, &end, bucket_ms),
        cli::Commands::Simulate { owner, name, hits } => {
            handle_simulate(&cfg, &owner, &name, hits).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn handle_shorten(cfg: &Config, url: &str) -> anyhow::Result<()> {
    let client = ShortenerClient::from_config(cfg)?
        .ok_or_else(|| anyhow::anyhow!("TRACKGIT_SHORTENER_URL is not set"))?;
    let short = client.shorten(url).await?;
    println!("{}", short);
    Ok(())
}

async fn handle_transfer(
    cfg: &Config,
    token_id: &str,
    email: &str,
    auth_token: Option<String>,
) -> anyhow::Result<()> {
    let auth = Arc::new(StaticAuthToken(auth_token.or_else(|| cfg.auth_token.clone())));
    let client = TransferClient::from_config(cfg, auth)?
        .ok_or_else(|| anyhow::anyhow!("TRACKGIT_TRANSFER_URL is not set"))?;

    let status = client.transfer(token_id, email).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    if !status.is_successful {
        anyhow::bail!(
            "transfer refused: {}",
            status.message.unwrap_or_else(|| "no reason given".into())
        );
    }
    Ok(())
}

fn handle_range(
    file: &std::path::Path,
    token_id: &str,
    start: &str,
    end: &str,
    bucket_ms: Option<i64>,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let exports: Vec<TokenExport> =
        serde_json::from_str(&raw).context("token export must be a JSON array of tokens")?;
    let tokens: Vec<Token> = exports.into_iter().map(Token::from).collect();
    let token = tokens.iter().find(|t| t.id() == token_id);
    if token.is_none() {
        tracing::warn!(token_id, "token not found in export");
    }

    let start = parse_time(start).context("invalid --start")?;
    let end = parse_time(end).context("invalid --end")?;

    let out = match bucket_ms {
        Some(bucket_ms) => serde_json::to_string_pretty(&query::histogram(token, start, end, bucket_ms))?,
        None => serde_json::to_string_pretty(&query::time_logs_in_range(token, start, end))?,
    };
    println!("{}", out);
    Ok(())
}

/// UTC millis, or an RFC 3339 timestamp.
fn parse_time(value: &str) -> anyhow::Result<i64> {
    if let Ok(millis) = value.parse::<i64>() {
        return Ok(millis);
    }
    let parsed = chrono::DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("expected millis or RFC 3339, got '{}'", value))?;
    Ok(parsed.timestamp_millis())
}

async fn handle_simulate(cfg: &Config, owner: &str, name: &str, hits: usize) -> anyhow::Result<()> {
    let mut gateway = InMemoryGateway::new().with_bucket_ms(cfg.bucket_ms);
    if let Some(shortener) = ShortenerClient::from_config(cfg)? {
        gateway = gateway.with_shortener(shortener);
    }
    let session = Arc::new(FileSessionStore::new(&cfg.session_file));
    let store = TokenStore::new(Arc::new(gateway.clone()), session, cfg.ping_base_url.clone());

    let mut notifications = store.subscribe_notifications();
    tokio::spawn(async move {
        while let Ok(n) = notifications.recv().await {
            if n.is_error() {
                tracing::warn!(operation = %n.operation, "{}", n.message);
            } else {
                tracing::info!(operation = %n.operation, "{}", n.message);
            }
        }
    });

    let status = store.fetch_all(owner).await;
    if !status.is_successful {
        anyhow::bail!("sync failed: {}", status.message.unwrap_or_default());
    }

    let created = store.create_token(name).await;
    let token_id = match (created.is_successful, created.message) {
        (true, Some(id)) => id,
        (_, message) => anyhow::bail!("create failed: {}", message.unwrap_or_default()),
    };
    wait_for(|| store.token(&token_id).is_some()).await?;
    store.select_active(Some(&token_id));

    let now = chrono::Utc::now().timestamp_millis();
    for i in 0..hits {
        gateway.record_hit(&token_id, now - (i as i64) * 7 * 60_000)?;
    }
    let window_start = now - 24 * 3_600_000;
    wait_for(|| store.count_in_range(None, window_start, now) == hits).await?;

    let token = store
        .active_token()
        .ok_or_else(|| anyhow::anyhow!("active token vanished"))?;
    let report = serde_json::json!({
        "id": token.id(),
        "name": token.name(),
        "url": token.record.url,
        "shortUrl": token.record.short_url,
        "totalRequests": store.total_requests(None),
        "lastDay": store.histogram(None, window_start, now, cfg.bucket_ms),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    store.reset();
    Ok(())
}

/// Poll `cond` until it holds; snapshots arrive asynchronously.
async fn wait_for<F: Fn() -> bool>(cond: F) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("timed out waiting for the store to catch up")
}
