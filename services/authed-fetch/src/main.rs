//! authed-fetch
//!
//! Fetches API URLs through the single-flight refreshing client:
//! 1. Loads config and seeds the session from env / token file
//! 2. Issues every URL concurrently with the session's bearer token
//! 3. An expired access token triggers one shared refresh, then each request replays once
//! 4. A failed refresh clears the session and requests navigation to the sign-in entry

mod config;
mod fetch;
mod metrics;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use auth_refresh::{
    AuthClient, AuthEndpoints, FailureEscalation, HttpRefreshEndpoint, RefreshCoordinator,
};
use common::Secret;
use session::{
    ChannelNavigator, FileTokenStore, MemoryTokenStore, SessionTokens, TokenStore, now_millis,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::HttpTransport;

use crate::config::{AuthConfig, Config};

const USAGE: &str = "usage: authed-fetch [--config PATH] [--metrics] URL...";

/// Parsed command line.
#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    config: Option<String>,
    metrics: bool,
    urls: Vec<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().context("--config requires a path")?;
            parsed.config = Some(path);
        } else if arg == "--metrics" {
            parsed.metrics = true;
        } else if arg.starts_with("--") {
            anyhow::bail!("unknown flag {arg}\n{USAGE}");
        } else {
            parsed.urls.push(arg);
        }
    }
    if parsed.urls.is_empty() {
        anyhow::bail!("no URLs given\n{USAGE}");
    }
    Ok(parsed)
}

/// Open the configured token store and overlay tokens from the environment.
async fn open_store(auth: &AuthConfig) -> Result<Arc<dyn TokenStore>> {
    let store: Arc<dyn TokenStore> = match &auth.token_file {
        Some(path) => Arc::new(
            FileTokenStore::load(path.clone())
                .await
                .with_context(|| format!("failed to open token file {}", path.display()))?,
        ),
        None => Arc::new(MemoryTokenStore::new()),
    };
    seed_tokens(store.as_ref(), auth)
        .await
        .context("failed to seed session tokens")?;
    Ok(store)
}

/// Env tokens win over stored ones. Seeding only a refresh token stores an
/// empty access token, so the first request is rejected and refreshes.
async fn seed_tokens(store: &dyn TokenStore, auth: &AuthConfig) -> session::Result<()> {
    if auth.access_token.is_none() && auth.refresh_token.is_none() {
        return Ok(());
    }
    let existing = store.tokens().await;

    let mut tokens = match (&auth.access_token, &existing) {
        (Some(access), _) => SessionTokens::new(access.clone()),
        (None, Some(current)) => {
            let mut kept = SessionTokens::new(current.access.clone());
            kept.expires_at = current.expires_at;
            kept
        }
        (None, None) => SessionTokens::new(Secret::new(String::new())),
    };
    if let Some(refresh) = auth
        .refresh_token
        .clone()
        .or_else(|| existing.and_then(|t| t.refresh))
    {
        tokens = tokens.with_refresh(refresh);
    }

    info!(
        access_from_env = auth.access_token.is_some(),
        refresh_from_env = auth.refresh_token.is_some(),
        "seeded session from environment"
    );
    store.store(tokens).await
}

fn build_client(
    config: &Config,
    store: Arc<dyn TokenStore>,
    navigator: ChannelNavigator,
) -> Result<AuthClient> {
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let transport = HttpTransport::new(
        http.clone(),
        config.api.base_url.clone(),
        Arc::clone(&store),
        config.timeout(),
    )
    .with_default_headers(config.headers.clone());

    let endpoint = HttpRefreshEndpoint::new(http, config.refresh_url(), Arc::clone(&store));
    let escalation = FailureEscalation::new(store, Arc::new(navigator));

    let mut coordinator = RefreshCoordinator::new(Arc::new(endpoint), escalation);
    if let Some(timeout) = config.refresh_timeout() {
        coordinator = coordinator.with_refresh_timeout(timeout);
    }

    Ok(AuthClient::new(
        Arc::new(transport),
        Arc::new(coordinator),
        AuthEndpoints::new(&config.auth.exempt_paths),
    ))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args = parse_args(std::env::args().skip(1))?;

    let prometheus = if args.metrics {
        Some(metrics::install_recorder().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let config_path = Config::resolve_path(args.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url,
        refresh_url = %config.refresh_url(),
        token_file = ?config.auth.token_file,
        headers = config.headers.len(),
        "configuration loaded"
    );

    let store = open_store(&config.auth).await?;
    match store.tokens().await {
        None => warn!("no session tokens available, requests will go out unauthenticated"),
        Some(tokens) if tokens.is_expired_at(now_millis()) => {
            info!("stored access token has expired, first request will refresh it")
        }
        Some(_) => {}
    }

    let (navigator, mut navigation) = ChannelNavigator::new(config.auth.login_entry.clone());
    let client = build_client(&config, store, navigator)?;

    let reports = fetch::fetch_all(&client, &args.urls).await;
    for report in &reports {
        println!("{}", report.line());
    }

    let session_ended = match navigation.try_recv() {
        Ok(request) => {
            eprintln!("session expired, sign in again at {}", request.entry);
            true
        }
        Err(_) => false,
    };

    if let Some(handle) = prometheus {
        eprint!("{}", handle.render());
    }

    info!(
        urls = reports.len(),
        failed = reports.iter().filter(|r| r.outcome.is_err()).count(),
        waves = client.coordinator().waves(),
        session_ended,
        "done"
    );

    Ok(ExitCode::from(fetch::exit_code(&reports, session_ended)))
}
