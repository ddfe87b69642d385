//! KarryTask HTTP server and the one-shot CLI commands that share its wiring.

use crate::config::KarryTaskConfig;
use crate::resolver::{CommandResolver, default_system_prompt};
use crate::routes;
use crate::session::SessionManager;
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use kt_llm::{GeminiBackend, ModelGateway};
use kt_tools::{SqliteStore, TaskStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub resolver: Arc<CommandResolver>,
    pub sessions: SessionManager,
}

impl AppState {
    pub fn new(resolver: Arc<CommandResolver>) -> Self {
        Self {
            resolver,
            sessions: SessionManager::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        self.resolver.store()
    }
}

/// Opens the configured store and, when an API key is present, the model gateway.
pub fn build_resolver(cfg: &KarryTaskConfig) -> Result<Arc<CommandResolver>> {
    let store_path = cfg.store_path()?;
    let store: Arc<dyn TaskStore> = Arc::new(
        SqliteStore::open(&store_path)
            .map_err(|e| anyhow::anyhow!("open store {}: {e}", store_path.display()))?,
    );

    let gateway = match cfg.api_key() {
        Some(api_key) => {
            let backend = GeminiBackend::new(api_key)?.with_base_url(&cfg.llm.base_url);
            let system_prompt = cfg
                .general
                .system_prompt
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| default_system_prompt(&cfg.general.assistant_name));
            let gateway = ModelGateway::new(Arc::new(backend), cfg.llm.models.clone(), system_prompt)?
                .with_profiles(cfg.gateway_profiles())
                .with_attempt_timeout(Duration::from_secs(cfg.llm.attempt_timeout_seconds))
                .with_deadline(Duration::from_secs(cfg.llm.resolve_deadline_seconds));
            tracing::info!(
                models = ?gateway.models(),
                attempt_timeout_seconds = cfg.llm.attempt_timeout_seconds,
                resolve_deadline_seconds = cfg.llm.resolve_deadline_seconds,
                "model gateway configured"
            );
            Some(gateway)
        }
        None => {
            tracing::warn!("no llm api key configured; resolving commands offline only");
            None
        }
    };

    Ok(Arc::new(CommandResolver::new(
        gateway,
        store,
        cfg.resolver.quick_capture_max_words,
    )))
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = KarryTaskConfig::load_with_path(config_path).await?;
    let resolver = build_resolver(&cfg)?;
    let tasks = resolver.store().list_tasks()?;
    tracing::info!(
        config_path = %path.display(),
        store_path = %cfg.store_path()?.display(),
        gateway_configured = resolver.gateway().is_some(),
        models = ?cfg.llm.models,
        port = cfg.server.port,
        task_count = tasks.len(),
        "config ok"
    );
    println!(
        "karrytask doctor: config ok ({}), {} task(s) in store, gateway {}",
        path.display(),
        tasks.len(),
        if resolver.gateway().is_some() {
            "configured"
        } else {
            "not configured (offline mode)"
        }
    );
    Ok(())
}

pub async fn ask(config_path: Option<PathBuf>, utterance: &str) -> Result<()> {
    let cfg = KarryTaskConfig::load(config_path).await?;
    let resolver = build_resolver(&cfg)?;
    let resolution = resolver.handle(utterance, &[]).await?;
    if !resolution.reply.is_empty() {
        println!("{}", resolution.reply);
    }
    Ok(())
}

pub async fn print_tasks(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = KarryTaskConfig::load(config_path).await?;
    let resolver = build_resolver(&cfg)?;
    let tasks = resolver.store().list_tasks()?;
    println!(
        "{}",
        kt_tools::format_task_lines(&tasks).unwrap_or_else(|| "No tasks yet.".to_string())
    );
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = KarryTaskConfig::load_with_path(config_path).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server.port));
    tracing::info!(
        config_path = %cfg_path.display(),
        bind_addr = %addr,
        models = ?cfg.llm.models,
        gateway_configured = cfg.api_key().is_some(),
        store_path = %cfg.store.path,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        quick_capture_max_words = cfg.resolver.quick_capture_max_words,
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;

    let state = Arc::new(AppState::new(build_resolver(&cfg)?));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router()
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "karrytask serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("http server shutdown completed");
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
}
