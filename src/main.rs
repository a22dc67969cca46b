mod analysis;
mod cache;
mod config;
mod ebay;
mod estimate;
mod http;
mod idempotency;
mod jobs;
mod llm;
mod market_value;
mod metrics;
mod models;
mod normalize;
mod pipeline;
mod rate_limit;
mod security;
mod sources;
mod store;

use analysis::{Analyzer, AnalyzerSettings, EbayMarketSource, LlmIdentifier, LlmSellabilityAnalyzer};
use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::{AppConfig, SupabaseSettings};
use ebay::EbayMarketClient;
use estimate::{EstimateInput, EstimationResult};
use eyre::WrapErr;
use idempotency::IdempotencyStore;
use jobs::JobQueue;
use llm::LlmClient;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, NewJob, ScanRequest, ScraperJob};
use normalize::normalize_mercari_listing;
use pipeline::{OpportunityPipeline, PipelineError, PipelineErrorKind};
use rate_limit::RateLimiter;
use reqwest::Client;
use security::{AuthContext, AuthState, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sources::{ListingSource, MercariSearch, StaticListings};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use store::{JobStore, ListingStore, MemoryStore, PriceHistoryStore, SupabaseStore};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env().wrap_err("loading configuration")?;
    let http = http::build_client(&config.http);

    let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
    let _sweeper = limiter.spawn_sweeper(SWEEP_INTERVAL);

    let stores = Stores::connect(http.clone(), config.supabase.as_ref());
    let analyzer = config
        .analysis_enabled
        .then(|| build_analyzer(&config, http.clone(), limiter.clone()));
    let persistence = stores.kind;
    let pipeline = OpportunityPipeline::new(
        stores.listings,
        stores.jobs,
        stores.history,
        analyzer,
        config.thresholds,
    );
    info!(
        target = "flipscout.api",
        analysis_enabled = pipeline.analysis_enabled(),
        persistence,
        "pipeline configured"
    );
    let (queue, _worker) = JobQueue::spawn(pipeline, config.queue_capacity, config.job_concurrency);

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;
    let redis = config.redis_url.as_deref().and_then(|url| match redis::Client::open(url) {
        Ok(client) => Some(client),
        Err(err) => {
            warn!(target = "flipscout.api", error = %err, "invalid REDIS_URL; using in-process idempotency");
            None
        }
    });

    let state = AppState {
        queue,
        idempotency: Arc::new(IdempotencyStore::new(
            redis,
            config.cache_max_entries,
            config.idempotency_ttl,
        )),
        prometheus_handle,
        metrics_key: config.metrics_key.clone(),
        http,
        mercari_api_key: config.mercari_api_key.clone(),
    };
    let auth_state = AuthState::new(&config.api_keys, limiter);
    let app = build_router(state, auth_state, config.body_limit_bytes);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "flipscout.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

struct Stores {
    kind: &'static str,
    listings: Arc<dyn ListingStore>,
    jobs: Arc<dyn JobStore>,
    history: Arc<dyn PriceHistoryStore>,
}

impl Stores {
    fn connect(http: Client, supabase: Option<&SupabaseSettings>) -> Self {
        match supabase {
            Some(settings) => {
                let store = Arc::new(SupabaseStore::new(http, settings));
                Self {
                    kind: "supabase",
                    listings: store.clone(),
                    jobs: store.clone(),
                    history: store,
                }
            }
            None => {
                let store = Arc::new(MemoryStore::new());
                Self {
                    kind: "memory",
                    listings: store.clone(),
                    jobs: store.clone(),
                    history: store,
                }
            }
        }
    }
}

fn build_analyzer(config: &AppConfig, http: Client, limiter: Arc<RateLimiter>) -> Arc<Analyzer> {
    let llm = Arc::new(LlmClient::new(http.clone(), config.llm.clone()));
    let market = EbayMarketSource::new(EbayMarketClient::new(http, config.ebay.clone()));
    Arc::new(Analyzer::new(
        Arc::new(LlmIdentifier::new(llm.clone())),
        Arc::new(market),
        Arc::new(LlmSellabilityAnalyzer::new(llm)),
        limiter,
        AnalyzerSettings::new(
            &config.thresholds,
            config.analysis_timeout,
            config.cache_max_entries,
            config.cache_ttl,
        ),
    ))
}

fn build_router(state: AppState, auth_state: AuthState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/estimate", post(estimate_listing))
        .nest(
            "/jobs",
            Router::new()
                .route("/scans", post(enqueue_scan))
                .route("/{id}", get(get_job_status)),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

#[derive(Clone)]
struct AppState {
    queue: JobQueue,
    idempotency: Arc<IdempotencyStore>,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
    http: Client,
    mercari_api_key: Option<String>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "flipscout-api",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret.as_str() {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
    status: models::JobStatus,
}

impl From<&ScraperJob> for EnqueueResponse {
    fn from(job: &ScraperJob) -> Self {
        Self {
            job_id: job.id.to_string(),
            status: job.status,
        }
    }
}

/// Queue a scan over inline listings or a Mercari search.
///
/// - Method: `POST`
/// - Path: `/jobs/scans`
/// - Auth: `Authorization: Bearer <key>` or `X-Flipscout-Key: <key>`
/// - Body: `ScanRequest`
/// - Response: `202 {job_id, status}`; replays the original job for a
///   repeated `Idempotency-Key`.
async fn enqueue_scan(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: HeaderMap,
    Json(payload): Json<ScanRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    crate::metrics::inc_requests("/jobs/scans");

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(key) = &idempotency_key
        && let Some(existing) = state.idempotency.get(&context.owner_id, key).await
        && let Ok(job) = state.queue.get(existing).await
    {
        return Ok((StatusCode::OK, Json(EnqueueResponse::from(&job))));
    }

    let source = scan_source(&state, &payload)?;
    let job = state
        .queue
        .enqueue(
            NewJob {
                platform: payload.platform,
                owner_id: context.owner_id.clone(),
                location: payload.location,
                category: payload.category,
            },
            source,
        )
        .await?;
    info!(
        target = "flipscout.api",
        owner_id = %context.owner_id,
        api_key = %context.api_key_id,
        job_id = %job.id,
        "scan enqueued",
    );
    if let Some(key) = &idempotency_key {
        state.idempotency.remember(&context.owner_id, key, job.id).await;
    }
    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse::from(&job))))
}

fn scan_source(state: &AppState, payload: &ScanRequest) -> Result<Box<dyn ListingSource>, AppError> {
    if let Some(listings) = payload.listings.as_ref().filter(|items| !items.is_empty()) {
        return Ok(Box::new(StaticListings::new(listings.clone())));
    }
    if let Some(scraped) = payload
        .mercari_listings
        .as_ref()
        .filter(|items| !items.is_empty())
    {
        let listings = scraped.iter().map(normalize_mercari_listing).collect();
        return Ok(Box::new(StaticListings::new(listings)));
    }
    if let Some(search) = payload
        .search
        .as_ref()
        .filter(|search| !search.keywords.trim().is_empty())
    {
        return Ok(Box::new(MercariSearch::new(
            state.http.clone(),
            state.mercari_api_key.clone(),
            search.clone(),
        )));
    }
    Err(AppError::Pipeline(PipelineError::invalid_input(
        "scan",
        "provide `listings`, `mercari_listings` or `search.keywords`",
    )))
}

async fn get_job_status(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ScraperJob>, AppError> {
    crate::metrics::inc_requests("/jobs/{id}");
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::Pipeline(PipelineError::invalid_input(
            "jobs",
            "invalid_job_id",
        )));
    };
    let job = state.queue.get(uuid).await?;
    if job.owner_id != context.owner_id {
        return Err(AppError::Pipeline(PipelineError::not_found(
            "jobs",
            format!("job {uuid} not found"),
        )));
    }
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
struct EstimateRequest {
    title: String,
    #[serde(default)]
    description: String,
    price: f64,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

/// Heuristic estimate for one listing; no external calls.
async fn estimate_listing(
    Json(req): Json<EstimateRequest>,
) -> Result<Json<EstimationResult>, AppError> {
    crate::metrics::inc_requests("/estimate");
    if req.title.trim().is_empty() {
        return Err(AppError::Pipeline(PipelineError::invalid_input(
            "estimate",
            "title is required",
        )));
    }
    if !req.price.is_finite() || req.price <= 0.0 {
        return Err(AppError::Pipeline(PipelineError::invalid_input(
            "estimate",
            "price must be greater than zero",
        )));
    }
    Ok(Json(estimate::estimate(&EstimateInput {
        title: &req.title,
        description: &req.description,
        asking_price: req.price,
        condition: req.condition.as_deref(),
        category: req.category.as_deref(),
    })))
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::NotFound => StatusCode::NOT_FOUND,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
