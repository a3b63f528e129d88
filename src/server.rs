use crate::{
    config::{Config, Settings},
    errors::{AppError, AppResult},
    payments::{CardDetails, PaymentGateway},
    security::{self, Subject, TokenGate},
    services::{invoices::Invoices, profile_pictures::ProfilePictures},
    store::InMemoryStore,
};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::{sync::Arc, time::Instant};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub tokens: Arc<TokenGate>,
    pub pictures: Arc<ProfilePictures>,
    pub invoices: Arc<Invoices>,
}

impl AppState {
    pub fn new(cfg: Config, settings: Settings, store: InMemoryStore, gateway: Arc<dyn PaymentGateway>) -> Self {
        let store = Arc::new(store);
        let pictures = ProfilePictures::new(settings.uploads, store.clone(), cfg.server.api_base_url.clone());
        let invoices = Invoices::new(settings.receipts, store, gateway);
        Self {
            cfg: Arc::new(cfg),
            tokens: Arc::new(settings.tokens),
            pictures: Arc::new(pictures),
            invoices: Arc::new(invoices),
        }
    }
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr =
        format!("{}:{}", state.cfg.server.bind_addr, state.cfg.server.port).parse()?;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let limit_bytes = state.cfg.limits.max_upload_kb * 1024;
    let protected = Router::new()
        .route(
            "/users/me/picture",
            put(put_picture)
                .layer::<_, std::convert::Infallible>(RequestBodyLimitLayer::new(limit_bytes))
                .layer(DefaultBodyLimit::disable())
                .get(get_picture)
                .delete(delete_picture),
        )
        .route("/invoices", get(list_invoices))
        .route("/invoices/:id", get(get_invoice))
        .route("/invoices/:id/pay", post(pay_invoice))
        .route("/invoices/:id/receipt", get(get_receipt))
        .route_layer(middleware::from_fn_with_state(state.clone(), security::require_subject));

    let mut app = Router::new()
        .route("/healthz", get(health))
        .merge(protected)
        .layer(middleware::from_fn(audit));
    if let Some(cors) = cors_layer(&state.cfg.server.allowed_origins) {
        app = app.layer(cors);
    }
    app.with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::PUT, Method::POST, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    )
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn put_picture(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    if body.is_empty() {
        return Err(AppError::BadRequest("empty upload".into()));
    }
    let client_name = headers.get("x-file-name").and_then(|v| v.to_str().ok());
    let url = state.pictures.upload(subject.as_str(), client_name, &body).await?;
    Ok((StatusCode::CREATED, Json(json!({"url": url}))).into_response())
}

async fn get_picture(State(state): State<AppState>, Extension(subject): Extension<Subject>) -> AppResult<Response> {
    let picture = state.pictures.load(subject.as_str()).await?;
    Ok(([(header::CONTENT_TYPE, picture.content_type)], picture.bytes).into_response())
}

async fn delete_picture(State(state): State<AppState>, Extension(subject): Extension<Subject>) -> AppResult<StatusCode> {
    state.pictures.delete(subject.as_str()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    operator: Option<String>,
}

async fn list_invoices(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Query(q): Query<ListQuery>,
) -> AppResult<Response> {
    let invoices = state
        .invoices
        .list(subject.as_str(), q.status.as_deref(), q.operator.as_deref())
        .await?;
    Ok(Json(invoices).into_response())
}

async fn get_invoice(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    Ok(Json(state.invoices.get(subject.as_str(), &id).await?).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayRequest {
    payment_brand: String,
    #[serde(flatten)]
    card: CardDetails,
}

async fn pay_invoice(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<String>,
    Json(req): Json<PayRequest>,
) -> AppResult<Response> {
    state.invoices.pay(subject.as_str(), &id, &req.payment_brand, &req.card).await?;
    Ok(Json(json!({"id": id, "status": crate::store::STATUS_PAID})).into_response())
}

#[derive(Debug, Deserialize)]
struct ReceiptQuery {
    #[serde(rename = "pdfName")]
    pdf_name: String,
}

async fn get_receipt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ReceiptQuery>,
) -> AppResult<Response> {
    let content = state.invoices.receipt(&id, &q.pdf_name).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], content).into_response())
}

fn decision_for(status: StatusCode) -> &'static str {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        "deny"
    } else if status.is_client_error() || status.is_server_error() {
        "error"
    } else {
        "allow"
    }
}

async fn audit(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let token_present = req.headers().contains_key(header::AUTHORIZATION);

    let mut resp = next.run(req).await;

    let status = resp.status();
    let subject = resp.extensions().get::<Subject>().map(|s| s.as_str().to_string());
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        subject = subject.as_deref(),
        token_present = token_present,
        decision = decision_for(status),
        status = status.as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        "audit"
    );
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert("x-request-id", v);
    }
    resp
}
