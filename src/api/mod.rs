// ============================================================================
// SECTION 7: INGEST API
// ============================================================================
// HTTP surface of the collector. Each request walks one linear state
// machine: method → URL shape → kind → value parse / JSON domain checks →
// store dispatch. Transport framing (gzip, signature) is peeled off by
// middleware before a handler ever sees the body.
// ============================================================================

pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

use crate::codec::Signer;
use crate::storage::MetricStore;

/// `HashSHA256`, in the lowercase form header maps require
pub static HASH_HEADER_NAME: HeaderName = HeaderName::from_static("hashsha256");

// ----------------------------------------------------------------------------
// 7.1 Response Messages
// ----------------------------------------------------------------------------

pub const MSG_BAD_URL: &str = "Неверный формат URL";
pub const MSG_BAD_KIND: &str = "Неверный тип метрики";
pub const MSG_NOT_A_NUMBER: &str = "Значение метрики должно быть числом";
pub const MSG_UNKNOWN_ID: &str = "Неверное имя метрики";
pub const MSG_METHOD_NOT_ALLOWED: &str = "Метод не разрешен";
pub const MSG_BAD_JSON: &str = "Ошибка при разборе JSON";
pub const MSG_INVALID_DATA: &str = "Некорректные данные в JSON";
pub const MSG_BAD_GZIP: &str = "Ошибка распаковки gzip";
pub const MSG_BAD_SIGNATURE: &str = "Неверная подпись запроса";

/// Plain-text response terminated by a newline
pub(crate) fn plain(status: StatusCode, message: impl AsRef<str>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("{}\n", message.as_ref()),
    )
        .into_response()
}

// ----------------------------------------------------------------------------
// 7.2 Shared State & Router
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MetricStore>,
    pub signer: Option<Signer>,
}

impl AppState {
    pub fn new(store: Arc<MetricStore>, signer: Option<Signer>) -> Self {
        Self { store, signer }
    }
}

/// Build the collector router.
///
/// Request flow, outermost first: concurrency cap, access log, response
/// compression, request decompression, signature check, handler.
pub fn router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/", get(handlers::list_metrics))
        .route("/ping", get(handlers::ping))
        .route("/update/", post(handlers::update_json))
        .route("/update/:kind/:id/:value", post(handlers::update_path))
        .route("/updates/", post(handlers::update_batch))
        .route("/value/", post(handlers::value_json))
        .route("/value/:kind/:id", any(handlers::value_path))
        .fallback(handlers::fallback)
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::verify_signature))
        .layer(axum::middleware::from_fn(middleware::decompress_request))
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .layer(GlobalConcurrencyLimitLayer::new(max_connections.max(1)))
        .with_state(state)
}
