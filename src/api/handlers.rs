//! Route handlers for the collector.

use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tracing::{error, warn};

use crate::codec::decode_json;
use crate::error::{StoreError, StoreResult, ValidationError};
use crate::metric::{Metric, MetricKind, MetricPayload};
use crate::storage::MetricStore;

use super::{
    plain, AppState, MSG_BAD_JSON, MSG_BAD_KIND, MSG_BAD_URL, MSG_INVALID_DATA, MSG_METHOD_NOT_ALLOWED,
    MSG_NOT_A_NUMBER, MSG_UNKNOWN_ID,
};

/// Map a store failure to a response: not-found is 404, invalid input 400,
/// everything else is a server error.
fn store_failure(err: StoreError) -> Response {
    match &err {
        StoreError::NotFound { .. } => plain(StatusCode::NOT_FOUND, MSG_UNKNOWN_ID),
        e if e.is_client_error() => plain(StatusCode::BAD_REQUEST, MSG_INVALID_DATA),
        _ => {
            error!(target: "vitals::api", error = %err, "Store rejected update");
            plain(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

// ----------------------------------------------------------------------------
// Updates
// ----------------------------------------------------------------------------

/// `POST /update/{kind}/{id}/{value}`
pub async fn update_path(
    State(state): State<AppState>,
    Path((kind, id, value)): Path<(String, String, String)>,
) -> Response {
    let metric = match Metric::from_path(&kind, &id, &value) {
        Ok(metric) => metric,
        Err(ValidationError::UnknownKind { .. }) => return plain(StatusCode::BAD_REQUEST, MSG_BAD_KIND),
        Err(ValidationError::NotANumber { .. }) => return plain(StatusCode::BAD_REQUEST, MSG_NOT_A_NUMBER),
        Err(_) => return plain(StatusCode::BAD_REQUEST, MSG_BAD_URL),
    };

    match state.store.update(&metric).await {
        Ok(_) => plain(
            StatusCode::OK,
            format!("Метрика успешно принята: {kind}/{id}/{value}"),
        ),
        Err(e) => store_failure(e),
    }
}

/// `POST /update/` with one JSON metric; echoes the resolved metric
pub async fn update_json(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: MetricPayload = match decode_json(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(target: "vitals::api", error = %e, "Malformed update body");
            return plain(StatusCode::BAD_REQUEST, MSG_BAD_JSON);
        }
    };
    let metric = match Metric::try_from(payload) {
        Ok(metric) => metric,
        Err(e) => {
            warn!(target: "vitals::api", error = %e, "Invalid metric");
            return plain(StatusCode::BAD_REQUEST, MSG_INVALID_DATA);
        }
    };

    match state.store.update(&metric).await {
        Ok(resolved) => Json(metric.resolved_payload(resolved)).into_response(),
        Err(e) => store_failure(e),
    }
}

/// `POST /updates/` with a JSON array; echoes the submitted batch
pub async fn update_batch(State(state): State<AppState>, body: Bytes) -> Response {
    let payloads: Vec<MetricPayload> = match decode_json(&body) {
        Ok(payloads) => payloads,
        Err(e) => {
            warn!(target: "vitals::api", error = %e, "Malformed batch body");
            return plain(StatusCode::BAD_REQUEST, MSG_BAD_JSON);
        }
    };

    match apply_batch(&state.store, &payloads).await {
        Ok(()) => Json(payloads).into_response(),
        Err(e) => store_failure(e),
    }
}

/// Validate and apply every item. Invalid items are skipped and reported
/// alongside store failures; valid items are applied regardless.
pub async fn apply_batch(store: &MetricStore, payloads: &[MetricPayload]) -> StoreResult<()> {
    let mut failures = Vec::new();
    let mut valid = Vec::with_capacity(payloads.len());

    for payload in payloads {
        match Metric::try_from(payload.clone()) {
            Ok(metric) => valid.push(metric),
            Err(e) => failures.push(StoreError::Invalid(e)),
        }
    }

    match store.update_batch(&valid).await {
        Ok(()) => {}
        Err(StoreError::Batch { failures: applied }) => failures.extend(applied),
        Err(other) => failures.push(other),
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Batch { failures })
    }
}

// ----------------------------------------------------------------------------
// Queries
// ----------------------------------------------------------------------------

/// `GET /value/{kind}/{id}`; other methods get 405
pub async fn value_path(
    method: Method,
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Response {
    if method != Method::GET {
        return plain(StatusCode::METHOD_NOT_ALLOWED, MSG_METHOD_NOT_ALLOWED);
    }
    if kind.parse::<MetricKind>().is_err() {
        return plain(StatusCode::NOT_FOUND, MSG_BAD_KIND);
    }

    match state.store.get(&id).await {
        Ok(value) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            format!("{}\n", json_number(value)),
        )
            .into_response(),
        Err(e) => store_failure(e),
    }
}

/// `POST /value/` with `{"id", "type"}`; answers with the stored value
pub async fn value_json(State(state): State<AppState>, body: Bytes) -> Response {
    let query: MetricPayload = match decode_json(&body) {
        Ok(query) => query,
        Err(_) => return plain(StatusCode::BAD_REQUEST, MSG_BAD_JSON),
    };
    let Ok(kind) = query.parsed_kind() else {
        return plain(StatusCode::BAD_REQUEST, MSG_BAD_KIND);
    };

    match state.store.get(&query.id).await {
        Ok(value) => {
            let answer = match kind {
                MetricKind::Gauge => MetricPayload::gauge(query.id, value),
                MetricKind::Counter => MetricPayload::counter(query.id, value as i64),
            };
            Json(answer).into_response()
        }
        Err(e) => store_failure(e),
    }
}

/// `GET /`: every id and value as an HTML list
pub async fn list_metrics(State(state): State<AppState>) -> Html<String> {
    let mut page = String::from("<html><head><meta charset=\"utf-8\"><title>Metrics</title></head><body>");
    page.push_str("<h1>Все метрики</h1><ul>");
    for (id, value) in state.store.entries().await {
        page.push_str(&format!("<li>{}: {}</li>", escape_html(&id), value));
    }
    page.push_str("</ul></body></html>");
    Html(page)
}

/// `GET /ping`: mirror health
pub async fn ping(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => plain(StatusCode::OK, "OK"),
        Err(e) => {
            warn!(target: "vitals::api", error = %e, "Mirror health check failed");
            plain(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

/// Paths under the update/value prefixes with the wrong segment count
pub async fn fallback(uri: Uri) -> Response {
    let path = uri.path();
    if path.starts_with("/update/") || path.starts_with("/value/") {
        plain(StatusCode::BAD_REQUEST, MSG_BAD_URL)
    } else {
        plain(StatusCode::NOT_FOUND, "404 page not found")
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Render a stored value the way a JSON encoder would: shortest round-trip
/// digits, switching to exponent form below 1e-6 and from 1e21 up.
fn json_number(value: f64) -> String {
    let magnitude = value.abs();
    if !value.is_finite() || magnitude == 0.0 || (1e-6..1e21).contains(&magnitude) {
        return value.to_string();
    }
    let formatted = format!("{value:e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => format!("{mantissa}e+{exponent}"),
        _ => formatted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_batch_applies_valid_items_around_invalid_one() {
        let store = MetricStore::in_memory();
        let batch = vec![
            MetricPayload::gauge("Alloc", 1.0),
            MetricPayload {
                id: "broken".into(),
                kind: "gauge".into(),
                ..Default::default()
            },
            MetricPayload::counter("PollCount", 2),
        ];

        let err = apply_batch(&store, &batch).await.unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(store.get("Alloc").await.unwrap(), 1.0);
        assert_eq!(store.get("PollCount").await.unwrap(), 2.0);
        assert!(store.get("broken").await.is_err());
    }

    #[tokio::test]
    async fn test_apply_batch_ok() {
        let store = MetricStore::in_memory();
        let batch = vec![MetricPayload::counter("a", 1), MetricPayload::counter("a", 2)];
        apply_batch(&store, &batch).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), 3.0);
    }

    #[test]
    fn test_json_number() {
        assert_eq!(json_number(2.0), "2");
        assert_eq!(json_number(1.5), "1.5");
        assert_eq!(json_number(-0.000001), "-0.000001");
        assert_eq!(json_number(123456789.0), "123456789");
        assert_eq!(json_number(1e21), "1e+21");
        assert_eq!(json_number(-2.5e300), "-2.5e+300");
        assert_eq!(json_number(1.5e-7), "1.5e-7");
        assert_eq!(json_number(f64::MIN_POSITIVE), "2.2250738585072014e-308");
        assert_eq!(json_number(0.0), "0");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>&\"x'"), "&lt;b&gt;&amp;&quot;x&#39;");
    }
}
