//! Transport middleware: gzip request bodies and the `HashSHA256` check.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use crate::codec::{decode_body, names_gzip};
use crate::constants::MAX_BODY_BYTES;
use crate::error::CodecError;

use super::{plain, AppState, HASH_HEADER_NAME, MSG_BAD_GZIP, MSG_BAD_SIGNATURE};

/// Inflate gzip request bodies. A body that claims gzip but does not
/// decompress is rejected here with 400; one that inflates past
/// `MAX_BODY_BYTES` with 413.
pub async fn decompress_request(request: Request, next: Next) -> Response {
    let Some(encoding) = request
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .filter(|value| names_gzip(value))
        .map(str::to_owned)
    else {
        return next.run(request).await;
    };

    let (mut parts, body) = request.into_parts();
    let packed = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(target: "vitals::api", error = %e, "Failed to read request body");
            return plain(StatusCode::PAYLOAD_TOO_LARGE, e.to_string());
        }
    };

    match decode_body(&packed, Some(encoding.as_str())) {
        Ok(unpacked) => {
            debug!(
                target: "vitals::api",
                compressed = packed.len(),
                uncompressed = unpacked.len(),
                "Request body inflated"
            );
            parts.headers.remove(CONTENT_ENCODING);
            parts.headers.remove(CONTENT_LENGTH);
            next.run(Request::from_parts(parts, Body::from(unpacked))).await
        }
        Err(e @ CodecError::TooLarge { .. }) => {
            warn!(target: "vitals::api", error = %e, uri = %parts.uri, "Rejecting oversized gzip body");
            plain(StatusCode::PAYLOAD_TOO_LARGE, e.to_string())
        }
        Err(e) => {
            warn!(target: "vitals::api", error = %e, uri = %parts.uri, "Rejecting undecodable gzip body");
            plain(StatusCode::BAD_REQUEST, MSG_BAD_GZIP)
        }
    }
}

/// Verify `HashSHA256` against the decompressed body when both a key is
/// configured and the header is present, and echo the collector's own
/// signature on the response.
pub async fn verify_signature(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(signer) = state.signer.as_ref() else {
        return next.run(request).await;
    };
    let Some(claimed) = request
        .headers()
        .get(&HASH_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_ascii_lowercase())
    else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return plain(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()),
    };

    match signer.verify(&bytes, &claimed) {
        Ok(true) => {}
        Ok(false) => {
            warn!(target: "vitals::api", uri = %parts.uri, "Request signature mismatch");
            return plain(StatusCode::BAD_REQUEST, MSG_BAD_SIGNATURE);
        }
        Err(e) => return plain(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }

    // a verified claim is byte-for-byte the collector's own lowercase hash
    let mut response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    if let Ok(value) = HeaderValue::from_str(&claimed) {
        response.headers_mut().insert(HASH_HEADER_NAME.clone(), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    use crate::codec::{gzip, Signer};
    use crate::storage::MetricStore;

    fn echo_app(signer: Option<Signer>) -> Router {
        let state = AppState::new(Arc::new(MetricStore::in_memory()), signer);
        Router::new()
            .route("/echo", post(|body: axum::body::Bytes| async move { body }))
            .layer(axum::middleware::from_fn_with_state(state.clone(), verify_signature))
            .layer(axum::middleware::from_fn(decompress_request))
            .with_state(state)
    }

    async fn body_of(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_gzip_body_is_inflated() {
        let request = http::Request::post("/echo")
            .header(CONTENT_ENCODING, "gzip")
            .body(Body::from(gzip(b"hello").unwrap()))
            .unwrap();
        let response = echo_app(None).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_signature_is_verified_and_echoed() {
        let signer = Signer::from_key("secret").unwrap();
        let signature = signer.sign(b"payload").unwrap();
        let request = http::Request::post("/echo")
            .header("HashSHA256", &signature)
            .body(Body::from("payload"))
            .unwrap();

        let response = echo_app(Some(signer)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("HashSHA256").unwrap(), signature.as_str());
    }

    #[tokio::test]
    async fn test_compression_bomb_is_rejected() {
        let bomb = gzip(&vec![b' '; MAX_BODY_BYTES * 8]).unwrap();
        let request = http::Request::post("/echo")
            .header(CONTENT_ENCODING, "gzip")
            .body(Body::from(bomb))
            .unwrap();
        let response = echo_app(None).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_multi_member_gzip_is_inflated_whole() {
        let mut body = gzip(b"hello, ").unwrap();
        body.extend(gzip(b"world").unwrap());
        let request = http::Request::post("/echo")
            .header(CONTENT_ENCODING, "gzip")
            .body(Body::from(body))
            .unwrap();
        let response = echo_app(None).oneshot(request).await.unwrap();
        assert_eq!(body_of(response).await, b"hello, world".to_vec());
    }

    #[tokio::test]
    async fn test_uppercase_signature_echoes_lowercase() {
        let signer = Signer::from_key("secret").unwrap();
        let signature = signer.sign(b"payload").unwrap();
        let request = http::Request::post("/echo")
            .header("HashSHA256", signature.to_uppercase())
            .body(Body::from("payload"))
            .unwrap();
        let response = echo_app(Some(signer)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("HashSHA256").unwrap(), signature.as_str());
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected() {
        let signer = Signer::from_key("secret").unwrap();
        let request = http::Request::post("/echo")
            .header("HashSHA256", "00")
            .body(Body::from("payload"))
            .unwrap();
        let response = echo_app(Some(signer)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unsigned_request_passes_without_header() {
        let signer = Signer::from_key("secret").unwrap();
        let request = http::Request::post("/echo").body(Body::from("payload")).unwrap();
        let response = echo_app(Some(signer)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("HashSHA256").is_none());
    }
}
