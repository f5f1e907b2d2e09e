//! Outbound side of the wire: frames a batch and POSTs it to `/updates/`.

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, warn};

use crate::codec::{Encoder, Signer, GZIP_ENCODING};
use crate::constants::{HASH_HEADER, REPORT_REQUEST_TIMEOUT};
use crate::error::{ReportError, ReportResult};
use crate::metric::{Metric, MetricPayload};

/// Running totals for one reporter
#[derive(Debug, Default)]
pub struct ReporterStats {
    pub batches_sent: AtomicU64,
    pub batches_failed: AtomicU64,
    pub metrics_sent: AtomicU64,
}

impl ReporterStats {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.batches_sent.load(Ordering::Relaxed),
            self.batches_failed.load(Ordering::Relaxed),
            self.metrics_sent.load(Ordering::Relaxed),
        )
    }
}

pub struct Reporter {
    client: Client,
    endpoint: String,
    encoder: Encoder,
    stats: ReporterStats,
}

impl Reporter {
    /// `base_url` is the collector root, e.g. `http://localhost:8080`
    pub fn new(base_url: &str, signer: Option<Signer>) -> ReportResult<Self> {
        let client = Client::builder()
            .timeout(REPORT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ReportError::Transport {
                url: base_url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/updates/", base_url.trim_end_matches('/')),
            encoder: Encoder::new(signer),
            stats: ReporterStats::default(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn stats(&self) -> &ReporterStats {
        &self.stats
    }

    /// Send one batch. Any failure is returned to the caller, which drops
    /// the batch; nothing is retried here.
    pub async fn send_batch(&self, batch: &[Metric]) -> ReportResult<()> {
        let result = self.try_send(batch).await;
        match &result {
            Ok(()) => {
                self.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
                self.stats.metrics_sent.fetch_add(batch.len() as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    async fn try_send(&self, batch: &[Metric]) -> ReportResult<()> {
        let payloads: Vec<MetricPayload> = batch.iter().map(Metric::to_payload).collect();
        let encoded = self.encoder.encode(&payloads)?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json");
        if encoded.compressed {
            request = request.header(CONTENT_ENCODING, GZIP_ENCODING);
        }
        if let Some(signature) = &encoded.signature {
            request = request.header(HASH_HEADER, signature.as_str());
        }

        let response = request
            .body(encoded.body)
            .send()
            .await
            .map_err(|e| ReportError::Transport {
                url: self.endpoint.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Status {
                url: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        if let Some(sent) = &encoded.signature {
            check_echoed_signature(sent, response.headers());
        }

        debug!(
            target: "vitals::agent",
            metrics = batch.len(),
            status = status.as_u16(),
            "Batch delivered"
        );
        Ok(())
    }
}

/// The collector echoes its own HMAC of the body it received. A different
/// value means the two sides disagree on the key or the body was altered.
fn check_echoed_signature(sent: &str, headers: &HeaderMap) {
    match headers.get(HASH_HEADER).and_then(|v| v.to_str().ok()) {
        Some(echoed) if echoed.eq_ignore_ascii_case(sent) => {}
        Some(echoed) => {
            warn!(target: "vitals::agent", sent, echoed, "Collector signature does not match");
        }
        None => {
            debug!(target: "vitals::agent", "Collector did not echo a signature");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_json, gunzip};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_batch_is_gzipped_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/updates/"))
            .and(header("Content-Encoding", "gzip"))
            .and(header("Content-Type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let reporter = Reporter::new(&server.uri(), None).unwrap();
        let batch = vec![Metric::gauge("Alloc", 1.5), Metric::counter("PollCount", 3)];
        reporter.send_batch(&batch).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let json = gunzip(&requests[0].body).unwrap();
        let sent: Vec<MetricPayload> = decode_json(&json).unwrap();
        assert_eq!(
            sent,
            vec![MetricPayload::gauge("Alloc", 1.5), MetricPayload::counter("PollCount", 3)]
        );
        assert_eq!(reporter.stats().snapshot(), (1, 0, 2));
    }

    #[tokio::test]
    async fn test_signature_header_covers_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("HashSHA256"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let signer = Signer::from_key("secret").unwrap();
        let reporter = Reporter::new(&server.uri(), Some(signer.clone())).unwrap();
        reporter.send_batch(&[Metric::gauge("Alloc", 1.0)]).await.unwrap();

        let request = &server.received_requests().await.unwrap()[0];
        let claimed = request.headers.get("HashSHA256").unwrap().to_str().unwrap().to_string();
        let json = gunzip(&request.body).unwrap();
        assert!(signer.verify(&json, &claimed).unwrap());
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let reporter = Reporter::new(&server.uri(), None).unwrap();
        let err = reporter.send_batch(&[Metric::gauge("Alloc", 1.0)]).await.unwrap_err();
        assert!(matches!(err, ReportError::Status { status: 500, .. }));
        assert_eq!(reporter.stats().snapshot(), (0, 1, 0));
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_transport_error() {
        let reporter = Reporter::new("http://127.0.0.1:1", None).unwrap();
        let err = reporter.send_batch(&[Metric::gauge("Alloc", 1.0)]).await.unwrap_err();
        assert!(matches!(err, ReportError::Transport { .. }));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let reporter = Reporter::new("http://localhost:8080/", None).unwrap();
        assert_eq!(reporter.endpoint(), "http://localhost:8080/updates/");
    }
}
