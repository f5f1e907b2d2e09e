// ============================================================================
// SECTION 6: TRANSPORT CODEC
// ============================================================================
// Wire framing shared by the agent and the collector:
//   payload → JSON → HMAC-SHA256 over the JSON → gzip
// The signature always covers the uncompressed JSON body, so the receiver
// verifies after decompression. It is sent as lowercase hex in `HashSHA256`.
// ============================================================================

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;

use crate::constants::MAX_BODY_BYTES;
use crate::error::{CodecError, CodecResult};

type HmacSha256 = Hmac<Sha256>;

/// Content-Encoding token for gzip bodies
pub const GZIP_ENCODING: &str = "gzip";

// ----------------------------------------------------------------------------
// 6.1 Serialization
// ----------------------------------------------------------------------------

pub fn encode_json<T: Serialize + ?Sized>(payload: &T) -> CodecResult<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| CodecError::Encode { message: e.to_string() })
}

pub fn decode_json<T: DeserializeOwned>(body: &[u8]) -> CodecResult<T> {
    serde_json::from_slice(body).map_err(|e| CodecError::Decode { message: e.to_string() })
}

// ----------------------------------------------------------------------------
// 6.2 Compression
// ----------------------------------------------------------------------------

pub fn gzip(body: &[u8]) -> CodecResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2 + 16), Compression::default());
    encoder.write_all(body).map_err(CodecError::Compress)?;
    encoder.finish().map_err(CodecError::Compress)
}

/// Inflate every gzip member of `body`, up to `MAX_BODY_BYTES` of output
pub fn gunzip(body: &[u8]) -> CodecResult<Vec<u8>> {
    gunzip_limited(body, MAX_BODY_BYTES)
}

/// Inflate at most `limit` bytes; a larger result is `CodecError::TooLarge`
pub fn gunzip_limited(body: &[u8], limit: usize) -> CodecResult<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(body).take(limit as u64 + 1);
    let mut out = Vec::with_capacity(body.len().saturating_mul(4).min(limit));
    decoder.read_to_end(&mut out).map_err(CodecError::Decompress)?;
    if out.len() > limit {
        return Err(CodecError::TooLarge { limit });
    }
    Ok(out)
}

/// True if a `Content-Encoding` / `Accept-Encoding` value names gzip
pub fn names_gzip(header_value: &str) -> bool {
    header_value
        .split(',')
        .map(|token| token.split(';').next().unwrap_or("").trim())
        .any(|token| token.eq_ignore_ascii_case(GZIP_ENCODING))
}

// ----------------------------------------------------------------------------
// 6.3 Integrity Signature
// ----------------------------------------------------------------------------

/// HMAC-SHA256 signer keyed by the shared secret
#[derive(Clone)]
pub struct Signer {
    key: Arc<[u8]>,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("key", &"<redacted>").finish()
    }
}

impl Signer {
    /// `None` when the key is empty, which disables signing
    pub fn from_key(key: &str) -> Option<Self> {
        if key.is_empty() {
            None
        } else {
            Some(Self {
                key: Arc::from(key.as_bytes()),
            })
        }
    }

    /// Lowercase hex HMAC of `body`
    pub fn sign(&self, body: &[u8]) -> CodecResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| CodecError::InvalidKey { message: e.to_string() })?;
        mac.update(body);
        Ok(format!("{:x}", mac.finalize().into_bytes()))
    }

    pub fn verify(&self, body: &[u8], signature: &str) -> CodecResult<bool> {
        Ok(self.sign(body)?.eq_ignore_ascii_case(signature.trim()))
    }
}

// ----------------------------------------------------------------------------
// 6.4 Producer-Side Encoder
// ----------------------------------------------------------------------------

/// A framed request body ready to send
#[derive(Debug, Clone)]
pub struct EncodedBody {
    pub body: Vec<u8>,
    pub compressed: bool,
    /// Signature over the uncompressed JSON, if signing is enabled
    pub signature: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Encoder {
    compress: bool,
    signer: Option<Signer>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Encoder {
    pub fn new(signer: Option<Signer>) -> Self {
        Self { compress: true, signer }
    }

    #[inline]
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn encode<T: Serialize + ?Sized>(&self, payload: &T) -> CodecResult<EncodedBody> {
        let json = encode_json(payload)?;
        let signature = self.signer.as_ref().map(|s| s.sign(&json)).transpose()?;
        let body = if self.compress { gzip(&json)? } else { json };
        Ok(EncodedBody {
            body,
            compressed: self.compress,
            signature,
        })
    }
}

// ----------------------------------------------------------------------------
// 6.5 Collector-Side Decoding
// ----------------------------------------------------------------------------

/// Undo the transport framing: decompress if the request said so
pub fn decode_body(body: &[u8], content_encoding: Option<&str>) -> CodecResult<Vec<u8>> {
    match content_encoding {
        Some(encoding) if names_gzip(encoding) => gunzip(body),
        _ => Ok(body.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricPayload;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_gzip_round_trip() {
        let body = br#"[{"id":"Alloc","type":"gauge","value":1.5}]"#;
        let packed = gzip(body).unwrap();
        assert_eq!(&packed[..2], &[0x1f, 0x8b]);
        assert_eq!(gunzip(&packed).unwrap(), body.to_vec());
    }

    #[test]
    fn test_gunzip_rejects_plain_bytes() {
        let err = gunzip(b"this is not gzip").unwrap_err();
        assert!(matches!(err, CodecError::Decompress(_)));
    }

    #[test]
    fn test_gunzip_reads_every_member() {
        let mut body = gzip(br#"[{"id":"A","type":"gauge","value":1}"#).unwrap();
        body.extend(gzip(br#",{"id":"B","type":"gauge","value":2}]"#).unwrap());

        let batch: Vec<MetricPayload> = decode_json(&gunzip(&body).unwrap()).unwrap();
        assert_eq!(
            batch,
            vec![MetricPayload::gauge("A", 1.0), MetricPayload::gauge("B", 2.0)]
        );
    }

    #[test]
    fn test_gunzip_caps_inflated_size() {
        let bomb = gzip(&vec![0u8; MAX_BODY_BYTES * 16]).unwrap();
        assert!(bomb.len() < MAX_BODY_BYTES / 16);

        let err = gunzip(&bomb).unwrap_err();
        assert!(matches!(err, CodecError::TooLarge { limit } if limit == MAX_BODY_BYTES));
        assert_eq!(gunzip_limited(&gzip(&[7u8; 10]).unwrap(), 10).unwrap(), vec![7u8; 10]);
        assert!(gunzip_limited(&gzip(&[7u8; 11]).unwrap(), 10).is_err());
    }

    #[test]
    fn test_decode_body_passes_plain_through() {
        assert_eq!(decode_body(b"{}", None).unwrap(), b"{}".to_vec());
        assert_eq!(decode_body(b"{}", Some("identity")).unwrap(), b"{}".to_vec());
    }

    #[test]
    fn test_names_gzip() {
        assert!(names_gzip("gzip"));
        assert!(names_gzip("deflate, GZIP;q=0.8"));
        assert!(!names_gzip("br"));
    }

    #[test]
    fn test_signer_is_keyed_hmac() {
        let signer = Signer::from_key("secret").unwrap();
        let a = signer.sign(b"payload").unwrap();
        assert_eq!(a.len(), 64);
        assert!(signer.verify(b"payload", &a.to_uppercase()).unwrap());
        assert!(!signer.verify(b"payload2", &a).unwrap());

        let other = Signer::from_key("other").unwrap();
        assert_ne!(other.sign(b"payload").unwrap(), a);
    }

    #[test]
    fn test_known_hmac_vector() {
        // RFC 4231 test case 2
        let signer = Signer::from_key("Jefe").unwrap();
        assert_eq!(
            signer.sign(b"what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_empty_key_disables_signing() {
        assert!(Signer::from_key("").is_none());
    }

    #[test]
    fn test_encoder_signs_uncompressed_json() {
        let signer = Signer::from_key("k").unwrap();
        let encoder = Encoder::new(Some(signer.clone()));
        let batch = vec![MetricPayload::gauge("Alloc", 1.0)];

        let encoded = encoder.encode(&batch).unwrap();
        assert!(encoded.compressed);

        let json = gunzip(&encoded.body).unwrap();
        assert_eq!(encoded.signature.unwrap(), signer.sign(&json).unwrap());
        let decoded: Vec<MetricPayload> = decode_json(&json).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_encoder_without_compression_or_key() {
        let encoded = Encoder::default()
            .with_compression(false)
            .encode(&MetricPayload::counter("PollCount", 1))
            .unwrap();
        assert!(encoded.signature.is_none());
        assert_eq!(encoded.body, br#"{"id":"PollCount","type":"counter","delta":1}"#.to_vec());
    }
}
