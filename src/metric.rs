// ============================================================================
// SECTION 3: METRIC DATA MODEL
// ============================================================================
// `Metric` is the validated domain type: an id plus a tagged measurement.
// `MetricPayload` is the JSON wire shape with nullable `delta` / `value`.
// Conversion from payload to metric is where field-level validation lives.
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::POLL_COUNT_ID;
use crate::error::ValidationError;

// ----------------------------------------------------------------------------
// 3.1 Metric Kind
// ----------------------------------------------------------------------------

/// The two supported metric kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Last write wins
    Gauge,
    /// Running sum of deltas
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(ValidationError::unknown_kind(other)),
        }
    }
}

// ----------------------------------------------------------------------------
// 3.2 Measurement & Metric
// ----------------------------------------------------------------------------

/// Kind and payload carried together
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Gauge(f64),
    Counter(i64),
}

impl Measurement {
    #[inline]
    pub fn kind(&self) -> MetricKind {
        match self {
            Measurement::Gauge(_) => MetricKind::Gauge,
            Measurement::Counter(_) => MetricKind::Counter,
        }
    }
}

/// A validated metric update
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub id: String,
    pub measurement: Measurement,
}

impl Metric {
    #[inline]
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            measurement: Measurement::Gauge(value),
        }
    }

    #[inline]
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            measurement: Measurement::Counter(delta),
        }
    }

    #[inline]
    pub fn kind(&self) -> MetricKind {
        self.measurement.kind()
    }

    /// Build a metric from the three segments of `/update/{kind}/{id}/{value}`.
    ///
    /// The kind is checked before the value. Counter values are parsed as a
    /// number and truncated toward zero, so `/update/counter/x/2.9` adds 2.
    pub fn from_path(kind: &str, id: &str, raw_value: &str) -> Result<Self, ValidationError> {
        let kind: MetricKind = kind.parse()?;
        let number = parse_finite(raw_value)?;
        if id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        Ok(match kind {
            MetricKind::Gauge => Metric::gauge(id, number),
            MetricKind::Counter => Metric::counter(id, number as i64),
        })
    }

    /// Wire form of this metric as submitted
    pub fn to_payload(&self) -> MetricPayload {
        match self.measurement {
            Measurement::Gauge(value) => MetricPayload::gauge(&self.id, value),
            Measurement::Counter(delta) => MetricPayload::counter(&self.id, delta),
        }
    }

    /// Wire form carrying the store's resolved scalar instead of the input.
    /// Counters report their running total as `delta`.
    pub fn resolved_payload(&self, resolved: f64) -> MetricPayload {
        match self.kind() {
            MetricKind::Gauge => MetricPayload::gauge(&self.id, resolved),
            MetricKind::Counter => MetricPayload::counter(&self.id, resolved as i64),
        }
    }
}

fn parse_finite(raw: &str) -> Result<f64, ValidationError> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::NotANumber { raw: raw.to_string() })
}

// ----------------------------------------------------------------------------
// 3.3 Wire Payload
// ----------------------------------------------------------------------------

/// JSON shape exchanged between agent and collector.
///
/// Every field is optional at the serde level so that structurally wrong
/// bodies reach validation instead of failing to parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricPayload {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge.as_str().to_string(),
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter.as_str().to_string(),
            delta: Some(delta),
            value: None,
        }
    }

    #[inline]
    pub fn parsed_kind(&self) -> Result<MetricKind, ValidationError> {
        self.kind.parse()
    }
}

impl TryFrom<MetricPayload> for Metric {
    type Error = ValidationError;

    fn try_from(payload: MetricPayload) -> Result<Self, Self::Error> {
        if payload.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        let kind: MetricKind = payload.kind.parse()?;
        let measurement = match kind {
            MetricKind::Gauge => match payload.value {
                Some(v) if v.is_finite() => Measurement::Gauge(v),
                Some(v) => {
                    return Err(ValidationError::NotANumber { raw: v.to_string() });
                }
                None => {
                    return Err(ValidationError::MissingValue { metric_id: payload.id });
                }
            },
            MetricKind::Counter => match payload.delta {
                Some(d) => Measurement::Counter(d),
                None if payload.id == POLL_COUNT_ID => Measurement::Counter(1),
                None => {
                    return Err(ValidationError::MissingDelta { metric_id: payload.id });
                }
            },
        };
        Ok(Metric {
            id: payload.id,
            measurement,
        })
    }
}

impl From<&Metric> for MetricPayload {
    fn from(metric: &Metric) -> Self {
        metric.to_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(r#"{"id":"Alloc","type":"gauge","value":1.5}"#, Metric::gauge("Alloc", 1.5))]
    #[case(r#"{"id":"hits","type":"counter","delta":-3}"#, Metric::counter("hits", -3))]
    #[case(r#"{"id":"PollCount","type":"counter"}"#, Metric::counter("PollCount", 1))]
    fn test_valid_payloads(#[case] body: &str, #[case] expected: Metric) {
        let payload: MetricPayload = serde_json::from_str(body).unwrap();
        assert_eq!(Metric::try_from(payload).unwrap(), expected);
    }

    #[rstest]
    #[case(r#"{"type":"invalid"}"#, ValidationError::EmptyId)]
    #[case(r#"{"id":"x","type":"histogram"}"#, ValidationError::unknown_kind("histogram"))]
    #[case(r#"{"id":"x","type":"gauge"}"#, ValidationError::MissingValue { metric_id: "x".into() })]
    #[case(r#"{"id":"x","type":"counter"}"#, ValidationError::MissingDelta { metric_id: "x".into() })]
    fn test_invalid_payloads(#[case] body: &str, #[case] expected: ValidationError) {
        let payload: MetricPayload = serde_json::from_str(body).unwrap();
        assert_eq!(Metric::try_from(payload).unwrap_err(), expected);
    }

    #[test]
    fn test_payload_wire_shape_omits_absent_fields() {
        let json = serde_json::to_string(&MetricPayload::counter("PollCount", 4)).unwrap();
        assert_eq!(json, r#"{"id":"PollCount","type":"counter","delta":4}"#);
        let json = serde_json::to_string(&MetricPayload::gauge("Alloc", 2.5)).unwrap();
        assert_eq!(json, r#"{"id":"Alloc","type":"gauge","value":2.5}"#);
    }

    #[rstest]
    #[case("gauge", "Alloc", "123.45", Ok(Metric::gauge("Alloc", 123.45)))]
    #[case("counter", "hits", "7", Ok(Metric::counter("hits", 7)))]
    #[case("counter", "hits", "2.9", Ok(Metric::counter("hits", 2)))]
    #[case("gauge", "Alloc", "abc", Err(ValidationError::NotANumber { raw: "abc".into() }))]
    #[case("gauge", "Alloc", "NaN", Err(ValidationError::NotANumber { raw: "NaN".into() }))]
    #[case("summary", "Alloc", "abc", Err(ValidationError::unknown_kind("summary")))]
    fn test_from_path(
        #[case] kind: &str,
        #[case] id: &str,
        #[case] raw: &str,
        #[case] expected: Result<Metric, ValidationError>,
    ) {
        assert_eq!(Metric::from_path(kind, id, raw), expected);
    }

    #[test]
    fn test_resolved_payload_reports_totals() {
        let metric = Metric::counter("PollCount", 1);
        assert_eq!(metric.resolved_payload(42.0), MetricPayload::counter("PollCount", 42));
        let metric = Metric::gauge("Alloc", 1.0);
        assert_eq!(metric.resolved_payload(3.5), MetricPayload::gauge("Alloc", 3.5));
    }
}
