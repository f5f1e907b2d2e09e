//! # Vitals - Host Telemetry Agent & Metrics Collector
//!
//! Vitals moves host telemetry from producer nodes into one authoritative,
//! queryable aggregate held by a central collector.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────── AGENT ─────────────────────────┐
//! │  ┌─────────────┐  poll   ┌───────────────┐  report     │
//! │  │  Sampler    │ ──────▶ │ Staging Store │ ─────────┐  │
//! │  │ (sysinfo)   │         │ (MetricStore) │          │  │
//! │  └─────────────┘         └───────────────┘          ▼  │
//! │                                    ┌─────────────────┐ │
//! │                                    │ Reporter        │ │
//! │                                    │ json→gzip→HMAC  │ │
//! │                                    └────────┬────────┘ │
//! └─────────────────────────────────────────────┼──────────┘
//!                                POST /updates/ │
//! ┌──────────────────────── SERVER ─────────────▼──────────┐
//! │  ┌────────────────────────────────────────────────┐    │
//! │  │ Ingest API: gunzip → verify → validate → route │    │
//! │  └───────────────────────┬────────────────────────┘    │
//! │                          ▼                             │
//! │  ┌────────────────────────────────────────────────┐    │
//! │  │ MetricStore (one RwLock over id → value)       │    │
//! │  └─────────┬──────────────────────────┬───────────┘    │
//! │            ▼                          ▼                │
//! │  ┌───────────────────┐      ┌──────────────────────┐   │
//! │  │ Snapshot file     │      │ Postgres mirror      │   │
//! │  │ (timer / write-   │      │ (bounded retry on    │   │
//! │  │  through, restore)│      │  transient errors)   │   │
//! │  └───────────────────┘      └──────────────────────┘   │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! The flat-file snapshot is the only restart-recovery source. The relational
//! mirror is a best-effort replica that may lag behind the in-memory values
//! after a permanent mirror failure.

pub mod agent;
pub mod api;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metric;
pub mod retry;
pub mod server;
pub mod storage;

pub use config::{AgentConfig, LoggingConfig, ServerConfig};
pub use error::{VitalsError, VitalsResult};
pub use metric::{Measurement, Metric, MetricKind, MetricPayload};
pub use storage::{MetricStore, StoreOptions};
