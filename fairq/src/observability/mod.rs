//! Observability module
//!
//! Prometheus metrics hooks. Exposing them (HTTP endpoint, push gateway) is
//! left to the embedding application via [`FairqMetrics::gather`].

pub mod metrics;

pub use metrics::FairqMetrics;
