//! Metrics definitions for the configuration service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const API_HITS: MetricDef = MetricDef {
    name: "api_hits_total",
    metric_type: MetricType::Counter,
    description: "Total number of hits to API endpoints",
};

pub const IDEMPOTENT_REPLAYS: MetricDef = MetricDef {
    name: "idempotent_replays_total",
    metric_type: MetricType::Counter,
    description: "Write requests answered as replays of an already processed idempotency key",
};

pub const ALL_METRICS: &[MetricDef] = &[API_HITS, IDEMPOTENT_REPLAYS];
