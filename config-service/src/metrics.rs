use crate::metrics_defs::{ALL_METRICS, API_HITS, IDEMPOTENT_REPLAYS};
use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;
use shared::metrics_defs::MetricDef;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

/// Per-endpoint counters, handed to the router instead of living in a global.
///
/// Every increment is also forwarded to the `metrics` facade so an installed
/// exporter sees it.
#[derive(Clone, Default)]
pub struct ApiMetrics {
    counters: Arc<Mutex<BTreeMap<(&'static str, String), u64>>>,
}

impl ApiMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self, endpoint: &str) {
        self.incr(&API_HITS, endpoint);
    }

    pub fn replay(&self, endpoint: &str) {
        self.incr(&IDEMPOTENT_REPLAYS, endpoint);
    }

    fn incr(&self, def: &MetricDef, endpoint: &str) {
        *self
            .counters
            .lock()
            .entry((def.name, endpoint.to_string()))
            .or_default() += 1;

        shared::counter!(def, "endpoint" => endpoint.to_string()).increment(1);
    }

    pub fn get(&self, def: &MetricDef, endpoint: &str) -> u64 {
        self.counters
            .lock()
            .get(&(def.name, endpoint.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Prometheus text exposition of all counters.
    pub fn render(&self) -> String {
        let counters = self.counters.lock();
        let mut out = String::new();

        for def in ALL_METRICS {
            out.push_str(&def.prometheus_header());
            for ((_, endpoint), value) in counters.iter().filter(|((name, _), _)| *name == def.name)
            {
                let _ = writeln!(
                    out,
                    "{}{{endpoint=\"{}\"}} {}",
                    def.name,
                    escape_label(endpoint),
                    value
                );
            }
        }

        out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Route layer counting one hit per request, labelled with the route template.
pub async fn count_hits(State(metrics): State<ApiMetrics>, req: Request, next: Next) -> Response {
    if let Some(path) = req.extensions().get::<MatchedPath>() {
        metrics.hit(path.as_str());
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let metrics = ApiMetrics::new();
        metrics.hit("/configurations");
        metrics.hit("/configurations");
        metrics.hit("/group");
        metrics.replay("/configurations");

        assert_eq!(metrics.get(&API_HITS, "/configurations"), 2);
        assert_eq!(metrics.get(&API_HITS, "/group"), 1);
        assert_eq!(metrics.get(&API_HITS, "/swagger.yaml"), 0);
        assert_eq!(metrics.get(&IDEMPOTENT_REPLAYS, "/configurations"), 1);

        // Clones share counters
        let clone = metrics.clone();
        clone.hit("/group");
        assert_eq!(metrics.get(&API_HITS, "/group"), 2);
    }

    #[test]
    fn test_render() {
        let metrics = ApiMetrics::new();
        metrics.hit("/group/{id}/{version}");
        metrics.hit("/configurations");

        let text = metrics.render();
        assert!(text.starts_with(
            "# HELP api_hits_total Total number of hits to API endpoints\n# TYPE api_hits_total counter\n"
        ));
        assert!(text.contains("api_hits_total{endpoint=\"/configurations\"} 1\n"));
        assert!(text.contains("api_hits_total{endpoint=\"/group/{id}/{version}\"} 1\n"));
        assert!(text.contains("# TYPE idempotent_replays_total counter\n"));
        assert!(!text.contains("idempotent_replays_total{"));
    }

    #[test]
    fn test_escape_label() {
        assert_eq!(escape_label(r#"a"b\c"#), r#"a\"b\\c"#);
    }
}
