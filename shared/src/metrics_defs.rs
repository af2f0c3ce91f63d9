//! Common types for metrics definitions.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
}

impl MetricType {
    /// Type name used in the `# TYPE` line of the Prometheus text format.
    pub const fn prometheus_type(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

impl MetricDef {
    /// `# HELP` and `# TYPE` header lines for this metric.
    pub fn prometheus_header(&self) -> String {
        format!(
            "# HELP {name} {help}\n# TYPE {name} {ty}\n",
            name = self.name,
            help = self.description,
            ty = self.metric_type.prometheus_type(),
        )
    }
}

/// Records against a [`MetricDef`], optionally with `key => value` labels.
#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        $crate::__metrics::counter!($def.name)
    };
    ($def:expr, $($labels:tt)+) => {
        $crate::__metrics::counter!($def.name, $($labels)+)
    };
}
