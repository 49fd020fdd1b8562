//! Monitoring and observability
//!
//! Periodic stats reports, Prometheus metrics, and the HTTP endpoint that
//! serves them.

pub mod metrics;
pub mod server;
pub mod stats;

pub use metrics::SessionMetrics;
pub use server::{MetricsServer, MetricsServerConfig};
pub use stats::{
    message_rate, ReportSink, ResourceProbe, ResourceUsage, RusageProbe, StatsReport,
    StatsReporter, TracingSink,
};
