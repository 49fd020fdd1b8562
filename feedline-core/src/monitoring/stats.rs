//! Periodic health and throughput reports
//!
//! The reporter reads a session through its observer and never changes it.
//! Each tick produces a `StatsReport` for a `ReportSink`; the default sink
//! writes it to the log.

use super::SessionMetrics;
use crate::session::{SessionObserver, SessionSnapshot, SessionState};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Host resource usage at report time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceUsage {
    /// Peak resident set size of this process
    pub max_rss_bytes: u64,
}

pub trait ResourceProbe: Send {
    fn sample(&self) -> ResourceUsage;
}

/// `getrusage(RUSAGE_SELF)` probe
#[derive(Debug, Default, Clone, Copy)]
pub struct RusageProbe;

impl ResourceProbe for RusageProbe {
    fn sample(&self) -> ResourceUsage {
        ResourceUsage {
            max_rss_bytes: max_rss_bytes(),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn max_rss_bytes() -> u64 {
    use std::mem::MaybeUninit;

    let mut usage: MaybeUninit<libc::rusage> = MaybeUninit::uninit();
    // SAFETY: getrusage fills the struct when it returns 0
    let usage = unsafe {
        if libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) != 0 {
            return 0;
        }
        usage.assume_init()
    };

    let max_rss = u64::try_from(usage.ru_maxrss).unwrap_or(0);
    // kilobytes on Linux, bytes on macOS
    if cfg!(target_os = "linux") {
        max_rss.saturating_mul(1024)
    } else {
        max_rss
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn max_rss_bytes() -> u64 {
    0
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub state: SessionState,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Zero unless streaming
    pub uptime_secs: f64,
    /// Messages per second since the previous report
    pub message_rate: f64,
    pub messages_received: u64,
    pub total_attempts: u64,
    pub subscriptions_opened: u64,
    pub resources: ResourceUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl StatsReport {
    fn from_snapshot(snapshot: &SessionSnapshot, message_rate: f64, resources: ResourceUsage) -> Self {
        Self {
            state: snapshot.state,
            attempt_count: snapshot.attempt_count,
            max_attempts: snapshot.max_attempts,
            uptime_secs: snapshot.uptime.as_secs_f64(),
            message_rate,
            messages_received: snapshot.messages_received,
            total_attempts: snapshot.total_attempts,
            subscriptions_opened: snapshot.subscriptions_opened,
            resources,
            failure: snapshot.failure.as_ref().map(|failure| failure.to_string()),
        }
    }
}

pub trait ReportSink: Send {
    fn emit(&mut self, report: &StatsReport);
}

/// Writes reports through `tracing`, as fields or as one JSON line
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink {
    pub json: bool,
}

impl ReportSink for TracingSink {
    fn emit(&mut self, report: &StatsReport) {
        if self.json {
            match serde_json::to_string(report) {
                Ok(line) => info!(target: "feedline::stats", "{}", line),
                Err(e) => warn!("Failed to encode stats report: {}", e),
            }
            return;
        }

        info!(
            target: "feedline::stats",
            state = %report.state,
            attempt = report.attempt_count,
            max_attempts = report.max_attempts,
            uptime = %format_duration(Duration::from_secs_f64(report.uptime_secs)),
            rate = format_args!("{:.1}/s", report.message_rate),
            messages = report.messages_received,
            total_attempts = report.total_attempts,
            subscriptions = report.subscriptions_opened,
            max_rss_mb = format_args!("{:.1}", report.resources.max_rss_bytes as f64 / 1_048_576.0),
            failure = report.failure.as_deref(),
            "session stats"
        );
    }
}

/// Messages per second between two counter readings
pub fn message_rate(previous: u64, current: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    current.saturating_sub(previous) as f64 / secs
}

pub struct StatsReporter {
    observer: SessionObserver,
    interval: Duration,
    sink: Box<dyn ReportSink>,
    probe: Box<dyn ResourceProbe>,
    metrics: Option<Arc<SessionMetrics>>,
    last_count: u64,
    last_at: Instant,
}

impl StatsReporter {
    pub fn new(observer: SessionObserver, interval: Duration) -> Self {
        let last_count = observer.snapshot().messages_received;
        Self {
            observer,
            interval: interval.max(Duration::from_millis(1)),
            sink: Box::new(TracingSink::default()),
            probe: Box::new(RusageProbe),
            metrics: None,
            last_count,
            last_at: Instant::now(),
        }
    }

    pub fn with_sink(mut self, sink: impl ReportSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_probe(mut self, probe: impl ResourceProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Also push each snapshot into the exporter
    pub fn with_metrics(mut self, metrics: Arc<SessionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Take a snapshot and emit a report immediately
    pub fn report_now(&mut self) -> StatsReport {
        let snapshot = self.observer.snapshot();
        let now = Instant::now();
        let rate = message_rate(
            self.last_count,
            snapshot.messages_received,
            now.duration_since(self.last_at),
        );
        self.last_count = snapshot.messages_received;
        self.last_at = now;

        let report = StatsReport::from_snapshot(&snapshot, rate, self.probe.sample());
        if let Some(metrics) = &self.metrics {
            metrics.record_snapshot(&snapshot);
        }
        self.sink.emit(&report);
        report
    }

    /// Report every interval until the session terminates or `shutdown`
    /// flips to true, then emit one final report.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = self.observer.watch_state();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = state.wait_for(|state| state.is_terminal()) => break,
                _ = ticker.tick() => {
                    self.report_now();
                }
            }
        }

        debug!("stats reporter finishing");
        self.report_now();
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// Format duration in human-readable form
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
