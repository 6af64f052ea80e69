use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency samples kept per series; older samples are evicted first
const LATENCY_WINDOW: usize = 1024;

/// Pipeline metrics collector.
///
/// Model calls are counted per HTTP exchange sequence (one `analyze` including
/// its retries). Image counters move when an image reaches a terminal status.
/// Cheap to clone; all clones share counters.
#[derive(Clone)]
pub struct Metrics {
    shared: Arc<Counters>,
    started: Instant,
}

#[derive(Default)]
struct Counters {
    model_calls_ok: AtomicU64,
    model_calls_failed: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    model_latency: LatencyWindow,

    images_completed: AtomicU64,
    images_failed: AtomicU64,
    validation_warnings: AtomicU64,
    image_latency: LatencyWindow,

    batches: AtomicU64,
}

#[derive(Default)]
struct LatencyWindow {
    samples_ms: Mutex<VecDeque<u64>>,
}

impl LatencyWindow {
    fn observe(&self, elapsed: Duration) {
        let mut samples = self.samples_ms.lock();
        if samples.len() == LATENCY_WINDOW {
            samples.pop_front();
        }
        samples.push_back(elapsed.as_millis() as u64);
    }

    fn summarize(&self) -> LatencySummary {
        let mut sorted: Vec<u64> = self.samples_ms.lock().iter().copied().collect();
        if sorted.is_empty() {
            return LatencySummary::default();
        }
        sorted.sort_unstable();
        let rank = |q: f64| sorted[((sorted.len() - 1) as f64 * q) as usize];
        LatencySummary {
            mean_ms: sorted.iter().sum::<u64>() / sorted.len() as u64,
            p50_ms: rank(0.50),
            p95_ms: rank(0.95),
            p99_ms: rank(0.99),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Counters::default()),
            started: Instant::now(),
        }
    }

    /// One adapter `analyze` exchange; token counts are 0 when the backend omits usage
    pub fn record_api_call(&self, success: bool, elapsed: Duration, prompt_tokens: u64, completion_tokens: u64) {
        let c = &self.shared;
        let counter = if success { &c.model_calls_ok } else { &c.model_calls_failed };
        counter.fetch_add(1, Ordering::Relaxed);
        c.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        c.completion_tokens.fetch_add(completion_tokens, Ordering::Relaxed);
        c.model_latency.observe(elapsed);
    }

    pub fn record_image_completed(&self, elapsed: Duration, warnings: usize) {
        self.shared.images_completed.fetch_add(1, Ordering::Relaxed);
        self.shared.validation_warnings.fetch_add(warnings as u64, Ordering::Relaxed);
        self.shared.image_latency.observe(elapsed);
    }

    pub fn record_image_failed(&self, elapsed: Duration) {
        self.shared.images_failed.fetch_add(1, Ordering::Relaxed);
        self.shared.image_latency.observe(elapsed);
    }

    pub fn record_batch_processed(&self) {
        self.shared.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.shared;
        let ok = c.model_calls_ok.load(Ordering::Relaxed);
        let failed = c.model_calls_failed.load(Ordering::Relaxed);

        MetricsSnapshot {
            model: ModelCallStats {
                calls: ok + failed,
                succeeded: ok,
                failed,
                prompt_tokens: c.prompt_tokens.load(Ordering::Relaxed),
                completion_tokens: c.completion_tokens.load(Ordering::Relaxed),
                latency: c.model_latency.summarize(),
            },
            images: ImageStats {
                completed: c.images_completed.load(Ordering::Relaxed),
                failed: c.images_failed.load(Ordering::Relaxed),
                validation_warnings: c.validation_warnings.load(Ordering::Relaxed),
                latency: c.image_latency.summarize(),
            },
            batches_processed: c.batches.load(Ordering::Relaxed),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }

    /// Prometheus text exposition
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::with_capacity(1024);

        series(&mut out, "seo_model_calls_total", "counter", "Model analyze exchanges by outcome", &[
            ("outcome=\"success\"", s.model.succeeded),
            ("outcome=\"failure\"", s.model.failed),
        ]);
        series(&mut out, "seo_model_tokens_total", "counter", "Tokens reported by the model backend", &[
            ("kind=\"prompt\"", s.model.prompt_tokens),
            ("kind=\"completion\"", s.model.completion_tokens),
        ]);
        series(&mut out, "seo_model_latency_ms", "gauge", "Model exchange latency over the recent window", &[
            ("quantile=\"0.5\"", s.model.latency.p50_ms),
            ("quantile=\"0.95\"", s.model.latency.p95_ms),
            ("quantile=\"0.99\"", s.model.latency.p99_ms),
        ]);
        series(&mut out, "seo_images_total", "counter", "Images that reached a terminal status", &[
            ("status=\"completed\"", s.images.completed),
            ("status=\"error\"", s.images.failed),
        ]);
        series(&mut out, "seo_validation_warnings_total", "counter", "Preset validation warnings raised", &[
            ("", s.images.validation_warnings),
        ]);
        series(&mut out, "seo_image_latency_mean_ms", "gauge", "Mean per-image processing time", &[
            ("", s.images.latency.mean_ms),
        ]);
        series(&mut out, "seo_batches_total", "counter", "Batches processed", &[("", s.batches_processed)]);
        series(&mut out, "seo_uptime_seconds", "counter", "Process uptime", &[("", s.uptime_seconds)]);

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn series(out: &mut String, name: &str, kind: &str, help: &str, samples: &[(&str, u64)]) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
    for (labels, value) in samples {
        if labels.is_empty() {
            let _ = writeln!(out, "{} {}", name, value);
        } else {
            let _ = writeln!(out, "{}{{{}}} {}", name, labels, value);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencySummary {
    pub mean_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelCallStats {
    pub calls: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency: LatencySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageStats {
    pub completed: u64,
    pub failed: u64,
    pub validation_warnings: u64,
    pub latency: LatencySummary,
}

/// Point-in-time view served on `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub model: ModelCallStats,
    pub images: ImageStats,
    pub batches_processed: u64,
    pub uptime_seconds: u64,
}
