use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::collections::HashSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing(log_level: &str) {
    let log_level = format!("{},ort=info", log_level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();
}

pub struct Metrics {
    request_counter: IntCounterVec,
    prediction_duration: HistogramVec,
    generation_duration: HistogramVec,
    prediction_counter: IntCounterVec,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_counter = IntCounterVec::new(
            Opts::new("requests_total", "Total number of requests"),
            &["route"],
        )?;

        let prediction_duration = HistogramVec::new(
            HistogramOpts::new(
                "prediction_duration_ms",
                "Duration of image classification in milliseconds",
            )
            .buckets(generate_boundaries((15, 30, 60, 500, 1000))),
            &["route"],
        )?;

        let generation_duration = HistogramVec::new(
            HistogramOpts::new(
                "generation_duration_ms",
                "Duration of report text generation in milliseconds",
            )
            .buckets(prometheus::exponential_buckets(100.0, 2.0, 10)?),
            &["model"],
        )?;

        let prediction_counter = IntCounterVec::new(
            Opts::new("predictions_total", "Predicted conditions"),
            &["condition"],
        )?;

        registry.register(Box::new(request_counter.clone()))?;
        registry.register(Box::new(prediction_duration.clone()))?;
        registry.register(Box::new(generation_duration.clone()))?;
        registry.register(Box::new(prediction_counter.clone()))?;

        Ok(Metrics {
            request_counter,
            prediction_duration,
            generation_duration,
            prediction_counter,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        self.request_counter.with_label_values(&[route]).inc();
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, route: &str) {
        self.prediction_duration
            .with_label_values(&[route])
            .observe(duration_ms as f64);
    }

    pub fn record_generation_duration(&self, duration_ms: u64, model: &str) {
        self.generation_duration
            .with_label_values(&[model])
            .observe(duration_ms as f64);
    }

    pub fn record_prediction(&self, condition: &str) {
        self.prediction_counter.with_label_values(&[condition]).inc();
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Histogram buckets: fine steps for fast calls, coarser towards the tail.
fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
