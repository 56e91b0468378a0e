use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    inference_duration: Histogram<u64>,
    inference_failures: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("mri_web");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        // CPU inference on a full VGG16 or YOLO graph sits in the hundreds of milliseconds.
        let boundaries = generate_boundaries((10, 100, 200, 1000, 5000));

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of model inference in milliseconds")
            .build();

        let inference_failures = meter
            .u64_counter("inference_failures_total")
            .with_description("Requests that ended in a prediction error")
            .build();

        Ok(Metrics {
            request_counter,
            inference_duration,
            inference_failures,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_inference_duration(&self, duration_ms: u64, route: &str, model: &str) {
        let attributes = vec![
            KeyValue::new("route", route.to_string()),
            KeyValue::new("model", model.to_string()),
        ];
        self.inference_duration.record(duration_ms, &attributes);
    }

    pub fn record_failure(&self, route: &str, kind: &str) {
        let attributes = vec![
            KeyValue::new("route", route.to_string()),
            KeyValue::new("kind", kind.to_string()),
        ];
        self.inference_failures.add(1, &attributes);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 20;
    let end_step: usize = 100;
    let tail_step: usize = 1000;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let parts = (10, 30, 70, 270, 1270);
        let get = generate_boundaries(parts);
        let expected = vec![10.0, 20.0, 30.0, 50.0, 70.0, 170.0, 270.0, 1270.0];

        assert_eq!(get, expected);
    }

    #[test]
    fn test_recorded_metrics_are_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("/detect");
        metrics.record_inference_duration(120, "/detect", "yolo");

        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();

        assert!(names.iter().any(|n| n.starts_with("requests_total")));
        assert!(names.iter().any(|n| n.starts_with("inference_duration_ms")));
    }
}
