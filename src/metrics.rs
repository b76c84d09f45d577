use std::time::{Duration, Instant};

use anyhow::Result;
use opentelemetry::{
    metrics::{Counter, Histogram},
    KeyValue,
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{metrics::{PeriodicReader, SdkMeterProvider}, Resource};

pub fn low_latency_boundaries() -> Vec<f64> {
    vec![
        0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0,
        250.0, 500.0,
    ]
}

/// Installs the OTLP meter provider. A disabled config leaves the global
/// no-op provider in place, so instrument construction stays cheap.
pub fn init_provider(enabled: bool, endpoint: Option<&String>) -> Result<()> {
    if !enabled {
        return Ok(());
    }

    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.namespace", "nimbus"))
        .with_attribute(KeyValue::new("service.name", "nimbus-server"))
        .build();

    let mut exporter = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = endpoint {
        exporter = exporter.with_endpoint(endpoint.to_owned());
    }
    let exporter = exporter.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(30))
        .build();
    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();
    opentelemetry::global::set_meter_provider(provider);
    Ok(())
}

pub mod api {
    use opentelemetry::metrics::Counter;

    #[derive(Debug)]
    pub struct Metrics {
        pub requests: Counter<u64>,
        pub migrations_created: Counter<u64>,
        pub stream_connections: Counter<u64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("control-api");
            let requests = meter
                .u64_counter("nimbus.api_requests")
                .with_description("number of control API requests")
                .build();
            let migrations_created = meter
                .u64_counter("nimbus.migrations_created")
                .with_description("number of migration jobs accepted")
                .build();
            let stream_connections = meter
                .u64_counter("nimbus.stream_connections")
                .with_description("number of push channel connections opened")
                .build();
            Metrics {
                requests,
                migrations_created,
                stream_connections,
            }
        }
    }
}

pub mod engine {
    use opentelemetry::metrics::{Counter, Histogram};

    use super::low_latency_boundaries;

    #[derive(Debug)]
    pub struct Metrics {
        pub files_transferred: Counter<u64>,
        pub files_failed: Counter<u64>,
        pub bytes_transferred: Counter<u64>,
        pub transfer_duration: Histogram<f64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("migration-engine");
            let files_transferred = meter
                .u64_counter("nimbus.files_transferred")
                .with_description("file transfers verified")
                .build();
            let files_failed = meter
                .u64_counter("nimbus.files_failed")
                .with_description("file transfers that settled as failed")
                .build();
            let bytes_transferred = meter
                .u64_counter("nimbus.bytes_transferred")
                .with_description("bytes copied between providers")
                .build();
            let transfer_duration = meter
                .f64_histogram("nimbus.transfer_duration")
                .with_unit("s")
                .with_boundaries(low_latency_boundaries())
                .with_description("wall time of one file transfer attempt chain")
                .build();
            Metrics {
                files_transferred,
                files_failed,
                bytes_transferred,
                transfer_duration,
            }
        }
    }
}

pub trait TimerUpdate {
    fn add(&self, duration: Duration, labels: &[KeyValue]);
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.record(duration.as_secs_f64(), labels);
    }
}

pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
    labels: &'a [KeyValue],
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    pub fn start_with_labels(metric: &'a T, labels: &'a [KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            metric,
            labels,
        }
    }
}

impl<'a, T: TimerUpdate + Sync> Drop for Timer<'a, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed(), self.labels);
    }
}

pub trait AutoIncrement {
    fn increment(&self, labels: &[KeyValue]);
}

impl AutoIncrement for Counter<u64> {
    fn increment(&self, labels: &[KeyValue]) {
        self.add(1, labels);
    }
}

pub struct Increment<'a, T: AutoIncrement + Sync> {
    metric: &'a T,
    labels: &'a [KeyValue],
}

impl<'a, T: AutoIncrement + Sync> Increment<'a, T> {
    pub fn inc(metric: &'a T, labels: &'a [KeyValue]) -> Self {
        Self { metric, labels }
    }
}

impl<'a, T: AutoIncrement + Sync> Drop for Increment<'a, T> {
    fn drop(&mut self) {
        self.metric.increment(self.labels);
    }
}
