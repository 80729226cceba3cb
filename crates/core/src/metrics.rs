use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// Creates a metrics sub-registry for the proxy, namespaced so it can sit next
/// to other subsystems' metrics in a shared process registry.
pub fn sub_registry(registry: &mut Registry) -> &mut Registry {
	registry.sub_registry_with_prefix("maxx_proxy")
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
	pub dialect: String,
	pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AttemptLabels {
	pub provider: String,
	pub outcome: String,
}

/// Request/attempt counters and latency histograms shared across the dispatcher.
/// Grounded in the teacher's pattern of small `Family<Labels, Counter>` structs
/// registered once at startup.
pub struct ProxyMetrics {
	pub requests_total: Family<RequestLabels, Counter>,
	pub attempts_total: Family<AttemptLabels, Counter>,
	pub retries_total: Counter,
	pub request_duration_seconds: Histogram,
}

impl ProxyMetrics {
	pub fn new(registry: &mut Registry) -> Self {
		let requests_total = Family::default();
		let attempts_total = Family::default();
		let retries_total = Counter::default();
		let request_duration_seconds = Histogram::new(
			[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0].into_iter(),
		);

		registry.register(
			"requests",
			"Total proxy requests by dialect and final status",
			requests_total.clone(),
		);
		registry.register(
			"attempts",
			"Total upstream attempts by provider and outcome",
			attempts_total.clone(),
		);
		registry.register(
			"retries",
			"Total retried upstream attempts",
			retries_total.clone(),
		);
		registry.register(
			"request_duration_seconds",
			"End-to-end request latency",
			request_duration_seconds.clone(),
		);

		Self {
			requests_total,
			attempts_total,
			retries_total,
			request_duration_seconds,
		}
	}
}
