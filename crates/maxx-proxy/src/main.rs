use std::process::ExitCode;
use std::sync::Arc;

use maxx_core::metrics::ProxyMetrics;
use maxx_proxy::background::Supervisor;
use maxx_proxy::config::Config;
use maxx_proxy::dispatch::Dispatcher;
use maxx_proxy::http::{self, AppState};
use maxx_proxy::routing::repository::InMemoryStore;
use maxx_proxy::telemetry;
use prometheus_client::registry::Registry;
use tracing::{error, info};

/// Exit codes per §6.5: 0 clean shutdown, 1 config/bootstrap failure, 2
/// listener failure.
fn main() -> ExitCode {
	telemetry::init_tracing();

	let config = match Config::from_env() {
		Ok(config) => config,
		Err(err) => {
			error!(error = %err, "configuration failure during bootstrap");
			return ExitCode::from(1);
		},
	};

	let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
		Ok(runtime) => runtime,
		Err(err) => {
			error!(error = %err, "failed to start async runtime");
			return ExitCode::from(1);
		},
	};

	runtime.block_on(run(config))
}

async fn run(config: Config) -> ExitCode {
	let store = Arc::new(InMemoryStore::new());

	let http_client = match reqwest::Client::builder().connect_timeout(config.connect_timeout).build() {
		Ok(client) => client,
		Err(err) => {
			error!(error = %err, "failed to construct upstream HTTP client");
			return ExitCode::from(1);
		},
	};

	let mut registry = Registry::default();
	let metrics = Arc::new(ProxyMetrics::new(maxx_core::metrics::sub_registry(&mut registry)));
	let registry = Arc::new(registry);

	let dispatcher = Arc::new(Dispatcher {
		http: http_client,
		idle_read_timeout: config.idle_read_timeout,
		routes: store.clone(),
		providers: store.clone(),
		strategies: store.clone(),
		cooldowns: store.clone(),
		retry_configs: store.clone(),
		requests: store.clone(),
		attempts: store.clone(),
		sessions: store.clone(),
		metrics,
	});

	let supervisor = Supervisor::spawn(config.clone(), store.clone(), store.clone());

	let state = AppState { dispatcher, projects: store.clone(), registry };
	let app = http::router(state);

	let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.proxy_port)).await {
		Ok(listener) => listener,
		Err(err) => {
			error!(error = %err, port = config.proxy_port, "failed to bind proxy listener");
			supervisor.shutdown();
			return ExitCode::from(2);
		},
	};

	info!(port = config.proxy_port, "proxy listening");

	let shutdown = async {
		let _ = tokio::signal::ctrl_c().await;
		info!("shutdown signal received");
	};

	if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
		error!(error = %err, "proxy listener terminated unexpectedly");
		supervisor.shutdown();
		return ExitCode::from(2);
	}

	supervisor.shutdown();
	ExitCode::from(0)
}
