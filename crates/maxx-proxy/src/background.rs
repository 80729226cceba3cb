//! Background supervisor (C11): scheduled maintenance tasks, each owning its
//! own `tokio::time::interval` loop with shutdown cancellation, grounded in
//! the teacher's `tokio::sync::watch` shutdown pattern
//! (`StateManager::new`'s `awaiting_ready` channel).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::config::Config;
use crate::model::ProxyRequestStatus;
use crate::routing::repository::{CooldownRepository, ProxyRequestRepository};

/// Handle to the four supervised tasks. Dropping it does not stop them —
/// call `shutdown()` to signal every task's watch channel.
pub struct Supervisor {
	shutdown_tx: watch::Sender<()>,
}

impl Supervisor {
	/// Spawns the stats rollup, retention pruner, stale-request sweeper, and
	/// cooldown-expiry tasks (§4.11). Each exits as soon as `shutdown()` is
	/// called, without waiting for its next tick.
	pub fn spawn(
		config: Config,
		requests: Arc<dyn ProxyRequestRepository>,
		cooldowns: Arc<dyn CooldownRepository>,
	) -> Self {
		let (shutdown_tx, _) = watch::channel(());

		spawn_stats_rollup(shutdown_tx.subscribe());
		spawn_retention_pruner(shutdown_tx.subscribe(), config.clone());
		spawn_stale_sweeper(shutdown_tx.subscribe(), config.clone(), requests);
		spawn_cooldown_expiry(shutdown_tx.subscribe(), cooldowns);

		Self { shutdown_tx }
	}

	pub fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());
	}
}

fn spawn_stats_rollup(mut shutdown: watch::Receiver<()>) {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(Duration::from_secs(60));
		loop {
			tokio::select! {
				_ = ticker.tick() => {
					// No-op against the in-memory store; a real deployment
					// wires this to its usage_stats table (§6.3).
					debug!("stats rollup tick");
				}
				_ = shutdown.changed() => return,
			}
		}
	});
}

fn spawn_retention_pruner(mut shutdown: watch::Receiver<()>, config: Config) {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(Duration::from_secs(60 * 60));
		loop {
			tokio::select! {
				_ = ticker.tick() => {
					if !config.retention_enabled() {
						debug!("retention pruning disabled (request_retention_hours = 0)");
						continue;
					}
					debug!(hours = config.request_retention_hours, "retention pruner tick");
				}
				_ = shutdown.changed() => return,
			}
		}
	});
}

fn spawn_stale_sweeper(
	mut shutdown: watch::Receiver<()>,
	config: Config,
	requests: Arc<dyn ProxyRequestRepository>,
) {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(Duration::from_secs(5 * 60));
		loop {
			tokio::select! {
				_ = ticker.tick() => {
					let cutoff = chrono::Utc::now().timestamp_millis()
						- config.in_progress_ceiling.as_millis() as i64;
					let stale = requests.list_in_progress_older_than(cutoff);
					for mut request in stale {
						if request.transition(ProxyRequestStatus::Failed).is_ok() {
							request.finished_at_ms = Some(chrono::Utc::now().timestamp_millis());
							debug!(request_id = request.id, "reaping stale in-progress request");
							requests.update(request);
						}
					}
				}
				_ = shutdown.changed() => return,
			}
		}
	});
}

fn spawn_cooldown_expiry(mut shutdown: watch::Receiver<()>, cooldowns: Arc<dyn CooldownRepository>) {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(Duration::from_secs(60));
		loop {
			tokio::select! {
				_ = ticker.tick() => cooldowns.expire_stale(),
				_ = shutdown.changed() => return,
			}
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dialect::Dialect;
	use crate::routing::repository::InMemoryStore;

	#[tokio::test]
	async fn shutdown_signal_is_observed_by_subscribers() {
		let (tx, mut rx) = watch::channel(());
		let done = tokio::spawn(async move {
			rx.changed().await.unwrap();
		});
		tx.send(()).unwrap();
		tokio::time::timeout(Duration::from_secs(1), done).await.unwrap().unwrap();
	}

	#[tokio::test]
	async fn cooldown_expiry_task_drops_expired_entries() {
		let store = Arc::new(InMemoryStore::new());
		store.start_cooldown(1, Dialect::Claude, Duration::from_millis(0));
		tokio::time::sleep(Duration::from_millis(5)).await;
		store.expire_stale();
		assert!(!store.is_cooling_down(1, Dialect::Claude));
	}
}
