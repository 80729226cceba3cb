//! Repository interfaces (C10, §3.7): trait-level seams standing in for the
//! out-of-scope SQLite/MySQL persistence layer, plus a single in-process
//! reference implementation behind a `parking_lot::RwLock`, matching the
//! teacher's "cached repositories... behind a single reader-writer lock"
//! resource policy (§5).

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;

use crate::dialect::Dialect;
use crate::model::{
	Id, Provider, ProxyRequest, ProxyRequestStatus, ProxyUpstreamAttempt, RetryConfig, Route,
	RoutingStrategy, Session,
};

pub trait RouteRepository: Send + Sync {
	fn list_enabled(&self, project_id: Id, dialect: Dialect) -> Vec<Route>;
}

/// Resolves a `{project-slug}` URL prefix to a project id (§6.1). The slug
/// set itself is repository-backed data, same as every other entity here;
/// only the path-prefix-stripping mechanics live in the HTTP edge.
pub trait ProjectRepository: Send + Sync {
	fn resolve_slug(&self, slug: &str) -> Option<Id>;
}

pub trait ProviderRepository: Send + Sync {
	fn get(&self, provider_id: Id) -> Option<Provider>;
}

pub trait RoutingStrategyRepository: Send + Sync {
	fn for_project(&self, project_id: Id) -> RoutingStrategy;
}

pub trait RetryConfigRepository: Send + Sync {
	fn get(&self, retry_config_id: Id) -> RetryConfig;
}

pub trait SessionRepository: Send + Sync {
	fn get_or_create(&self, fingerprint: &str, dialect: Dialect) -> Session;
}

pub trait ProxyRequestRepository: Send + Sync {
	fn insert(&self, request: ProxyRequest) -> Id;
	fn update(&self, request: ProxyRequest);
	fn get(&self, id: Id) -> Option<ProxyRequest>;
	fn list_in_progress_older_than(&self, cutoff_ms: i64) -> Vec<ProxyRequest>;
}

pub trait ProxyAttemptRepository: Send + Sync {
	fn insert(&self, attempt: ProxyUpstreamAttempt) -> Id;
	fn update(&self, attempt: ProxyUpstreamAttempt);
	fn count_for_request(&self, proxy_request_id: Id) -> usize;
}

pub trait CooldownRepository: Send + Sync {
	fn is_cooling_down(&self, provider_id: Id, dialect: Dialect) -> bool;
	fn start_cooldown(&self, provider_id: Id, dialect: Dialect, duration: std::time::Duration);
	fn expire_stale(&self);
}

#[derive(Default)]
struct Tables {
	routes: Vec<Route>,
	providers: HashMap<Id, Provider>,
	strategies: HashMap<Id, RoutingStrategy>,
	retry_configs: HashMap<Id, RetryConfig>,
	sessions: HashMap<String, Session>,
	requests: HashMap<Id, ProxyRequest>,
	attempts: HashMap<Id, ProxyUpstreamAttempt>,
	cooldowns: HashMap<(Id, Dialect), Instant>,
	project_slugs: HashMap<String, Id>,
	next_request_id: Id,
	next_attempt_id: Id,
}

/// The reference repository implementation (§3.7, §4.10): every table lives
/// behind one reader-writer lock. A real deployment swaps this for a
/// SQLite/MySQL-backed implementation of the same traits; nothing above this
/// layer depends on the concrete store.
pub struct InMemoryStore {
	tables: RwLock<Tables>,
}

impl Default for InMemoryStore {
	fn default() -> Self {
		Self { tables: RwLock::new(Tables::default()) }
	}
}

impl InMemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_route(&self, route: Route) {
		self.tables.write().routes.push(route);
	}

	pub fn add_provider(&self, provider: Provider) {
		self.tables.write().providers.insert(provider.id, provider);
	}

	pub fn set_strategy(&self, project_id: Id, strategy: RoutingStrategy) {
		self.tables.write().strategies.insert(project_id, strategy);
	}

	pub fn set_retry_config(&self, retry_config_id: Id, config: RetryConfig) {
		self.tables.write().retry_configs.insert(retry_config_id, config);
	}

	pub fn add_project_slug(&self, slug: impl Into<String>, project_id: Id) {
		self.tables.write().project_slugs.insert(slug.into(), project_id);
	}
}

impl ProjectRepository for InMemoryStore {
	fn resolve_slug(&self, slug: &str) -> Option<Id> {
		self.tables.read().project_slugs.get(slug).copied()
	}
}

impl RouteRepository for InMemoryStore {
	fn list_enabled(&self, project_id: Id, dialect: Dialect) -> Vec<Route> {
		self
			.tables
			.read()
			.routes
			.iter()
			.filter(|r| r.is_live() && r.dialect == dialect && (r.project_id == project_id || r.project_id == 0))
			.cloned()
			.collect()
	}
}

impl ProviderRepository for InMemoryStore {
	fn get(&self, provider_id: Id) -> Option<Provider> {
		self.tables.read().providers.get(&provider_id).cloned()
	}
}

impl RoutingStrategyRepository for InMemoryStore {
	fn for_project(&self, project_id: Id) -> RoutingStrategy {
		self.tables.read().strategies.get(&project_id).cloned().unwrap_or_default()
	}
}

impl RetryConfigRepository for InMemoryStore {
	fn get(&self, retry_config_id: Id) -> RetryConfig {
		self.tables.read().retry_configs.get(&retry_config_id).copied().unwrap_or_default()
	}
}

impl SessionRepository for InMemoryStore {
	fn get_or_create(&self, fingerprint: &str, dialect: Dialect) -> Session {
		let mut tables = self.tables.write();
		tables
			.sessions
			.entry(fingerprint.to_string())
			.or_insert_with(|| Session {
				fingerprint: fingerprint.to_string(),
				first_seen_dialect: dialect,
				bound_project_id: None,
				rejected_at: None,
			})
			.clone()
	}
}

impl ProxyRequestRepository for InMemoryStore {
	fn insert(&self, mut request: ProxyRequest) -> Id {
		let mut tables = self.tables.write();
		tables.next_request_id += 1;
		request.id = tables.next_request_id;
		let id = request.id;
		tables.requests.insert(id, request);
		id
	}

	fn update(&self, request: ProxyRequest) {
		self.tables.write().requests.insert(request.id, request);
	}

	fn get(&self, id: Id) -> Option<ProxyRequest> {
		self.tables.read().requests.get(&id).cloned()
	}

	fn list_in_progress_older_than(&self, cutoff_ms: i64) -> Vec<ProxyRequest> {
		self
			.tables
			.read()
			.requests
			.values()
			.filter(|r| r.status == ProxyRequestStatus::InProgress && r.started_at_ms < cutoff_ms)
			.cloned()
			.collect()
	}
}

impl ProxyAttemptRepository for InMemoryStore {
	fn insert(&self, mut attempt: ProxyUpstreamAttempt) -> Id {
		let mut tables = self.tables.write();
		tables.next_attempt_id += 1;
		attempt.id = tables.next_attempt_id;
		let id = attempt.id;
		tables.attempts.insert(id, attempt);
		id
	}

	fn update(&self, attempt: ProxyUpstreamAttempt) {
		self.tables.write().attempts.insert(attempt.id, attempt);
	}

	fn count_for_request(&self, proxy_request_id: Id) -> usize {
		self.tables.read().attempts.values().filter(|a| a.proxy_request_id == proxy_request_id).count()
	}
}

impl CooldownRepository for InMemoryStore {
	fn is_cooling_down(&self, provider_id: Id, dialect: Dialect) -> bool {
		self
			.tables
			.read()
			.cooldowns
			.get(&(provider_id, dialect))
			.is_some_and(|until| Instant::now() < *until)
	}

	fn start_cooldown(&self, provider_id: Id, dialect: Dialect, duration: std::time::Duration) {
		self.tables.write().cooldowns.insert((provider_id, dialect), Instant::now() + duration);
	}

	fn expire_stale(&self) {
		let now = Instant::now();
		self.tables.write().cooldowns.retain(|_, until| *until > now);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::ProviderConfig;

	fn provider(id: Id, dialects: Vec<Dialect>) -> Provider {
		Provider {
			id,
			kind: crate::model::ProviderKind::Custom,
			supported_dialects: dialects,
			config: ProviderConfig {
				base_url: "https://example.invalid".into(),
				api_key: "k".into(),
				dialect_base_urls: Default::default(),
				model_rename: vec![],
			},
			deleted_at: None,
		}
	}

	#[test]
	fn list_enabled_filters_by_dialect_and_project_scope() {
		let store = InMemoryStore::new();
		store.add_provider(provider(1, vec![Dialect::Claude]));
		store.add_route(Route {
			id: 1,
			project_id: 0,
			dialect: Dialect::Claude,
			provider_id: 1,
			position: 0,
			enabled: true,
			is_native: true,
			retry_config_id: 1,
			model_mapping: vec![],
			deleted_at: None,
		});
		store.add_route(Route {
			id: 2,
			project_id: 0,
			dialect: Dialect::OpenAI,
			provider_id: 1,
			position: 0,
			enabled: true,
			is_native: true,
			retry_config_id: 1,
			model_mapping: vec![],
			deleted_at: None,
		});
		let routes = RouteRepository::list_enabled(&store, 0, Dialect::Claude);
		assert_eq!(routes.len(), 1);
		assert_eq!(routes[0].id, 1);
	}

	#[test]
	fn cooldown_expires_after_duration_elapses() {
		let store = InMemoryStore::new();
		store.start_cooldown(1, Dialect::Claude, std::time::Duration::from_millis(0));
		std::thread::sleep(std::time::Duration::from_millis(5));
		assert!(!store.is_cooling_down(1, Dialect::Claude));
	}
}
