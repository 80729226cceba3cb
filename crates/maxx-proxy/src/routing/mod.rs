//! Route selector (C6): given `(project, inbound dialect, model, session)`,
//! produce an ordered list of candidates honoring priority/weighted-random
//! strategy, cooldowns, and the model-mapping chain (§4.6).

pub mod repository;

use rand::Rng;

use crate::dialect::Dialect;
use crate::model::{resolve_model, Id, Provider, Route, RoutingStrategyKind};
use repository::{CooldownRepository, ProviderRepository, RouteRepository, RoutingStrategyRepository};

#[derive(Debug, Clone)]
pub struct Candidate {
	pub route: Route,
	pub provider: Provider,
	pub is_native: bool,
	pub target_dialect: Dialect,
	pub resolved_model: String,
}

pub struct RouteSelector<'a> {
	pub routes: &'a dyn RouteRepository,
	pub providers: &'a dyn ProviderRepository,
	pub strategies: &'a dyn RoutingStrategyRepository,
	pub cooldowns: &'a dyn CooldownRepository,
}

impl<'a> RouteSelector<'a> {
	/// §4.6 steps 1-7.
	pub fn candidates(&self, project_id: Id, inbound_dialect: Dialect, model: &str) -> Vec<Candidate> {
		let mut routes = self.routes.list_enabled(project_id, inbound_dialect);
		let strategy = self.strategies.for_project(project_id);
		self.order_routes(&mut routes, &strategy);

		routes
			.into_iter()
			.filter_map(|route| {
				let provider = self.providers.get(route.provider_id)?;
				if provider.is_deleted() {
					return None;
				}
				if self.cooldowns.is_cooling_down(provider.id, inbound_dialect) {
					return None;
				}
				let is_native = provider.supported_dialects.contains(&inbound_dialect);
				let target_dialect = if is_native {
					inbound_dialect
				} else {
					*provider.supported_dialects.first()?
				};
				let resolved_model = resolve_model(
					model,
					&[&route.model_mapping, &provider.config.model_rename, &[]],
				);
				Some(Candidate { route, provider, is_native, target_dialect, resolved_model })
			})
			.collect()
	}

	fn order_routes(&self, routes: &mut [Route], strategy: &crate::model::RoutingStrategy) {
		match strategy.kind {
			RoutingStrategyKind::Priority => {
				routes.sort_by(|a, b| a.position.cmp(&b.position).then(a.id.cmp(&b.id)));
			},
			RoutingStrategyKind::WeightedRandom => {
				let mut rng = rand::thread_rng();
				let mut remaining: Vec<Route> = routes.to_vec();
				let mut ordered = Vec::with_capacity(remaining.len());
				while !remaining.is_empty() {
					let total: f64 =
						remaining.iter().map(|r| strategy.weights.get(&r.id).copied().unwrap_or(1.0)).sum();
					let mut pick = rng.gen_range(0.0..total.max(f64::MIN_POSITIVE));
					let mut chosen = 0;
					for (i, r) in remaining.iter().enumerate() {
						let w = strategy.weights.get(&r.id).copied().unwrap_or(1.0);
						if pick < w {
							chosen = i;
							break;
						}
						pick -= w;
					}
					ordered.push(remaining.remove(chosen));
				}
				routes.clone_from_slice(&ordered);
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{ModelMapping, ProviderConfig, ProviderKind};
	use crate::routing::repository::InMemoryStore;

	fn provider(id: Id, dialects: Vec<Dialect>) -> Provider {
		Provider {
			id,
			kind: ProviderKind::Custom,
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

	fn route(id: Id, position: i32, provider_id: Id, dialect: Dialect) -> Route {
		Route {
			id,
			project_id: 0,
			dialect,
			provider_id,
			position,
			enabled: true,
			is_native: true,
			retry_config_id: 1,
			model_mapping: vec![],
			deleted_at: None,
		}
	}

	#[test]
	fn priority_strategy_orders_ascending_by_position_then_id() {
		let store = InMemoryStore::new();
		store.add_provider(provider(1, vec![Dialect::Claude]));
		store.add_route(route(2, 1, 1, Dialect::Claude));
		store.add_route(route(1, 0, 1, Dialect::Claude));
		let selector =
			RouteSelector { routes: &store, providers: &store, strategies: &store, cooldowns: &store };
		let candidates = selector.candidates(0, Dialect::Claude, "claude-sonnet-4-5");
		assert_eq!(candidates.iter().map(|c| c.route.id).collect::<Vec<_>>(), vec![1, 2]);
	}

	#[test]
	fn cooling_down_provider_is_skipped() {
		let store = InMemoryStore::new();
		store.add_provider(provider(1, vec![Dialect::Claude]));
		store.add_route(route(1, 0, 1, Dialect::Claude));
		store.start_cooldown(1, Dialect::Claude, std::time::Duration::from_secs(60));
		let selector =
			RouteSelector { routes: &store, providers: &store, strategies: &store, cooldowns: &store };
		assert!(selector.candidates(0, Dialect::Claude, "m").is_empty());
	}

	#[test]
	fn non_native_provider_targets_first_supported_dialect() {
		let store = InMemoryStore::new();
		store.add_provider(provider(1, vec![Dialect::OpenAI, Dialect::Gemini]));
		store.add_route(route(1, 0, 1, Dialect::Claude));
		let selector =
			RouteSelector { routes: &store, providers: &store, strategies: &store, cooldowns: &store };
		let candidates = selector.candidates(0, Dialect::Claude, "m");
		assert!(!candidates[0].is_native);
		assert_eq!(candidates[0].target_dialect, Dialect::OpenAI);
	}

	#[test]
	fn route_mapping_wins_over_provider_mapping() {
		let store = InMemoryStore::new();
		store.add_provider({
			let mut p = provider(1, vec![Dialect::Claude]);
			p.config.model_rename = vec![ModelMapping { pattern: "m".into(), target: "provider-wins".into() }];
			p
		});
		let mut r = route(1, 0, 1, Dialect::Claude);
		r.model_mapping = vec![ModelMapping { pattern: "m".into(), target: "route-wins".into() }];
		store.add_route(r);
		let selector =
			RouteSelector { routes: &store, providers: &store, strategies: &store, cooldowns: &store };
		assert_eq!(selector.candidates(0, Dialect::Claude, "m")[0].resolved_model, "route-wins");
	}
}
