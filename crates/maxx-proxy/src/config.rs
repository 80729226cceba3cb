use std::time::Duration;

/// Process configuration, loaded once at startup from environment variables
/// (§6.4). Unset options fall back to the documented defaults rather than
/// failing bootstrap.
#[derive(Debug, Clone)]
pub struct Config {
	/// Backing store selector. Absent = SQLite at a platform-specific path in
	/// the original system; here, absence means the in-process `InMemoryStore`
	/// (§3.7) since persistence is an out-of-scope external collaborator.
	pub dsn: Option<String>,
	pub proxy_port: u16,
	/// 0 disables retention pruning.
	pub request_retention_hours: u64,
	pub timezone: chrono_tz::Tz,
	pub connect_timeout: Duration,
	pub idle_read_timeout: Duration,
	pub in_progress_ceiling: Duration,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			dsn: None,
			proxy_port: 9880,
			request_retention_hours: 0,
			timezone: chrono_tz::UTC,
			connect_timeout: Duration::from_secs(30),
			idle_read_timeout: Duration::from_secs(300),
			in_progress_ceiling: Duration::from_secs(30 * 60),
		}
	}
}

impl Config {
	pub fn from_env() -> anyhow::Result<Self> {
		let mut cfg = Self::default();
		if let Ok(dsn) = std::env::var("MAXX_DSN") {
			if !dsn.is_empty() {
				cfg.dsn = Some(dsn);
			}
		}
		if let Ok(port) = std::env::var("MAXX_PROXY_PORT") {
			cfg.proxy_port = port
				.parse()
				.map_err(|e| anyhow::anyhow!("invalid MAXX_PROXY_PORT: {e}"))?;
		}
		if let Ok(hours) = std::env::var("MAXX_REQUEST_RETENTION_HOURS") {
			cfg.request_retention_hours = hours
				.parse()
				.map_err(|e| anyhow::anyhow!("invalid MAXX_REQUEST_RETENTION_HOURS: {e}"))?;
		}
		if let Ok(tz) = std::env::var("MAXX_TIMEZONE") {
			cfg.timezone = tz
				.parse()
				.map_err(|_| anyhow::anyhow!("invalid MAXX_TIMEZONE: {tz}"))?;
		}
		Ok(cfg)
	}

	pub fn retention_enabled(&self) -> bool {
		self.request_retention_hours > 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_spec() {
		let cfg = Config::default();
		assert_eq!(cfg.proxy_port, 9880);
		assert_eq!(cfg.request_retention_hours, 0);
		assert!(!cfg.retention_enabled());
	}
}
