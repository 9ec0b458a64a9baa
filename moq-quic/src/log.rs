use std::str::FromStr;

use tracing::Level;

/// Global log routing, selectable once at process start.
#[derive(Clone, Debug)]
pub struct Log {
	pub level: Level,
}

impl Default for Log {
	fn default() -> Self {
		Self { level: Level::INFO }
	}
}

impl Log {
	/// Parse a level string: "trace", "debug", "info", "warn" or "error".
	///
	/// An empty string selects the default.
	pub fn parse(level: &str) -> anyhow::Result<Self> {
		if level.is_empty() {
			return Ok(Self::default());
		}

		Ok(Self {
			level: Level::from_str(level)?,
		})
	}

	/// Install the global subscriber.
	///
	/// Idempotent; a second call keeps the first configuration.
	pub fn init(&self) {
		let _ = tracing_subscriber::fmt()
			.with_max_level(self.level)
			.with_target(true)
			.try_init();
	}
}
