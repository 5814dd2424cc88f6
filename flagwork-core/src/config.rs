//! API configuration.
//!
//! Settings can be built explicitly with [`FlagApiBuilder`] or read from the
//! environment:
//!
//! - `FLAGWORK_EVALUATION_TIMEOUT_MS` - default per-evaluation deadline
//! - `FLAGWORK_INIT_TIMEOUT_MS` - deadline for provider initialization
//! - `FLAGWORK_LOG` - `1`/`true` to log every evaluation result at debug level

use crate::hook::Hook;
use crate::registry::FlagApi;
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Registry-wide settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagApiConfig {
    /// Deadline applied to evaluations that do not set their own
    pub evaluation_timeout: Option<Duration>,
    /// Deadline for provider initialization
    pub initialization_timeout: Option<Duration>,
    /// Log each evaluation result
    pub enable_logging: bool,
}

impl FlagApiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read settings from `FLAGWORK_*` environment variables
    pub fn from_env() -> Self {
        Self {
            evaluation_timeout: millis_var("FLAGWORK_EVALUATION_TIMEOUT_MS"),
            initialization_timeout: millis_var("FLAGWORK_INIT_TIMEOUT_MS"),
            enable_logging: env::var("FLAGWORK_LOG")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        }
    }
}

fn millis_var(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Builder for [`FlagApi`]
#[derive(Default)]
pub struct FlagApiBuilder {
    config: FlagApiConfig,
    hooks: Vec<Arc<dyn Hook>>,
}

impl FlagApiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn config(mut self, config: FlagApiConfig) -> Self {
        self.config = config;
        self
    }

    pub fn evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.config.evaluation_timeout = Some(timeout);
        self
    }

    pub fn initialization_timeout(mut self, timeout: Duration) -> Self {
        self.config.initialization_timeout = Some(timeout);
        self
    }

    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.config.enable_logging = enabled;
        self
    }

    /// Register an API-level hook
    pub fn hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn build(self) -> FlagApi {
        let api = FlagApi::with_config(self.config);
        if !self.hooks.is_empty() {
            api.add_hooks(self.hooks);
        }
        api
    }
}
