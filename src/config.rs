//! Watchdog configuration.
//!
//! Every collaborator the watchdog talks to (broker, counter store, lock
//! backend, invocation endpoints) is addressed by a locator read from the
//! environment. A locator may be the literal `disabled`, which swaps the
//! collaborator for its in-process or no-op variant.
//!
//! Required locators are checked before anything connects: a missing one is a
//! configuration error, never a runtime one.

use std::time::Duration;
use thiserror::Error;

/// Sentinel value that disables a collaborator.
pub const DISABLED: &str = "disabled";

/// Default scope name for locks, counters and registrations.
pub const DEFAULT_WATCHDOG_NAME: &str = "celery_serverless:watchdog";

/// Default queue watched when `WATCHDOG_QUEUES` is unset.
pub const DEFAULT_QUEUE: &str = "celery";

/// Errors that can occur while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required locator is unset.
    #[error("The {0} envvar should be set. Even to \"disabled\" to disable it.")]
    MissingLocator(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Address of an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// The collaborator is switched off.
    Disabled,
    /// URL of the backend.
    Url(String),
}

impl Locator {
    /// Parses a raw locator value. Surrounding whitespace is ignored and the
    /// sentinel is matched case-insensitively.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case(DISABLED) {
            Self::Disabled
        } else {
            Self::Url(trimmed.to_string())
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    /// Returns the URL, or `None` when disabled.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Disabled => None,
            Self::Url(url) => Some(url),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "{}", DISABLED),
            Self::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Tunables of the control loop and its waits.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    /// Base unit of the Fibonacci backoff (`unit × 1, 1, 2, 3, 5, …`).
    pub backoff_unit: Duration,
    /// Upper bound for a single backoff sleep.
    pub backoff_max_delay: Option<Duration>,
    /// Maximum total time spent waiting for fulfillment.
    pub fulfillment_max_wait: Duration,
    /// Ceiling for the wait on worker starts. `None` waits until the deadline.
    pub start_timeout: Option<Duration>,
    /// Number of worker triggers dispatched concurrently.
    pub trigger_concurrency: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            backoff_unit: Duration::from_secs(1),
            backoff_max_delay: Some(Duration::from_secs(30)),
            fulfillment_max_wait: Duration::from_secs(20),
            start_timeout: None,
            trigger_concurrency: 16,
        }
    }
}

/// Full configuration of a watchdog process.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    // Locators
    /// Broker holding the task queues.
    pub queue_locator: Locator,
    /// Shared store for counters, registrations and the shutdown flag.
    pub intercom_locator: Locator,
    /// Backend of the exclusivity lock.
    pub lock_locator: Locator,
    /// Endpoint that starts one worker.
    pub worker_invoke_locator: Locator,
    /// Endpoint that starts a successor watchdog.
    pub continuation_invoke_locator: Locator,

    // Naming
    /// Scope of locks and counters.
    pub name: String,
    /// Queues whose depths are summed.
    pub queues: Vec<String>,
    /// Key of the shutdown flag in the counter store.
    pub shutdown_key: String,
    /// Prefix of worker registration keys.
    pub worker_prefix: String,

    // Time budget
    /// Safety margin subtracted from the host's remaining time.
    pub spare_time: Duration,
    /// Execution budget assumed by the CLI host.
    pub time_budget: Duration,
    /// Auto-expiry of the exclusivity lock.
    pub lock_ttl: Duration,
    /// Auto-expiry of a worker registration.
    pub registration_ttl: Duration,
    /// Timeout of a single invocation request.
    pub invoke_timeout: Duration,

    /// Control loop tunables.
    pub loop_settings: LoopSettings,
}

impl WatchdogConfig {
    /// Builds a configuration with every collaborator disabled.
    pub fn disabled() -> Self {
        Self::with_locators(
            Locator::Disabled,
            Locator::Disabled,
            Locator::Disabled,
            Locator::Disabled,
        )
    }

    /// Builds a configuration from explicit locators and default tunables.
    pub fn with_locators(
        queue: Locator,
        intercom: Locator,
        lock: Locator,
        worker_invoke: Locator,
    ) -> Self {
        let name = DEFAULT_WATCHDOG_NAME.to_string();
        Self {
            queue_locator: queue,
            intercom_locator: intercom,
            lock_locator: lock,
            worker_invoke_locator: worker_invoke,
            continuation_invoke_locator: Locator::Disabled,
            shutdown_key: default_shutdown_key(&name),
            worker_prefix: default_worker_prefix(&name),
            name,
            queues: vec![DEFAULT_QUEUE.to_string()],
            spare_time: Duration::from_secs(30),
            time_budget: Duration::from_secs(900),
            lock_ttl: Duration::from_secs(900),
            registration_ttl: Duration::from_secs(900),
            invoke_timeout: Duration::from_secs(10),
            loop_settings: LoopSettings::default(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `WATCHDOG_QUEUE_URL`: broker URL or `disabled` (required)
    /// - `WATCHDOG_INTERCOM_URL`: counter store URL or `disabled` (required)
    /// - `WATCHDOG_LOCK_URL`: lock backend URL or `disabled` (required)
    /// - `WATCHDOG_WORKER_INVOKE_URL`: worker endpoint or `disabled` (required)
    /// - `WATCHDOG_CONTINUATION_INVOKE_URL`: watchdog endpoint (default: disabled)
    /// - `WATCHDOG_NAME`: lock and counter scope (default: celery_serverless:watchdog)
    /// - `WATCHDOG_QUEUES`: comma-separated queue names (default: celery)
    /// - `WATCHDOG_SHUTDOWN_KEY`: shutdown flag key (default: `<name>:shutdown`)
    /// - `WATCHDOG_WORKER_PREFIX`: registration prefix (default: `<name>:worker:`)
    /// - `WATCHDOG_SPARE_TIME_SECS`: spare time (default: 30)
    /// - `WATCHDOG_TIME_BUDGET_SECS`: host budget for the CLI (default: 900)
    /// - `WATCHDOG_LOCK_TTL_SECS`: lock auto-expiry (default: 900)
    /// - `WATCHDOG_REGISTRATION_TTL_SECS`: registration auto-expiry (default: 900)
    /// - `WATCHDOG_INVOKE_TIMEOUT_SECS`: invocation request timeout (default: 10)
    /// - `WATCHDOG_BACKOFF_UNIT_MS`: Fibonacci backoff unit (default: 1000)
    /// - `WATCHDOG_BACKOFF_MAX_DELAY_SECS`: cap per backoff sleep, 0 for none (default: 30)
    /// - `WATCHDOG_FULFILLMENT_MAX_WAIT_SECS`: bounded fulfillment wait (default: 20)
    /// - `WATCHDOG_START_TIMEOUT_SECS`: ceiling for the start wait (default: unset)
    /// - `WATCHDOG_TRIGGER_CONCURRENCY`: concurrent trigger dispatch (default: 16)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required locator is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<Locator, ConfigError> {
            lookup(key)
                .filter(|val| !val.trim().is_empty())
                .map(|val| Locator::parse(&val))
                .ok_or_else(|| ConfigError::MissingLocator(key.to_string()))
        };

        let mut config = Self::with_locators(
            required("WATCHDOG_QUEUE_URL")?,
            required("WATCHDOG_INTERCOM_URL")?,
            required("WATCHDOG_LOCK_URL")?,
            required("WATCHDOG_WORKER_INVOKE_URL")?,
        );

        if let Some(val) = lookup("WATCHDOG_CONTINUATION_INVOKE_URL") {
            config.continuation_invoke_locator = Locator::parse(&val);
        }

        if let Some(val) = lookup("WATCHDOG_NAME") {
            config.name = val.trim().to_string();
        }
        config.shutdown_key = match lookup("WATCHDOG_SHUTDOWN_KEY") {
            Some(val) => val.replace("{prefix}", &config.name),
            None => default_shutdown_key(&config.name),
        };
        config.worker_prefix =
            lookup("WATCHDOG_WORKER_PREFIX").unwrap_or_else(|| default_worker_prefix(&config.name));

        if let Some(val) = lookup("WATCHDOG_QUEUES") {
            config.queues = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Time budget
        if let Some(val) = lookup("WATCHDOG_SPARE_TIME_SECS") {
            config.spare_time = parse_secs(&val, "WATCHDOG_SPARE_TIME_SECS")?;
        }
        if let Some(val) = lookup("WATCHDOG_TIME_BUDGET_SECS") {
            config.time_budget = parse_secs(&val, "WATCHDOG_TIME_BUDGET_SECS")?;
        }
        if let Some(val) = lookup("WATCHDOG_LOCK_TTL_SECS") {
            config.lock_ttl = parse_secs(&val, "WATCHDOG_LOCK_TTL_SECS")?;
        }
        if let Some(val) = lookup("WATCHDOG_REGISTRATION_TTL_SECS") {
            config.registration_ttl = parse_secs(&val, "WATCHDOG_REGISTRATION_TTL_SECS")?;
        }
        if let Some(val) = lookup("WATCHDOG_INVOKE_TIMEOUT_SECS") {
            config.invoke_timeout = parse_secs(&val, "WATCHDOG_INVOKE_TIMEOUT_SECS")?;
        }

        // Loop settings
        let settings = &mut config.loop_settings;
        if let Some(val) = lookup("WATCHDOG_BACKOFF_UNIT_MS") {
            let millis: u64 = parse_env_value(&val, "WATCHDOG_BACKOFF_UNIT_MS")?;
            settings.backoff_unit = Duration::from_millis(millis);
        }
        if let Some(val) = lookup("WATCHDOG_BACKOFF_MAX_DELAY_SECS") {
            let cap = parse_secs(&val, "WATCHDOG_BACKOFF_MAX_DELAY_SECS")?;
            settings.backoff_max_delay = (!cap.is_zero()).then_some(cap);
        }
        if let Some(val) = lookup("WATCHDOG_FULFILLMENT_MAX_WAIT_SECS") {
            settings.fulfillment_max_wait =
                parse_secs(&val, "WATCHDOG_FULFILLMENT_MAX_WAIT_SECS")?;
        }
        if let Some(val) = lookup("WATCHDOG_START_TIMEOUT_SECS") {
            settings.start_timeout = Some(parse_secs(&val, "WATCHDOG_START_TIMEOUT_SECS")?);
        }
        if let Some(val) = lookup("WATCHDOG_TRIGGER_CONCURRENCY") {
            settings.trigger_concurrency = parse_env_value(&val, "WATCHDOG_TRIGGER_CONCURRENCY")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "watchdog name cannot be empty".to_string(),
            ));
        }

        if self.queues.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one queue name is required".to_string(),
            ));
        }

        if self.loop_settings.trigger_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "trigger_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.loop_settings.backoff_unit.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "backoff_unit must be greater than 0".to_string(),
            ));
        }

        if self.lock_ttl <= self.spare_time {
            return Err(ConfigError::ValidationFailed(format!(
                "lock_ttl ({:?}) must be greater than spare_time ({:?})",
                self.lock_ttl, self.spare_time
            )));
        }

        // The lock is never refreshed, so it has to outlive the loop.
        let loop_time = self.time_budget.saturating_sub(self.spare_time);
        if self.lock_ttl < loop_time {
            return Err(ConfigError::ValidationFailed(format!(
                "lock_ttl ({:?}) must cover time_budget minus spare_time ({:?})",
                self.lock_ttl, loop_time
            )));
        }

        if self.worker_invoke_locator.is_disabled() && !self.queue_locator.is_disabled() {
            return Err(ConfigError::ValidationFailed(
                "worker invocation is disabled while a queue is watched; no worker could drain it"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn default_shutdown_key(name: &str) -> String {
    format!("{}:shutdown", name)
}

pub fn default_worker_prefix(name: &str) -> String {
    format!("{}:worker:", name)
}

/// Parses a whole number of seconds.
fn parse_secs(value: &str, key: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_env_value(value, key)?;
    Ok(Duration::from_secs(secs))
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}
