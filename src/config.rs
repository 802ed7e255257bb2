#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types expose their domain in the name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;

use crate::protocol::Identify;

const DEFAULT_HEARTBEAT_FLOOR_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER_DURATION: Duration = Duration::from_millis(250);

/// Configuration for a [`GatewayConnection`](crate::gateway::GatewayConnection).
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Smallest heartbeat interval the client will accept from a Hello. Anything faster is
    /// treated as a broken handshake and the heartbeat monitor refuses to start.
    #[builder(default = DEFAULT_HEARTBEAT_FLOOR_DURATION)]
    pub heartbeat_floor: Duration,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    /// Identification payload sent after every Hello that cannot be resumed
    pub identify: Identify,
}

/// Configuration for automatic reconnection behavior.
///
/// Attempts are retried for as long as the caller wants the connection up; there is no attempt
/// limit.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ReconnectConfig {
    /// Delay before the first attempt after a success or reset
    #[builder(default)]
    pub idle_delay: Duration,
    /// Backoff applied after the first failure
    #[builder(default = DEFAULT_INITIAL_BACKOFF_DURATION)]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[builder(default = DEFAULT_MAX_BACKOFF_DURATION)]
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    #[builder(default = DEFAULT_BACKOFF_MULTIPLIER)]
    pub backoff_multiplier: f64,
    /// Upper bound of the random delay added to every backoff
    #[builder(default = DEFAULT_JITTER_DURATION)]
    pub jitter: Duration,
    /// Seed for the jitter generator. `None` seeds from the operating system.
    pub seed: Option<u64>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            idle_delay: Duration::ZERO,
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_JITTER_DURATION,
            seed: None,
        }
    }
}

impl From<&ReconnectConfig> for ExponentialBackoff {
    fn from(config: &ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            // Jitter is applied by `BackoffPolicy` from a seedable generator
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}
