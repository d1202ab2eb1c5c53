//! Engine tuning knobs
//!
//! Everything here affects throughput or sensitivity, never correctness: the
//! stage machine and its invariants are the same under any configuration.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff schedule for node-level transient retries
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling on any single delay
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Random fraction of the delay added on top, in [0.0, 1.0]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Delay before retrying after the given zero-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter > 0.0 {
            capped * (1.0 + rand::thread_rng().gen_range(0.0..self.jitter))
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }
}

/// Configuration for the execution engine
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Attempt cap for node-level transient retries, independent of the
    /// guardrail/critic feedback-loop counter
    pub node_attempt_cap: u32,
    /// Backoff schedule between node-level attempts
    pub backoff: RetryConfig,
    /// Concurrent agent invocations per work order during fan-out
    pub fan_out_limit: usize,
    /// Per-agent invocation timeout; exceeding it is a transient failure
    /// for that agent alone
    pub agent_timeout: Duration,
    /// Critic: confidence below this opens supervisor review
    pub confidence_threshold: f64,
    /// Critic: deviation from baseline above this opens supervisor review
    pub variance_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_attempt_cap: 3,
            backoff: RetryConfig::default(),
            fan_out_limit: 4,
            agent_timeout: Duration::from_secs(30),
            confidence_threshold: 0.7,
            variance_threshold: 0.2,
        }
    }
}

impl EngineConfig {
    /// Fast schedule for tests: no real sleeping between attempts
    pub fn fast() -> Self {
        Self {
            backoff: RetryConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_factor: 1.0,
                jitter: 0.0,
            },
            agent_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}
