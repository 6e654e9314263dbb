//! Scheduler configuration.
//!
//! [`SchedulerConfig`] controls which clock the event loop runs on, how long
//! it waits for work injected from other threads, whether a single turn may
//! drain an unbounded number of microtasks, and what happens to rejections
//! nobody observed.
//!
//! ```rust
//! use std::time::Duration;
//! use promissory::scheduler::{ClockKind, SchedulerConfig, UnhandledRejectionPolicy};
//!
//! let config = SchedulerConfig::builder()
//!     .clock(ClockKind::Monotonic)
//!     .idle_wait(Duration::from_millis(50))
//!     .unhandled_rejections(UnhandledRejectionPolicy::Collect)
//!     .build();
//! assert_eq!(config.clock, ClockKind::Monotonic);
//! ```

use std::fmt;
use std::time::Duration;

#[cfg(feature = "config-file")]
use crate::error::ConfigError;

// =============================================================================
// ClockKind
// =============================================================================

/// Which clock drives timer deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ClockKind {
    /// Deterministic virtual time. When nothing is runnable the loop jumps
    /// straight to the next timer deadline instead of sleeping.
    #[default]
    Virtual,

    /// Real elapsed time. The loop sleeps until the next timer deadline.
    Monotonic,
}

impl fmt::Display for ClockKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Virtual => formatter.write_str("virtual"),
            Self::Monotonic => formatter.write_str("monotonic"),
        }
    }
}

// =============================================================================
// UnhandledRejectionPolicy
// =============================================================================

/// What the scheduler does with a rejected promise that was dropped before
/// anything observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum UnhandledRejectionPolicy {
    /// Emit a `tracing` warning.
    #[default]
    Log,

    /// Keep the report for [`Scheduler::take_unhandled_rejections`](crate::Scheduler::take_unhandled_rejections).
    Collect,

    /// Panic on the thread driving the loop: after the callback that dropped
    /// the promise returns, or when `run`/`block_on` starts or finishes if
    /// the drop happened outside the loop.
    Panic,
}

// =============================================================================
// SchedulerConfig
// =============================================================================

/// Event loop configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Clock used for timer deadlines.
    pub clock: ClockKind,

    /// Optional livelock guard: maximum microtasks drained in one turn before
    /// [`RunError::MicrotaskBudgetExceeded`](crate::RunError::MicrotaskBudgetExceeded).
    ///
    /// `None` (the default) drains any finite amount of work. Aggregating a
    /// large batch of already-settled tasks legitimately queues one microtask
    /// per task in a single turn.
    pub max_microtasks_per_turn: Option<usize>,

    /// How long an idle loop waits for work injected from other threads
    /// before giving up. `None` means an idle loop stops immediately.
    pub idle_wait: Option<Duration>,

    /// Handling of rejections that were never observed.
    pub unhandled_rejections: UnhandledRejectionPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            clock: ClockKind::default(),
            max_microtasks_per_turn: None,
            idle_wait: None,
            unhandled_rejections: UnhandledRejectionPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Starts a builder from the default configuration.
    #[must_use]
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Parses a configuration from a TOML document.
    ///
    /// Every key is optional; missing keys keep their defaults. Omitting
    /// `max_microtasks_per_turn` leaves the budget disabled.
    ///
    /// ```toml
    /// clock = "monotonic"
    /// max_microtasks_per_turn = 10000
    /// idle_wait_ms = 250
    /// unhandled_rejections = "collect"
    /// ```
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(source)?;
        file.into_config()
    }
}

// =============================================================================
// SchedulerConfigBuilder
// =============================================================================

/// Consuming builder for [`SchedulerConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Sets the clock.
    pub fn clock(mut self, clock: ClockKind) -> Self {
        self.config.clock = clock;
        self
    }

    /// Enables the per-turn microtask budget. Values below 1 are raised to 1.
    pub fn max_microtasks_per_turn(mut self, budget: usize) -> Self {
        self.config.max_microtasks_per_turn = Some(budget.max(1));
        self
    }

    /// Makes an idle loop wait this long for injected work.
    pub fn idle_wait(mut self, wait: Duration) -> Self {
        self.config.idle_wait = Some(wait);
        self
    }

    /// Sets the unhandled rejection policy.
    pub fn unhandled_rejections(mut self, policy: UnhandledRejectionPolicy) -> Self {
        self.config.unhandled_rejections = policy;
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}

// =============================================================================
// File representation
// =============================================================================

#[cfg(feature = "config-file")]
#[derive(Debug, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    clock: ClockKind,
    max_microtasks_per_turn: Option<usize>,
    idle_wait_ms: Option<u64>,
    unhandled_rejections: UnhandledRejectionPolicy,
}

#[cfg(feature = "config-file")]
impl Default for ConfigFile {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            clock: defaults.clock,
            max_microtasks_per_turn: defaults.max_microtasks_per_turn,
            idle_wait_ms: None,
            unhandled_rejections: defaults.unhandled_rejections,
        }
    }
}

#[cfg(feature = "config-file")]
impl ConfigFile {
    fn into_config(self) -> Result<SchedulerConfig, ConfigError> {
        if self.max_microtasks_per_turn == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_microtasks_per_turn",
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(SchedulerConfig {
            clock: self.clock,
            max_microtasks_per_turn: self.max_microtasks_per_turn,
            idle_wait: self.idle_wait_ms.map(Duration::from_millis),
            unhandled_rejections: self.unhandled_rejections,
        })
    }
}
