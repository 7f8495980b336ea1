//! Environment configuration.

use crate::time::SimTime;

/// Knobs for a new [`Environment`](crate::Environment).
///
/// ```rust
/// use tempo::{EnvConfig, Environment, SimTime};
///
/// let env = Environment::with_config(
///     EnvConfig::new().starting_at(SimTime::new(100.0)).with_trace(),
/// );
/// assert_eq!(env.now(), SimTime::new(100.0));
/// assert!(env.trace().is_some());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct EnvConfig {
    /// Initial value of the clock.
    pub start_time: SimTime,
    /// Record every processed event in an [`EventTrace`](crate::EventTrace).
    pub record_trace: bool,
    /// Keep processed timeouts and plain events around so their outcome can
    /// still be queried or awaited. Completion events are always kept.
    pub retain_processed: bool,
}

impl EnvConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(mut self, t: SimTime) -> Self {
        self.start_time = t;
        self
    }

    pub fn with_trace(mut self) -> Self {
        self.record_trace = true;
        self
    }

    /// Release processed timeouts and plain events once their waiters ran.
    /// Long-running models use this to keep memory flat.
    pub fn release_processed(mut self) -> Self {
        self.retain_processed = false;
        self
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        EnvConfig {
            start_time: SimTime::ZERO,
            record_trace: false,
            retain_processed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EnvConfig::default();
        assert_eq!(cfg.start_time, SimTime::ZERO);
        assert!(!cfg.record_trace);
        assert!(cfg.retain_processed);
    }

    #[test]
    fn test_builder() {
        let cfg = EnvConfig::new()
            .starting_at(SimTime::new(5.0))
            .with_trace()
            .release_processed();
        assert_eq!(cfg.start_time, SimTime::new(5.0));
        assert!(cfg.record_trace);
        assert!(!cfg.retain_processed);
    }
}
