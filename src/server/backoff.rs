//! Exponential backoff for transient accept failures.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Delay after `prior`: the initial delay when there was none, otherwise
/// double the prior delay capped at `max`.
pub fn next_delay(prior: Option<Duration>, initial: Duration, max: Duration) -> Duration {
    match prior {
        None => initial.min(max),
        Some(delay) => delay.saturating_mul(2).min(max),
    }
}

/// Backoff state for one accept loop. Not jittered: a listener's retries
/// do not contend with anyone else's.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    /// Creates a backoff with no prior delay.
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            initial: config.initial(),
            max: config.max(),
            current: None,
        }
    }

    /// Advances the state and returns how long to sleep.
    pub fn next_delay(&mut self) -> Duration {
        let delay = next_delay(self.current, self.initial, self.max);
        self.current = Some(delay);
        delay
    }

    /// Forgets the prior delay after a successful accept.
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// The last delay handed out, if any since the last reset.
    pub fn current(&self) -> Option<Duration> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn doubles_from_initial_up_to_cap() {
        let mut backoff = Backoff::new(&BackoffConfig::default());
        let delays: Vec<u64> = (0..10).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, [5, 10, 20, 40, 80, 160, 320, 640, 1000, 1000]);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(&BackoffConfig::default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.current(), None);
        assert_eq!(backoff.next_delay(), ms(5));
    }

    #[test]
    fn pure_step_function() {
        assert_eq!(next_delay(None, ms(5), ms(1000)), ms(5));
        assert_eq!(next_delay(Some(ms(600)), ms(5), ms(1000)), ms(1000));
        assert_eq!(next_delay(None, ms(50), ms(10)), ms(10));
    }
}
