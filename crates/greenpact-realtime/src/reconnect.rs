use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    /// Consecutive failed attempts before giving up; `0` never reconnects.
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: 8,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let factor = self.multiplier.max(1).saturating_pow(attempt);
        let ceiling = self
            .initial_delay
            .saturating_mul(factor)
            .min(self.max_delay);
        if !self.jitter {
            return Some(ceiling);
        }

        let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        Some(Duration::from_millis(
            rand::thread_rng().gen_range(0..=millis),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> ReconnectPolicy {
        ReconnectPolicy {
            jitter: false,
            ..ReconnectPolicy::default()
        }
    }

    #[test]
    fn delays_grow_geometrically_up_to_cap() {
        let policy = fixed();
        assert_eq!(policy.delay(0), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay(3), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay(7), Some(Duration::from_secs(30)));
    }

    #[test]
    fn attempts_are_capped() {
        let policy = fixed().with_max_attempts(2);
        assert!(policy.delay(1).is_some());
        assert_eq!(policy.delay(2), None);
        assert_eq!(ReconnectPolicy::disabled().delay(0), None);
    }

    #[test]
    fn jitter_stays_under_ceiling() {
        let policy = ReconnectPolicy::default();
        for attempt in 0..policy.max_attempts {
            let ceiling = fixed().delay(attempt).unwrap();
            assert!(policy.delay(attempt).unwrap() <= ceiling);
        }
    }
}
