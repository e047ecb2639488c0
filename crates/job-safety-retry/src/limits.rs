use std::time::Duration;

/// Global retry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    /// Retry ceiling for jobs without a per-job override.
    pub max_retries: u32,
    /// Base cooldown between attempts.
    pub cooldown: Duration,
    /// Double the cooldown with every attempt.
    pub exponential_backoff: bool,
    /// Upper bound on the exponential cooldown.
    pub max_cooldown: Duration,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            max_retries: 3,
            cooldown: Duration::from_secs(60),
            exponential_backoff: true,
            max_cooldown: Duration::from_secs(3600),
        }
    }
}

impl RetryLimits {
    /// Cooldown that must elapse after a job's last attempt, given how many
    /// attempts it has made.
    ///
    /// With exponential backoff this is `min(cooldown * 2^attempts, max_cooldown)`,
    /// otherwise a flat `cooldown`.
    pub fn cooldown_for(&self, attempts: u32) -> Duration {
        if !self.exponential_backoff {
            return self.cooldown;
        }
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.cooldown
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_cooldown)
    }
}
