use std::time::Duration;

/// Exponential reconnect backoff: the `n`-th delay after `n - 1` failures is
/// `min(base * factor^(n-1), max)`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    factor: f64,
    attempt: u32,
}

impl ReconnectBackoff {
    /// Creates a new `ReconnectBackoff` with the given parameters.
    ///
    /// # Examples
    ///
    /// ```
    /// use npagent::backoff::ReconnectBackoff;
    /// use std::time::Duration;
    /// let mut backoff = ReconnectBackoff::new(
    ///     Duration::from_secs(1),
    ///     Duration::from_secs(30),
    ///     2.0,
    /// );
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    /// assert_eq!(backoff.next_delay(), Duration::from_secs(4));
    /// ```
    #[must_use]
    pub const fn new(base: Duration, max: Duration, factor: f64) -> Self {
        Self {
            base,
            max,
            factor,
            attempt: 0,
        }
    }

    /// Delay for the current attempt, without advancing.
    #[must_use]
    pub fn peek(&self) -> Duration {
        let exp = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Compute the next delay and advance the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.peek();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Reset the attempt counter after a successful registration.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failures recorded since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 2.0)
    }
}
