use std::time::Duration;

/// Retry policy for CRL downloads. Kept minimal at the HTTP layer; the
/// fetcher above composes caching and single-flight semantics on top.
/// Cloning is cheap because the structure only stores durations and numbers.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts for a request.
    pub max_attempts: u32,
    /// Configuration for exponential backoff between attempts.
    pub backoff: BackoffConfig,
    /// Maximum total duration spent on the operation before we stop retrying.
    pub max_elapsed: Duration,
}

#[derive(Clone, Debug)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub jitter: Jitter,
}

#[derive(Clone, Debug)]
pub enum Jitter {
    None,
    Full,
    Decorrelated,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            backoff: BackoffConfig {
                base: Duration::from_millis(50),
                factor: 2.0,
                cap: Duration::from_millis(1500),
                jitter: Jitter::Decorrelated,
            },
            max_elapsed: Duration::from_secs(30),
        }
    }
}
