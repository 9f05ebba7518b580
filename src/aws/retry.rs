//! Exponential backoff with jitter for transient AWS failures (spec §4.1), plus
//! the dedicated `DependencyViolation` retry loop spec §4.1/§4.7 calls for on
//! SG/TG deletion (6 retries at 20s, ≈2 minutes total).
//!
//! Built on `rand`, already a teacher dependency, rather than pulling in a
//! retry crate the pack's examples don't reach for.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            max: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

pub fn backoff_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let exp = config.base.as_millis() as u64 * 2u64.saturating_pow(attempt);
    let capped = exp.min(config.max.as_millis() as u64);
    let jittered = rand::rng().random_range(0..=capped.max(1));
    Duration::from_millis(jittered)
}

/// Retries `op` with exponential backoff while `is_transient` holds, up to
/// `config.max_attempts`, bounded overall by `deadline`.
pub async fn retry_transient<T, E, F, Fut>(
    config: &BackoffConfig,
    deadline: Duration,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let start = tokio::time::Instant::now();
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                if !is_transient(&err) || attempt + 1 >= config.max_attempts {
                    return Err(err);
                }
                if start.elapsed() >= deadline {
                    return Err(err);
                }
                tokio::time::sleep(backoff_delay(config, attempt)).await;
                attempt += 1;
            }
        }
    }
}

pub const DEPENDENCY_VIOLATION_RETRIES: u32 = 6;
pub const DEPENDENCY_VIOLATION_INTERVAL: Duration = Duration::from_secs(20);

/// Retries an SG/TG delete call that may fail with `DependencyViolation`
/// (e.g. a target still referencing the target group) up to
/// [`DEPENDENCY_VIOLATION_RETRIES`] times, sleeping
/// [`DEPENDENCY_VIOLATION_INTERVAL`] between attempts (spec §4.1).
pub async fn retry_dependency_violation<T, E, F, Fut>(
    is_dependency_violation: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                if !is_dependency_violation(&err) || attempt + 1 >= DEPENDENCY_VIOLATION_RETRIES {
                    return Err(err);
                }
                tracing::warn!(attempt, "dependency violation on delete, retrying in 20s");
                tokio::time::sleep(DEPENDENCY_VIOLATION_INTERVAL).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_transient_gives_up_after_max_attempts() {
        let config = BackoffConfig {
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
            max_attempts: 3,
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry_transient(
            &config,
            Duration::from_secs(1),
            |_: &&str| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_transient_stops_on_non_transient_error() {
        let config = BackoffConfig::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry_transient(
            &config,
            Duration::from_secs(1),
            |_: &&str| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_transient_succeeds_on_retry() {
        let config = BackoffConfig {
            base: Duration::from_millis(1),
            max: Duration::from_millis(2),
            max_attempts: 5,
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_transient(
            &config,
            Duration::from_secs(1),
            |_: &&str| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("boom")
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(42));
    }
}
