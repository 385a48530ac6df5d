//! Per-provider rate limiter (§4.A)
//!
//! Each provider gets its own concurrency semaphore and a sliding-window
//! request-per-minute counter; waiters queue FIFO within a provider, and
//! providers never starve each other because each has its own queue.
//! Acquisition is cancellable: if the caller's token fires before
//! admission, `acquire` returns `RateLimiterError::Cancelled` and no
//! counters are touched.

use crate::config::ProviderLimits;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

const RPM_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RateLimiterError {
    #[error("acquire cancelled")]
    Cancelled,
    #[error("no rate limit configured for provider {0}")]
    UnknownProvider(String),
}

struct ProviderState {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    max_requests_per_minute: u32,
    window: Mutex<VecDeque<Instant>>,
}

/// Per-provider admission control. One instance is shared for the lifetime
/// of a run (§9 "Global state").
pub struct RateLimiter {
    providers: HashMap<String, ProviderState>,
}

impl RateLimiter {
    pub fn new(limits: &HashMap<String, ProviderLimits>) -> Self {
        let providers = limits
            .iter()
            .map(|(name, limit)| {
                (
                    name.clone(),
                    ProviderState {
                        semaphore: Arc::new(Semaphore::new(limit.max_concurrent)),
                        max_concurrent: limit.max_concurrent,
                        max_requests_per_minute: limit.max_requests_per_minute,
                        window: Mutex::new(VecDeque::new()),
                    },
                )
            })
            .collect();
        Self { providers }
    }

    /// Blocks cooperatively until admission is granted for `provider`, or
    /// returns `Cancelled` if `cancel` fires first.
    pub async fn acquire(
        &self,
        provider: &str,
        cancel: &CancellationToken,
    ) -> Result<Lease, RateLimiterError> {
        let state = self
            .providers
            .get(provider)
            .ok_or_else(|| RateLimiterError::UnknownProvider(provider.to_string()))?;

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RateLimiterError::Cancelled),
            permit = Arc::clone(&state.semaphore).acquire_owned() => {
                permit.expect("semaphore is never closed while the limiter is alive")
            }
        };

        loop {
            let wait = {
                let mut window = state.window.lock().await;
                let now = Instant::now();
                while window
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= RPM_WINDOW)
                {
                    window.pop_front();
                }
                if state.max_requests_per_minute == 0
                    || (window.len() as u32) < state.max_requests_per_minute
                {
                    window.push_back(now);
                    None
                } else {
                    let oldest = *window.front().unwrap();
                    Some(RPM_WINDOW.saturating_sub(now.duration_since(oldest)))
                }
            };

            match wait {
                None => break,
                Some(duration) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RateLimiterError::Cancelled),
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
            }
        }

        Ok(Lease { _permit: permit })
    }

    /// Number of leases currently outstanding for `provider`, used by the
    /// §8 cancellation-invariant test ("in-flight count is 0 for every
    /// provider" after a cancelled run returns).
    pub fn in_flight(&self, provider: &str) -> usize {
        self.providers
            .get(provider)
            .map(|state| state.max_concurrent - state.semaphore.available_permits())
            .unwrap_or(0)
    }
}

/// An admitted slot. Releases its concurrency permit automatically on drop
/// so every exit path — including panics and early returns — frees it
/// (§4.A "must be called on every exit path", enforced here by RAII
/// instead of a caller-visible `release()` method).
pub struct Lease {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_concurrent: usize, max_rpm: u32) -> HashMap<String, ProviderLimits> {
        let mut map = HashMap::new();
        map.insert(
            "anthropic".to_string(),
            ProviderLimits {
                max_concurrent,
                max_requests_per_minute: max_rpm,
            },
        );
        map
    }

    #[tokio::test]
    async fn acquire_grants_up_to_concurrency_cap() {
        let limiter = RateLimiter::new(&limits(2, 1000));
        let cancel = CancellationToken::new();

        let lease1 = limiter.acquire("anthropic", &cancel).await.unwrap();
        let lease2 = limiter.acquire("anthropic", &cancel).await.unwrap();

        let state = limiter.providers.get("anthropic").unwrap();
        assert_eq!(state.semaphore.available_permits(), 0);

        drop(lease1);
        drop(lease2);
    }

    #[tokio::test]
    async fn acquire_on_unknown_provider_errors() {
        let limiter = RateLimiter::new(&limits(1, 1000));
        let cancel = CancellationToken::new();
        let result = limiter.acquire("openai", &cancel).await;
        assert!(matches!(result, Err(RateLimiterError::UnknownProvider(_))));
    }

    #[tokio::test]
    async fn acquire_fails_fast_when_already_cancelled() {
        let limiter = RateLimiter::new(&limits(1, 1000));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = limiter.acquire("anthropic", &cancel).await;
        assert!(matches!(result, Err(RateLimiterError::Cancelled)));

        let state = limiter.providers.get("anthropic").unwrap();
        assert_eq!(state.semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn releasing_a_lease_frees_the_permit() {
        let limiter = RateLimiter::new(&limits(1, 1000));
        let cancel = CancellationToken::new();

        let lease = limiter.acquire("anthropic", &cancel).await.unwrap();
        drop(lease);

        let lease2 = limiter.acquire("anthropic", &cancel).await.unwrap();
        drop(lease2);
    }

    #[tokio::test(start_paused = true)]
    async fn rpm_limit_delays_admission_until_window_clears() {
        let limiter = RateLimiter::new(&limits(10, 1));
        let cancel = CancellationToken::new();

        let lease1 = limiter.acquire("anthropic", &cancel).await.unwrap();
        drop(lease1);

        let acquire_second = limiter.acquire("anthropic", &cancel);
        tokio::pin!(acquire_second);

        tokio::select! {
            _ = &mut acquire_second => panic!("second acquire should not admit immediately"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }

        tokio::time::advance(RPM_WINDOW + Duration::from_millis(1)).await;
        let lease2 = acquire_second.await.unwrap();
        drop(lease2);
    }
}
