use std::{
    num::NonZeroU32,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;

const WINDOW: Duration = Duration::from_secs(60);
/// Idle keys are dropped after this many checks.
const PRUNE_EVERY: u64 = 256;

type KeyedLimiter<C> =
    RateLimiter<Uuid, DashMapStateStore<Uuid>, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Per-user budget of `n` requests per minute. A spent budget comes back
/// one request per minute, so no rolling minute ever sees more than `n`.
pub struct Throttle<C: Clock = DefaultClock> {
    limiter: KeyedLimiter<C>,
    clock: C,
    checks: AtomicU64,
}

impl Throttle {
    pub fn per_minute(requests: u32) -> Self {
        Self::with_clock(requests, DefaultClock::default())
    }
}

impl<C: Clock> Throttle<C> {
    pub fn with_clock(requests: u32, clock: C) -> Self {
        let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(WINDOW)
            .unwrap_or_else(|| Quota::per_minute(burst))
            .allow_burst(burst);
        Self {
            limiter: RateLimiter::dashmap_with_clock(quota, &clock),
            clock,
            checks: AtomicU64::new(0),
        }
    }

    pub fn check(&self, key: Uuid) -> Result<(), ApiError> {
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }

        self.limiter.check_key(&key).map_err(|not_until| {
            let wait = not_until.wait_time_from(self.clock.now());
            warn!(%key, retry_after_ms = wait.as_millis() as u64, "rate limit exceeded");
            ApiError::RateLimited {
                retry_after_secs: wait.as_secs().max(1),
            }
        })
    }

    fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        debug!(keys = self.limiter.len(), "throttle pruned");
    }
}
