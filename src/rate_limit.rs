//! Rate limiting for sensitive authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking. This raises the cost
//! of brute-force automation; it is not an access control on its own since
//! client addresses can be shared or spoofed.

use std::num::NonZeroU32;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DefaultKeyedStateStore,
};
use tracing::warn;

use crate::auth::{HasAuthBackend, extract_client_ip};
use crate::error::{AuthError, Result};

/// Sweep interval for replenished buckets.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Per-IP limiter state.
pub type IpLimiter<C = DefaultClock> =
    RateLimiter<String, DefaultKeyedStateStore<String>, C, NoOpMiddleware<<C as Clock>::Instant>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    /// Burst size.
    pub capacity: u32,
    /// Requests regained per second.
    pub refill_per_second: f64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            capacity: 5,
            refill_per_second: 1.0,
        }
    }
}

impl RateLimitPolicy {
    /// The quota this policy describes, or `None` if it would admit nothing.
    pub fn quota(&self) -> Option<Quota> {
        let burst = NonZeroU32::new(self.capacity)?;
        if !(self.refill_per_second.is_finite() && self.refill_per_second > 0.0) {
            return None;
        }
        let period = Duration::try_from_secs_f64(1.0 / self.refill_per_second).ok()?;
        Some(Quota::with_period(period)?.allow_burst(burst))
    }
}

/// Per-client admission for login and refresh.
pub struct ClientRateLimiter<C: Clock = DefaultClock> {
    policy: RateLimitPolicy,
    limiter: IpLimiter<C>,
}

impl ClientRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Result<Self> {
        Self::with_clock(policy, DefaultClock::default())
    }
}

impl<C: Clock> ClientRateLimiter<C> {
    pub fn with_clock(policy: RateLimitPolicy, clock: C) -> Result<Self> {
        let quota = policy
            .quota()
            .ok_or_else(|| AuthError::Internal(format!("rate limit policy admits nothing: {policy:?}")))?;
        Ok(Self {
            policy,
            limiter: RateLimiter::dashmap_with_clock(quota, clock),
        })
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Admit one request from `key`.
    pub fn allow(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }

    /// Drop clients whose bucket has fully replenished, since they are
    /// indistinguishable from new ones. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        before.saturating_sub(self.limiter.len())
    }

    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }
}

/// Middleware for rate limiting login and refresh endpoints.
pub async fn rate_limit_sensitive<S>(State(state): State<S>, request: Request, next: Next) -> Response
where
    S: HasAuthBackend + Clone + Send + Sync + 'static,
{
    let ip = match extract_client_ip(&request, state.ip_header()) {
        Ok(ip) => ip,
        Err(_) => {
            return (StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response();
        }
    };

    if state.core().rate_limiter.allow(&ip) {
        next.run(request).await
    } else {
        warn!(client = %ip, path = %request.uri().path(), "Rate limit exceeded");
        AuthError::RateLimited.into_response()
    }
}
