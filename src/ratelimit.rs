use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::errors::{AppError, Result};

/// Redemption attempts allowed per (task, caller) pair per minute. The
/// 6-character code space only holds up against guessing because this
/// throttle exists; resize the code if you loosen it.
const REDEEM_ATTEMPTS_PER_MINUTE: u32 = 10;

type RedeemLimiter =
    RateLimiter<(Uuid, Uuid), DefaultKeyedStateStore<(Uuid, Uuid)>, DefaultClock>;

static REDEEM_LIMITER: OnceLock<RedeemLimiter> = OnceLock::new();

fn redeem_limiter() -> &'static RedeemLimiter {
    REDEEM_LIMITER.get_or_init(|| {
        let quota = NonZeroU32::new(REDEEM_ATTEMPTS_PER_MINUTE)
            .expect("redeem quota must be non-zero");
        RateLimiter::keyed(Quota::per_minute(quota))
    })
}

/// Gate a completion-code redemption attempt.
pub fn check_redeem_attempt(task_id: Uuid, caller: Uuid) -> Result<()> {
    redeem_limiter()
        .check_key(&(task_id, caller))
        .map_err(|_| AppError::RateLimited)
}

/// Drop per-key state that has fully replenished. Without this the key
/// store grows by one entry per (task, caller) pair for the life of the
/// process; a housekeeping task calls it periodically.
pub fn prune_stale_keys() {
    if let Some(limiter) = REDEEM_LIMITER.get() {
        limiter.retain_recent();
        limiter.shrink_to_fit();
    }
}
