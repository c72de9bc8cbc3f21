//! Quota arithmetic for the usage governor.
//!
//! These functions mutate a [`QuotaState`] in memory. They must run
//! inside whatever exclusive per-tenant section the store provides (a
//! write transaction for SQLite, a mutex for the in-memory store): the
//! read, the lazy resets, the limit check and the increment form one
//! critical section.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{QuotaPeriod, RagError, Result};
use crate::models::QuotaState;

/// Tokens charged up front for one question before the real cost is known.
pub const DEFAULT_ESTIMATED_TOKENS: i64 = 1500;

/// Monthly reset marker for `date`, e.g. `2024-05`.
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Which counters a call to [`apply_resets`] zeroed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetOutcome {
    pub daily: bool,
    pub monthly: bool,
}

/// Counters after a successful reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub tokens_used_day: i64,
    pub tokens_used_month: i64,
    pub daily_limit: i64,
    pub monthly_limit: i64,
}

impl From<&QuotaState> for QuotaSnapshot {
    fn from(q: &QuotaState) -> Self {
        Self {
            tokens_used_day: q.tokens_used_day,
            tokens_used_month: q.tokens_used_month,
            daily_limit: q.daily_limit,
            monthly_limit: q.monthly_limit,
        }
    }
}

/// Zero each counter whose marker no longer matches `today`.
///
/// Daily and monthly windows are independent. Calling this twice for the
/// same day is a no-op the second time.
pub fn apply_resets(state: &mut QuotaState, today: NaiveDate) -> ResetOutcome {
    let mut outcome = ResetOutcome::default();

    if state.last_reset_daily != Some(today) {
        state.tokens_used_day = 0;
        state.last_reset_daily = Some(today);
        outcome.daily = true;
    }

    let month = month_key(today);
    if state.last_reset_monthly.as_deref() != Some(month.as_str()) {
        state.tokens_used_month = 0;
        state.last_reset_monthly = Some(month);
        outcome.monthly = true;
    }

    outcome
}

/// Fail when admitting `estimate` more tokens would cross a limit.
/// Daily is checked before monthly.
pub fn check_limits(state: &QuotaState, estimate: i64) -> Result<()> {
    if state.tokens_used_day + estimate > state.daily_limit {
        return Err(RagError::QuotaExceeded {
            period: QuotaPeriod::Daily,
            limit: state.daily_limit,
        });
    }
    if state.tokens_used_month + estimate > state.monthly_limit {
        return Err(RagError::QuotaExceeded {
            period: QuotaPeriod::Monthly,
            limit: state.monthly_limit,
        });
    }
    Ok(())
}

/// Reset, check and increment in one step.
///
/// On rejection the resets are still applied to `state`; callers persist
/// them or not as they see fit, since a reset is idempotent.
pub fn reserve(state: &mut QuotaState, estimate: i64, today: NaiveDate) -> Result<QuotaSnapshot> {
    let estimate = estimate.max(0);
    apply_resets(state, today);
    check_limits(state, estimate)?;
    state.tokens_used_day += estimate;
    state.tokens_used_month += estimate;
    Ok(QuotaSnapshot::from(&*state))
}

/// Give back `tokens` from both counters, never going below zero.
///
/// A refund that arrives after a period rolled over only touches the
/// counters whose markers still match `today`.
pub fn refund(state: &mut QuotaState, tokens: i64, today: NaiveDate) {
    let tokens = tokens.max(0);
    if state.last_reset_daily == Some(today) {
        state.tokens_used_day = (state.tokens_used_day - tokens).max(0);
    }
    if state.last_reset_monthly.as_deref() == Some(month_key(today).as_str()) {
        state.tokens_used_month = (state.tokens_used_month - tokens).max(0);
    }
}
