//! Admission decisions over already-loaded numbers.

use serde::Serialize;
use storyloom_core::error::QuotaError;
use uuid::Uuid;

/// Today's usage against the tenant's ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyUsage {
    /// Tokens counted in the current UTC day. `0` when the quota is unlimited,
    /// since usage is not computed then.
    pub used: i64,
    /// The ceiling, `None` for unlimited.
    pub max: Option<i64>,
}

/// Fails when `balance < required`.
///
/// # Errors
///
/// Returns `QuotaError::BalanceExceeded` when the balance is insufficient.
pub fn evaluate_balance(tenant_id: Uuid, balance: i64, required: i64) -> Result<i64, QuotaError> {
    if balance < required {
        return Err(QuotaError::BalanceExceeded {
            tenant_id,
            balance,
            required,
        });
    }
    Ok(balance)
}

/// Fails when `used >= max`. The boundary is inclusive: reaching the ceiling
/// exactly already blocks the next call.
///
/// # Errors
///
/// Returns `QuotaError::DailyQuotaExceeded` once the ceiling is reached.
pub fn evaluate_daily(tenant_id: Uuid, used: i64, max: i64) -> Result<DailyUsage, QuotaError> {
    if used >= max {
        return Err(QuotaError::DailyQuotaExceeded {
            tenant_id,
            used,
            max,
        });
    }
    Ok(DailyUsage {
        used,
        max: Some(max),
    })
}
