//! Token quota checks.
//!
//! Both checks run inside the caller's transaction so they see the same
//! snapshot as the writes that follow them.

use chrono::{DateTime, Utc};
use storyloom_core::clock::utc_day_window;
use storyloom_core::error::{DomainError, NotFoundError};
use storyloom_core::model::Tenant;
use storyloom_core::repository::{JobRepository, TenantRepository, UsageRepository};
use tracing::debug;
use uuid::Uuid;

use crate::domain::admission::{self, DailyUsage};

/// Coarse pre-flight: fails unless the tenant holds at least `required`
/// tokens. Reserves nothing.
///
/// # Errors
///
/// Returns `NotFoundError::Tenant` for an unknown tenant and
/// `QuotaError::BalanceExceeded` when the balance is short.
pub async fn check_balance<R>(repo: &mut R, tenant_id: Uuid, required: i64) -> Result<i64, DomainError>
where
    R: TenantRepository + ?Sized,
{
    let tenant = repo
        .find_tenant(tenant_id)
        .await?
        .ok_or(NotFoundError::Tenant(tenant_id))?;
    Ok(admission::evaluate_balance(
        tenant_id,
        tenant.token_balance,
        required,
    )?)
}

/// Sums today's usage from jobs and direct usage events and compares it to
/// `quota`. `None` or a non-positive quota means unlimited and skips the sums.
///
/// # Errors
///
/// Returns `QuotaError::DailyQuotaExceeded` once usage reaches the quota, or
/// `DomainError::Infrastructure` if a sum cannot be read.
pub async fn check_daily_tokens<R>(
    repo: &mut R,
    tenant_id: Uuid,
    quota: Option<i64>,
    now: DateTime<Utc>,
) -> Result<DailyUsage, DomainError>
where
    R: JobRepository + UsageRepository + ?Sized,
{
    let Some(max) = quota.filter(|q| *q > 0) else {
        return Ok(DailyUsage { used: 0, max: None });
    };

    let (from, to) = utc_day_window(now);
    let from_jobs = repo.sum_job_tokens(tenant_id, from, to).await?;
    let from_events = repo.sum_usage_event_tokens(tenant_id, from, to).await?;
    let used = from_jobs + from_events;
    debug!(%tenant_id, from_jobs, from_events, max, "daily token usage");

    Ok(admission::evaluate_daily(tenant_id, used, max)?)
}

/// Locks the tenant row and applies its configured daily quota. Holding the
/// lock until the caller's transaction ends serializes concurrent admissions
/// for one tenant, so two requests cannot both read usage before either has
/// recorded its reservation.
///
/// # Errors
///
/// Returns `NotFoundError::Tenant` for an unknown tenant or any error of
/// [`check_daily_tokens`].
pub async fn admit<R>(repo: &mut R, tenant_id: Uuid, now: DateTime<Utc>) -> Result<Tenant, DomainError>
where
    R: TenantRepository + JobRepository + UsageRepository + ?Sized,
{
    let tenant = repo
        .lock_tenant(tenant_id)
        .await?
        .ok_or(NotFoundError::Tenant(tenant_id))?;
    check_daily_tokens(repo, tenant_id, tenant.daily_quota(), now).await?;
    Ok(tenant)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use storyloom_core::error::{DomainError, NotFoundError, QuotaError};
    use storyloom_core::model::{JobStatus, UsageEvent};
    use storyloom_core::repository::Store;
    use storyloom_test_support::{InMemoryStore, fixed_now};
    use uuid::Uuid;

    use super::{admit, check_balance, check_daily_tokens};

    fn usage_event(tenant_id: Uuid, tokens: i64, at: chrono::DateTime<chrono::Utc>) -> UsageEvent {
        UsageEvent {
            id: Uuid::new_v4(),
            tenant_id,
            project_id: None,
            job_id: None,
            source: "conflict_scan".to_owned(),
            provider: "test".to_owned(),
            model: "test".to_owned(),
            total_tokens: tokens,
            created_at: at,
        }
    }

    async fn store_with_usage(job_tokens: i64, event_tokens: i64) -> (InMemoryStore, Uuid) {
        let store = InMemoryStore::new();
        let tenant = storyloom_test_support::tenant(1000);
        let tenant_id = tenant.id;
        store
            .seed(|s| {
                s.tenants.insert(tenant.id, tenant);
                s.jobs.push(storyloom_test_support::job(
                    tenant_id,
                    Uuid::new_v4(),
                    JobStatus::Completed,
                    job_tokens,
                    fixed_now(),
                ));
                s.usage_events
                    .push(usage_event(tenant_id, event_tokens, fixed_now()));
            })
            .await;
        (store, tenant_id)
    }

    #[tokio::test]
    async fn test_check_daily_tokens_passes_one_below_quota() {
        // Arrange
        let (store, tenant_id) = store_with_usage(900, 99).await;
        let mut tx = store.begin().await.unwrap();

        // Act
        let usage = check_daily_tokens(&mut *tx, tenant_id, Some(1000), fixed_now())
            .await
            .unwrap();

        // Assert
        assert_eq!(usage.used, 999);
        assert_eq!(usage.max, Some(1000));
    }

    #[tokio::test]
    async fn test_check_daily_tokens_fails_at_quota() {
        // Arrange
        let (store, tenant_id) = store_with_usage(900, 100).await;
        let mut tx = store.begin().await.unwrap();

        // Act
        let result = check_daily_tokens(&mut *tx, tenant_id, Some(1000), fixed_now()).await;

        // Assert
        match result {
            Err(DomainError::Quota(QuotaError::DailyQuotaExceeded {
                tenant_id: t,
                used,
                max,
            })) => {
                assert_eq!(t, tenant_id);
                assert_eq!(used, 1000);
                assert_eq!(max, 1000);
            }
            other => panic!("expected DailyQuotaExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_check_daily_tokens_ignores_yesterday() {
        // Arrange
        let store = InMemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let yesterday = fixed_now() - Duration::days(1);
        store
            .seed(|s| {
                s.usage_events.push(usage_event(tenant_id, 5000, yesterday));
            })
            .await;
        let mut tx = store.begin().await.unwrap();

        // Act
        let usage = check_daily_tokens(&mut *tx, tenant_id, Some(1000), fixed_now())
            .await
            .unwrap();

        // Assert
        assert_eq!(usage.used, 0);
    }

    #[tokio::test]
    async fn test_check_daily_tokens_counts_reservations_of_running_jobs() {
        // Arrange
        let store = InMemoryStore::new();
        let tenant_id = Uuid::new_v4();
        store
            .seed(|s| {
                s.jobs.push(storyloom_test_support::job(
                    tenant_id,
                    Uuid::new_v4(),
                    JobStatus::Running,
                    1000,
                    fixed_now(),
                ));
            })
            .await;
        let mut tx = store.begin().await.unwrap();

        // Act
        let result = check_daily_tokens(&mut *tx, tenant_id, Some(1000), fixed_now()).await;

        // Assert
        assert!(matches!(
            result,
            Err(DomainError::Quota(QuotaError::DailyQuotaExceeded { used: 1000, .. }))
        ));
    }

    #[tokio::test]
    async fn test_unlimited_quota_short_circuits() {
        // Arrange
        let (store, tenant_id) = store_with_usage(10_000, 10_000).await;
        let mut tx = store.begin().await.unwrap();

        // Act
        let unlimited = check_daily_tokens(&mut *tx, tenant_id, None, fixed_now()).await;
        let zero = check_daily_tokens(&mut *tx, tenant_id, Some(0), fixed_now()).await;

        // Assert
        assert_eq!(unlimited.unwrap().max, None);
        assert_eq!(zero.unwrap().max, None);
    }

    #[tokio::test]
    async fn test_check_balance_reports_balance_and_requirement() {
        // Arrange
        let store = InMemoryStore::new();
        let mut tenant = storyloom_test_support::tenant(0);
        tenant.token_balance = 500;
        let tenant_id = tenant.id;
        store
            .seed(|s| {
                s.tenants.insert(tenant_id, tenant);
            })
            .await;
        let mut tx = store.begin().await.unwrap();

        // Act
        let ok = check_balance(&mut *tx, tenant_id, 500).await;
        let short = check_balance(&mut *tx, tenant_id, 1000).await;

        // Assert
        assert_eq!(ok.unwrap(), 500);
        match short {
            Err(DomainError::Quota(QuotaError::BalanceExceeded {
                balance, required, ..
            })) => {
                assert_eq!(balance, 500);
                assert_eq!(required, 1000);
            }
            other => panic!("expected BalanceExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_admit_unknown_tenant_is_not_found() {
        // Arrange
        let store = InMemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();

        // Act
        let result = admit(&mut *tx, tenant_id, fixed_now()).await;

        // Assert
        assert!(matches!(
            result,
            Err(DomainError::NotFound(NotFoundError::Tenant(id))) if id == tenant_id
        ));
    }
}
