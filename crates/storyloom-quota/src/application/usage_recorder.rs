//! Post-hoc billing.
//!
//! Billing happens after the user already has their result, so a failure here
//! is logged and swallowed rather than surfaced.

use std::sync::Arc;

use storyloom_core::clock::Clock;
use storyloom_core::error::DomainError;
use storyloom_core::model::{TokenUsage, UsageEvent};
use storyloom_core::repository::Store;
use storyloom_core::scope::RequestScope;
use tracing::{debug, warn};
use uuid::Uuid;

/// Where a usage event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageSource {
    ConflictScan,
    /// Output generated for a job that was cancelled before it could settle.
    DiscardedGeneration,
}

impl UsageSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConflictScan => "conflict_scan",
            Self::DiscardedGeneration => "discarded_generation",
        }
    }
}

/// Deducts consumed tokens from tenant balances.
#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

/// Who to bill for an auxiliary model call.
#[derive(Debug, Clone, Copy)]
pub struct UsageTarget<'a> {
    pub tenant_id: Uuid,
    pub project_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub scope: &'a RequestScope,
}

impl UsageRecorder {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Deducts the tokens of a generation whose job row already carries the
    /// usage. Never fails.
    pub async fn record_generation(&self, tenant_id: Uuid, total_tokens: i64) {
        if total_tokens <= 0 {
            return;
        }
        match self.try_deduct(tenant_id, total_tokens).await {
            Ok(()) => debug!(%tenant_id, total_tokens, "generation usage deducted"),
            Err(e) => warn!(%tenant_id, total_tokens, error = %e, "failed to deduct generation usage"),
        }
    }

    /// Records a usage event for a model call that has no job of its own and
    /// deducts it. Never fails.
    pub async fn record_auxiliary(
        &self,
        target: UsageTarget<'_>,
        source: UsageSource,
        usage: TokenUsage,
    ) {
        if usage.total_tokens <= 0 {
            return;
        }
        if let Err(e) = self.try_record_auxiliary(&target, source, usage).await {
            warn!(
                tenant_id = %target.tenant_id,
                source = source.as_str(),
                total_tokens = usage.total_tokens,
                error = %e,
                "failed to record auxiliary usage"
            );
        }
    }

    async fn try_deduct(&self, tenant_id: Uuid, total_tokens: i64) -> Result<(), DomainError> {
        let mut tx = self.store.begin().await?;
        tx.adjust_token_balance(tenant_id, -total_tokens).await?;
        tx.commit().await
    }

    async fn try_record_auxiliary(
        &self,
        target: &UsageTarget<'_>,
        source: UsageSource,
        usage: TokenUsage,
    ) -> Result<(), DomainError> {
        let event = UsageEvent {
            id: Uuid::new_v4(),
            tenant_id: target.tenant_id,
            project_id: target.project_id,
            job_id: target.job_id,
            source: source.as_str().to_owned(),
            provider: target.scope.provider.clone(),
            model: target.scope.model.clone(),
            total_tokens: usage.total_tokens,
            created_at: self.clock.now(),
        };
        let mut tx = self.store.begin().await?;
        tx.insert_usage_event(&event).await?;
        tx.adjust_token_balance(target.tenant_id, -usage.total_tokens)
            .await?;
        tx.commit().await
    }
}
