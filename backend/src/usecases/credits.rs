use std::sync::Arc;

use chrono::Utc;
use crates::domain::{
    entities::{
        credits::CreditTransactionEntity, plans::PlanEntity, subscriptions::SubscriptionEntity,
    },
    repositories::{credits::CreditRepository, subscriptions::SubscriptionRepository},
    value_objects::{
        credits::{
            BalanceDto, CreditTransactionDto, LedgerError, LedgerOp, LedgerReference,
            RecordCreditTransaction,
        },
        enums::credit_transaction_kinds::CreditTransactionKind,
        subscriptions::BillingPeriod,
    },
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bounded internal retry for optimistic/serialization conflicts before the
/// failure is surfaced to the caller.
const MAX_CONFLICT_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum CreditError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CreditError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            CreditError::Ledger(LedgerError::Validation(_)) => StatusCode::BAD_REQUEST,
            CreditError::Ledger(LedgerError::InsufficientCredits { .. }) => {
                StatusCode::PAYMENT_REQUIRED
            }
            // Replays are success-no-ops for callers; routers should not
            // surface this as an error in the first place.
            CreditError::Ledger(LedgerError::DuplicateOperation) => StatusCode::OK,
            CreditError::Ledger(LedgerError::ConcurrencyConflict) => StatusCode::SERVICE_UNAVAILABLE,
            CreditError::Ledger(LedgerError::NotFound) => StatusCode::NOT_FOUND,
            CreditError::Ledger(LedgerError::Internal(_)) | CreditError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub type CreditResult<T> = std::result::Result<T, CreditError>;

pub struct CreditUseCase<C, S>
where
    C: CreditRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    credit_repo: Arc<C>,
    subscription_repo: Arc<S>,
}

impl<C, S> CreditUseCase<C, S>
where
    C: CreditRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    pub fn new(credit_repo: Arc<C>, subscription_repo: Arc<S>) -> Self {
        Self {
            credit_repo,
            subscription_repo,
        }
    }

    pub async fn balance(&self, user_id: Uuid) -> CreditResult<BalanceDto> {
        let now = Utc::now();
        let balance = self
            .credit_repo
            .get_balance(user_id)
            .await
            .map_err(CreditError::Internal)?;

        Ok(match balance {
            Some(balance) => BalanceDto::from_snapshot(&balance.snapshot(), now),
            // A user who never touched the ledger simply has nothing yet.
            None => BalanceDto {
                monthly_remaining: 0,
                extra_remaining: 0,
                total_available: 0,
            },
        })
    }

    /// Debits `amount` credits for a usage event and returns the new
    /// balance. Monthly credits are consumed before extra credits.
    pub async fn consume(
        &self,
        user_id: Uuid,
        amount: i64,
        description: Option<String>,
    ) -> CreditResult<BalanceDto> {
        let mut request =
            RecordCreditTransaction::new(user_id, LedgerOp::Consume { amount });
        if let Some(description) = description {
            request = request.with_description(description);
        }

        let transaction = self.record_with_retry(request).await?;

        info!(
            %user_id,
            amount,
            balance_after = transaction.balance_after,
            "credits: consumed"
        );

        // Best-effort derived counter on the live subscription; the ledger
        // row above is the source of truth.
        match self
            .subscription_repo
            .find_live_subscription_for_user(user_id)
            .await
        {
            Ok(Some(subscription)) => {
                if let Err(err) = self
                    .subscription_repo
                    .add_used_credits(subscription.id, amount)
                    .await
                {
                    warn!(
                        %user_id,
                        subscription_id = %subscription.id,
                        db_error = ?err,
                        "credits: failed to bump subscription usage counter"
                    );
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%user_id, db_error = ?err, "credits: live subscription lookup failed");
            }
        }

        self.balance(user_id).await
    }

    /// Grants purchased credits exactly once per payment. A replay returns
    /// `Ok(None)`.
    pub async fn grant_purchase(
        &self,
        user_id: Uuid,
        amount: i64,
        payment_id: Uuid,
    ) -> CreditResult<Option<CreditTransactionEntity>> {
        let request = RecordCreditTransaction::new(
            user_id,
            LedgerOp::Grant {
                kind: CreditTransactionKind::Purchase,
                amount,
                monthly_reset_at: None,
            },
        )
        .with_reference(LedgerReference::payment(payment_id))
        .with_description("credit purchase");

        match self.record_with_retry(request).await {
            Ok(transaction) => {
                info!(%user_id, amount, %payment_id, "credits: purchase granted");
                Ok(Some(transaction))
            }
            Err(CreditError::Ledger(LedgerError::DuplicateOperation)) => {
                debug!(%user_id, %payment_id, "credits: purchase grant replayed, no-op");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Grants the plan's monthly credits for one billing period, exactly
    /// once per `(subscription, period_start)`. Returns `false` when the
    /// period had already been granted.
    pub async fn grant_period(
        &self,
        subscription: &SubscriptionEntity,
        plan: &PlanEntity,
        period: BillingPeriod,
    ) -> CreditResult<bool> {
        let now = Utc::now();
        let user_id = subscription.user_id;

        // Expire the lapsed monthly remainder before the new period's grant
        // so the bucket reset never destroys unaccounted credits.
        if let Some(balance) = self
            .credit_repo
            .get_balance(user_id)
            .await
            .map_err(CreditError::Internal)?
        {
            let snapshot = balance.snapshot();
            let lapsed = snapshot
                .monthly_reset_at
                .map(|reset_at| reset_at <= now)
                .unwrap_or(false);
            if lapsed && snapshot.monthly_remaining() > 0 {
                let reset_at = snapshot.monthly_reset_at.unwrap_or(now);
                let request = RecordCreditTransaction::new(user_id, LedgerOp::ExpireMonthly)
                    .with_reference(LedgerReference::monthly_expiry(user_id, reset_at))
                    .with_description("monthly credits expired at period end");

                match self.record_with_retry(request).await {
                    Ok(transaction) => info!(
                        %user_id,
                        amount = transaction.amount,
                        "credits: lapsed monthly remainder expired"
                    ),
                    Err(CreditError::Ledger(LedgerError::DuplicateOperation)) => {}
                    Err(err) => return Err(err),
                }
            }
        }

        let request = RecordCreditTransaction::new(
            user_id,
            LedgerOp::Grant {
                kind: CreditTransactionKind::Subscription,
                amount: plan.monthly_credits,
                monthly_reset_at: Some(period.end),
            },
        )
        .with_reference(LedgerReference::subscription_period(
            subscription.id,
            period.start,
        ))
        .with_expiry(period.end)
        .with_description(format!("monthly credits for plan {}", plan.name));

        match self.record_with_retry(request).await {
            Ok(transaction) => {
                info!(
                    %user_id,
                    subscription_id = %subscription.id,
                    amount = transaction.amount,
                    period_start = %period.start,
                    "credits: period grant recorded"
                );

                if let Err(err) = self
                    .subscription_repo
                    .add_granted_credits(subscription.id, plan.monthly_credits)
                    .await
                {
                    warn!(
                        subscription_id = %subscription.id,
                        db_error = ?err,
                        "credits: failed to bump subscription grant counter"
                    );
                }

                Ok(true)
            }
            Err(CreditError::Ledger(LedgerError::DuplicateOperation)) => {
                debug!(
                    subscription_id = %subscription.id,
                    period_start = %period.start,
                    "credits: period grant replayed, no-op"
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Compensating debit after a refund, exactly once per payment, capped
    /// at what the user still holds. Returns the reclaimed amount.
    pub async fn reclaim_for_refund(
        &self,
        user_id: Uuid,
        amount: i64,
        payment_id: Uuid,
    ) -> CreditResult<i64> {
        let request = RecordCreditTransaction::new(user_id, LedgerOp::Reclaim { amount })
            .with_reference(LedgerReference::refund(payment_id))
            .with_description("credits reclaimed after refund");

        match self.record_with_retry(request).await {
            Ok(transaction) => {
                info!(
                    %user_id,
                    %payment_id,
                    reclaimed = -transaction.amount,
                    "credits: refund reclaim recorded"
                );
                Ok(-transaction.amount)
            }
            Err(CreditError::Ledger(LedgerError::DuplicateOperation)) => Ok(0),
            // Nothing left to take back is fine for a refund.
            Err(CreditError::Ledger(LedgerError::Validation(_))) => Ok(0),
            Err(err) => Err(err),
        }
    }

    /// The grant row recorded for a payment, if any. Used to size the
    /// compensating debit when that payment is refunded.
    pub async fn granted_for_payment(
        &self,
        payment_id: Uuid,
    ) -> CreditResult<Option<CreditTransactionEntity>> {
        self.credit_repo
            .find_by_reference(LedgerReference::TYPE_PAYMENT, &payment_id.to_string())
            .await
            .map_err(CreditError::Internal)
    }

    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> CreditResult<Vec<CreditTransactionDto>> {
        let transactions = self
            .credit_repo
            .list_transactions(user_id, limit, offset)
            .await
            .map_err(CreditError::Internal)?;

        Ok(transactions
            .into_iter()
            .map(CreditTransactionDto::from)
            .collect())
    }

    /// Applies one ledger request, transparently retrying bounded
    /// concurrency conflicts.
    pub async fn record_with_retry(
        &self,
        request: RecordCreditTransaction,
    ) -> CreditResult<CreditTransactionEntity> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.credit_repo.record_transaction(request.clone()).await {
                Err(LedgerError::ConcurrencyConflict) if attempt < MAX_CONFLICT_RETRIES => {
                    warn!(
                        user_id = %request.user_id,
                        attempt,
                        "credits: concurrency conflict, retrying"
                    );
                    continue;
                }
                Err(LedgerError::ConcurrencyConflict) => {
                    error!(
                        user_id = %request.user_id,
                        attempts = attempt,
                        "credits: concurrency retries exhausted"
                    );
                    return Err(LedgerError::ConcurrencyConflict.into());
                }
                other => return other.map_err(CreditError::from),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};
    use crates::domain::{
        entities::credits::CreditBalanceEntity,
        repositories::{credits::MockCreditRepository, subscriptions::MockSubscriptionRepository},
        value_objects::plans::PlanFeatures,
    };

    fn sample_transaction(
        user_id: Uuid,
        kind: CreditTransactionKind,
        amount: i64,
        balance_before: i64,
    ) -> CreditTransactionEntity {
        CreditTransactionEntity {
            id: Uuid::new_v4(),
            user_id,
            kind: kind.to_string(),
            amount,
            balance_before,
            balance_after: balance_before + amount,
            reference_type: None,
            reference_id: None,
            expires_at: None,
            description: None,
            created_at: Utc::now(),
        }
    }

    fn sample_balance(user_id: Uuid, monthly: i64, extra: i64) -> CreditBalanceEntity {
        CreditBalanceEntity {
            user_id,
            monthly_credits: monthly,
            monthly_used: 0,
            extra_credits: extra,
            extra_used: 0,
            total_earned: monthly + extra,
            total_consumed: 0,
            monthly_reset_at: Some(Utc::now() + Duration::days(30)),
            version: 1,
            updated_at: Utc::now(),
        }
    }

    fn sample_plan(monthly_credits: i64) -> PlanEntity {
        PlanEntity {
            id: Uuid::new_v4(),
            name: "Pro".to_string(),
            monthly_credits,
            trial_days: 0,
            features: PlanFeatures::default(),
            is_active: true,
            is_featured: false,
            created_at: Utc::now(),
        }
    }

    fn sample_subscription(user_id: Uuid, plan_id: Uuid) -> SubscriptionEntity {
        let now = Utc::now();
        SubscriptionEntity {
            id: Uuid::new_v4(),
            user_id,
            plan_id,
            status: "active".to_string(),
            current_period_start: now,
            current_period_end: now + Duration::days(30),
            trial_start: None,
            trial_end: None,
            auto_renew: true,
            cancelled_at: None,
            cancelled_reason: None,
            provider_subscription_id: Some("sub_123".to_string()),
            credits_granted: 0,
            credits_used: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn consume_records_debit_and_returns_new_balance() {
        let user_id = Uuid::new_v4();
        let mut credit_repo = MockCreditRepository::new();
        let mut subscription_repo = MockSubscriptionRepository::new();

        credit_repo
            .expect_record_transaction()
            .withf(move |request| {
                request.user_id == user_id
                    && matches!(request.op, LedgerOp::Consume { amount: 300 })
            })
            .times(1)
            .returning(move |_| {
                let transaction =
                    sample_transaction(user_id, CreditTransactionKind::Consumption, -300, 1000);
                Box::pin(async move { Ok(transaction) })
            });
        credit_repo.expect_get_balance().returning(move |_| {
            let balance = sample_balance(user_id, 700, 0);
            Box::pin(async move { Ok(Some(balance)) })
        });
        subscription_repo
            .expect_find_live_subscription_for_user()
            .returning(|_| Box::pin(async { Ok(None) }));

        let usecase = CreditUseCase::new(Arc::new(credit_repo), Arc::new(subscription_repo));

        let balance = usecase.consume(user_id, 300, None).await.unwrap();
        assert_eq!(balance.total_available, 700);
    }

    #[tokio::test]
    async fn insufficient_credits_is_surfaced_unchanged() {
        let user_id = Uuid::new_v4();
        let mut credit_repo = MockCreditRepository::new();
        let subscription_repo = MockSubscriptionRepository::new();

        credit_repo
            .expect_record_transaction()
            .times(1)
            .returning(|_| {
                Box::pin(async {
                    Err(LedgerError::InsufficientCredits {
                        requested: 800,
                        available: 700,
                    })
                })
            });

        let usecase = CreditUseCase::new(Arc::new(credit_repo), Arc::new(subscription_repo));

        let result = usecase.consume(user_id, 800, None).await;
        assert!(matches!(
            result,
            Err(CreditError::Ledger(LedgerError::InsufficientCredits {
                requested: 800,
                available: 700,
            }))
        ));
    }

    #[tokio::test]
    async fn concurrency_conflict_is_retried_then_succeeds() {
        let user_id = Uuid::new_v4();
        let mut credit_repo = MockCreditRepository::new();
        let mut subscription_repo = MockSubscriptionRepository::new();

        let mut calls = 0;
        credit_repo
            .expect_record_transaction()
            .times(2)
            .returning(move |_| {
                calls += 1;
                if calls == 1 {
                    Box::pin(async { Err(LedgerError::ConcurrencyConflict) })
                } else {
                    let transaction =
                        sample_transaction(user_id, CreditTransactionKind::Consumption, -100, 500);
                    Box::pin(async move { Ok(transaction) })
                }
            });
        credit_repo.expect_get_balance().returning(move |_| {
            let balance = sample_balance(user_id, 400, 0);
            Box::pin(async move { Ok(Some(balance)) })
        });
        subscription_repo
            .expect_find_live_subscription_for_user()
            .returning(|_| Box::pin(async { Ok(None) }));

        let usecase = CreditUseCase::new(Arc::new(credit_repo), Arc::new(subscription_repo));

        let balance = usecase.consume(user_id, 100, None).await.unwrap();
        assert_eq!(balance.total_available, 400);
    }

    #[tokio::test]
    async fn conflict_retries_are_bounded() {
        let user_id = Uuid::new_v4();
        let mut credit_repo = MockCreditRepository::new();
        let subscription_repo = MockSubscriptionRepository::new();

        credit_repo
            .expect_record_transaction()
            .times(MAX_CONFLICT_RETRIES as usize)
            .returning(|_| Box::pin(async { Err(LedgerError::ConcurrencyConflict) }));

        let usecase = CreditUseCase::new(Arc::new(credit_repo), Arc::new(subscription_repo));

        let result = usecase.consume(user_id, 100, None).await;
        assert!(matches!(
            result,
            Err(CreditError::Ledger(LedgerError::ConcurrencyConflict))
        ));
    }

    #[tokio::test]
    async fn replayed_period_grant_is_a_no_op() {
        let user_id = Uuid::new_v4();
        let plan = sample_plan(1000);
        let subscription = sample_subscription(user_id, plan.id);
        let period = BillingPeriod::from_start(
            Utc::now(),
            crates::domain::value_objects::enums::billing_intervals::BillingInterval::Monthly,
        );

        let mut credit_repo = MockCreditRepository::new();
        let subscription_repo = MockSubscriptionRepository::new();

        credit_repo
            .expect_get_balance()
            .returning(|_| Box::pin(async { Ok(None) }));
        credit_repo
            .expect_record_transaction()
            .times(1)
            .returning(|_| Box::pin(async { Err(LedgerError::DuplicateOperation) }));

        let usecase = CreditUseCase::new(Arc::new(credit_repo), Arc::new(subscription_repo));

        let granted = usecase
            .grant_period(&subscription, &plan, period)
            .await
            .unwrap();
        assert!(!granted);
    }

    #[tokio::test]
    async fn period_grant_expires_lapsed_remainder_first() {
        let user_id = Uuid::new_v4();
        let plan = sample_plan(1000);
        let subscription = sample_subscription(user_id, plan.id);
        let subscription_id = subscription.id;
        let period_start: DateTime<Utc> = Utc::now();
        let period = BillingPeriod::from_start(
            period_start,
            crates::domain::value_objects::enums::billing_intervals::BillingInterval::Monthly,
        );

        let mut credit_repo = MockCreditRepository::new();
        let mut subscription_repo = MockSubscriptionRepository::new();

        // Stale balance: 250 monthly credits left from a window that ended
        // an hour ago.
        credit_repo.expect_get_balance().returning(move |_| {
            let mut balance = sample_balance(user_id, 250, 0);
            balance.monthly_reset_at = Some(Utc::now() - Duration::hours(1));
            Box::pin(async move { Ok(Some(balance)) })
        });

        credit_repo
            .expect_record_transaction()
            .withf(|request| matches!(request.op, LedgerOp::ExpireMonthly))
            .times(1)
            .returning(move |_| {
                let transaction =
                    sample_transaction(user_id, CreditTransactionKind::Expiration, -250, 250);
                Box::pin(async move { Ok(transaction) })
            });
        credit_repo
            .expect_record_transaction()
            .withf(|request| {
                matches!(
                    request.op,
                    LedgerOp::Grant {
                        kind: CreditTransactionKind::Subscription,
                        amount: 1000,
                        ..
                    }
                ) && request.reference.is_some()
            })
            .times(1)
            .returning(move |_| {
                let transaction =
                    sample_transaction(user_id, CreditTransactionKind::Subscription, 1000, 0);
                Box::pin(async move { Ok(transaction) })
            });
        subscription_repo
            .expect_add_granted_credits()
            .withf(move |id, amount| *id == subscription_id && *amount == 1000)
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let usecase = CreditUseCase::new(Arc::new(credit_repo), Arc::new(subscription_repo));

        let granted = usecase
            .grant_period(&subscription, &plan, period)
            .await
            .unwrap();
        assert!(granted);
    }
}
