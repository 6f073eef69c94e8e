use std::sync::Arc;

use anyhow::Result;
use backend::usecases::credits::{CreditError, CreditUseCase};
use chrono::Utc;
use crates::domain::{
    repositories::{credits::CreditRepository, subscriptions::SubscriptionRepository},
    value_objects::credits::{
        LedgerError, LedgerOp, LedgerReference, RecordCreditTransaction,
    },
};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpiryRunResult {
    pub monthly_windows_expired: usize,
    pub lots_expired: usize,
}

/// Sweeps lapsed credits into `expiration` ledger rows. Two sources:
/// monthly windows past their reset date, and extra-credit grant lots past
/// their `expires_at`. Both paths are idempotent through ledger references,
/// so overlapping sweeps cannot double-expire.
pub struct CreditExpiryUseCase<C, S>
where
    C: CreditRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    credit_repo: Arc<C>,
    credits: CreditUseCase<C, S>,
}

impl<C, S> CreditExpiryUseCase<C, S>
where
    C: CreditRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    pub fn new(credit_repo: Arc<C>, subscription_repo: Arc<S>) -> Self {
        let credits = CreditUseCase::new(Arc::clone(&credit_repo), subscription_repo);
        Self {
            credit_repo,
            credits,
        }
    }

    pub async fn run(&self, batch_size: i64) -> Result<ExpiryRunResult> {
        let now = Utc::now();
        let mut result = ExpiryRunResult::default();

        for balance in self
            .credit_repo
            .list_lapsed_monthly_balances(now, batch_size)
            .await?
        {
            let reset_at = match balance.monthly_reset_at {
                Some(reset_at) => reset_at,
                None => continue,
            };

            let request = RecordCreditTransaction::new(balance.user_id, LedgerOp::ExpireMonthly)
                .with_reference(LedgerReference::monthly_expiry(balance.user_id, reset_at))
                .with_description("monthly credits expired at period end");

            match self.credits.record_with_retry(request).await {
                Ok(transaction) => {
                    info!(
                        user_id = %balance.user_id,
                        amount = transaction.amount,
                        "credit_expiry: monthly window expired"
                    );
                    result.monthly_windows_expired += 1;
                }
                Err(CreditError::Ledger(LedgerError::DuplicateOperation))
                | Err(CreditError::Ledger(LedgerError::Validation(_))) => {
                    debug!(user_id = %balance.user_id, "credit_expiry: monthly window already swept");
                }
                Err(err) => {
                    error!(
                        user_id = %balance.user_id,
                        error = ?err,
                        "credit_expiry: monthly sweep failed"
                    );
                }
            }
        }

        for grant in self
            .credit_repo
            .list_expired_unswept_grants(now, batch_size)
            .await?
        {
            let request = RecordCreditTransaction::new(
                grant.user_id,
                LedgerOp::ExpireExtra {
                    amount: grant.amount,
                },
            )
            .with_reference(LedgerReference::grant_expiry(grant.id))
            .with_description("credit grant expired");

            match self.credits.record_with_retry(request).await {
                Ok(transaction) => {
                    info!(
                        user_id = %grant.user_id,
                        grant_id = %grant.id,
                        amount = transaction.amount,
                        "credit_expiry: grant lot expired"
                    );
                    result.lots_expired += 1;
                }
                Err(CreditError::Ledger(LedgerError::DuplicateOperation))
                | Err(CreditError::Ledger(LedgerError::Validation(_))) => {
                    debug!(grant_id = %grant.id, "credit_expiry: lot already swept or drained");
                }
                Err(err) => {
                    error!(
                        grant_id = %grant.id,
                        error = ?err,
                        "credit_expiry: lot sweep failed"
                    );
                }
            }
        }

        if result != ExpiryRunResult::default() {
            info!(
                monthly = result.monthly_windows_expired,
                lots = result.lots_expired,
                "credit_expiry: sweep finished"
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crates::domain::{
        entities::credits::{CreditBalanceEntity, CreditTransactionEntity},
        repositories::{credits::MockCreditRepository, subscriptions::MockSubscriptionRepository},
    };
    use uuid::Uuid;

    fn lapsed_balance(user_id: Uuid, remaining: i64) -> CreditBalanceEntity {
        CreditBalanceEntity {
            user_id,
            monthly_credits: remaining,
            monthly_used: 0,
            extra_credits: 0,
            extra_used: 0,
            total_earned: remaining,
            total_consumed: 0,
            monthly_reset_at: Some(Utc::now() - Duration::hours(2)),
            version: 3,
            updated_at: Utc::now(),
        }
    }

    fn expired_grant(user_id: Uuid, amount: i64) -> CreditTransactionEntity {
        CreditTransactionEntity {
            id: Uuid::new_v4(),
            user_id,
            kind: "purchase".to_string(),
            amount,
            balance_before: 0,
            balance_after: amount,
            reference_type: Some("payment".to_string()),
            reference_id: Some(Uuid::new_v4().to_string()),
            expires_at: Some(Utc::now() - Duration::hours(1)),
            description: None,
            created_at: Utc::now() - Duration::days(90),
        }
    }

    fn expiration_row(user_id: Uuid, amount: i64) -> CreditTransactionEntity {
        CreditTransactionEntity {
            id: Uuid::new_v4(),
            user_id,
            kind: "expiration".to_string(),
            amount: -amount,
            balance_before: amount,
            balance_after: 0,
            reference_type: None,
            reference_id: None,
            expires_at: None,
            description: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sweep_expires_monthly_windows_and_lots() {
        let user_id = Uuid::new_v4();
        let mut credit_repo = MockCreditRepository::new();

        credit_repo
            .expect_list_lapsed_monthly_balances()
            .returning(move |_, _| {
                let balance = lapsed_balance(user_id, 120);
                Box::pin(async move { Ok(vec![balance]) })
            });
        credit_repo
            .expect_list_expired_unswept_grants()
            .returning(move |_, _| {
                let grant = expired_grant(user_id, 40);
                Box::pin(async move { Ok(vec![grant]) })
            });
        credit_repo
            .expect_record_transaction()
            .withf(|request| matches!(request.op, LedgerOp::ExpireMonthly))
            .times(1)
            .returning(move |_| {
                let row = expiration_row(user_id, 120);
                Box::pin(async move { Ok(row) })
            });
        credit_repo
            .expect_record_transaction()
            .withf(|request| matches!(request.op, LedgerOp::ExpireExtra { amount: 40 }))
            .times(1)
            .returning(move |_| {
                let row = expiration_row(user_id, 40);
                Box::pin(async move { Ok(row) })
            });

        let usecase = CreditExpiryUseCase::new(
            Arc::new(credit_repo),
            Arc::new(MockSubscriptionRepository::new()),
        );

        let result = usecase.run(100).await.unwrap();
        assert_eq!(result.monthly_windows_expired, 1);
        assert_eq!(result.lots_expired, 1);
    }

    #[tokio::test]
    async fn replayed_sweep_is_a_no_op() {
        let user_id = Uuid::new_v4();
        let mut credit_repo = MockCreditRepository::new();

        credit_repo
            .expect_list_lapsed_monthly_balances()
            .returning(|_, _| Box::pin(async { Ok(vec![]) }));
        credit_repo
            .expect_list_expired_unswept_grants()
            .returning(move |_, _| {
                let grant = expired_grant(user_id, 40);
                Box::pin(async move { Ok(vec![grant]) })
            });
        credit_repo
            .expect_record_transaction()
            .times(1)
            .returning(|_| Box::pin(async { Err(LedgerError::DuplicateOperation) }));

        let usecase = CreditExpiryUseCase::new(
            Arc::new(credit_repo),
            Arc::new(MockSubscriptionRepository::new()),
        );

        let result = usecase.run(100).await.unwrap();
        assert_eq!(result.lots_expired, 0);
    }
}
