use std::sync::Arc;

use anyhow::Result;
use backend::usecases::credits::CreditUseCase;
use chrono::{Duration, Utc};
use crates::domain::{
    entities::subscriptions::SubscriptionEntity,
    repositories::{
        credits::CreditRepository, plans::PlanRepository, subscriptions::SubscriptionRepository,
    },
    value_objects::{
        enums::{
            billing_intervals::BillingInterval, subscription_statuses::SubscriptionStatus,
        },
        subscriptions::BillingPeriod,
    },
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RenewalParams {
    pub grace_days: i64,
    pub batch_size: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenewalRunResult {
    pub scanned: usize,
    pub renewed: usize,
    pub expired: usize,
    pub marked_past_due: usize,
    pub suspended: usize,
}

/// Periodic fallback for the lifecycle transitions the gateway webhooks
/// normally drive: trial expiry, locally-billed renewals, grace-window
/// enforcement. Every credit grant goes through the same idempotent
/// period-grant path as the webhooks, so a race between the two can never
/// double-grant.
pub struct SubscriptionRenewalUseCase<S, P, C>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    C: CreditRepository + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    plan_repo: Arc<P>,
    credits: CreditUseCase<C, S>,
}

impl<S, P, C> SubscriptionRenewalUseCase<S, P, C>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    P: PlanRepository + Send + Sync + 'static,
    C: CreditRepository + Send + Sync + 'static,
{
    pub fn new(subscription_repo: Arc<S>, plan_repo: Arc<P>, credit_repo: Arc<C>) -> Self {
        let credits = CreditUseCase::new(credit_repo, Arc::clone(&subscription_repo));
        Self {
            subscription_repo,
            plan_repo,
            credits,
        }
    }

    pub async fn run(&self, params: &RenewalParams) -> Result<RenewalRunResult> {
        let now = Utc::now();
        let due = self
            .subscription_repo
            .list_due_for_renewal(now, params.batch_size)
            .await?;

        let mut result = RenewalRunResult {
            scanned: due.len(),
            ..Default::default()
        };

        for subscription in due {
            if let Err(err) = self.process_one(&subscription, params, &mut result).await {
                error!(
                    subscription_id = %subscription.id,
                    error = ?err,
                    "renewal: failed to process subscription"
                );
            }
        }

        if result.scanned > 0 {
            info!(
                scanned = result.scanned,
                renewed = result.renewed,
                expired = result.expired,
                past_due = result.marked_past_due,
                suspended = result.suspended,
                "renewal: sweep finished"
            );
        }

        Ok(result)
    }

    async fn process_one(
        &self,
        subscription: &SubscriptionEntity,
        params: &RenewalParams,
        result: &mut RenewalRunResult,
    ) -> Result<()> {
        let now = Utc::now();
        let grace = Duration::days(params.grace_days);
        let status = SubscriptionStatus::from_str(&subscription.status);

        match status {
            SubscriptionStatus::Trialing => {
                // Trial ran out without a converted payment: no further
                // grants, the subscription is done.
                if subscription.provider_subscription_id.is_none()
                    || now > subscription.current_period_end + grace
                {
                    self.subscription_repo
                        .update_status(subscription.id, SubscriptionStatus::Expired)
                        .await?;
                    info!(
                        subscription_id = %subscription.id,
                        "renewal: trial expired without payment"
                    );
                    result.expired += 1;
                }
                // Otherwise the gateway webhook is still expected.
            }
            SubscriptionStatus::Active => {
                if subscription.cancelled_at.is_some() || !subscription.auto_renew {
                    // Scheduled cancellation keeps its recorded state; a
                    // plainly non-renewing subscription just runs out.
                    let terminal = if subscription.cancelled_at.is_some() {
                        SubscriptionStatus::Cancelled
                    } else {
                        SubscriptionStatus::Expired
                    };
                    self.subscription_repo
                        .update_status(subscription.id, terminal)
                        .await?;
                    info!(
                        subscription_id = %subscription.id,
                        status = %terminal,
                        "renewal: subscription ended at period close"
                    );
                    result.expired += 1;
                } else if subscription.provider_subscription_id.is_none() {
                    // Locally billed (comped/internal plans): roll the period
                    // here. Gateway-billed periods always come from webhooks.
                    self.renew_locally(subscription).await?;
                    result.renewed += 1;
                } else if now > subscription.current_period_end + grace {
                    // The renewal webhook never arrived within the grace
                    // window.
                    self.subscription_repo
                        .update_status(subscription.id, SubscriptionStatus::PastDue)
                        .await?;
                    warn!(
                        subscription_id = %subscription.id,
                        "renewal: no renewal seen within grace window, past_due"
                    );
                    result.marked_past_due += 1;
                } else {
                    debug!(
                        subscription_id = %subscription.id,
                        "renewal: awaiting gateway renewal"
                    );
                }
            }
            SubscriptionStatus::PastDue => {
                if now > subscription.current_period_end + grace {
                    self.subscription_repo
                        .update_status(subscription.id, SubscriptionStatus::Suspended)
                        .await?;
                    warn!(
                        subscription_id = %subscription.id,
                        "renewal: grace window exhausted, suspended"
                    );
                    result.suspended += 1;
                }
            }
            other => {
                debug!(
                    subscription_id = %subscription.id,
                    status = %other,
                    "renewal: nothing to do"
                );
            }
        }

        Ok(())
    }

    async fn renew_locally(&self, subscription: &SubscriptionEntity) -> Result<()> {
        let plan = self
            .plan_repo
            .find_active_plan_by_id(subscription.plan_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("subscription references an inactive plan"))?;

        // Local renewals are monthly; anything else is gateway-billed.
        let period = BillingPeriod::from_start(
            subscription.current_period_end,
            BillingInterval::Monthly,
        );

        self.subscription_repo
            .activate_period(
                subscription.id,
                period.start,
                period.end,
                SubscriptionStatus::Active,
            )
            .await?;

        let granted = self
            .credits
            .grant_period(subscription, &plan, period)
            .await
            .map_err(|err| anyhow::anyhow!("period grant failed: {err}"))?;

        info!(
            subscription_id = %subscription.id,
            granted,
            period_start = %period.start,
            "renewal: local period rolled"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crates::domain::{
        entities::plans::PlanEntity,
        repositories::{
            credits::MockCreditRepository, plans::MockPlanRepository,
            subscriptions::MockSubscriptionRepository,
        },
        value_objects::{
            credits::LedgerOp, enums::credit_transaction_kinds::CreditTransactionKind,
            plans::PlanFeatures,
        },
    };
    use uuid::Uuid;

    fn params() -> RenewalParams {
        RenewalParams {
            grace_days: 7,
            batch_size: 100,
        }
    }

    fn due_subscription(
        status: SubscriptionStatus,
        provider_subscription_id: Option<&str>,
        auto_renew: bool,
        days_overdue: i64,
    ) -> SubscriptionEntity {
        let now = Utc::now();
        SubscriptionEntity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            status: status.to_string(),
            current_period_start: now - Duration::days(30 + days_overdue),
            current_period_end: now - Duration::days(days_overdue),
            trial_start: None,
            trial_end: None,
            auto_renew,
            cancelled_at: None,
            cancelled_reason: None,
            provider_subscription_id: provider_subscription_id.map(|s| s.to_string()),
            credits_granted: 0,
            credits_used: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_plan(plan_id: Uuid) -> PlanEntity {
        PlanEntity {
            id: plan_id,
            name: "Starter".to_string(),
            monthly_credits: 500,
            trial_days: 0,
            features: PlanFeatures::default(),
            is_active: true,
            is_featured: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn trial_without_payment_expires_and_grants_nothing() {
        let subscription = due_subscription(SubscriptionStatus::Trialing, None, true, 1);
        let subscription_id = subscription.id;

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_list_due_for_renewal()
            .returning(move |_, _| {
                let subscription = subscription.clone();
                Box::pin(async move { Ok(vec![subscription]) })
            });
        subscription_repo
            .expect_update_status()
            .withf(move |id, status| {
                *id == subscription_id && *status == SubscriptionStatus::Expired
            })
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        // No record_transaction expectation: an expired trial must not
        // touch the ledger.
        let credit_repo = MockCreditRepository::new();
        let plan_repo = MockPlanRepository::new();

        let usecase = SubscriptionRenewalUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(plan_repo),
            Arc::new(credit_repo),
        );

        let result = usecase.run(&params()).await.unwrap();
        assert_eq!(result.expired, 1);
        assert_eq!(result.renewed, 0);
    }

    #[tokio::test]
    async fn local_subscription_rolls_period_and_grants_once() {
        let subscription = due_subscription(SubscriptionStatus::Active, None, true, 0);
        let subscription_id = subscription.id;
        let plan = sample_plan(subscription.plan_id);

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_list_due_for_renewal()
            .returning(move |_, _| {
                let subscription = subscription.clone();
                Box::pin(async move { Ok(vec![subscription]) })
            });
        subscription_repo
            .expect_activate_period()
            .withf(move |id, _, _, status| {
                *id == subscription_id && *status == SubscriptionStatus::Active
            })
            .times(1)
            .returning(|_, _, _, _| Box::pin(async { Ok(()) }));
        subscription_repo
            .expect_add_granted_credits()
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let mut plan_repo = MockPlanRepository::new();
        plan_repo
            .expect_find_active_plan_by_id()
            .returning(move |_| {
                let plan = plan.clone();
                Box::pin(async move { Ok(Some(plan)) })
            });

        let mut credit_repo = MockCreditRepository::new();
        credit_repo
            .expect_get_balance()
            .returning(|_| Box::pin(async { Ok(None) }));
        credit_repo
            .expect_record_transaction()
            .withf(|request| {
                matches!(
                    request.op,
                    LedgerOp::Grant {
                        kind: CreditTransactionKind::Subscription,
                        amount: 500,
                        ..
                    }
                )
            })
            .times(1)
            .returning(|request| {
                let user_id = request.user_id;
                Box::pin(async move {
                    Ok(crates::domain::entities::credits::CreditTransactionEntity {
                        id: Uuid::new_v4(),
                        user_id,
                        kind: "subscription".to_string(),
                        amount: 500,
                        balance_before: 0,
                        balance_after: 500,
                        reference_type: Some("subscription_period".to_string()),
                        reference_id: Some("x".to_string()),
                        expires_at: None,
                        description: None,
                        created_at: Utc::now(),
                    })
                })
            });

        let usecase = SubscriptionRenewalUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(plan_repo),
            Arc::new(credit_repo),
        );

        let result = usecase.run(&params()).await.unwrap();
        assert_eq!(result.renewed, 1);
    }

    #[tokio::test]
    async fn past_due_beyond_grace_is_suspended() {
        let subscription =
            due_subscription(SubscriptionStatus::PastDue, Some("sub_123"), true, 10);
        let subscription_id = subscription.id;

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_list_due_for_renewal()
            .returning(move |_, _| {
                let subscription = subscription.clone();
                Box::pin(async move { Ok(vec![subscription]) })
            });
        subscription_repo
            .expect_update_status()
            .withf(move |id, status| {
                *id == subscription_id && *status == SubscriptionStatus::Suspended
            })
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let usecase = SubscriptionRenewalUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(MockPlanRepository::new()),
            Arc::new(MockCreditRepository::new()),
        );

        let result = usecase.run(&params()).await.unwrap();
        assert_eq!(result.suspended, 1);
    }

    #[tokio::test]
    async fn gateway_billed_subscription_within_grace_is_left_alone() {
        let subscription =
            due_subscription(SubscriptionStatus::Active, Some("sub_123"), true, 1);

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_list_due_for_renewal()
            .returning(move |_, _| {
                let subscription = subscription.clone();
                Box::pin(async move { Ok(vec![subscription]) })
            });

        let usecase = SubscriptionRenewalUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(MockPlanRepository::new()),
            Arc::new(MockCreditRepository::new()),
        );

        let result = usecase.run(&params()).await.unwrap();
        assert_eq!(result, RenewalRunResult {
            scanned: 1,
            ..Default::default()
        });
    }
}
