use std::{collections::HashMap, sync::Arc};

use chrono::{Duration, Utc};
use crates::domain::{
    entities::{payments::NewPaymentEntity, subscriptions::InsertSubscriptionEntity},
    repositories::{
        payments::PaymentRepository, plans::PlanRepository, subscriptions::SubscriptionRepository,
    },
    value_objects::{
        enums::{
            billing_intervals::BillingInterval, payment_statuses::PaymentStatus,
            subscription_statuses::SubscriptionStatus,
        },
        plans::PlanDto,
        subscriptions::{CreateCheckoutRequest, CurrentSubscriptionDto},
    },
};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::usecases::payments::{PROVIDER_STRIPE, StripeGateway};

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("plan not found")]
    PlanNotFound,
    #[error("missing or inactive plan price: {0}")]
    MissingPrice(String),
    #[error("invalid subscription request: {0}")]
    InvalidCombination(String),
    #[error("no live subscription to cancel")]
    SubscriptionNotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SubscriptionError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            SubscriptionError::PlanNotFound => StatusCode::NOT_FOUND,
            SubscriptionError::MissingPrice(_) | SubscriptionError::InvalidCombination(_) => {
                StatusCode::BAD_REQUEST
            }
            SubscriptionError::SubscriptionNotFound => StatusCode::NOT_FOUND,
            SubscriptionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, SubscriptionError>;

pub struct SubscriptionUseCase<P, S, Pay, Stripe>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    Pay: PaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    plan_repo: Arc<P>,
    subscription_repo: Arc<S>,
    payment_repo: Arc<Pay>,
    stripe_client: Arc<Stripe>,
}

impl<P, S, Pay, Stripe> SubscriptionUseCase<P, S, Pay, Stripe>
where
    P: PlanRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    Pay: PaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    pub fn new(
        plan_repo: Arc<P>,
        subscription_repo: Arc<S>,
        payment_repo: Arc<Pay>,
        stripe_client: Arc<Stripe>,
    ) -> Self {
        Self {
            plan_repo,
            subscription_repo,
            payment_repo,
            stripe_client,
        }
    }

    pub async fn list_plans(&self) -> UseCaseResult<Vec<PlanDto>> {
        let plans = self
            .plan_repo
            .list_active_plans()
            .await
            .map_err(|err| {
                error!(db_error = ?err, "subscriptions: failed to list active plans");
                SubscriptionError::Internal(err)
            })?;

        let mut dtos = Vec::with_capacity(plans.len());
        for plan in plans {
            let prices = self
                .plan_repo
                .list_active_prices(plan.id)
                .await
                .map_err(|err| {
                    error!(plan_id = %plan.id, db_error = ?err, "subscriptions: failed to load prices");
                    SubscriptionError::Internal(err)
                })?;
            dtos.push(PlanDto::from_entity(plan, prices));
        }

        info!(plan_count = dtos.len(), "subscriptions: active plans loaded");
        Ok(dtos)
    }

    pub async fn current_subscription(
        &self,
        user_id: Uuid,
    ) -> UseCaseResult<Option<CurrentSubscriptionDto>> {
        let subscription = match self
            .subscription_repo
            .find_live_subscription_for_user(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "subscriptions: failed to load current subscription");
                SubscriptionError::Internal(err)
            })? {
            Some(subscription) => subscription,
            None => {
                info!(%user_id, "subscriptions: no live subscription");
                return Ok(None);
            }
        };

        let plan = self
            .plan_repo
            .find_active_plan_by_id(subscription.plan_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    plan_id = %subscription.plan_id,
                    db_error = ?err,
                    "subscriptions: failed to load plan"
                );
                SubscriptionError::Internal(err)
            })?
            .ok_or(SubscriptionError::PlanNotFound)?;

        Ok(Some(CurrentSubscriptionDto::from_entity(
            &subscription,
            plan.name,
            plan.features,
        )))
    }

    /// Opens a Stripe Checkout session for a plan subscription. A pending
    /// subscription and payment row are written up front; the webhook
    /// flips them on completion.
    pub async fn start_checkout(
        &self,
        user_id: Uuid,
        request: CreateCheckoutRequest,
    ) -> UseCaseResult<String> {
        let interval = BillingInterval::from_str(&request.interval).ok_or_else(|| {
            SubscriptionError::InvalidCombination(format!(
                "unknown billing interval: {}",
                request.interval
            ))
        })?;
        let currency = request.currency.trim().to_lowercase();

        info!(
            %user_id,
            plan_id = %request.plan_id,
            %currency,
            interval = %interval,
            "subscriptions: checkout requested"
        );

        let plan = self
            .plan_repo
            .find_active_plan_by_id(request.plan_id)
            .await
            .map_err(SubscriptionError::Internal)?
            .ok_or(SubscriptionError::PlanNotFound)?;

        let price = self
            .plan_repo
            .find_price(plan.id, &currency, interval)
            .await
            .map_err(SubscriptionError::Internal)?
            .ok_or_else(|| {
                SubscriptionError::MissingPrice(format!("{currency}/{interval}"))
            })?;
        let stripe_price_id = price.stripe_price_id.clone().ok_or_else(|| {
            SubscriptionError::MissingPrice(format!("{currency}/{interval} has no gateway price"))
        })?;

        // At most one live subscription per user: an existing one on the
        // same plan is an error, any other is replaced.
        if let Some(current) = self
            .subscription_repo
            .find_live_subscription_for_user(user_id)
            .await
            .map_err(SubscriptionError::Internal)?
        {
            if current.plan_id == plan.id {
                return Err(SubscriptionError::InvalidCombination(
                    "already subscribed to this plan".to_string(),
                ));
            }

            if let Some(provider_subscription_id) = current.provider_subscription_id.as_deref() {
                info!(
                    %user_id,
                    provider_subscription_id,
                    "subscriptions: cancelling previous subscription before checkout"
                );
                self.stripe_client
                    .cancel_subscription(provider_subscription_id)
                    .await
                    .map_err(|err| {
                        error!(
                            %user_id,
                            provider_subscription_id,
                            error = ?err,
                            "subscriptions: failed to cancel previous provider subscription"
                        );
                        SubscriptionError::Internal(err)
                    })?;
            }

            self.subscription_repo
                .mark_cancelled(
                    current.id,
                    Utc::now(),
                    Some("replaced by new checkout".to_string()),
                )
                .await
                .map_err(SubscriptionError::Internal)?;
        }

        let now = Utc::now();
        let (trial_start, trial_end) = if plan.trial_days > 0 {
            (now, Some(now + Duration::days(plan.trial_days.into())))
        } else {
            (now, None)
        };

        // Placeholder period; the completion webhook overwrites it with the
        // gateway's authoritative window.
        let subscription_id = self
            .subscription_repo
            .create(InsertSubscriptionEntity {
                user_id,
                plan_id: plan.id,
                status: SubscriptionStatus::Pending.to_string(),
                current_period_start: now,
                current_period_end: now + Duration::days(interval.period_days()),
                trial_start: trial_end.map(|_| trial_start),
                trial_end,
                auto_renew: true,
                provider_subscription_id: None,
            })
            .await
            .map_err(SubscriptionError::Internal)?;

        let metadata = HashMap::from([
            ("user_id".to_string(), user_id.to_string()),
            ("plan_id".to_string(), plan.id.to_string()),
            ("subscription_id".to_string(), subscription_id.to_string()),
            ("interval".to_string(), interval.to_string()),
        ]);

        let session = self
            .stripe_client
            .create_checkout_session(&stripe_price_id, "subscription", metadata)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    plan_id = %plan.id,
                    error = ?err,
                    "subscriptions: stripe checkout session creation failed"
                );
                SubscriptionError::Internal(err)
            })?;

        self.payment_repo
            .record_payment(NewPaymentEntity {
                user_id,
                subscription_id: Some(subscription_id),
                provider: PROVIDER_STRIPE.to_string(),
                provider_payment_id: None,
                provider_session_ref: Some(session.id.clone()),
                amount_minor: price.amount_minor,
                currency,
                status: PaymentStatus::Pending.to_string(),
                attempts: 0,
                error: None,
            })
            .await
            .map_err(SubscriptionError::Internal)?;

        info!(
            %user_id,
            %subscription_id,
            checkout_session = %session.id,
            "subscriptions: checkout session created"
        );

        Ok(session.url)
    }

    /// Cancels the user's live subscription. When auto-renew was already
    /// disabled the subscription stays usable until the period end;
    /// otherwise cancellation takes effect immediately.
    pub async fn cancel(&self, user_id: Uuid, reason: Option<String>) -> UseCaseResult<()> {
        let subscription = self
            .subscription_repo
            .find_live_subscription_for_user(user_id)
            .await
            .map_err(SubscriptionError::Internal)?
            .ok_or_else(|| {
                warn!(%user_id, "subscriptions: no live subscription to cancel");
                SubscriptionError::SubscriptionNotFound
            })?;

        if let Some(provider_subscription_id) = subscription.provider_subscription_id.as_deref() {
            self.stripe_client
                .cancel_subscription(provider_subscription_id)
                .await
                .map_err(|err| {
                    error!(
                        %user_id,
                        provider_subscription_id,
                        error = ?err,
                        "subscriptions: stripe cancel failed"
                    );
                    SubscriptionError::Internal(err)
                })?;
        }

        let now = Utc::now();
        if subscription.auto_renew {
            self.subscription_repo
                .mark_cancelled(subscription.id, now, reason)
                .await
                .map_err(SubscriptionError::Internal)?;
            info!(
                %user_id,
                subscription_id = %subscription.id,
                "subscriptions: cancelled immediately"
            );
        } else {
            self.subscription_repo
                .schedule_cancellation(subscription.id, now, reason)
                .await
                .map_err(SubscriptionError::Internal)?;
            info!(
                %user_id,
                subscription_id = %subscription.id,
                until = %subscription.current_period_end,
                "subscriptions: cancellation scheduled for period end"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crates::domain::{
        entities::{
            plans::{PlanEntity, PlanPriceEntity},
            subscriptions::SubscriptionEntity,
        },
        repositories::{
            payments::MockPaymentRepository, plans::MockPlanRepository,
            subscriptions::MockSubscriptionRepository,
        },
        value_objects::plans::PlanFeatures,
    };
    use crate::usecases::payments::MockStripeGateway;
    use crates::payments::stripe_client::CheckoutSessionRef;
    use mockall::predicate::eq;

    fn sample_plan(trial_days: i32) -> PlanEntity {
        PlanEntity {
            id: Uuid::new_v4(),
            name: "Pro".to_string(),
            monthly_credits: 1000,
            trial_days,
            features: PlanFeatures::default(),
            is_active: true,
            is_featured: true,
            created_at: Utc::now(),
        }
    }

    fn sample_price(plan_id: Uuid) -> PlanPriceEntity {
        PlanPriceEntity {
            id: Uuid::new_v4(),
            plan_id,
            currency: "usd".to_string(),
            interval: "monthly".to_string(),
            amount_minor: 1999,
            stripe_price_id: Some("price_123".to_string()),
            is_active: true,
        }
    }

    fn sample_subscription(user_id: Uuid, plan_id: Uuid, auto_renew: bool) -> SubscriptionEntity {
        let now = Utc::now();
        SubscriptionEntity {
            id: Uuid::new_v4(),
            user_id,
            plan_id,
            status: SubscriptionStatus::Active.to_string(),
            current_period_start: now - Duration::days(10),
            current_period_end: now + Duration::days(20),
            trial_start: None,
            trial_end: None,
            auto_renew,
            cancelled_at: None,
            cancelled_reason: None,
            provider_subscription_id: Some("sub_123".to_string()),
            credits_granted: 1000,
            credits_used: 250,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn checkout_rejects_missing_price() {
        let plan = sample_plan(0);
        let plan_id = plan.id;

        let mut plan_repo = MockPlanRepository::new();
        plan_repo
            .expect_find_active_plan_by_id()
            .with(eq(plan_id))
            .returning(move |_| {
                let plan = plan.clone();
                Box::pin(async move { Ok(Some(plan)) })
            });
        plan_repo
            .expect_find_price()
            .returning(|_, _, _| Box::pin(async { Ok(None) }));

        let usecase = SubscriptionUseCase::new(
            Arc::new(plan_repo),
            Arc::new(MockSubscriptionRepository::new()),
            Arc::new(MockPaymentRepository::new()),
            Arc::new(MockStripeGateway::new()),
        );

        let result = usecase
            .start_checkout(
                Uuid::new_v4(),
                CreateCheckoutRequest {
                    plan_id,
                    currency: "thb".to_string(),
                    interval: "monthly".to_string(),
                },
            )
            .await;

        assert!(matches!(result, Err(SubscriptionError::MissingPrice(_))));
    }

    #[tokio::test]
    async fn checkout_creates_pending_subscription_and_payment() {
        let user_id = Uuid::new_v4();
        let plan = sample_plan(14);
        let plan_id = plan.id;
        let price = sample_price(plan_id);

        let mut plan_repo = MockPlanRepository::new();
        plan_repo
            .expect_find_active_plan_by_id()
            .returning(move |_| {
                let plan = plan.clone();
                Box::pin(async move { Ok(Some(plan)) })
            });
        plan_repo.expect_find_price().returning(move |_, _, _| {
            let price = price.clone();
            Box::pin(async move { Ok(Some(price)) })
        });

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_live_subscription_for_user()
            .returning(|_| Box::pin(async { Ok(None) }));
        subscription_repo
            .expect_create()
            .withf(|entity| {
                entity.status == "pending" && entity.trial_end.is_some() && entity.auto_renew
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(Uuid::new_v4()) }));

        let mut payment_repo = MockPaymentRepository::new();
        payment_repo
            .expect_record_payment()
            .withf(|payment| {
                payment.status == "pending"
                    && payment.provider_session_ref.as_deref() == Some("cs_123")
                    && payment.amount_minor == 1999
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(Uuid::new_v4()) }));

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_create_checkout_session()
            .withf(|price_id, mode, metadata| {
                price_id == "price_123"
                    && mode == "subscription"
                    && metadata.contains_key("subscription_id")
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(CheckoutSessionRef {
                    id: "cs_123".to_string(),
                    url: "https://checkout.stripe.com/cs_123".to_string(),
                })
            });

        let usecase = SubscriptionUseCase::new(
            Arc::new(plan_repo),
            Arc::new(subscription_repo),
            Arc::new(payment_repo),
            Arc::new(stripe),
        );

        let url = usecase
            .start_checkout(
                user_id,
                CreateCheckoutRequest {
                    plan_id,
                    currency: "USD".to_string(),
                    interval: "monthly".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(url, "https://checkout.stripe.com/cs_123");
    }

    #[tokio::test]
    async fn cancel_with_auto_renew_is_immediate() {
        let user_id = Uuid::new_v4();
        let subscription = sample_subscription(user_id, Uuid::new_v4(), true);
        let subscription_id = subscription.id;

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_live_subscription_for_user()
            .with(eq(user_id))
            .returning(move |_| {
                let subscription = subscription.clone();
                Box::pin(async move { Ok(Some(subscription)) })
            });
        subscription_repo
            .expect_mark_cancelled()
            .withf(move |id, _, reason| {
                *id == subscription_id && reason.as_deref() == Some("too expensive")
            })
            .times(1)
            .returning(|_, _, _| Box::pin(async { Ok(()) }));

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_cancel_subscription()
            .with(eq("sub_123"))
            .times(1)
            .returning(|_| Ok(()));

        let usecase = SubscriptionUseCase::new(
            Arc::new(MockPlanRepository::new()),
            Arc::new(subscription_repo),
            Arc::new(MockPaymentRepository::new()),
            Arc::new(stripe),
        );

        usecase
            .cancel(user_id, Some("too expensive".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_without_auto_renew_is_scheduled() {
        let user_id = Uuid::new_v4();
        let subscription = sample_subscription(user_id, Uuid::new_v4(), false);
        let subscription_id = subscription.id;

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_live_subscription_for_user()
            .returning(move |_| {
                let subscription = subscription.clone();
                Box::pin(async move { Ok(Some(subscription)) })
            });
        subscription_repo
            .expect_schedule_cancellation()
            .withf(move |id, _, _| *id == subscription_id)
            .times(1)
            .returning(|_, _, _| Box::pin(async { Ok(()) }));

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_cancel_subscription()
            .returning(|_| Ok(()));

        let usecase = SubscriptionUseCase::new(
            Arc::new(MockPlanRepository::new()),
            Arc::new(subscription_repo),
            Arc::new(MockPaymentRepository::new()),
            Arc::new(stripe),
        );

        usecase.cancel(user_id, None).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_without_live_subscription_is_not_found() {
        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_live_subscription_for_user()
            .returning(|_| Box::pin(async { Ok(None) }));

        let usecase = SubscriptionUseCase::new(
            Arc::new(MockPlanRepository::new()),
            Arc::new(subscription_repo),
            Arc::new(MockPaymentRepository::new()),
            Arc::new(MockStripeGateway::new()),
        );

        let result = usecase.cancel(Uuid::new_v4(), None).await;
        assert!(matches!(
            result,
            Err(SubscriptionError::SubscriptionNotFound)
        ));
    }
}
