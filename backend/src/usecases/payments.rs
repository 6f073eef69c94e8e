use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use crates::{
    domain::{
        entities::{payments::NewPaymentEntity, subscriptions::SubscriptionEntity},
        repositories::{
            credits::CreditRepository, payments::PaymentRepository, plans::PlanRepository,
            subscriptions::SubscriptionRepository,
        },
        value_objects::{
            enums::{
                payment_statuses::PaymentStatus, subscription_statuses::SubscriptionStatus,
            },
            subscriptions::BillingPeriod,
        },
    },
    payments::stripe_client::{
        CheckoutSessionRef, StripeClient, StripeEvent, StripeSubscription,
    },
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::usecases::credits::{CreditError, CreditUseCase};

pub const PROVIDER_STRIPE: &str = "stripe";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StripeGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        price_id: &str,
        mode: &str,
        metadata: HashMap<String, String>,
    ) -> AnyResult<CheckoutSessionRef>;

    async fn cancel_subscription(&self, provider_subscription_id: &str) -> AnyResult<()>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent>;

    async fn retrieve_subscription(&self, subscription_id: &str) -> AnyResult<StripeSubscription>;

    async fn create_refund(
        &self,
        payment_intent: &str,
        amount_minor: Option<i64>,
    ) -> AnyResult<String>;
}

#[async_trait]
impl StripeGateway for StripeClient {
    async fn create_checkout_session(
        &self,
        price_id: &str,
        mode: &str,
        metadata: HashMap<String, String>,
    ) -> AnyResult<CheckoutSessionRef> {
        self.create_checkout_session(price_id, mode, None, metadata)
            .await
    }

    async fn cancel_subscription(&self, provider_subscription_id: &str) -> AnyResult<()> {
        self.cancel_subscription(provider_subscription_id).await
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent> {
        self.verify_webhook_signature(payload, signature)
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> AnyResult<StripeSubscription> {
        self.retrieve_subscription(subscription_id).await
    }

    async fn create_refund(
        &self,
        payment_intent: &str,
        amount_minor: Option<i64>,
    ) -> AnyResult<String> {
        self.create_refund(payment_intent, amount_minor).await
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid webhook payload: {0}")]
    InvalidWebhook(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("payment not found")]
    NotFound,
    #[error("invalid payment state: {0}")]
    InvalidState(String),
    #[error("payment gateway failure: {0}")]
    Gateway(anyhow::Error),
    #[error(transparent)]
    Credit(#[from] CreditError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PaymentError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            PaymentError::InvalidWebhook(_) | PaymentError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            PaymentError::NotFound => StatusCode::NOT_FOUND,
            PaymentError::InvalidState(_) => StatusCode::CONFLICT,
            PaymentError::Gateway(_) => StatusCode::BAD_GATEWAY,
            PaymentError::Credit(err) => err.status_code(),
            PaymentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type PaymentResult<T> = std::result::Result<T, PaymentError>;

pub struct PaymentUseCase<P, S, Pl, C, G>
where
    P: PaymentRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    Pl: PlanRepository + Send + Sync + 'static,
    C: CreditRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    payment_repo: Arc<P>,
    subscription_repo: Arc<S>,
    plan_repo: Arc<Pl>,
    credits: CreditUseCase<C, S>,
    stripe_client: Arc<G>,
}

impl<P, S, Pl, C, G> PaymentUseCase<P, S, Pl, C, G>
where
    P: PaymentRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
    Pl: PlanRepository + Send + Sync + 'static,
    C: CreditRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    pub fn new(
        payment_repo: Arc<P>,
        subscription_repo: Arc<S>,
        plan_repo: Arc<Pl>,
        credit_repo: Arc<C>,
        stripe_client: Arc<G>,
    ) -> Self {
        let credits = CreditUseCase::new(credit_repo, Arc::clone(&subscription_repo));
        Self {
            payment_repo,
            subscription_repo,
            plan_repo,
            credits,
            stripe_client,
        }
    }

    /// Verifies and dispatches one gateway webhook. Every handled event is
    /// effectively applied at most once; replays fall out as no-ops.
    pub async fn handle_stripe_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<()> {
        let event = self
            .stripe_client
            .verify_webhook_signature(payload, signature)
            .map_err(|err| {
                warn!(error = %err, "payments: stripe webhook verification failed");
                PaymentError::InvalidWebhook("signature verification failed".to_string())
            })?;

        let event_type = event.type_.clone();
        info!(event_type = %event_type, event_id = ?event.id, "payments: stripe webhook verified");

        match event_type.as_str() {
            "checkout.session.completed" => self.handle_checkout_completed(&event).await?,
            "invoice.payment_succeeded" => self.handle_invoice_paid(&event).await?,
            "invoice.payment_failed" => self.handle_invoice_failed(&event).await?,
            "customer.subscription.deleted" => self.handle_subscription_deleted(&event).await?,
            _ => {
                debug!("unhandled stripe event type: {:?}", event_type);
            }
        }

        Ok(())
    }

    async fn handle_checkout_completed(&self, event: &StripeEvent) -> PaymentResult<()> {
        let session = StripeClient::extract_checkout_session(event).ok_or_else(|| {
            PaymentError::InvalidWebhook("missing checkout session".to_string())
        })?;

        let metadata = session
            .metadata
            .clone()
            .ok_or_else(|| PaymentError::InvalidWebhook("missing metadata".to_string()))?;

        let user_id = metadata
            .get("user_id")
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| PaymentError::InvalidWebhook("missing user_id".to_string()))?;

        let session_ref = session.id.clone().unwrap_or_default();
        let payment_intent = session.payment_intent.clone();
        let amount_minor = session
            .amount_total
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(0);
        let currency = session.currency.clone().unwrap_or_else(|| "usd".to_string());

        // Idempotence: a completed payment row for this session means the
        // whole event has been applied before.
        let payment_id = match self
            .payment_repo
            .find_by_provider_session_ref(&session_ref)
            .await
            .map_err(PaymentError::Internal)?
        {
            Some(payment) if PaymentStatus::from_str(&payment.status).is_settled() => {
                debug!(%user_id, %session_ref, "payments: checkout webhook replayed, no-op");
                return Ok(());
            }
            Some(payment) => {
                self.payment_repo
                    .update_status(
                        payment.id,
                        PaymentStatus::Completed,
                        payment_intent.clone(),
                        None,
                    )
                    .await
                    .map_err(PaymentError::Internal)?;
                payment.id
            }
            None => self
                .payment_repo
                .record_payment(NewPaymentEntity {
                    user_id,
                    subscription_id: None,
                    provider: PROVIDER_STRIPE.to_string(),
                    provider_payment_id: payment_intent.clone(),
                    provider_session_ref: Some(session_ref.clone()),
                    amount_minor,
                    currency,
                    status: PaymentStatus::Completed.to_string(),
                    attempts: 1,
                    error: None,
                })
                .await
                .map_err(PaymentError::Internal)?,
        };

        match session.mode.as_deref() {
            Some("subscription") => {
                self.activate_subscription_from_checkout(&metadata, &session.subscription)
                    .await?;
            }
            Some("payment") => {
                // One-time credit pack: the purchased amount travels in the
                // session metadata.
                let credits = metadata
                    .get("credits")
                    .and_then(|v| v.parse::<i64>().ok())
                    .ok_or_else(|| {
                        PaymentError::InvalidWebhook("missing credits in metadata".to_string())
                    })?;

                self.credits
                    .grant_purchase(user_id, credits, payment_id)
                    .await?;
            }
            other => {
                warn!(%user_id, mode = ?other, "payments: unknown checkout session mode");
                return Err(PaymentError::InvalidWebhook(
                    "unknown checkout session mode".to_string(),
                ));
            }
        }

        info!(%user_id, %session_ref, "payments: checkout webhook processed");
        Ok(())
    }

    async fn activate_subscription_from_checkout(
        &self,
        metadata: &HashMap<String, String>,
        provider_subscription_id: &Option<String>,
    ) -> PaymentResult<()> {
        let subscription_id = metadata
            .get("subscription_id")
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| {
                PaymentError::InvalidWebhook("missing subscription_id".to_string())
            })?;

        let subscription = self
            .subscription_repo
            .find_by_id(subscription_id)
            .await
            .map_err(PaymentError::Internal)?
            .ok_or_else(|| {
                PaymentError::InvalidWebhook("unknown subscription in metadata".to_string())
            })?;

        let provider_subscription_id = provider_subscription_id.clone().ok_or_else(|| {
            PaymentError::InvalidWebhook("subscription id missing on session".to_string())
        })?;

        self.subscription_repo
            .set_provider_subscription_id(subscription.id, provider_subscription_id.clone())
            .await
            .map_err(PaymentError::Internal)?;

        let stripe_subscription = self
            .stripe_client
            .retrieve_subscription(&provider_subscription_id)
            .await
            .map_err(PaymentError::Gateway)?;
        let period = Self::period_from_stripe(&stripe_subscription)?;

        let now = Utc::now();
        let target = if subscription.in_trial(now) {
            SubscriptionStatus::Trialing
        } else {
            SubscriptionStatus::Active
        };

        self.transition_and_grant(&subscription, target, period).await
    }

    async fn handle_invoice_paid(&self, event: &StripeEvent) -> PaymentResult<()> {
        let invoice = StripeClient::extract_invoice(event)
            .ok_or_else(|| PaymentError::InvalidWebhook("invalid invoice payload".to_string()))?;

        let provider_subscription_id = invoice.subscription.clone().ok_or_else(|| {
            PaymentError::InvalidWebhook("invoice missing subscription id".to_string())
        })?;

        let Some(subscription) = self
            .subscription_repo
            .find_by_provider_subscription_id(&provider_subscription_id)
            .await
            .map_err(PaymentError::Internal)?
        else {
            warn!(
                %provider_subscription_id,
                "payments: invoice for unknown subscription, ignoring"
            );
            return Ok(());
        };

        // The payment intent is the renewal's idempotence key.
        if let Some(payment_intent) = invoice.payment_intent.as_deref() {
            if self
                .payment_repo
                .find_by_provider_payment_id(payment_intent)
                .await
                .map_err(PaymentError::Internal)?
                .is_some()
            {
                debug!(%payment_intent, "payments: renewal invoice replayed, no-op");
                return Ok(());
            }
        }

        let stripe_subscription = self
            .stripe_client
            .retrieve_subscription(&provider_subscription_id)
            .await
            .map_err(PaymentError::Gateway)?;
        let period = Self::period_from_stripe(&stripe_subscription)?;

        self.transition_and_grant(&subscription, SubscriptionStatus::Active, period)
            .await?;

        let amount_minor = invoice
            .amount_paid
            .or(invoice.amount_due)
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(0);

        self.payment_repo
            .record_payment(NewPaymentEntity {
                user_id: subscription.user_id,
                subscription_id: Some(subscription.id),
                provider: PROVIDER_STRIPE.to_string(),
                provider_payment_id: invoice.payment_intent.clone(),
                provider_session_ref: None,
                amount_minor,
                currency: invoice.currency.clone().unwrap_or_else(|| "usd".to_string()),
                status: PaymentStatus::Completed.to_string(),
                attempts: 1,
                error: None,
            })
            .await
            .map_err(PaymentError::Internal)?;

        info!(
            subscription_id = %subscription.id,
            "payments: renewal invoice processed"
        );
        Ok(())
    }

    async fn handle_invoice_failed(&self, event: &StripeEvent) -> PaymentResult<()> {
        let invoice = StripeClient::extract_invoice(event)
            .ok_or_else(|| PaymentError::InvalidWebhook("invalid invoice payload".to_string()))?;

        let provider_subscription_id = invoice.subscription.clone().ok_or_else(|| {
            PaymentError::InvalidWebhook("invoice missing subscription id".to_string())
        })?;

        let Some(subscription) = self
            .subscription_repo
            .find_by_provider_subscription_id(&provider_subscription_id)
            .await
            .map_err(PaymentError::Internal)?
        else {
            warn!(
                %provider_subscription_id,
                "payments: failed invoice for unknown subscription, ignoring"
            );
            return Ok(());
        };

        let current = SubscriptionStatus::from_str(&subscription.status);
        if current.can_transition_to(SubscriptionStatus::PastDue) {
            self.subscription_repo
                .update_status(subscription.id, SubscriptionStatus::PastDue)
                .await
                .map_err(PaymentError::Internal)?;
            warn!(
                subscription_id = %subscription.id,
                "payments: renewal charge failed, subscription past_due"
            );
        }

        let error_message = "invoice payment failed".to_string();
        match invoice.payment_intent.as_deref() {
            Some(payment_intent) => {
                match self
                    .payment_repo
                    .find_by_provider_payment_id(payment_intent)
                    .await
                    .map_err(PaymentError::Internal)?
                {
                    Some(payment) => {
                        self.payment_repo
                            .increment_attempts(payment.id)
                            .await
                            .map_err(PaymentError::Internal)?;
                        self.payment_repo
                            .update_status(
                                payment.id,
                                PaymentStatus::Failed,
                                None,
                                Some(error_message),
                            )
                            .await
                            .map_err(PaymentError::Internal)?;
                    }
                    None => {
                        self.record_failed_renewal(&subscription, &invoice.payment_intent, error_message)
                            .await?;
                    }
                }
            }
            None => {
                self.record_failed_renewal(&subscription, &None, error_message)
                    .await?;
            }
        }

        Ok(())
    }

    async fn record_failed_renewal(
        &self,
        subscription: &SubscriptionEntity,
        payment_intent: &Option<String>,
        error_message: String,
    ) -> PaymentResult<()> {
        self.payment_repo
            .record_payment(NewPaymentEntity {
                user_id: subscription.user_id,
                subscription_id: Some(subscription.id),
                provider: PROVIDER_STRIPE.to_string(),
                provider_payment_id: payment_intent.clone(),
                provider_session_ref: None,
                amount_minor: 0,
                currency: "usd".to_string(),
                status: PaymentStatus::Failed.to_string(),
                attempts: 1,
                error: Some(error_message),
            })
            .await
            .map_err(PaymentError::Internal)?;
        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: &StripeEvent) -> PaymentResult<()> {
        #[derive(serde::Deserialize)]
        struct SubscriptionObject {
            id: Option<String>,
        }

        let object: SubscriptionObject = serde_json::from_value(event.data.object.clone())
            .map_err(|_| {
                PaymentError::InvalidWebhook("invalid subscription payload".to_string())
            })?;

        let provider_subscription_id = object.id.ok_or_else(|| {
            PaymentError::InvalidWebhook("missing subscription id".to_string())
        })?;

        let Some(subscription) = self
            .subscription_repo
            .find_by_provider_subscription_id(&provider_subscription_id)
            .await
            .map_err(PaymentError::Internal)?
        else {
            warn!(
                %provider_subscription_id,
                "payments: deletion for unknown subscription, ignoring"
            );
            return Ok(());
        };

        let current = SubscriptionStatus::from_str(&subscription.status);
        if current.is_terminal() {
            debug!(
                subscription_id = %subscription.id,
                status = %current,
                "payments: subscription already terminal, no-op"
            );
            return Ok(());
        }

        self.subscription_repo
            .update_status(subscription.id, SubscriptionStatus::Expired)
            .await
            .map_err(PaymentError::Internal)?;

        info!(
            subscription_id = %subscription.id,
            "payments: subscription expired from gateway webhook"
        );
        Ok(())
    }

    /// Refunds a completed payment and reclaims the credits that payment
    /// had granted, pro-rated by the refunded amount.
    pub async fn refund(
        &self,
        payment_id: Uuid,
        amount_minor: Option<i32>,
    ) -> PaymentResult<i32> {
        let payment = self
            .payment_repo
            .find_by_id(payment_id)
            .await
            .map_err(PaymentError::Internal)?
            .ok_or(PaymentError::NotFound)?;

        if PaymentStatus::from_str(&payment.status) != PaymentStatus::Completed {
            return Err(PaymentError::InvalidState(format!(
                "only completed payments can be refunded, status is {}",
                payment.status
            )));
        }

        let payment_intent = payment.provider_payment_id.clone().ok_or_else(|| {
            PaymentError::InvalidState("payment has no gateway transaction id".to_string())
        })?;

        let refunded_minor = amount_minor.unwrap_or(payment.amount_minor);
        if refunded_minor <= 0 || refunded_minor > payment.amount_minor {
            return Err(PaymentError::Validation(format!(
                "refund amount must be within 1..={}",
                payment.amount_minor
            )));
        }

        if let Err(err) = self
            .stripe_client
            .create_refund(
                &payment_intent,
                amount_minor.map(|v| v as i64),
            )
            .await
        {
            // Record the failure on the payment row for audit before
            // surfacing it.
            error!(%payment_id, error = ?err, "payments: gateway refund failed");
            self.payment_repo
                .update_status(
                    payment.id,
                    PaymentStatus::Completed,
                    None,
                    Some(format!("refund failed: {err}")),
                )
                .await
                .map_err(PaymentError::Internal)?;
            return Err(PaymentError::Gateway(err));
        }

        self.payment_repo
            .update_status(payment.id, PaymentStatus::Refunded, None, None)
            .await
            .map_err(PaymentError::Internal)?;

        if let Some(grant) = self.credits.granted_for_payment(payment_id).await? {
            let credits_to_reclaim = if payment.amount_minor > 0 {
                grant.amount * refunded_minor as i64 / payment.amount_minor as i64
            } else {
                grant.amount
            };
            if credits_to_reclaim > 0 {
                let reclaimed = self
                    .credits
                    .reclaim_for_refund(payment.user_id, credits_to_reclaim, payment_id)
                    .await?;
                info!(%payment_id, reclaimed, "payments: refund reclaim applied");
            }
        }

        info!(%payment_id, refunded_minor, "payments: refund completed");
        Ok(refunded_minor)
    }

    /// Period activation plus the exactly-once credit grant. Skips the
    /// status write when the transition is illegal (e.g. replay into a
    /// terminal state) but never grants in that case either.
    async fn transition_and_grant(
        &self,
        subscription: &SubscriptionEntity,
        target: SubscriptionStatus,
        period: BillingPeriod,
    ) -> PaymentResult<()> {
        let current = SubscriptionStatus::from_str(&subscription.status);
        if current != target && !current.can_transition_to(target) {
            warn!(
                subscription_id = %subscription.id,
                from = %current,
                to = %target,
                "payments: illegal subscription transition, skipping"
            );
            return Ok(());
        }

        self.subscription_repo
            .activate_period(subscription.id, period.start, period.end, target)
            .await
            .map_err(PaymentError::Internal)?;

        let plan = self
            .plan_repo
            .find_active_plan_by_id(subscription.plan_id)
            .await
            .map_err(PaymentError::Internal)?
            .ok_or_else(|| {
                PaymentError::InvalidState("subscription references an inactive plan".to_string())
            })?;

        self.credits
            .grant_period(subscription, &plan, period)
            .await?;

        Ok(())
    }

    fn period_from_stripe(subscription: &StripeSubscription) -> PaymentResult<BillingPeriod> {
        let start = subscription
            .period_start()
            .and_then(Self::ts_to_datetime)
            .ok_or_else(|| {
                PaymentError::InvalidWebhook("period start missing on subscription".to_string())
            })?;
        let end = subscription
            .period_end()
            .and_then(Self::ts_to_datetime)
            .ok_or_else(|| {
                PaymentError::InvalidWebhook("period end missing on subscription".to_string())
            })?;

        Ok(BillingPeriod { start, end })
    }

    fn ts_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(ts, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crates::domain::{
        entities::payments::PaymentEntity,
        repositories::{
            credits::MockCreditRepository, payments::MockPaymentRepository,
            plans::MockPlanRepository, subscriptions::MockSubscriptionRepository,
        },
    };
    use mockall::predicate::eq;
    use serde_json::json;

    fn sample_subscription(status: SubscriptionStatus) -> SubscriptionEntity {
        let now = Utc::now();
        SubscriptionEntity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            status: status.to_string(),
            current_period_start: now - Duration::days(30),
            current_period_end: now,
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

    fn event(type_: &str, object: serde_json::Value) -> StripeEvent {
        serde_json::from_value(json!({
            "id": "evt_1",
            "type": type_,
            "data": { "object": object }
        }))
        .unwrap()
    }

    fn usecase_with(
        payment_repo: MockPaymentRepository,
        subscription_repo: MockSubscriptionRepository,
        plan_repo: MockPlanRepository,
        credit_repo: MockCreditRepository,
        stripe: MockStripeGateway,
    ) -> PaymentUseCase<
        MockPaymentRepository,
        MockSubscriptionRepository,
        MockPlanRepository,
        MockCreditRepository,
        MockStripeGateway,
    > {
        PaymentUseCase::new(
            Arc::new(payment_repo),
            Arc::new(subscription_repo),
            Arc::new(plan_repo),
            Arc::new(credit_repo),
            Arc::new(stripe),
        )
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_is_rejected() {
        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_verify_webhook_signature()
            .returning(|_, _| Err(anyhow::anyhow!("bad signature")));

        let usecase = usecase_with(
            MockPaymentRepository::new(),
            MockSubscriptionRepository::new(),
            MockPlanRepository::new(),
            MockCreditRepository::new(),
            stripe,
        );

        let result = usecase.handle_stripe_webhook(b"{}", "t=1,v1=bad").await;
        assert!(matches!(result, Err(PaymentError::InvalidWebhook(_))));
    }

    #[tokio::test]
    async fn failed_invoice_moves_active_subscription_to_past_due() {
        let subscription = sample_subscription(SubscriptionStatus::Active);
        let subscription_id = subscription.id;

        let mut stripe = MockStripeGateway::new();
        stripe.expect_verify_webhook_signature().returning(|_, _| {
            Ok(event(
                "invoice.payment_failed",
                json!({ "id": "in_1", "subscription": "sub_123" }),
            ))
        });

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_provider_subscription_id()
            .with(eq("sub_123"))
            .returning(move |_| {
                let subscription = subscription.clone();
                Box::pin(async move { Ok(Some(subscription)) })
            });
        subscription_repo
            .expect_update_status()
            .withf(move |id, status| {
                *id == subscription_id && *status == SubscriptionStatus::PastDue
            })
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let mut payment_repo = MockPaymentRepository::new();
        payment_repo
            .expect_record_payment()
            .withf(|payment| payment.status == "failed" && payment.error.is_some())
            .times(1)
            .returning(|_| Box::pin(async { Ok(Uuid::new_v4()) }));

        let usecase = usecase_with(
            payment_repo,
            subscription_repo,
            MockPlanRepository::new(),
            MockCreditRepository::new(),
            stripe,
        );

        usecase.handle_stripe_webhook(b"{}", "sig").await.unwrap();
    }

    #[tokio::test]
    async fn subscription_deleted_expires_non_terminal_subscription() {
        let subscription = sample_subscription(SubscriptionStatus::Active);
        let subscription_id = subscription.id;

        let mut stripe = MockStripeGateway::new();
        stripe.expect_verify_webhook_signature().returning(|_, _| {
            Ok(event(
                "customer.subscription.deleted",
                json!({ "id": "sub_123" }),
            ))
        });

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_provider_subscription_id()
            .returning(move |_| {
                let subscription = subscription.clone();
                Box::pin(async move { Ok(Some(subscription)) })
            });
        subscription_repo
            .expect_update_status()
            .withf(move |id, status| {
                *id == subscription_id && *status == SubscriptionStatus::Expired
            })
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let usecase = usecase_with(
            MockPaymentRepository::new(),
            subscription_repo,
            MockPlanRepository::new(),
            MockCreditRepository::new(),
            stripe,
        );

        usecase.handle_stripe_webhook(b"{}", "sig").await.unwrap();
    }

    #[tokio::test]
    async fn subscription_deleted_is_a_no_op_on_terminal_state() {
        let subscription = sample_subscription(SubscriptionStatus::Cancelled);

        let mut stripe = MockStripeGateway::new();
        stripe.expect_verify_webhook_signature().returning(|_, _| {
            Ok(event(
                "customer.subscription.deleted",
                json!({ "id": "sub_123" }),
            ))
        });

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_provider_subscription_id()
            .returning(move |_| {
                let subscription = subscription.clone();
                Box::pin(async move { Ok(Some(subscription)) })
            });
        // No update_status expectation: terminal states stay put.

        let usecase = usecase_with(
            MockPaymentRepository::new(),
            subscription_repo,
            MockPlanRepository::new(),
            MockCreditRepository::new(),
            stripe,
        );

        usecase.handle_stripe_webhook(b"{}", "sig").await.unwrap();
    }

    #[tokio::test]
    async fn refund_rejects_non_completed_payment() {
        let payment_id = Uuid::new_v4();
        let payment = PaymentEntity {
            id: payment_id,
            user_id: Uuid::new_v4(),
            subscription_id: None,
            provider: PROVIDER_STRIPE.to_string(),
            provider_payment_id: Some("pi_1".to_string()),
            provider_session_ref: None,
            amount_minor: 999,
            currency: "usd".to_string(),
            status: PaymentStatus::Pending.to_string(),
            attempts: 1,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let mut payment_repo = MockPaymentRepository::new();
        payment_repo
            .expect_find_by_id()
            .with(eq(payment_id))
            .returning(move |_| {
                let payment = payment.clone();
                Box::pin(async move { Ok(Some(payment)) })
            });

        let usecase = usecase_with(
            payment_repo,
            MockSubscriptionRepository::new(),
            MockPlanRepository::new(),
            MockCreditRepository::new(),
            MockStripeGateway::new(),
        );

        let result = usecase.refund(payment_id, None).await;
        assert!(matches!(result, Err(PaymentError::InvalidState(_))));
    }

    #[tokio::test]
    async fn full_refund_reclaims_granted_credits() {
        let payment_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let payment = PaymentEntity {
            id: payment_id,
            user_id,
            subscription_id: None,
            provider: PROVIDER_STRIPE.to_string(),
            provider_payment_id: Some("pi_1".to_string()),
            provider_session_ref: None,
            amount_minor: 1000,
            currency: "usd".to_string(),
            status: PaymentStatus::Completed.to_string(),
            attempts: 1,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let mut payment_repo = MockPaymentRepository::new();
        payment_repo
            .expect_find_by_id()
            .returning(move |_| {
                let payment = payment.clone();
                Box::pin(async move { Ok(Some(payment)) })
            });
        payment_repo
            .expect_update_status()
            .withf(|_, status, _, _| *status == PaymentStatus::Refunded)
            .times(1)
            .returning(|_, _, _, _| Box::pin(async { Ok(()) }));

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_create_refund()
            .with(eq("pi_1"), eq(None))
            .times(1)
            .returning(|_, _| Ok("re_1".to_string()));

        let mut credit_repo = MockCreditRepository::new();
        // The original purchase granted 500 credits.
        credit_repo
            .expect_find_by_reference()
            .returning(move |_, _| {
                let grant = crates::domain::entities::credits::CreditTransactionEntity {
                    id: Uuid::new_v4(),
                    user_id,
                    kind: "purchase".to_string(),
                    amount: 500,
                    balance_before: 0,
                    balance_after: 500,
                    reference_type: Some("payment".to_string()),
                    reference_id: Some(payment_id.to_string()),
                    expires_at: None,
                    description: None,
                    created_at: Utc::now(),
                };
                Box::pin(async move { Ok(Some(grant)) })
            });
        credit_repo
            .expect_record_transaction()
            .withf(|request| {
                matches!(
                    request.op,
                    crates::domain::value_objects::credits::LedgerOp::Reclaim { amount: 500 }
                )
            })
            .times(1)
            .returning(move |_| {
                let reclaim = crates::domain::entities::credits::CreditTransactionEntity {
                    id: Uuid::new_v4(),
                    user_id,
                    kind: "refund".to_string(),
                    amount: -500,
                    balance_before: 500,
                    balance_after: 0,
                    reference_type: Some("refund".to_string()),
                    reference_id: Some(payment_id.to_string()),
                    expires_at: None,
                    description: None,
                    created_at: Utc::now(),
                };
                Box::pin(async move { Ok(reclaim) })
            });

        let usecase = usecase_with(
            payment_repo,
            MockSubscriptionRepository::new(),
            MockPlanRepository::new(),
            credit_repo,
            stripe,
        );

        let refunded = usecase.refund(payment_id, None).await.unwrap();
        assert_eq!(refunded, 1000);
    }
}
