use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::subscriptions::SubscriptionEntity;
use crate::domain::value_objects::enums::{
    billing_intervals::BillingInterval, subscription_statuses::SubscriptionStatus,
};
use crate::domain::value_objects::plans::PlanFeatures;

#[derive(Debug, Serialize)]
pub struct CurrentSubscriptionDto {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub trial_end: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub features: PlanFeatures,
}

impl CurrentSubscriptionDto {
    pub fn from_entity(subscription: &SubscriptionEntity, plan_name: String, features: PlanFeatures) -> Self {
        Self {
            plan_id: subscription.plan_id,
            plan_name,
            status: SubscriptionStatus::from_str(&subscription.status),
            current_period_start: subscription.current_period_start,
            current_period_end: subscription.current_period_end,
            trial_end: subscription.trial_end,
            auto_renew: subscription.auto_renew,
            cancelled_at: subscription.cancelled_at,
            features,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub plan_id: Uuid,
    pub currency: String,
    pub interval: String,
}

#[derive(Debug, Serialize)]
pub struct CreateCheckoutResponse {
    pub checkout_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionRequest {
    pub reason: Option<String>,
}

/// Billing window derived from an interval anchor. Used both when a period
/// is activated from a gateway event and when the worker rolls one locally.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingPeriod {
    pub fn from_start(start: DateTime<Utc>, interval: BillingInterval) -> Self {
        Self {
            start,
            end: start + chrono::Duration::days(interval.period_days()),
        }
    }
}
