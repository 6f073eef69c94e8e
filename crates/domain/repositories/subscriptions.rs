use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity};
use crate::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;

#[async_trait]
#[automock]
pub trait SubscriptionRepository {
    async fn create(&self, insert_subscription_entity: InsertSubscriptionEntity) -> Result<Uuid>;

    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>>;

    /// The at-most-one live (`active`/`trialing`) subscription of a user.
    async fn find_live_subscription_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<SubscriptionEntity>>;

    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionEntity>>;

    async fn update_status(&self, subscription_id: Uuid, status: SubscriptionStatus) -> Result<()>;

    async fn set_provider_subscription_id(
        &self,
        subscription_id: Uuid,
        provider_subscription_id: String,
    ) -> Result<()>;

    /// Immediate cancellation: flips the status and disables auto-renew.
    async fn mark_cancelled(
        &self,
        subscription_id: Uuid,
        cancelled_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<()>;

    /// End-of-period cancellation: records the intent but leaves the
    /// subscription live until `current_period_end`.
    async fn schedule_cancellation(
        &self,
        subscription_id: Uuid,
        cancelled_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<()>;

    /// Rolls the billing window and sets the new status in one write.
    async fn activate_period(
        &self,
        subscription_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        status: SubscriptionStatus,
    ) -> Result<()>;

    /// Derived display counters; the ledger remains the source of truth.
    async fn add_granted_credits(&self, subscription_id: Uuid, amount: i64) -> Result<()>;

    async fn add_used_credits(&self, subscription_id: Uuid, amount: i64) -> Result<()>;

    /// Subscriptions whose current period has lapsed and that still need a
    /// lifecycle decision (renew, past_due, suspend, expire).
    async fn list_due_for_renewal(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SubscriptionEntity>>;
}
