use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::subscriptions},
};
use domain::{
    entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
    repositories::subscriptions::SubscriptionRepository,
    value_objects::enums::subscription_statuses::SubscriptionStatus,
};

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn create(&self, insert_subscription_entity: InsertSubscriptionEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let subscription_id = insert_into(subscriptions::table)
            .values(&insert_subscription_entity)
            .returning(subscriptions::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(subscription_id)
    }

    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let subscription = subscriptions::table
            .filter(subscriptions::id.eq(subscription_id))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(subscription)
    }

    async fn find_live_subscription_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let live_statuses = vec![
            SubscriptionStatus::Active.to_string(),
            SubscriptionStatus::Trialing.to_string(),
        ];

        let subscription = subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .filter(subscriptions::status.eq_any(live_statuses))
            .order(subscriptions::created_at.desc())
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(subscription)
    }

    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let subscription = subscriptions::table
            .filter(subscriptions::provider_subscription_id.eq(provider_subscription_id))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(subscription)
    }

    async fn update_status(&self, subscription_id: Uuid, status: SubscriptionStatus) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscriptions::table.filter(subscriptions::id.eq(subscription_id)))
            .set((
                subscriptions::status.eq(status.to_string()),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn set_provider_subscription_id(
        &self,
        subscription_id: Uuid,
        provider_subscription_id: String,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscriptions::table.filter(subscriptions::id.eq(subscription_id)))
            .set((
                subscriptions::provider_subscription_id.eq(Some(provider_subscription_id)),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn mark_cancelled(
        &self,
        subscription_id: Uuid,
        cancelled_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscriptions::table.filter(subscriptions::id.eq(subscription_id)))
            .set((
                subscriptions::status.eq(SubscriptionStatus::Cancelled.to_string()),
                subscriptions::cancelled_at.eq(Some(cancelled_at)),
                subscriptions::cancelled_reason.eq(reason),
                subscriptions::auto_renew.eq(false),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn schedule_cancellation(
        &self,
        subscription_id: Uuid,
        cancelled_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscriptions::table.filter(subscriptions::id.eq(subscription_id)))
            .set((
                subscriptions::cancelled_at.eq(Some(cancelled_at)),
                subscriptions::cancelled_reason.eq(reason),
                subscriptions::auto_renew.eq(false),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn activate_period(
        &self,
        subscription_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        status: SubscriptionStatus,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscriptions::table.filter(subscriptions::id.eq(subscription_id)))
            .set((
                subscriptions::status.eq(status.to_string()),
                subscriptions::current_period_start.eq(period_start),
                subscriptions::current_period_end.eq(period_end),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn add_granted_credits(&self, subscription_id: Uuid, amount: i64) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscriptions::table.filter(subscriptions::id.eq(subscription_id)))
            .set((
                subscriptions::credits_granted.eq(subscriptions::credits_granted + amount),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn add_used_credits(&self, subscription_id: Uuid, amount: i64) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(subscriptions::table.filter(subscriptions::id.eq(subscription_id)))
            .set((
                subscriptions::credits_used.eq(subscriptions::credits_used + amount),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn list_due_for_renewal(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let due_statuses = vec![
            SubscriptionStatus::Active.to_string(),
            SubscriptionStatus::Trialing.to_string(),
            SubscriptionStatus::PastDue.to_string(),
        ];

        let subscriptions = subscriptions::table
            .filter(subscriptions::status.eq_any(due_statuses))
            .filter(subscriptions::current_period_end.le(now))
            .order(subscriptions::current_period_end.asc())
            .limit(limit)
            .select(SubscriptionEntity::as_select())
            .load::<SubscriptionEntity>(&mut conn)?;

        Ok(subscriptions)
    }
}
