use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::plans::{PlanEntity, PlanPriceEntity};
use crate::domain::value_objects::enums::billing_intervals::BillingInterval;

#[async_trait]
#[automock]
pub trait PlanRepository {
    async fn list_active_plans(&self) -> Result<Vec<PlanEntity>>;

    async fn find_active_plan_by_id(&self, plan_id: Uuid) -> Result<Option<PlanEntity>>;

    async fn list_active_prices(&self, plan_id: Uuid) -> Result<Vec<PlanPriceEntity>>;

    /// Unique per `(plan_id, currency, interval)`.
    async fn find_price(
        &self,
        plan_id: Uuid,
        currency: &str,
        interval: BillingInterval,
    ) -> Result<Option<PlanPriceEntity>>;
}
