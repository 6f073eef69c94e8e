use anyhow::Result;
use async_trait::async_trait;
use diesel::{OptionalExtension, RunQueryDsl, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain;
use crate::infra::db::postgres::{
    postgres_connection::PgPoolSquad,
    schema::{plan_prices, plans},
};
use domain::{
    entities::plans::{PlanEntity, PlanPriceEntity, PlanRow},
    repositories::plans::PlanRepository,
    value_objects::enums::billing_intervals::BillingInterval,
};

pub struct PlanPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PlanPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PlanRepository for PlanPostgres {
    async fn list_active_plans(&self) -> Result<Vec<PlanEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = plans::table
            .filter(plans::is_active.eq(true))
            .order(plans::created_at.asc())
            .select(PlanRow::as_select())
            .load::<PlanRow>(&mut conn)?;

        Ok(rows.into_iter().map(PlanEntity::from).collect())
    }

    async fn find_active_plan_by_id(&self, plan_id: Uuid) -> Result<Option<PlanEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = plans::table
            .filter(plans::id.eq(plan_id))
            .filter(plans::is_active.eq(true))
            .select(PlanRow::as_select())
            .first::<PlanRow>(&mut conn)
            .optional()?;

        Ok(row.map(PlanEntity::from))
    }

    async fn list_active_prices(&self, plan_id: Uuid) -> Result<Vec<PlanPriceEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let prices = plan_prices::table
            .filter(plan_prices::plan_id.eq(plan_id))
            .filter(plan_prices::is_active.eq(true))
            .select(PlanPriceEntity::as_select())
            .load::<PlanPriceEntity>(&mut conn)?;

        Ok(prices)
    }

    async fn find_price(
        &self,
        plan_id: Uuid,
        currency: &str,
        interval: BillingInterval,
    ) -> Result<Option<PlanPriceEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let price = plan_prices::table
            .filter(plan_prices::plan_id.eq(plan_id))
            .filter(plan_prices::currency.eq(currency))
            .filter(plan_prices::interval.eq(interval.to_string()))
            .filter(plan_prices::is_active.eq(true))
            .select(PlanPriceEntity::as_select())
            .first::<PlanPriceEntity>(&mut conn)
            .optional()?;

        Ok(price)
    }
}
