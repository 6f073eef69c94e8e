use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::plans::PlanFeatures,
    infra::db::postgres::schema::{plan_prices, plans},
};

#[derive(Debug, Clone)]
pub struct PlanEntity {
    pub id: Uuid,
    pub name: String,
    pub monthly_credits: i64,
    /// Zero means the plan has no trial.
    pub trial_days: i32,
    pub features: PlanFeatures,
    pub is_active: bool,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
}

/// Raw row used for Diesel queries. Features stay as JSON and are parsed into PlanFeatures.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = plans)]
pub struct PlanRow {
    pub id: Uuid,
    pub name: String,
    pub monthly_credits: i64,
    pub trial_days: i32,
    pub features: serde_json::Value,
    pub is_active: bool,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
}

impl From<PlanRow> for PlanEntity {
    fn from(value: PlanRow) -> Self {
        let features = serde_json::from_value(value.features).unwrap_or_default();

        Self {
            id: value.id,
            name: value.name,
            monthly_credits: value.monthly_credits,
            trial_days: value.trial_days,
            features,
            is_active: value.is_active,
            is_featured: value.is_featured,
            created_at: value.created_at,
        }
    }
}

/// One concurrent price point of a plan. Unique per
/// `(plan_id, currency, interval)`.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = plan_prices)]
pub struct PlanPriceEntity {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub currency: String,
    pub interval: String,
    pub amount_minor: i32,
    pub stripe_price_id: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = plan_prices)]
pub struct InsertPlanPriceEntity {
    pub plan_id: Uuid,
    pub currency: String,
    pub interval: String,
    pub amount_minor: i32,
    pub stripe_price_id: Option<String>,
    pub is_active: bool,
}
